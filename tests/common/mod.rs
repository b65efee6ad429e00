#![allow(dead_code)]

use nucycle::composition::CompRef;
use nucycle::{Composition, NucId};

pub fn u235() -> NucId {
    NucId::new(92, 235, 0).unwrap()
}

pub fn u238() -> NucId {
    NucId::new(92, 238, 0).unwrap()
}

/// Pure U-238; a feed no enricher can use.
pub fn c_nou235() -> CompRef {
    Composition::from_mass([(u238(), 1.0)]).unwrap()
}

/// Natural uranium.
pub fn c_natu1() -> CompRef {
    Composition::from_mass([(u235(), 0.007), (u238(), 0.993)]).unwrap()
}

/// Slightly enriched natural-like feed.
pub fn c_natu2() -> CompRef {
    Composition::from_mass([(u235(), 0.01), (u238(), 0.99)]).unwrap()
}

/// Low-enriched reactor fuel.
pub fn c_leu() -> CompRef {
    Composition::from_mass([(u235(), 0.04), (u238(), 0.96)]).unwrap()
}

/// Highly-enriched uranium.
pub fn c_heu() -> CompRef {
    Composition::from_mass([(u235(), 0.20), (u238(), 0.80)]).unwrap()
}

/// Opt-in logging for debugging test runs: `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
