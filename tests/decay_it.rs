mod common;

use common::*;
use nucycle::agent::AgentId;
use nucycle::composition::Composition;
use nucycle::context::{Context, SimInfo};
use nucycle::resource::ResourceLike;
use nucycle::{Material, NucId};

fn decaying_ctx() -> Context {
    let mut info = SimInfo::new(1).with_decay_interval(1);
    info.decay_tol = 1e-8;
    Context::new(info)
}

fn cs137() -> NucId {
    NucId::new(55, 137, 0).unwrap()
}

fn sr90() -> NucId {
    NucId::new(38, 90, 0).unwrap()
}

/// Decaying a recorded composition by Δ then 2Δ lands on the same shared
/// object as decaying the root by 3Δ directly.
#[test]
fn decay_lineage_is_reused_across_paths() {
    init_tracing();
    let mut ctx = decaying_ctx();
    let root = Composition::from_mass([(cs137(), 0.5), (sr90(), 0.5)]).unwrap();
    ctx.record_composition(&root);

    let step = 120;
    let after_1 = ctx.decay_comp(&root, step).unwrap();
    let after_3_chained = ctx.decay_comp(&after_1, 2 * step).unwrap();
    let after_3_direct = ctx.decay_comp(&root, 3 * step).unwrap();

    assert!(std::sync::Arc::ptr_eq(&after_3_chained, &after_3_direct));
    assert_eq!(Composition::root_decay_time(&after_3_chained), 3 * step);
}

/// Applying decay in n chunks summing to T matches a single decay of T.
#[test]
fn chunked_decay_matches_single_decay() {
    init_tracing();
    let mut ctx = decaying_ctx();
    let comp = Composition::from_mass([(cs137(), 1.0)]).unwrap();

    let mut chunked = comp.clone();
    for _ in 0..6 {
        chunked = ctx.decay_comp(&chunked, 20).unwrap();
    }
    let single = ctx.decay_comp(&comp, 120).unwrap();

    for (nuc, frac) in single.mass().iter() {
        let other = chunked.mass_frac(*nuc);
        assert!(
            (frac - other).abs() < 1e-5,
            "{nuc}: {frac} vs {other}"
        );
    }
}

/// Material decay is lazy: below the configured interval nothing happens,
/// past it the composition handle is swapped.
#[test]
fn material_decay_honors_the_interval() {
    init_tracing();
    let mut ctx = Context::new(SimInfo::new(1).with_decay_interval(6));
    let comp = Composition::from_mass([(cs137(), 1.0)]).unwrap();
    let mut mat = Material::create(&mut ctx, AgentId(1), 1.0, comp.clone()).unwrap();

    // Too soon: the composition handle is untouched.
    mat.decay(&mut ctx, 3).unwrap();
    assert!(std::sync::Arc::ptr_eq(mat.comp(), &comp));

    // Past the interval: decay applies.
    mat.decay(&mut ctx, 8).unwrap();
    assert!(!std::sync::Arc::ptr_eq(mat.comp(), &comp));
    assert!(mat.comp().mass_frac(cs137()) < 1.0);

    // Quantity is untouched by decay bookkeeping.
    assert!((mat.quantity() - 1.0).abs() < 1e-12);
}

/// A zero decay interval disables decay entirely.
#[test]
fn zero_interval_disables_decay() {
    init_tracing();
    let mut ctx = Context::new(SimInfo::new(1));
    let comp = Composition::from_mass([(cs137(), 1.0)]).unwrap();
    let mut mat = Material::create(&mut ctx, AgentId(1), 1.0, comp.clone()).unwrap();

    mat.decay(&mut ctx, 1000).unwrap();
    assert!(std::sync::Arc::ptr_eq(mat.comp(), &comp));
}
