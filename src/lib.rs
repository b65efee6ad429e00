// === Public Modules (The Canonical Paths) ===
pub mod agent;
pub mod archetype;
pub mod composition;
pub mod context;
pub mod error;
pub mod exchange;
pub mod kernel;
pub mod nuclide;
pub mod recorder;
pub mod resource;
pub mod toolkit;
pub mod trader;

// === Private Implementation Details ===
mod macros;

// === Convenience ===
pub mod sorted_vec_map;

// === Facades (Re-exporting internals) ===
// The types almost every consumer touches.
pub use crate::composition::{CompMap, CompRef, Composition};
pub use crate::context::{Context, SimInfo};
pub use crate::error::{SimError, SimResult};
pub use crate::kernel::Kernel;
pub use crate::nuclide::NucId;
pub use crate::resource::material::Material;
pub use crate::resource::product::Product;
