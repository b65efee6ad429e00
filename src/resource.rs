pub mod buffer;
pub mod material;
pub mod product;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::context::Context;
use crate::error::SimResult;
use crate::{impl_display_primitive, impl_from_primitive};

/// Process-unique resource identity, monotonically increasing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ResourceId(pub u64);
impl_from_primitive!(ResourceId, u64);
impl_display_primitive!(ResourceId);

/// Grouping identity preserved across extract/absorb splits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ObjId(pub u64);
impl_from_primitive!(ObjId, u64);
impl_display_primitive!(ObjId);

/// Content-version identity; advances on every state change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct StateId(pub u64);
impl_from_primitive!(StateId, u64);
impl_display_primitive!(StateId);

/// The two concrete resource families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "PascalCase")]
pub enum ResourceType {
    Material,
    Product,
}

/// Comparison tolerance for quantities, in the resource's own units.
pub const QTY_EPS: f64 = 1e-10;

/// Common contract over the two resource families.
///
/// The exchange, buffers, and trader plumbing are generic over this trait;
/// everything composition-specific stays on [`material::Material`] itself.
pub trait ResourceLike: Sized + Clone + std::fmt::Debug {
    const TYPE: ResourceType;

    fn id(&self) -> ResourceId;
    fn obj_id(&self) -> ObjId;
    fn state_id(&self) -> StateId;

    /// Current quantity in this resource's units (kg for materials, count
    /// for products).
    fn quantity(&self) -> f64;

    /// Unit label recorded alongside the quantity.
    fn units(&self) -> String;

    /// Splits `qty` off this resource, returning a new resource sharing the
    /// obj-id. Fails with a `ValueError` when `qty` exceeds the quantity
    /// beyond [`QTY_EPS`].
    fn extract(&mut self, ctx: &mut Context, qty: f64) -> SimResult<Self>;

    /// Combines `other` into this resource; `other` is left at zero
    /// quantity. Fails when the two resources cannot mix.
    fn absorb(&mut self, ctx: &mut Context, other: &mut Self) -> SimResult<()>;

    /// Baseline preference a requester assigns an offered resource when the
    /// archetype does not override it.
    fn default_preference(&self) -> f64;
}
