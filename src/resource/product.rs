use tracing::debug;

use crate::agent::AgentId;
use crate::context::Context;
use crate::error::{SimResult, ValueError};
use crate::resource::{ObjId, QTY_EPS, ResourceId, ResourceLike, ResourceType, StateId};

/// A countable resource with a free-form quality label and no composition.
///
/// Products with equal quality are interchangeable and may absorb one
/// another; differing qualities never mix.
#[derive(Debug, Clone)]
pub struct Product {
    id: ResourceId,
    obj: ObjId,
    state: StateId,
    qty: f64,
    quality: String,
    tracked: bool,
}

impl Product {
    /// Creates a product outside the simulation record.
    pub fn create_untracked(qty: f64, quality: impl Into<String>) -> SimResult<Self> {
        validate_qty(qty)?;
        Ok(Self {
            id: ResourceId::default(),
            obj: ObjId::default(),
            state: StateId::default(),
            qty,
            quality: quality.into(),
            tracked: false,
        })
    }

    /// Creates a tracked product and emits its creation row.
    pub fn create(
        ctx: &mut Context,
        creator: AgentId,
        qty: f64,
        quality: impl Into<String>,
    ) -> SimResult<Self> {
        validate_qty(qty)?;
        let prod = Self {
            id: ctx.next_resource_id(),
            obj: ctx.next_obj_id(),
            state: ctx.next_state_id(),
            qty,
            quality: quality.into(),
            tracked: true,
        };
        debug!(creator = %creator, id = %prod.id, qty, quality = %prod.quality, "product created");
        prod.record(ctx, None, None);
        Ok(prod)
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    fn bump(&mut self, ctx: &mut Context) {
        if self.tracked {
            self.state = ctx.next_state_id();
        }
    }

    fn record(&self, ctx: &mut Context, p1: Option<ResourceId>, p2: Option<ResourceId>) {
        let qual = ctx.record_quality(&self.quality);
        ctx.record_resource(
            ResourceType::Product,
            self.id,
            self.obj,
            self.qty,
            &self.quality,
            qual,
            p1,
            p2,
        );
    }
}

impl ResourceLike for Product {
    const TYPE: ResourceType = ResourceType::Product;

    fn id(&self) -> ResourceId {
        self.id
    }

    fn obj_id(&self) -> ObjId {
        self.obj
    }

    fn state_id(&self) -> StateId {
        self.state
    }

    fn quantity(&self) -> f64 {
        self.qty
    }

    fn units(&self) -> String {
        self.quality.clone()
    }

    fn extract(&mut self, ctx: &mut Context, qty: f64) -> SimResult<Self> {
        validate_qty(qty)?;
        if qty > self.qty + QTY_EPS {
            return Err(ValueError::ExtractExceedsInventory {
                requested: qty,
                available: self.qty,
            }
            .into());
        }
        self.qty = (self.qty - qty).max(0.0);
        self.bump(ctx);
        let child = Self {
            id: if self.tracked {
                ctx.next_resource_id()
            } else {
                ResourceId::default()
            },
            obj: self.obj,
            state: if self.tracked {
                ctx.next_state_id()
            } else {
                StateId::default()
            },
            qty,
            quality: self.quality.clone(),
            tracked: self.tracked,
        };
        if self.tracked {
            self.record(ctx, None, None);
            child.record(ctx, Some(self.id), None);
        }
        Ok(child)
    }

    fn absorb(&mut self, ctx: &mut Context, other: &mut Self) -> SimResult<()> {
        if self.quality != other.quality {
            return Err(ValueError::ResourceTypeMismatch {
                own: self.quality.clone(),
                other: other.quality.clone(),
            }
            .into());
        }
        self.qty += other.qty;
        other.qty = 0.0;
        self.bump(ctx);
        other.bump(ctx);
        if self.tracked {
            self.record(ctx, Some(self.id), Some(other.id));
        }
        if other.tracked {
            other.record(ctx, None, None);
        }
        Ok(())
    }

    /// Products are mutually interchangeable; no intrinsic preference.
    fn default_preference(&self) -> f64 {
        1.0
    }
}

fn validate_qty(qty: f64) -> SimResult<()> {
    if !qty.is_finite() {
        return Err(ValueError::NonFiniteQuantity(qty).into());
    }
    if qty < 0.0 {
        return Err(ValueError::NegativeQuantity(qty).into());
    }
    Ok(())
}
