use tracing::{debug, trace};

use crate::agent::AgentId;
use crate::composition::{CompMap, CompRef, Composition};
use crate::context::Context;
use crate::error::{SimResult, ValueError};
use crate::resource::{ObjId, QTY_EPS, ResourceId, ResourceLike, ResourceType, StateId};

/// A conserved-mass resource with isotopic composition.
///
/// Quantity is mass in kilograms. The composition handle is immutable and
/// shared; content changes swap the handle and advance the state id. A
/// material created through [`Material::create`] records every state change
/// into the `Resources` table; untracked materials (exemplars, test
/// fixtures) skip recording entirely.
#[derive(Debug, Clone)]
pub struct Material {
    id: ResourceId,
    obj: ObjId,
    state: StateId,
    qty: f64,
    comp: CompRef,
    /// Timestep of the last applied decay.
    prev_decay_time: u32,
    tracked: bool,
}

impl Material {
    /// Creates a material outside the simulation record. Used for exemplar
    /// resources in requests/bids and for tests.
    pub fn create_untracked(qty: f64, comp: CompRef) -> SimResult<Self> {
        validate_qty(qty)?;
        Ok(Self {
            id: ResourceId::default(),
            obj: ObjId::default(),
            state: StateId::default(),
            qty,
            comp,
            prev_decay_time: 0,
            tracked: false,
        })
    }

    /// Creates a tracked material: assigns fresh ids, records the
    /// composition if unseen, and emits the creation row.
    pub fn create(
        ctx: &mut Context,
        creator: AgentId,
        qty: f64,
        comp: CompRef,
    ) -> SimResult<Self> {
        validate_qty(qty)?;
        let mut mat = Self {
            id: ctx.next_resource_id(),
            obj: ctx.next_obj_id(),
            state: ctx.next_state_id(),
            qty,
            comp,
            prev_decay_time: ctx.time(),
            tracked: true,
        };
        debug!(creator = %creator, id = %mat.id, qty, "material created");
        mat.record(ctx, None, None);
        Ok(mat)
    }

    /// The shared composition handle.
    pub fn comp(&self) -> &CompRef {
        &self.comp
    }

    /// Mass in kilograms of a single nuclide within this material.
    pub fn mass_of(&self, nuc: crate::nuclide::NucId) -> f64 {
        self.qty * self.comp.mass_frac(nuc)
    }

    /// Removes exactly `qty` kg with this material's composition.
    pub fn extract_qty(&mut self, ctx: &mut Context, qty: f64) -> SimResult<Self> {
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
            comp: self.comp.clone(),
            prev_decay_time: self.prev_decay_time,
            tracked: self.tracked,
        };
        if self.tracked {
            self.record(ctx, None, None);
            child.record(ctx, Some(self.id), None);
        }
        trace!(from = %self.id, to = %child.id, qty, "extract");
        Ok(child)
    }

    /// Removes `qty` kg of the given composition from this material.
    ///
    /// Succeeds only when the material holds at least the implied mass of
    /// every constituent of `comp`, within `threshold` kg.
    pub fn extract_comp(
        &mut self,
        ctx: &mut Context,
        qty: f64,
        comp: &CompRef,
        threshold: f64,
    ) -> SimResult<Self> {
        validate_qty(qty)?;
        if qty > self.qty + threshold {
            return Err(ValueError::ExtractExceedsInventory {
                requested: qty,
                available: self.qty,
            }
            .into());
        }

        let mut remainder = CompMap::new();
        for (&nuc, &frac) in self.comp.mass().iter() {
            remainder.insert(nuc, frac * self.qty);
        }
        for (&nuc, &frac) in comp.mass().iter() {
            let want = frac * qty;
            let have = self.qty * self.comp.mass_frac(nuc);
            if want > have + threshold {
                return Err(ValueError::ComponentDeficit {
                    nuclide: nuc.name(),
                    requested: want,
                    deficit: want - have,
                }
                .into());
            }
            remainder.update(nuc, 0.0, |v| *v = (*v - want).max(0.0));
        }

        self.qty = (self.qty - qty).max(0.0);
        if self.qty > QTY_EPS {
            remainder.retain(|_, v| *v > 0.0);
            self.comp = Composition::from_mass(remainder)?;
        }
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
            comp: comp.clone(),
            prev_decay_time: self.prev_decay_time,
            tracked: self.tracked,
        };
        if self.tracked {
            self.record(ctx, None, None);
            child.record(ctx, Some(self.id), None);
        }
        Ok(child)
    }

    /// Replaces the composition without changing the quantity.
    pub fn transmute(&mut self, ctx: &mut Context, comp: CompRef) -> SimResult<()> {
        self.comp = comp;
        self.bump(ctx);
        if self.tracked {
            self.record(ctx, None, None);
        }
        Ok(())
    }

    /// Applies radioactive decay if at least the context's decay interval
    /// has elapsed since the last decay; otherwise a no-op. A decay
    /// interval of zero disables decay entirely.
    pub fn decay(&mut self, ctx: &mut Context, curr_time: u32) -> SimResult<()> {
        let interval = ctx.decay_interval();
        if interval == 0 {
            return Ok(());
        }
        let dt = curr_time.saturating_sub(self.prev_decay_time);
        if dt < interval {
            return Ok(());
        }
        self.comp = ctx.decay_comp(&self.comp, dt)?;
        self.prev_decay_time = curr_time;
        self.bump(ctx);
        if self.tracked {
            self.record(ctx, None, None);
        }
        Ok(())
    }

    fn bump(&mut self, ctx: &mut Context) {
        if self.tracked {
            self.state = ctx.next_state_id();
        }
    }

    fn record(&self, ctx: &mut Context, p1: Option<ResourceId>, p2: Option<ResourceId>) {
        let qual = ctx.record_composition(&self.comp);
        ctx.record_resource(
            ResourceType::Material,
            self.id,
            self.obj,
            self.qty,
            "kg",
            qual,
            p1,
            p2,
        );
    }
}

impl ResourceLike for Material {
    const TYPE: ResourceType = ResourceType::Material;

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
        "kg".to_string()
    }

    fn extract(&mut self, ctx: &mut Context, qty: f64) -> SimResult<Self> {
        self.extract_qty(ctx, qty)
    }

    /// `new_fracs = (m1·c1 + m2·c2) / (m1 + m2)`; `other` ends at zero.
    fn absorb(&mut self, ctx: &mut Context, other: &mut Self) -> SimResult<()> {
        let total = self.qty + other.qty;
        if other.qty > QTY_EPS {
            self.comp = Composition::mix([(&self.comp, self.qty), (&other.comp, other.qty)])?;
        }
        self.qty = total;
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

    /// Higher fissile content is preferred by default for materials.
    fn default_preference(&self) -> f64 {
        let u235 = crate::nuclide::NucId::new(92, 235, 0).expect("static id");
        1.0 + self.comp.mass_frac(u235)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nuclide::NucId;

    fn u235() -> NucId {
        NucId::new(92, 235, 0).unwrap()
    }

    fn u238() -> NucId {
        NucId::new(92, 238, 0).unwrap()
    }

    fn natu() -> CompRef {
        Composition::from_mass([(u235(), 0.007), (u238(), 0.993)]).unwrap()
    }

    fn ctx() -> Context {
        Context::for_testing()
    }

    #[test]
    fn extract_conserves_quantity() {
        let mut ctx = ctx();
        let mut mat = Material::create_untracked(10.0, natu()).unwrap();
        let child = mat.extract_qty(&mut ctx, 4.0).unwrap();
        assert!((mat.quantity() - 6.0).abs() < QTY_EPS);
        assert!((child.quantity() - 4.0).abs() < QTY_EPS);
        assert_eq!(mat.obj_id(), child.obj_id());
        assert!(std::sync::Arc::ptr_eq(mat.comp(), child.comp()));
    }

    #[test]
    fn extract_beyond_inventory_fails() {
        let mut ctx = ctx();
        let mut mat = Material::create_untracked(1.0, natu()).unwrap();
        let err = mat.extract_qty(&mut ctx, 1.5).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Value);
        // The failed call left the source untouched.
        assert!((mat.quantity() - 1.0).abs() < QTY_EPS);
    }

    #[test]
    fn absorb_mixes_mass_weighted() {
        let mut ctx = ctx();
        let heu = Composition::from_mass([(u235(), 0.9), (u238(), 0.1)]).unwrap();
        let mut a = Material::create_untracked(1.0, natu()).unwrap();
        let mut b = Material::create_untracked(1.0, heu).unwrap();
        a.absorb(&mut ctx, &mut b).unwrap();

        assert!((a.quantity() - 2.0).abs() < QTY_EPS);
        assert_eq!(b.quantity(), 0.0);
        let expect = (0.007 + 0.9) / 2.0;
        assert!((a.comp().mass_frac(u235()) - expect).abs() < 1e-12);
    }

    #[test]
    fn extract_comp_removes_named_composition() {
        let mut ctx = ctx();
        let mut mat = Material::create_untracked(100.0, natu()).unwrap();
        let pure_u235 = Composition::from_mass([(u235(), 1.0)]).unwrap();

        // 100 kg of natu holds 0.7 kg U-235.
        let got = mat.extract_comp(&mut ctx, 0.5, &pure_u235, 1e-9).unwrap();
        assert!((got.quantity() - 0.5).abs() < QTY_EPS);
        assert!((mat.quantity() - 99.5).abs() < QTY_EPS);
        let left = mat.mass_of(u235());
        assert!((left - 0.2).abs() < 1e-9, "got {left}");

        // Asking for more U-235 than remains fails.
        assert!(mat.extract_comp(&mut ctx, 0.5, &pure_u235, 1e-9).is_err());
    }

    #[test]
    fn transmute_keeps_quantity() {
        let mut ctx = ctx();
        let mut mat = Material::create_untracked(3.0, natu()).unwrap();
        let leu = Composition::from_mass([(u235(), 0.04), (u238(), 0.96)]).unwrap();
        mat.transmute(&mut ctx, leu.clone()).unwrap();
        assert!((mat.quantity() - 3.0).abs() < QTY_EPS);
        assert!((mat.comp().mass_frac(u235()) - 0.04).abs() < 1e-12);
    }

    #[test]
    fn tracked_lineage_is_recorded() {
        let mut ctx = ctx();
        let creator = AgentId(1);
        let mut mat = Material::create(&mut ctx, creator, 5.0, natu()).unwrap();
        let child = mat.extract_qty(&mut ctx, 2.0).unwrap();
        assert_ne!(mat.id(), child.id());
        assert_eq!(mat.obj_id(), child.obj_id());
        assert!(child.id() > mat.id());
        assert!(mat.comp().recorded());
    }
}
