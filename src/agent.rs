use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use tracing::debug;

use crate::context::Context;
use crate::error::{SimResult, StateError};
use crate::exchange::PrefAdjustment;
use crate::resource::material::Material;
use crate::resource::product::Product;
use crate::trader::Trader;
use crate::{impl_display_primitive, impl_from_primitive};

/// Unique agent identity; allocation order fixes phase visit order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct AgentId(pub u64);
impl_from_primitive!(AgentId, u64);
impl_display_primitive!(AgentId);

/// Position of an agent in the typed containment tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "PascalCase")]
pub enum AgentKind {
    Region,
    Institution,
    Facility,
    Other,
}

impl AgentKind {
    /// Containment rule: regions sit at the root, institutions under
    /// regions, facilities under institutions. `Other` is unconstrained.
    pub fn legal_under(self, parent: Option<AgentKind>) -> bool {
        matches!(
            (self, parent),
            (AgentKind::Region, None)
                | (AgentKind::Institution, Some(AgentKind::Region))
                | (AgentKind::Facility, Some(AgentKind::Institution))
                | (AgentKind::Other, _)
        )
    }
}

/// Lifecycle states; transitions run strictly left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AgentState {
    Configured,
    Built,
    Entered,
    Live,
    Decommissioning,
    Dead,
}

/// Tree and lifecycle bookkeeping for one agent; behavior lives in the
/// boxed [`Archetype`] beside it.
#[derive(Debug, Clone)]
pub struct AgentMeta {
    pub id: AgentId,
    pub kind: AgentKind,
    pub prototype: String,
    pub implementation: String,
    pub parent: Option<AgentId>,
    pub children: Vec<AgentId>,
    pub enter_time: Option<u32>,
    pub exit_time: Option<u32>,
    pub state: AgentState,
}

impl AgentMeta {
    pub fn is_live(&self) -> bool {
        matches!(self.state, AgentState::Entered | AgentState::Live)
    }

    pub(crate) fn transition(&mut self, to: AgentState) -> SimResult<()> {
        use AgentState::*;
        let ok = matches!(
            (self.state, to),
            (Configured, Built)
                | (Built, Entered)
                | (Entered, Live)
                | (Live, Live)
                | (Entered, Decommissioning)
                | (Live, Decommissioning)
                | (Decommissioning, Dead)
        );
        if !ok {
            return Err(StateError::Lifecycle {
                agent: self.id.0,
                state: self.state.to_string(),
                operation: format!("transition to {to}"),
            }
            .into());
        }
        self.state = to;
        Ok(())
    }
}

/// The capability set an archetype may implement.
///
/// Every method has a default; an archetype opts into the phases and trade
/// families it cares about. The kernel stores these as boxed values and
/// dispatches per capability, never through an inheritance hierarchy.
pub trait Archetype {
    /// Spec path this behavior was loaded from, e.g. `":nucycle:Source"`.
    fn spec(&self) -> &'static str;

    /// One-time broadcast before the first timestep; lets agents
    /// initialize from one another.
    fn pre_history(&mut self, _ctx: &mut Context, _own: &AgentMeta) -> SimResult<()> {
        Ok(())
    }

    /// Called after the agent enters the simulation.
    fn enter_notify(&mut self, _ctx: &mut Context, _own: &AgentMeta) -> SimResult<()> {
        Ok(())
    }

    /// Whether Tick/Tock are delivered to this agent.
    fn time_listener(&self) -> bool {
        false
    }

    /// Whether per-day tasks are delivered to this agent.
    fn daily_listener(&self) -> bool {
        false
    }

    /// Plan phase: runs before any exchange resolution of the step.
    fn tick(&mut self, _ctx: &mut Context, _own: &AgentMeta) -> SimResult<()> {
        Ok(())
    }

    /// Commit phase: runs after all exchanges resolve.
    fn tock(&mut self, _ctx: &mut Context, _own: &AgentMeta) -> SimResult<()> {
        Ok(())
    }

    /// Daily task hook, `day` in `0..days_per_step`.
    fn daily(&mut self, _ctx: &mut Context, _own: &AgentMeta, _day: u32) -> SimResult<()> {
        Ok(())
    }

    /// Material-family trading capability, if any.
    fn material_trader(&mut self) -> Option<&mut dyn Trader<Material>> {
        None
    }

    /// Product-family trading capability, if any.
    fn product_trader(&mut self) -> Option<&mut dyn Trader<Product>> {
        None
    }

    /// Policy hook: ancestors of a requester may reweight its preferences
    /// after the trade graph is built but before resolution.
    fn adjust_material_prefs(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        _prefs: &mut PrefAdjustment,
    ) {
    }

    /// Product-family counterpart of [`Self::adjust_material_prefs`].
    fn adjust_product_prefs(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        _prefs: &mut PrefAdjustment,
    ) {
    }

    /// Teardown hook; runs before the agent leaves the tree.
    fn decommission(&mut self, _ctx: &mut Context, _own: &AgentMeta) -> SimResult<()> {
        Ok(())
    }

    /// Writes agent-private state rows keyed by (agent, table).
    fn snapshot(&mut self, _ctx: &mut Context, _own: &AgentMeta) -> SimResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype").field("spec", &self.spec()).finish()
    }
}

/// An agent: tree bookkeeping plus boxed behavior.
pub struct AgentSlot {
    pub meta: AgentMeta,
    pub behavior: Box<dyn Archetype>,
}

/// The running agent set, keyed by id.
///
/// Phase dispatch visits ids in ascending order; callbacks receive
/// `&mut Context` while their slot is temporarily out of the registry, so
/// an agent never aliases itself through the registry.
#[derive(Default)]
pub struct AgentRegistry {
    slots: BTreeMap<AgentId, AgentSlot>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ascending ids of all agents currently in the registry.
    pub fn ids(&self) -> Vec<AgentId> {
        self.slots.keys().copied().collect()
    }

    /// Ascending ids of live agents only.
    pub fn live_ids(&self) -> Vec<AgentId> {
        self.slots
            .iter()
            .filter(|(_, s)| s.meta.is_live())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn get(&self, id: AgentId) -> Option<&AgentSlot> {
        self.slots.get(&id)
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut AgentSlot> {
        self.slots.get_mut(&id)
    }

    pub fn insert(&mut self, slot: AgentSlot) {
        debug!(id = %slot.meta.id, kind = %slot.meta.kind, prototype = %slot.meta.prototype, "agent added");
        if let Some(parent) = slot.meta.parent
            && let Some(parent_slot) = self.slots.get_mut(&parent)
        {
            parent_slot.meta.children.push(slot.meta.id);
        }
        self.slots.insert(slot.meta.id, slot);
    }

    /// Temporarily removes a slot for a callback; pair with [`Self::put`].
    pub fn take(&mut self, id: AgentId) -> Option<AgentSlot> {
        self.slots.remove(&id)
    }

    pub fn put(&mut self, slot: AgentSlot) {
        self.slots.insert(slot.meta.id, slot);
    }

    /// Detaches an agent from its parent's child set.
    pub fn detach(&mut self, id: AgentId) {
        let parent = self.slots.get(&id).and_then(|s| s.meta.parent);
        if let Some(parent) = parent
            && let Some(parent_slot) = self.slots.get_mut(&parent)
        {
            parent_slot.meta.children.retain(|c| *c != id);
        }
    }

    pub fn remove(&mut self, id: AgentId) -> Option<AgentSlot> {
        self.detach(id);
        self.slots.remove(&id)
    }

    /// Ancestor chain from immediate parent to the root.
    pub fn ancestors(&self, id: AgentId) -> Vec<AgentId> {
        let mut chain = Vec::new();
        let mut cur = self.slots.get(&id).and_then(|s| s.meta.parent);
        while let Some(parent) = cur {
            chain.push(parent);
            cur = self.slots.get(&parent).and_then(|s| s.meta.parent);
        }
        chain
    }

    pub fn kind_of(&self, id: AgentId) -> Option<AgentKind> {
        self.slots.get(&id).map(|s| s.meta.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl Archetype for Inert {
        fn spec(&self) -> &'static str {
            ":test:Inert"
        }
    }

    fn slot(id: u64, kind: AgentKind, parent: Option<u64>) -> AgentSlot {
        AgentSlot {
            meta: AgentMeta {
                id: AgentId(id),
                kind,
                prototype: format!("proto{id}"),
                implementation: ":test:Inert".to_string(),
                parent: parent.map(AgentId),
                children: Vec::new(),
                enter_time: Some(0),
                exit_time: None,
                state: AgentState::Entered,
            },
            behavior: Box::new(Inert),
        }
    }

    #[test]
    fn containment_rules() {
        use AgentKind::*;
        assert!(Region.legal_under(None));
        assert!(!Region.legal_under(Some(Region)));
        assert!(Institution.legal_under(Some(Region)));
        assert!(!Institution.legal_under(None));
        assert!(Facility.legal_under(Some(Institution)));
        assert!(!Facility.legal_under(Some(Region)));
        assert!(Other.legal_under(None));
        assert!(Other.legal_under(Some(Facility)));
    }

    #[test]
    fn lifecycle_transitions_are_ordered() {
        let mut meta = slot(1, AgentKind::Facility, None).meta;
        meta.state = AgentState::Configured;
        meta.transition(AgentState::Built).unwrap();
        meta.transition(AgentState::Entered).unwrap();
        meta.transition(AgentState::Live).unwrap();
        meta.transition(AgentState::Decommissioning).unwrap();
        meta.transition(AgentState::Dead).unwrap();
        // A dead agent is inert.
        assert!(meta.transition(AgentState::Live).is_err());
    }

    #[test]
    fn registry_tracks_the_tree() {
        let mut reg = AgentRegistry::new();
        reg.insert(slot(1, AgentKind::Region, None));
        reg.insert(slot(2, AgentKind::Institution, Some(1)));
        reg.insert(slot(3, AgentKind::Facility, Some(2)));

        assert_eq!(reg.ancestors(AgentId(3)), vec![AgentId(2), AgentId(1)]);
        assert_eq!(reg.get(AgentId(1)).unwrap().meta.children, vec![AgentId(2)]);

        reg.remove(AgentId(2));
        assert!(reg.get(AgentId(1)).unwrap().meta.children.is_empty());
    }

    #[test]
    fn take_and_put_round_trip() {
        let mut reg = AgentRegistry::new();
        reg.insert(slot(7, AgentKind::Facility, None));
        let s = reg.take(AgentId(7)).unwrap();
        assert!(reg.get(AgentId(7)).is_none());
        reg.put(s);
        assert!(reg.get(AgentId(7)).is_some());
        assert_eq!(reg.live_ids(), vec![AgentId(7)]);
    }
}
