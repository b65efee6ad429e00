pub mod timer;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Config;
use tracing::{debug, error, info};

use crate::agent::{AgentId, AgentKind};
use crate::composition::decay::{self, DEFAULT_DECAY_TOL};
use crate::composition::{CompRef, Composition, QualId};
use crate::context::timer::Timer;
use crate::error::{ErrorKind, KeyError, SimError, SimResult, ValidationError, ValueError};
use crate::impl_display_primitive;
use crate::nuclide::data::{BundledNuclideData, NuclideData};
use crate::recorder::{Cond, DatumBuilder, QueryResult, Recorder};
use crate::resource::{ObjId, ResourceId, ResourceType, StateId};

/// Simulation identity stamped onto every recorded row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SimId(pub u64);
impl_display_primitive!(SimId);

/// Monotonic transaction identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TransactionId(pub u64);
impl_display_primitive!(TransactionId);

/// Simulation-level parameters fixed before the first timestep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimInfo {
    /// Number of timesteps to run.
    pub duration: u32,
    /// First timestep (usually 0).
    pub start: u32,
    /// Materials decay lazily once at least this many timesteps have
    /// elapsed since their last decay; 0 disables decay.
    pub decay_interval: u32,
    /// Relative tolerance handed to the decay solver.
    pub decay_tol: f64,
}

impl SimInfo {
    pub fn new(duration: u32) -> Self {
        Self {
            duration,
            start: 0,
            decay_interval: 0,
            decay_tol: DEFAULT_DECAY_TOL,
        }
    }

    pub fn with_decay_interval(mut self, interval: u32) -> Self {
        self.decay_interval = interval;
        self
    }
}

/// A scheduled future build.
#[derive(Debug, Clone)]
pub struct BuildOrder {
    pub prototype: String,
    pub parent: Option<AgentId>,
}

/// A configured-but-unentered agent template.
#[derive(Debug, Clone)]
pub struct PrototypeSpec {
    pub kind: AgentKind,
    pub spec: String,
    pub config: Config,
}

#[derive(Debug, Default)]
struct IdCounters {
    agent: u64,
    resource: u64,
    obj: u64,
    state: u64,
    qual: u64,
    transaction: u64,
}

/// The simulation's shared state: clock, recorder, registries, queues, and
/// id counters. Passed explicitly into every agent callback; there is no
/// process-wide mutable state behind it.
pub struct Context {
    info: SimInfo,
    sim_id: SimId,
    timer: Timer,
    recorder: Recorder,
    nuc_data: Arc<dyn NuclideData>,
    recipes: BTreeMap<String, CompRef>,
    prototypes: BTreeMap<String, PrototypeSpec>,
    qualities: BTreeMap<String, QualId>,
    comps_by_qual: BTreeMap<QualId, CompRef>,
    /// Decay lineage cache: `(root, total elapsed) -> composition`.
    lineage: BTreeMap<(QualId, u32), CompRef>,
    build_queue: BTreeMap<u32, Vec<BuildOrder>>,
    decom_queue: BTreeMap<u32, Vec<AgentId>>,
    ids: IdCounters,
    /// A backend failure noticed inside a fire-and-forget record helper;
    /// the kernel picks it up at the next phase boundary.
    pending_fatal: Option<SimError>,
}

impl Context {
    pub fn new(info: SimInfo) -> Self {
        Self {
            timer: Timer::new(info.start, info.duration),
            info,
            sim_id: SimId(1),
            recorder: Recorder::new(),
            nuc_data: Arc::new(BundledNuclideData),
            recipes: BTreeMap::new(),
            prototypes: BTreeMap::new(),
            qualities: BTreeMap::new(),
            comps_by_qual: BTreeMap::new(),
            lineage: BTreeMap::new(),
            build_queue: BTreeMap::new(),
            decom_queue: BTreeMap::new(),
            ids: IdCounters::default(),
            pending_fatal: None,
        }
    }

    /// A context suitable for unit tests: one step, no decay, no backends.
    pub fn for_testing() -> Self {
        Self::new(SimInfo::new(1))
    }

    /// Swaps in a different nuclear-data source. Must happen before any
    /// decay is computed.
    pub fn set_nuclide_data(&mut self, data: Arc<dyn NuclideData>) {
        self.nuc_data = data;
    }

    // ========================================================================
    // Clock
    // ========================================================================

    pub fn time(&self) -> u32 {
        self.timer.time()
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub(crate) fn timer_mut(&mut self) -> &mut Timer {
        &mut self.timer
    }

    pub fn info(&self) -> &SimInfo {
        &self.info
    }

    pub fn sim_id(&self) -> SimId {
        self.sim_id
    }

    pub fn decay_interval(&self) -> u32 {
        self.info.decay_interval
    }

    // ========================================================================
    // Recorder access
    // ========================================================================

    pub fn register_backend(&mut self, backend: Box<dyn crate::recorder::Backend>) {
        self.recorder.register_backend(backend);
    }

    /// Starts a custom row; archetype-private tables go through here.
    pub fn new_datum(&mut self, table: impl Into<String>) -> DatumBuilder<'_> {
        self.recorder.new_datum(table)
    }

    pub fn query(&self, table: &str, conds: &[Cond]) -> SimResult<QueryResult> {
        self.recorder.query(table, conds)
    }

    pub(crate) fn flush_recorder(&mut self) -> SimResult<()> {
        self.recorder.flush()
    }

    pub(crate) fn close_recorder(&mut self) -> SimResult<()> {
        self.recorder.close()
    }

    pub(crate) fn take_fatal(&mut self) -> Option<SimError> {
        self.pending_fatal.take()
    }

    fn note_fatal(&mut self, err: SimError) {
        error!(%err, "recording failed");
        if self.pending_fatal.is_none() {
            self.pending_fatal = Some(err);
        }
    }

    // ========================================================================
    // Registries
    // ========================================================================

    /// Registers a named recipe composition.
    pub fn add_recipe(&mut self, name: impl Into<String>, comp: CompRef) -> SimResult<()> {
        let name = name.into();
        if self.recipes.contains_key(&name) {
            return Err(ValidationError::DuplicateRecipe(name).into());
        }
        self.recipes.insert(name, comp);
        Ok(())
    }

    pub fn recipe(&self, name: &str) -> SimResult<CompRef> {
        self.recipes
            .get(name)
            .cloned()
            .ok_or_else(|| KeyError::Recipe(name.to_string()).into())
    }

    /// Registers a prototype: a named, configured-but-unentered template.
    pub fn register_prototype(
        &mut self,
        name: impl Into<String>,
        kind: AgentKind,
        spec: impl Into<String>,
        config: Config,
    ) -> SimResult<()> {
        let name = name.into();
        if self.prototypes.contains_key(&name) {
            return Err(ValidationError::DuplicatePrototype(name).into());
        }
        self.prototypes.insert(
            name,
            PrototypeSpec {
                kind,
                spec: spec.into(),
                config,
            },
        );
        Ok(())
    }

    pub fn prototype(&self, name: &str) -> SimResult<&PrototypeSpec> {
        self.prototypes
            .get(name)
            .ok_or_else(|| KeyError::Prototype(name.to_string()).into())
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Schedules a build of `prototype` under `parent` at timestep `time`.
    ///
    /// Builds for `time` happen at the start of that step, before any Tick.
    pub fn schedule_build(
        &mut self,
        prototype: impl Into<String>,
        parent: Option<AgentId>,
        time: u32,
    ) -> SimResult<()> {
        let prototype = prototype.into();
        if time < self.time() {
            return Err(ValueError::SchedInPast {
                requested: time,
                now: self.time(),
            }
            .into());
        }
        self.prototype(&prototype)?;
        debug!(%prototype, time, "build scheduled");
        self.build_queue
            .entry(time)
            .or_default()
            .push(BuildOrder { prototype, parent });
        Ok(())
    }

    /// Schedules a decommission at the end of timestep `time`.
    pub fn schedule_decom(&mut self, agent: AgentId, time: u32) -> SimResult<()> {
        if time < self.time() {
            return Err(ValueError::SchedInPast {
                requested: time,
                now: self.time(),
            }
            .into());
        }
        debug!(%agent, time, "decommission scheduled");
        self.decom_queue.entry(time).or_default().push(agent);
        Ok(())
    }

    pub(crate) fn take_builds(&mut self, time: u32) -> Vec<BuildOrder> {
        self.build_queue.remove(&time).unwrap_or_default()
    }

    pub(crate) fn take_decoms(&mut self, time: u32) -> Vec<AgentId> {
        self.decom_queue.remove(&time).unwrap_or_default()
    }

    // ========================================================================
    // Id allocation
    // ========================================================================

    pub(crate) fn next_agent_id(&mut self) -> AgentId {
        self.ids.agent += 1;
        AgentId(self.ids.agent)
    }

    pub fn next_resource_id(&mut self) -> ResourceId {
        self.ids.resource += 1;
        ResourceId(self.ids.resource)
    }

    pub fn next_obj_id(&mut self) -> ObjId {
        self.ids.obj += 1;
        ObjId(self.ids.obj)
    }

    pub fn next_state_id(&mut self) -> StateId {
        self.ids.state += 1;
        StateId(self.ids.state)
    }

    pub(crate) fn next_transaction_id(&mut self) -> TransactionId {
        self.ids.transaction += 1;
        TransactionId(self.ids.transaction)
    }

    // ========================================================================
    // Decay lineage
    // ========================================================================

    /// Decays a composition by `dt` timesteps, reusing the lineage cache
    /// when the root composition has been recorded.
    ///
    /// Two decay paths from the same recorded root that reach the same
    /// total elapsed time yield the identical shared handle.
    pub fn decay_comp(&mut self, comp: &CompRef, dt: u32) -> SimResult<CompRef> {
        if dt == 0 {
            return Ok(comp.clone());
        }
        let root_qual = Composition::root(comp).qual();
        match root_qual {
            Some(root) => {
                let elapsed = Composition::root_decay_time(comp) + dt;
                if let Some(hit) = self.lineage.get(&(root, elapsed)) {
                    return Ok(hit.clone());
                }
                let child = decay::decay(comp, dt, &*self.nuc_data, self.info.decay_tol)?;
                self.lineage.insert((root, elapsed), child.clone());
                Ok(child)
            }
            None => decay::decay(comp, dt, &*self.nuc_data, self.info.decay_tol),
        }
    }

    pub fn nuclide_data(&self) -> &dyn NuclideData {
        &*self.nuc_data
    }

    /// Looks up a recorded composition by its persistent id.
    pub fn composition(&self, qual: QualId) -> SimResult<CompRef> {
        self.comps_by_qual
            .get(&qual)
            .cloned()
            .ok_or_else(|| KeyError::Recipe(format!("qual {qual}")).into())
    }

    // ========================================================================
    // Standard rows
    // ========================================================================

    /// Assigns a persistent id to the composition on first sight and emits
    /// one `Compositions` row per nuclide.
    pub fn record_composition(&mut self, comp: &CompRef) -> QualId {
        if let Some(qual) = comp.qual() {
            return qual;
        }
        self.ids.qual += 1;
        let qual = QualId(self.ids.qual);
        if !comp.assign_qual(qual) {
            // Lost a race against another handle to the same composition.
            return comp.qual().expect("qual was just assigned");
        }
        self.comps_by_qual.insert(qual, comp.clone());

        let sim = self.sim_id.0;
        let rows: Vec<_> = comp
            .mass()
            .iter()
            .map(|(nuc, frac)| (*nuc, *frac))
            .collect();
        for (nuc, frac) in rows {
            let result = self
                .recorder
                .new_datum("Compositions")
                .add_val("SimId", sim)
                .add_val("QualId", qual.0)
                .add_val("NucId", nuc)
                .add_val("MassFrac", frac)
                .record();
            if let Err(err) = result {
                self.note_fatal(err);
            }
        }
        qual
    }

    /// Persistent id for a product quality string.
    pub fn record_quality(&mut self, quality: &str) -> QualId {
        if let Some(qual) = self.qualities.get(quality) {
            return *qual;
        }
        self.ids.qual += 1;
        let qual = QualId(self.ids.qual);
        self.qualities.insert(quality.to_string(), qual);
        qual
    }

    /// Emits a `Resources` row for one resource state.
    #[allow(clippy::too_many_arguments)]
    pub fn record_resource(
        &mut self,
        ty: ResourceType,
        id: ResourceId,
        obj: ObjId,
        qty: f64,
        units: &str,
        qual: QualId,
        parent1: Option<ResourceId>,
        parent2: Option<ResourceId>,
    ) {
        let result = self
            .recorder
            .new_datum("Resources")
            .add_val("SimId", self.sim_id.0)
            .add_val("ResourceId", id.0)
            .add_val("ObjId", obj.0)
            .add_val("Type", <&str>::from(ty))
            .add_val("TimeCreated", self.timer.time())
            .add_val("Quantity", qty)
            .add_val("Units", units)
            .add_val("QualId", qual.0)
            .add_val("Parent1", parent1.unwrap_or_default().0)
            .add_val("Parent2", parent2.unwrap_or_default().0)
            .record();
        if let Err(err) = result {
            self.note_fatal(err);
        }
    }

    /// Emits a `Transactions` row and returns its id.
    pub fn record_transaction(
        &mut self,
        commodity: &str,
        sender: AgentId,
        receiver: AgentId,
        resource: ResourceId,
        price: f64,
    ) -> TransactionId {
        let id = self.next_transaction_id();
        let result = self
            .recorder
            .new_datum("Transactions")
            .add_val("SimId", self.sim_id.0)
            .add_val("TransactionId", id.0)
            .add_val("SenderId", sender.0)
            .add_val("ReceiverId", receiver.0)
            .add_val("ResourceId", resource.0)
            .add_val("Commodity", commodity)
            .add_val("Price", price)
            .add_val("Time", self.timer.time())
            .record();
        if let Err(err) = result {
            self.note_fatal(err);
        }
        id
    }

    /// Emits the `AgentEntry` row for a freshly built agent.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record_agent_entry(
        &mut self,
        agent: AgentId,
        kind: AgentKind,
        implementation: &str,
        prototype: &str,
        parent: Option<AgentId>,
        enter_time: u32,
    ) {
        let result = self
            .recorder
            .new_datum("AgentEntry")
            .add_val("SimId", self.sim_id.0)
            .add_val("AgentId", agent.0)
            .add_val("Kind", <&str>::from(kind))
            .add_val("Implementation", implementation)
            .add_val("Prototype", prototype)
            .add_val("ParentId", parent.map(|p| p.0 as i64).unwrap_or(-1))
            .add_val("EnterTime", enter_time)
            .record();
        if let Err(err) = result {
            self.note_fatal(err);
        }
    }

    /// Emits the `AgentExit` row at decommission.
    pub(crate) fn record_agent_exit(&mut self, agent: AgentId, exit_time: u32) {
        let result = self
            .recorder
            .new_datum("AgentExit")
            .add_val("SimId", self.sim_id.0)
            .add_val("AgentId", agent.0)
            .add_val("ExitTime", exit_time)
            .record();
        if let Err(err) = result {
            self.note_fatal(err);
        }
    }

    /// Emits an `Errors` row for an absorbed agent failure.
    pub(crate) fn record_error(
        &mut self,
        agent: Option<AgentId>,
        phase: &str,
        kind: ErrorKind,
        message: &str,
    ) {
        let result = self
            .recorder
            .new_datum("Errors")
            .add_val("SimId", self.sim_id.0)
            .add_val("Time", self.timer.time())
            .add_val("AgentId", agent.map(|a| a.0 as i64).unwrap_or(-1))
            .add_val("Phase", phase)
            .add_val("Kind", <&str>::from(kind))
            .add_val("Message", message)
            .record();
        if let Err(err) = result {
            self.note_fatal(err);
        }
    }

    /// Emits the `Info` row describing this run.
    pub(crate) fn record_info(&mut self) {
        info!(
            duration = self.info.duration,
            start = self.info.start,
            decay_interval = self.info.decay_interval,
            "simulation starting"
        );
        let result = self
            .recorder
            .new_datum("Info")
            .add_val("SimId", self.sim_id.0)
            .add_val("Duration", self.info.duration)
            .add_val("Start", self.info.start)
            .add_val("DecayInterval", self.info.decay_interval)
            .record();
        if let Err(err) = result {
            self.note_fatal(err);
        }
    }
}
