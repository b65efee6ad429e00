use strum::{Display, IntoStaticStr};
use tracing::{debug, error, info, info_span, warn};

use crate::agent::{AgentId, AgentMeta, AgentRegistry, AgentSlot, AgentState};
use crate::archetype::SpecRegistry;
use crate::context::{BuildOrder, Context, SimInfo};
use crate::error::{KeyError, SimResult, StateError};
use crate::exchange::ResourceExchange;
use crate::resource::material::Material;
use crate::resource::product::Product;

/// Days ticked inside one timestep for daily-task subscribers.
pub const DAYS_PER_TIMESTEP: u32 = 30;

/// The phases of one timestep, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    PreHistory,
    Build,
    Tick,
    Resolve,
    Tock,
    Daily,
    Decommission,
}

/// The simulation driver: owns the context, the agent tree, and the
/// archetype registry, and runs the phased time loop.
///
/// ```text
/// for t in 0 .. duration-1:
///     process scheduled builds(t)
///     broadcast Tick(t)
///     resolve material exchange, then product exchange
///     broadcast Tock(t)
///     broadcast daily tasks
///     process scheduled decommissions(t)
///     flush the recorder
/// ```
///
/// Agents are visited in ascending id within every phase; failures inside
/// agent callbacks are recorded and absorbed unless fatal.
pub struct Kernel {
    ctx: Context,
    agents: AgentRegistry,
    specs: SpecRegistry,
    matl_exchange: ResourceExchange<Material>,
    prod_exchange: ResourceExchange<Product>,
    /// Decommissioned agents awaiting their final recorder flush.
    dying: Vec<AgentSlot>,
}

impl Kernel {
    pub fn new(info: SimInfo) -> Self {
        Self {
            ctx: Context::new(info),
            agents: AgentRegistry::new(),
            specs: SpecRegistry::with_builtins(),
            matl_exchange: ResourceExchange::new(),
            prod_exchange: ResourceExchange::new(),
            dying: Vec::new(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn specs_mut(&mut self) -> &mut SpecRegistry {
        &mut self.specs
    }

    /// Builds a prototype immediately; used during pre-run setup.
    pub fn build_now(&mut self, prototype: &str, parent: Option<AgentId>) -> SimResult<AgentId> {
        self.build_agent(BuildOrder {
            prototype: prototype.to_string(),
            parent,
        })
    }

    /// Runs the simulation to completion and closes the recorder.
    #[tracing::instrument(skip(self), fields(duration = self.ctx.info().duration))]
    pub fn run(&mut self) -> SimResult<()> {
        self.ctx.record_info();

        let result = self.run_inner();
        if let Err(err) = &result {
            error!(%err, "simulation terminated");
            self.ctx
                .record_error(None, Phase::Resolve.into(), err.kind(), &err.to_string());
        }
        // Rows up to and including the failing timestep stay persisted.
        let _ = self.ctx.flush_recorder();
        self.ctx.close_recorder()?;
        result
    }

    fn run_inner(&mut self) -> SimResult<()> {
        self.pre_history()?;
        while !self.ctx.timer().is_done() {
            let t = self.ctx.time();
            self.step(t)?;
            self.ctx.timer_mut().advance();
        }
        info!("simulation complete");
        Ok(())
    }

    /// One-time broadcast before t=0.
    fn pre_history(&mut self) -> SimResult<()> {
        // Agents built during setup enter before history begins.
        self.process_builds(self.ctx.time())?;
        for id in self.agents.live_ids() {
            self.dispatch(id, Phase::PreHistory)?;
        }
        Ok(())
    }

    /// Drains the build queue for `t`, including orders scheduled by the
    /// builds themselves.
    fn process_builds(&mut self, t: u32) -> SimResult<()> {
        loop {
            let orders = self.ctx.take_builds(t);
            if orders.is_empty() {
                return Ok(());
            }
            for order in orders {
                if let Err(err) = self.build_agent(order) {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    warn!(%err, "scheduled build failed");
                    self.ctx
                        .record_error(None, Phase::Build.into(), err.kind(), &err.to_string());
                }
            }
        }
    }

    fn step(&mut self, t: u32) -> SimResult<()> {
        let span = info_span!("step", t);
        let _enter = span.enter();

        // Builds scheduled for t happen before any Tick.
        self.process_builds(t)?;
        self.mark_live();

        for id in self.agents.live_ids() {
            self.dispatch(id, Phase::Tick)?;
        }

        self.matl_exchange.resolve(&mut self.ctx, &mut self.agents)?;
        self.prod_exchange.resolve(&mut self.ctx, &mut self.agents)?;
        self.check_fatal()?;

        for id in self.agents.live_ids() {
            self.dispatch(id, Phase::Tock)?;
        }

        self.daily_tasks()?;

        for id in self.ctx.take_decoms(t) {
            self.decommission(id)?;
        }

        self.check_fatal()?;
        self.ctx.flush_recorder()?;

        // Their last rows are flushed; the dying are released.
        for mut slot in self.dying.drain(..) {
            let _ = slot.meta.transition(AgentState::Dead);
            debug!(id = %slot.meta.id, "agent released");
        }
        Ok(())
    }

    fn mark_live(&mut self) {
        for id in self.agents.ids() {
            if let Some(slot) = self.agents.get_mut(id)
                && slot.meta.state == AgentState::Entered
            {
                let _ = slot.meta.transition(AgentState::Live);
            }
        }
    }

    /// Runs one lifecycle phase on one agent under the error boundary.
    fn dispatch(&mut self, id: AgentId, phase: Phase) -> SimResult<()> {
        let Some(mut slot) = self.agents.take(id) else {
            return Ok(());
        };
        let listens = slot.behavior.time_listener();
        let result = match phase {
            Phase::PreHistory => slot.behavior.pre_history(&mut self.ctx, &slot.meta),
            Phase::Tick if listens => slot.behavior.tick(&mut self.ctx, &slot.meta),
            Phase::Tock if listens => slot.behavior.tock(&mut self.ctx, &slot.meta),
            _ => Ok(()),
        };
        self.agents.put(slot);
        self.absorb(id, phase, result)
    }

    fn daily_tasks(&mut self) -> SimResult<()> {
        let subscribers: Vec<AgentId> = self
            .agents
            .live_ids()
            .into_iter()
            .filter(|id| {
                self.agents
                    .get(*id)
                    .map(|s| s.behavior.daily_listener())
                    .unwrap_or(false)
            })
            .collect();
        if subscribers.is_empty() {
            return Ok(());
        }
        for day in 0..DAYS_PER_TIMESTEP {
            for &id in &subscribers {
                let Some(mut slot) = self.agents.take(id) else {
                    continue;
                };
                let result = slot.behavior.daily(&mut self.ctx, &slot.meta, day);
                self.agents.put(slot);
                self.absorb(id, Phase::Daily, result)?;
            }
        }
        Ok(())
    }

    /// Instantiates a prototype, attaches it to the tree, and notifies it.
    fn build_agent(&mut self, order: BuildOrder) -> SimResult<AgentId> {
        let proto = self.ctx.prototype(&order.prototype)?.clone();

        let parent_kind = match order.parent {
            Some(parent) => Some(
                self.agents
                    .kind_of(parent)
                    .ok_or(KeyError::Agent(parent.0))?,
            ),
            None => None,
        };
        if !proto.kind.legal_under(parent_kind) {
            return Err(StateError::IllegalParent {
                parent: parent_kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "root".to_string()),
                child: proto.kind.to_string(),
            }
            .into());
        }

        let behavior = self.specs.make(&proto.spec, &proto.config)?;
        let id = self.ctx.next_agent_id();
        let t = self.ctx.time();
        let mut meta = AgentMeta {
            id,
            kind: proto.kind,
            prototype: order.prototype.clone(),
            implementation: proto.spec.clone(),
            parent: order.parent,
            children: Vec::new(),
            enter_time: Some(t),
            exit_time: None,
            state: AgentState::Configured,
        };
        meta.transition(AgentState::Built)?;
        self.ctx
            .record_agent_entry(id, meta.kind, &meta.implementation, &meta.prototype, order.parent, t);

        self.agents.insert(AgentSlot {
            meta,
            behavior,
        });

        // built -> entered; the agent registers its subscriptions here.
        let mut slot = self.agents.take(id).expect("just inserted");
        let entered = slot.behavior.enter_notify(&mut self.ctx, &slot.meta);
        slot.meta.transition(AgentState::Entered)?;
        self.agents.put(slot);
        self.absorb(id, Phase::Build, entered)?;

        info!(agent = %id, prototype = %order.prototype, "agent built");
        Ok(id)
    }

    /// Removes an agent at end of step: teardown, snapshot, exit row, and
    /// detachment from its parent's child set.
    fn decommission(&mut self, id: AgentId) -> SimResult<()> {
        let Some(mut slot) = self.agents.take(id) else {
            warn!(agent = %id, "decommission of unknown agent ignored");
            return Ok(());
        };
        let t = self.ctx.time();

        let result = slot
            .behavior
            .decommission(&mut self.ctx, &slot.meta)
            .and_then(|_| slot.behavior.snapshot(&mut self.ctx, &slot.meta));

        slot.meta.exit_time = Some(t);
        slot.meta.transition(AgentState::Decommissioning)?;
        self.ctx.record_agent_exit(id, t);

        // Put it back just to unlink cleanly, then pull it out for good.
        self.agents.put(slot);
        self.agents.detach(id);
        let slot = self.agents.take(id).expect("slot present");
        self.dying.push(slot);

        info!(agent = %id, t, "agent decommissioned");
        self.absorb(id, Phase::Decommission, result)
    }

    /// The error boundary around agent callbacks: non-fatal errors are
    /// recorded against the agent and absorbed, fatal errors propagate.
    fn absorb(&mut self, id: AgentId, phase: Phase, result: SimResult<()>) -> SimResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(agent = %id, %phase, %err, "agent failure absorbed");
                self.ctx
                    .record_error(Some(id), phase.into(), err.kind(), &err.to_string());
                Ok(())
            }
        }
    }

    fn check_fatal(&mut self) -> SimResult<()> {
        match self.ctx.take_fatal() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, Archetype};

    #[test]
    fn kernel_runs_an_empty_simulation() {
        let mut kernel = Kernel::new(SimInfo::new(3));
        kernel.run().unwrap();
        assert_eq!(kernel.context().time(), 3);
    }

    #[test]
    fn builds_respect_the_containment_tree() {
        let mut kernel = Kernel::new(SimInfo::new(1));
        kernel
            .context_mut()
            .register_prototype(
                "reg",
                AgentKind::Region,
                ":nucycle:NullRegion",
                serde_json::json!({}),
            )
            .unwrap();
        kernel
            .context_mut()
            .register_prototype(
                "inst",
                AgentKind::Institution,
                ":nucycle:NullInst",
                serde_json::json!({}),
            )
            .unwrap();

        let region = kernel.build_now("reg", None).unwrap();
        // An institution cannot sit at the root.
        assert!(kernel.build_now("inst", None).is_err());
        let inst = kernel.build_now("inst", Some(region)).unwrap();
        assert_eq!(
            kernel.agents().get(region).unwrap().meta.children,
            vec![inst]
        );
    }

    struct Counter {
        ticks: std::rc::Rc<std::cell::RefCell<u32>>,
    }

    impl Archetype for Counter {
        fn spec(&self) -> &'static str {
            ":test:Counter"
        }

        fn time_listener(&self) -> bool {
            true
        }

        fn tick(
            &mut self,
            _ctx: &mut crate::context::Context,
            _own: &crate::agent::AgentMeta,
        ) -> SimResult<()> {
            *self.ticks.borrow_mut() += 1;
            Ok(())
        }
    }

    #[test]
    fn time_listeners_receive_every_tick() {
        let ticks = std::rc::Rc::new(std::cell::RefCell::new(0));
        let handle = ticks.clone();

        let mut kernel = Kernel::new(SimInfo::new(4));
        kernel.specs_mut().register(":test:Counter", move |_cfg| {
            Ok(Box::new(Counter {
                ticks: handle.clone(),
            }))
        });
        kernel
            .context_mut()
            .register_prototype(
                "counter",
                AgentKind::Other,
                ":test:Counter",
                serde_json::json!({}),
            )
            .unwrap();
        kernel.build_now("counter", None).unwrap();
        kernel.run().unwrap();

        assert_eq!(*ticks.borrow(), 4);
    }

    #[test]
    fn decommission_removes_the_agent() {
        let mut kernel = Kernel::new(SimInfo::new(3));
        kernel
            .context_mut()
            .register_prototype(
                "reg",
                AgentKind::Region,
                ":nucycle:NullRegion",
                serde_json::json!({}),
            )
            .unwrap();
        let region = kernel.build_now("reg", None).unwrap();
        kernel.context_mut().schedule_decom(region, 1).unwrap();
        kernel.run().unwrap();
        assert!(kernel.agents().get(region).is_none());
    }
}
