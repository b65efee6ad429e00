use serde_json::json;

use crate::agent::{AgentId, AgentKind};
use crate::composition::CompRef;
use crate::context::SimInfo;
use crate::error::{KeyError, SimResult};
use crate::kernel::Kernel;
use crate::recorder::memory::MemBackend;
use crate::recorder::{Cond, QueryResult};

/// A programmatic simulation rig for integration tests.
///
/// Stands up a kernel with an in-memory queryable backend and a
/// region/institution scaffold, then lets a test drop facilities in with
/// a couple of lines:
///
/// ```rust
/// # use nucycle::toolkit::MockSim;
/// # use nucycle::Composition;
/// # use nucycle::NucId;
/// let mut sim = MockSim::new(1).unwrap();
/// let u235 = NucId::new(92, 235, 0).unwrap();
/// let u238 = NucId::new(92, 238, 0).unwrap();
/// sim.add_recipe(
///     "natu1",
///     Composition::from_mass([(u235, 0.007), (u238, 0.993)]).unwrap(),
/// )
/// .unwrap();
/// sim.add_source("natu").recipe("natu1").finalize().unwrap();
/// sim.run().unwrap();
/// ```
pub struct MockSim {
    kernel: Kernel,
    db: MemBackend,
    institution: AgentId,
    next_proto: u32,
}

impl MockSim {
    pub fn new(duration: u32) -> SimResult<Self> {
        Self::with_info(SimInfo::new(duration))
    }

    pub fn with_info(info: SimInfo) -> SimResult<Self> {
        let mut kernel = Kernel::new(info);
        let db = MemBackend::new();
        kernel.context_mut().register_backend(Box::new(db.clone()));

        kernel.context_mut().register_prototype(
            "mock_region",
            AgentKind::Region,
            ":nucycle:NullRegion",
            json!({}),
        )?;
        kernel.context_mut().register_prototype(
            "mock_inst",
            AgentKind::Institution,
            ":nucycle:NullInst",
            json!({}),
        )?;
        let region = kernel.build_now("mock_region", None)?;
        let institution = kernel.build_now("mock_inst", Some(region))?;

        Ok(Self {
            kernel,
            db,
            institution,
            next_proto: 0,
        })
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn add_recipe(&mut self, name: impl Into<String>, comp: CompRef) -> SimResult<()> {
        self.kernel.context_mut().add_recipe(name, comp)
    }

    /// Registers and builds a facility from an explicit spec and config.
    pub fn add_facility(
        &mut self,
        spec: &str,
        config: serde_json::Value,
    ) -> SimResult<AgentId> {
        self.next_proto += 1;
        let name = format!("proto{}", self.next_proto);
        self.kernel
            .context_mut()
            .register_prototype(&name, AgentKind::Facility, spec, config)?;
        self.kernel.build_now(&name, Some(self.institution))
    }

    /// Starts a source of `commod`; finish with
    /// [`SourceBuilder::finalize`].
    pub fn add_source(&mut self, commod: &str) -> SourceBuilder<'_> {
        SourceBuilder {
            sim: self,
            commod: commod.to_string(),
            recipe: String::new(),
            capacity: f64::INFINITY,
        }
    }

    /// Starts a sink of `commod`; finish with [`SinkBuilder::finalize`].
    pub fn add_sink(&mut self, commod: &str) -> SinkBuilder<'_> {
        SinkBuilder {
            sim: self,
            commod: commod.to_string(),
            recipe: None,
            capacity: f64::INFINITY,
            max_inv_size: f64::INFINITY,
        }
    }

    /// Runs the simulation to completion.
    pub fn run(&mut self) -> SimResult<()> {
        self.kernel.run()
    }

    /// The queryable backend.
    pub fn db(&self) -> &MemBackend {
        &self.db
    }

    pub fn query(&self, table: &str, conds: &[Cond]) -> SimResult<QueryResult> {
        use crate::recorder::Backend;
        self.db.query(table, conds)
    }

    /// Reconstructs a traded material from the record: its latest quantity
    /// and the composition behind its `QualId`.
    pub fn material(&self, resource_id: i64) -> SimResult<(f64, CompRef)> {
        use crate::recorder::Backend;
        let qr = self.db.query(
            "Resources",
            &[Cond::eq("ResourceId", resource_id)],
        )?;
        let row = qr.rows.last().ok_or_else(|| KeyError::Field {
            table: "Resources".to_string(),
            field: format!("ResourceId {resource_id}"),
        })?;
        let qty = row.double("Quantity")?;
        let qual = row.int("QualId")?;
        let comp = self
            .kernel
            .context()
            .composition(crate::composition::QualId(qual as u64))?;
        Ok((qty, comp))
    }
}

/// Builder for a `:nucycle:Source` facility.
pub struct SourceBuilder<'a> {
    sim: &'a mut MockSim,
    commod: String,
    recipe: String,
    capacity: f64,
}

impl<'a> SourceBuilder<'a> {
    pub fn recipe(mut self, recipe: &str) -> Self {
        self.recipe = recipe.to_string();
        self
    }

    /// Per-timestep production cap.
    pub fn capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn finalize(self) -> SimResult<AgentId> {
        let config = json!({
            "commod": self.commod,
            "recipe": self.recipe,
            "throughput": finite_or_null(self.capacity),
        });
        self.sim.add_facility(":nucycle:Source", strip_nulls(config))
    }
}

/// Builder for a `:nucycle:Sink` facility.
pub struct SinkBuilder<'a> {
    sim: &'a mut MockSim,
    commod: String,
    recipe: Option<String>,
    capacity: f64,
    max_inv_size: f64,
}

impl<'a> SinkBuilder<'a> {
    pub fn recipe(mut self, recipe: &str) -> Self {
        self.recipe = Some(recipe.to_string());
        self
    }

    /// Per-timestep intake cap.
    pub fn capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn max_inv_size(mut self, size: f64) -> Self {
        self.max_inv_size = size;
        self
    }

    pub fn finalize(self) -> SimResult<AgentId> {
        let config = json!({
            "in_commods": [self.commod],
            "recipe": self.recipe,
            "capacity": finite_or_null(self.capacity),
            "max_inv_size": finite_or_null(self.max_inv_size),
        });
        self.sim.add_facility(":nucycle:Sink", strip_nulls(config))
    }
}

/// JSON has no infinity; absent fields fall back to the archetype's
/// defaults instead.
fn finite_or_null(value: f64) -> serde_json::Value {
    if value.is_finite() {
        json!(value)
    } else {
        serde_json::Value::Null
    }
}

fn strip_nulls(mut value: serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    value
}
