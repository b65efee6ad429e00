pub mod enrichment;
pub mod sink;
pub mod source;
pub mod storage;

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as Config;
use tracing::debug;

use crate::agent::{AgentMeta, Archetype};
use crate::context::Context;
use crate::error::{KeyError, SimResult, ValidationError};

pub use enrichment::Enrichment;
pub use sink::Sink;
pub use source::Source;
pub use storage::Storage;

/// Factory producing a fresh configured behavior from a configuration
/// blob.
pub type ArchetypeFactory = Box<dyn Fn(&Config) -> SimResult<Box<dyn Archetype>>>;

/// The module loader: archetype registration and instantiation by spec
/// path.
///
/// Specs follow the `":package:Name"` convention. The built-in set covers
/// the reference fuel-cycle agents; plug-ins register their own factories
/// before any prototype is built.
pub struct SpecRegistry {
    factories: BTreeMap<String, ArchetypeFactory>,
}

impl SpecRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry preloaded with the built-in archetypes.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register(":nucycle:Source", |cfg| {
            Ok(Box::new(Source::from_config(cfg)?))
        });
        reg.register(":nucycle:Sink", |cfg| Ok(Box::new(Sink::from_config(cfg)?)));
        reg.register(":nucycle:Enrichment", |cfg| {
            Ok(Box::new(Enrichment::from_config(cfg)?))
        });
        reg.register(":nucycle:Storage", |cfg| {
            Ok(Box::new(Storage::from_config(cfg)?))
        });
        reg.register(":nucycle:NullRegion", |_| Ok(Box::new(NullRegion)));
        reg.register(":nucycle:NullInst", |_| Ok(Box::new(NullInst)));
        reg.register(":nucycle:DeployInst", |cfg| {
            Ok(Box::new(DeployInst::from_config(cfg)?))
        });
        reg
    }

    pub fn register(
        &mut self,
        spec: impl Into<String>,
        factory: impl Fn(&Config) -> SimResult<Box<dyn Archetype>> + 'static,
    ) {
        let spec = spec.into();
        debug!(%spec, "archetype registered");
        self.factories.insert(spec, Box::new(factory));
    }

    /// Instantiates a fresh configured behavior.
    pub fn make(&self, spec: &str, config: &Config) -> SimResult<Box<dyn Archetype>> {
        let factory = self
            .factories
            .get(spec)
            .ok_or_else(|| KeyError::Spec(spec.to_string()))?;
        factory(config)
    }

    pub fn specs(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Deserializes an archetype's typed config from the blob, mapping
/// failures to a validation error naming the spec.
pub(crate) fn parse_config<T: for<'de> Deserialize<'de>>(
    spec: &str,
    config: &Config,
) -> SimResult<T> {
    serde_json::from_value(config.clone()).map_err(|err| {
        ValidationError::Config {
            spec: spec.to_string(),
            msg: err.to_string(),
        }
        .into()
    })
}

/// Geographic coordinates shared by the built-in facility configs.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Coordinates {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl Coordinates {
    /// Emits the `AgentPosition` row when both coordinates are set.
    pub fn record(&self, ctx: &mut Context, own: &AgentMeta) -> SimResult<()> {
        let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
            return Ok(());
        };
        let sim = ctx.sim_id().0;
        ctx.new_datum("AgentPosition")
            .add_val("SimId", sim)
            .add_val("AgentId", own.id.0)
            .add_val("Latitude", latitude)
            .add_val("Longitude", longitude)
            .record()
    }
}

/// An inert region: pure containment, no behavior.
pub struct NullRegion;

impl Archetype for NullRegion {
    fn spec(&self) -> &'static str {
        ":nucycle:NullRegion"
    }
}

/// An inert institution: pure containment, no behavior.
pub struct NullInst;

impl Archetype for NullInst {
    fn spec(&self) -> &'static str {
        ":nucycle:NullInst"
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DeployItem {
    prototype: String,
    time: u32,
    #[serde(default = "one")]
    count: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
struct DeployConfig {
    #[serde(default)]
    builds: Vec<DeployItem>,
}

/// An institution that schedules facility builds under itself at fixed
/// times.
#[derive(Debug)]
pub struct DeployInst {
    config: DeployConfig,
}

impl DeployInst {
    pub fn from_config(config: &Config) -> SimResult<Self> {
        Ok(Self {
            config: parse_config(":nucycle:DeployInst", config)?,
        })
    }
}

impl Archetype for DeployInst {
    fn spec(&self) -> &'static str {
        ":nucycle:DeployInst"
    }

    fn enter_notify(&mut self, ctx: &mut Context, own: &AgentMeta) -> SimResult<()> {
        for item in &self.config.builds {
            for _ in 0..item.count {
                ctx.schedule_build(item.prototype.clone(), Some(own.id), item.time)?;
            }
        }
        Ok(())
    }
}
