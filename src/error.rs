use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl SimError {
    /// The coarse kind recorded into the `Errors` table.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::Value(_) => ErrorKind::Value,
            SimError::Key(_) => ErrorKind::Key,
            SimError::Io(_) => ErrorKind::Io,
            SimError::State(_) => ErrorKind::State,
            SimError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Fatal errors terminate the simulation; the rest are absorbed at the
    /// agent boundary after being recorded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SimError::Io(_))
    }
}

/// The error kind vocabulary persisted into the `Errors` table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "PascalCase")]
pub enum ErrorKind {
    Value,
    Key,
    Io,
    State,
    Validation,
}

/// Arithmetic, composition, or capacity precondition violated.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("Negative quantity: {0}")]
    NegativeQuantity(f64),

    #[error("Non-finite quantity: {0}")]
    NonFiniteQuantity(f64),

    #[error("Extract of {requested} kg exceeds the {available} kg available")]
    ExtractExceedsInventory { requested: f64, available: f64 },

    #[error("Component {nuclide} short by {deficit} (requested {requested})")]
    ComponentDeficit {
        nuclide: String,
        requested: f64,
        deficit: f64,
    },

    #[error("Push of {requested} exceeds buffer capacity ({capacity}, holding {holding})")]
    BufferOverCapacity {
        requested: f64,
        capacity: f64,
        holding: f64,
    },

    #[error("Capacity {requested} below current buffer quantity {holding}")]
    CapacityBelowQuantity { requested: f64, holding: f64 },

    #[error("Cannot absorb a {other} resource into a {own} resource")]
    ResourceTypeMismatch { own: String, other: String },

    #[error("Scheduled time {requested} already passed (now {now})")]
    SchedInPast { requested: u32, now: u32 },

    #[error("Empty composition")]
    EmptyComposition,

    #[error("Invalid fraction {fraction} for nuclide {nuclide}")]
    InvalidFraction { nuclide: String, fraction: f64 },

    #[error("Decay solver out of numeric range: alpha*t = {alpha_t}")]
    DecayOutOfRange { alpha_t: f64 },

    #[error("{0}")]
    Other(String),
}

/// Unknown recipe, commodity, prototype, nuclide, or table reference.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Unknown recipe: '{0}'")]
    Recipe(String),

    #[error("Unknown prototype: '{0}'")]
    Prototype(String),

    #[error("Unknown archetype spec: '{0}'")]
    Spec(String),

    #[error("Unknown agent id: {0}")]
    Agent(u64),

    #[error("Invalid nuclide identifier: '{0}'")]
    Nuclide(String),

    #[error("Unknown table: '{0}'")]
    Table(String),

    #[error("Unknown field '{field}' in table '{table}'")]
    Field { table: String, field: String },
}

/// Backend, module, or input file unreachable. Always fatal.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Row serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Operation forbidden in the current lifecycle state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Agent {agent} cannot {operation} while {state}")]
    Lifecycle {
        agent: u64,
        state: String,
        operation: String,
    },

    #[error("A {child} may not be built under a {parent}")]
    IllegalParent { parent: String, child: String },

    #[error("Recorder is closed")]
    RecorderClosed,

    #[error("{0}")]
    Other(String),
}

/// Input data fails constraints before the simulation starts.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid simulation duration: {0}")]
    Duration(u32),

    #[error("Invalid archetype configuration for '{spec}': {msg}")]
    Config { spec: String, msg: String },

    #[error("Duplicate recipe name: '{0}'")]
    DuplicateRecipe(String),

    #[error("Duplicate prototype name: '{0}'")]
    DuplicatePrototype(String),
}
