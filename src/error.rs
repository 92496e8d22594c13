//! Error types for mechanism declaration, catalogue build and callback dispatch.

use smol_str::SmolStr;
use thiserror::Error;

use crate::dispatch::Phase;

/// Declaration-time errors. Raised synchronously by the registry, never while a
/// simulation is running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("field '{0}' is declared more than once")]
    DuplicateField(SmolStr),

    #[error("a mechanism named '{0}' is already registered")]
    DuplicateMechanism(SmolStr),

    #[error("'{0}' is reserved by the pointer pack and cannot be declared")]
    ReservedName(SmolStr),

    #[error("malformed declaration: {0}")]
    Malformed(String),

    #[error("catalogue is full ({0} mechanisms)")]
    CatalogueFull(usize),
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("mechanism '{mechanism}' expects ion '{ion}' to have valence {expected}, engine resolved {found}")]
    ValenceMismatch {
        mechanism: SmolStr,
        ion: SmolStr,
        expected: i32,
        found: i32,
    },

    #[error("mechanism '{mechanism}' uses ion '{ion}' which the engine does not know")]
    UnknownIon { mechanism: SmolStr, ion: SmolStr },

    #[error("mechanism '{mechanism}' has no attribute '{attribute}'")]
    UnboundAttribute { mechanism: SmolStr, attribute: SmolStr },

    #[error("attribute '{0}' is read-only")]
    ReadOnlyAttribute(SmolStr),

    #[error("attribute '{attribute}' is {found}, not {expected}")]
    AttributeKind {
        attribute: SmolStr,
        expected: &'static str,
        found: &'static str,
    },

    #[error("engine supplied no buffer for '{0}'")]
    MissingBuffer(SmolStr),

    #[error("shape mismatch for '{attribute}': expected {expected} values, got {actual}")]
    ShapeMismatch {
        attribute: SmolStr,
        expected: usize,
        actual: usize,
    },

    #[error("buffer bundle does not match mechanism '{mechanism}': {detail}")]
    BundleMismatch { mechanism: SmolStr, detail: String },

    #[error("{phase} callback of mechanism '{mechanism}' failed: {source}")]
    Callback {
        mechanism: SmolStr,
        phase: Phase,
        #[source]
        source: CallbackError,
    },

    #[error("mechanism '{mechanism}' cannot run {phase} while {state}")]
    Lifecycle {
        mechanism: SmolStr,
        phase: Phase,
        state: &'static str,
    },

    #[error("mechanism '{0}' was handed a different node index than it was bound to")]
    BindingChanged(SmolStr),

    #[error("can not modify catalogue after it has been built")]
    Frozen,

    #[error("can not access native catalogue before it has been built")]
    NotFrozen,

    #[error("catalogue has no mechanism in slot {slot} ({len} registered)")]
    UnknownSlot { slot: usize, len: usize },

    #[error("catalogue state lock poisoned")]
    Poisoned,

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Error type user callbacks may return. Any crate error converts into it.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of a user callback.
pub type CallbackResult = std::result::Result<(), CallbackError>;

pub type Result<T> = std::result::Result<T, Error>;
