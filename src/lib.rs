// src/lib.rs
//! Custom mechanisms for a cable-cell simulation engine.
//!
//! A mechanism declares its globals, state variables, parameters, random
//! streams and ion dependencies through a [`MechanismDecl`], attaches up to four
//! lifecycle callbacks and is registered into a [`Catalogue`]. Each callback
//! receives a [`PointerPack`] that exposes the engine's buffers for the current
//! call, by name or by typed slot index.

pub mod abi;
pub mod bundle;
pub mod catalogue;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod ion;
pub mod logging;
pub mod registry;
pub mod schema;
pub mod view;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use bundle::BufferBundle;
pub use catalogue::{Catalogue, LoadedCatalogue, MechanismHandle, MAX_MECHANISMS};
pub use config::{CatalogueConfig, HostConfig};
pub use dispatch::{Callbacks, CustomMechanism, GroupBinding, LifecycleState, Mechanism, Phase};
pub use error::{CallbackError, CallbackResult, Error, Result, SchemaError};
pub use host::{CellGroup, Host, IonSpecies};
pub use ion::{IonBuffers, IonInfo, IonQuantity, IonTable, IonView, ValenceResolver};
pub use registry::{Binding, Builtin, MechanismDecl, MechanismSchema};
pub use schema::{
    FieldInfo, GlobalSlot, IonSlot, MechanismKind, ParameterSlot, RandomSlot, RandomVariable,
    SchemaDescription, SlotIndex, StateSlot,
};
pub use view::{Array, Attr, PointerPack, ReadOnly, Value};
