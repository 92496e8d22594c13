//! Process-scoped catalogue of registered mechanisms.
//!
//! Registration is open until the catalogue is built; afterwards the set of
//! mechanisms is frozen and shared read-only with every caller.

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::sync::{Arc, Mutex, OnceLock};

use crate::abi::NativeDescriptor;
use crate::config::CatalogueConfig;
use crate::dispatch::{CustomMechanism, Mechanism};
use crate::error::{Error, Result, SchemaError};
use crate::ion::ValenceResolver;

/// Number of mechanisms one catalogue can export.
pub const MAX_MECHANISMS: usize = 32;

/// A registered mechanism and its catalogue slot.
#[derive(Debug, Clone)]
pub struct MechanismHandle {
    slot: usize,
    mechanism: Arc<Mechanism>,
}

impl MechanismHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn mechanism(&self) -> &Arc<Mechanism> {
        &self.mechanism
    }

    pub fn name(&self) -> &str {
        self.mechanism.name()
    }
}

/// The frozen mechanism set, with native descriptors in slot order.
#[derive(Debug)]
pub struct LoadedCatalogue {
    mechanisms: Vec<Arc<Mechanism>>,
    descriptors: Vec<NativeDescriptor>,
    by_name: FxHashMap<SmolStr, usize>,
}

impl LoadedCatalogue {
    fn new(mechanisms: Vec<Arc<Mechanism>>, config: &CatalogueConfig) -> Result<Self> {
        let descriptors = mechanisms
            .iter()
            .map(|m| NativeDescriptor::new(m.schema(), config))
            .collect::<Result<Vec<_>>>()?;
        let by_name = mechanisms
            .iter()
            .enumerate()
            .map(|(slot, m)| (SmolStr::new(m.name()), slot))
            .collect();
        Ok(LoadedCatalogue {
            mechanisms,
            descriptors,
            by_name,
        })
    }

    pub fn len(&self) -> usize {
        self.mechanisms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mechanisms.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Mechanism>> {
        self.by_name.get(name).map(|&slot| &self.mechanisms[slot])
    }

    pub fn mechanism(&self, slot: usize) -> Option<&Arc<Mechanism>> {
        self.mechanisms.get(slot)
    }

    pub fn descriptor(&self, slot: usize) -> Option<&NativeDescriptor> {
        self.descriptors.get(slot)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mechanisms.iter().map(|m| m.name())
    }
}

/// Mechanism registry with a write-once lifecycle: register, then build.
#[derive(Debug, Default)]
pub struct Catalogue {
    config: CatalogueConfig,
    pending: Mutex<Vec<Arc<Mechanism>>>,
    loaded: OnceLock<Arc<LoadedCatalogue>>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CatalogueConfig) -> Self {
        Catalogue {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &CatalogueConfig {
        &self.config
    }

    pub fn is_frozen(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Number of registered mechanisms.
    pub fn len(&self) -> Result<usize> {
        Ok(self.pending.lock().map_err(|_| Error::Poisoned)?.len())
    }

    /// Add a mechanism. Fails once the catalogue has been built, on a duplicate
    /// name, or when every slot is taken.
    pub fn register(&self, mechanism: Mechanism) -> Result<MechanismHandle> {
        let mut pending = self.pending.lock().map_err(|_| Error::Poisoned)?;
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        if pending.iter().any(|m| m.name() == mechanism.name()) {
            return Err(SchemaError::DuplicateMechanism(mechanism.name().into()).into());
        }
        if pending.len() >= MAX_MECHANISMS {
            return Err(SchemaError::CatalogueFull(MAX_MECHANISMS).into());
        }
        let slot = pending.len();
        let mechanism = Arc::new(mechanism);
        tracing::info!(mechanism = mechanism.name(), slot, "registered mechanism");
        pending.push(mechanism.clone());
        Ok(MechanismHandle { slot, mechanism })
    }

    pub fn register_custom<M: CustomMechanism>(&self, mech: M) -> Result<MechanismHandle> {
        self.register(Mechanism::from_custom(mech)?)
    }

    /// Check every valence expectation against the engine's ion species, then
    /// freeze.
    pub fn build(&self, ions: &dyn ValenceResolver) -> Result<Arc<LoadedCatalogue>> {
        let pending = self.pending.lock().map_err(|_| Error::Poisoned)?;
        for mechanism in pending.iter() {
            check_valences(mechanism, ions)?;
        }
        self.freeze_locked(&pending)
    }

    /// Freeze the registered set without valence checks, leaving them to the
    /// engine. Repeated calls return the same catalogue.
    pub fn freeze(&self) -> Result<Arc<LoadedCatalogue>> {
        let pending = self.pending.lock().map_err(|_| Error::Poisoned)?;
        self.freeze_locked(&pending)
    }

    /// Caller holds the `pending` lock, so no registration slips in between.
    fn freeze_locked(&self, pending: &[Arc<Mechanism>]) -> Result<Arc<LoadedCatalogue>> {
        if let Some(loaded) = self.loaded.get() {
            return Ok(loaded.clone());
        }
        let loaded = Arc::new(LoadedCatalogue::new(pending.to_vec(), &self.config)?);
        tracing::info!(mechanisms = loaded.len(), "catalogue frozen");
        Ok(self.loaded.get_or_init(|| loaded).clone())
    }

    pub fn loaded(&self) -> Result<&Arc<LoadedCatalogue>> {
        self.loaded.get().ok_or(Error::NotFrozen)
    }

    pub fn native_descriptor(&self, slot: usize) -> Result<&NativeDescriptor> {
        let loaded = self.loaded()?;
        loaded.descriptor(slot).ok_or(Error::UnknownSlot {
            slot,
            len: loaded.len(),
        })
    }
}

fn check_valences(mechanism: &Mechanism, ions: &dyn ValenceResolver) -> Result<()> {
    for ion in mechanism.schema().ions().iter().filter(|i| i.verify_valence) {
        let found = ions.valence(&ion.name).ok_or_else(|| Error::UnknownIon {
            mechanism: mechanism.name().into(),
            ion: ion.name.clone(),
        })?;
        if found != ion.expected_valence {
            return Err(Error::ValenceMismatch {
                mechanism: mechanism.name().into(),
                ion: ion.name.clone(),
                expected: ion.expected_valence,
                found,
            });
        }
    }
    Ok(())
}

static GLOBAL: OnceLock<Catalogue> = OnceLock::new();

/// The catalogue exported through the native entry point.
pub fn global() -> &'static Catalogue {
    GLOBAL.get_or_init(Catalogue::new)
}
