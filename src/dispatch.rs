//! Lifecycle dispatch: four optional callbacks per mechanism, each invoked with
//! a pointer pack bound to the buffers of the current call.

use smol_str::SmolStr;
use std::fmt;
use std::sync::Arc;

use crate::bundle::BufferBundle;
use crate::error::{CallbackResult, Error, Result};
use crate::ion::IonInfo;
use crate::registry::{MechanismDecl, MechanismSchema};
use crate::schema::{FieldInfo, MechanismKind, RandomVariable};
use crate::view::PointerPack;

/// Simulation phase a callback belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    AdvanceState,
    ComputeCurrents,
    WriteIons,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Init,
        Phase::AdvanceState,
        Phase::ComputeCurrents,
        Phase::WriteIons,
    ];

    /// Order of the phases within one simulation step.
    pub const STEP: [Phase; 3] = [Phase::AdvanceState, Phase::ComputeCurrents, Phase::WriteIons];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::AdvanceState => "advance_state",
            Phase::ComputeCurrents => "compute_currents",
            Phase::WriteIons => "write_ions",
        };
        f.write_str(name)
    }
}

pub type Callback = Box<dyn Fn(&PointerPack<'_>) -> CallbackResult + Send + Sync>;

/// The four callback slots. Unset slots are no-ops.
#[derive(Default)]
pub struct Callbacks {
    init: Option<Callback>,
    advance_state: Option<Callback>,
    compute_currents: Option<Callback>,
    write_ions: Option<Callback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&PointerPack<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        self.set(Phase::Init, Box::new(f));
        self
    }

    pub fn on_advance_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&PointerPack<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        self.set(Phase::AdvanceState, Box::new(f));
        self
    }

    pub fn on_compute_currents<F>(mut self, f: F) -> Self
    where
        F: Fn(&PointerPack<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        self.set(Phase::ComputeCurrents, Box::new(f));
        self
    }

    pub fn on_write_ions<F>(mut self, f: F) -> Self
    where
        F: Fn(&PointerPack<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        self.set(Phase::WriteIons, Box::new(f));
        self
    }

    pub fn set(&mut self, phase: Phase, callback: Callback) {
        *self.slot_mut(phase) = Some(callback);
    }

    pub fn is_set(&self, phase: Phase) -> bool {
        self.get(phase).is_some()
    }

    fn get(&self, phase: Phase) -> Option<&Callback> {
        match phase {
            Phase::Init => self.init.as_ref(),
            Phase::AdvanceState => self.advance_state.as_ref(),
            Phase::ComputeCurrents => self.compute_currents.as_ref(),
            Phase::WriteIons => self.write_ions.as_ref(),
        }
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Option<Callback> {
        match phase {
            Phase::Init => &mut self.init,
            Phase::AdvanceState => &mut self.advance_state,
            Phase::ComputeCurrents => &mut self.compute_currents,
            Phase::WriteIons => &mut self.write_ions,
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<String> = Phase::ALL
            .iter()
            .filter(|p| self.is_set(**p))
            .map(|p| p.to_string())
            .collect();
        f.debug_struct("Callbacks").field("set", &set).finish()
    }
}

/// A declarative mechanism: schema lists plus lifecycle hooks that default to
/// no-ops.
pub trait CustomMechanism: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> MechanismKind {
        MechanismKind::Density
    }

    fn globals(&self) -> Vec<FieldInfo> {
        Vec::new()
    }

    fn state_vars(&self) -> Vec<FieldInfo> {
        Vec::new()
    }

    fn parameters(&self) -> Vec<FieldInfo> {
        Vec::new()
    }

    fn random_variables(&self) -> Vec<RandomVariable> {
        Vec::new()
    }

    fn ions(&self) -> Vec<IonInfo> {
        Vec::new()
    }

    fn init_mechanism(&self, pp: &PointerPack<'_>) -> CallbackResult {
        let _ = pp;
        Ok(())
    }

    fn advance_state(&self, pp: &PointerPack<'_>) -> CallbackResult {
        let _ = pp;
        Ok(())
    }

    fn compute_currents(&self, pp: &PointerPack<'_>) -> CallbackResult {
        let _ = pp;
        Ok(())
    }

    fn write_ions(&self, pp: &PointerPack<'_>) -> CallbackResult {
        let _ = pp;
        Ok(())
    }
}

/// A finalized schema together with its callbacks.
#[derive(Debug)]
pub struct Mechanism {
    schema: MechanismSchema,
    callbacks: Callbacks,
}

impl Mechanism {
    pub fn new(schema: MechanismSchema, callbacks: Callbacks) -> Self {
        Mechanism { schema, callbacks }
    }

    /// Declare the schema described by `mech` and route all four hooks to it.
    pub fn from_custom<M: CustomMechanism>(mech: M) -> Result<Self> {
        let mut decl = MechanismDecl::new();
        for field in mech.globals() {
            decl.declare_global_in(field.name, field.unit, field.default, field.range)?;
        }
        for field in mech.state_vars() {
            decl.declare_state_in(field.name, field.unit, field.default, field.range)?;
        }
        for field in mech.parameters() {
            decl.declare_parameter_in(field.name, field.unit, field.default, field.range)?;
        }
        for random in mech.random_variables() {
            decl.declare_random(random.name, random.index)?;
        }
        for ion in mech.ions() {
            decl.declare_ion(ion)?;
        }
        let schema = decl.finalize(mech.name(), mech.kind())?;

        let mech = Arc::new(mech);
        let (a, b, c, d) = (mech.clone(), mech.clone(), mech.clone(), mech);
        let callbacks = Callbacks::new()
            .on_init(move |pp| a.init_mechanism(pp))
            .on_advance_state(move |pp| b.advance_state(pp))
            .on_compute_currents(move |pp| c.compute_currents(pp))
            .on_write_ions(move |pp| d.write_ions(pp));
        Ok(Mechanism::new(schema, callbacks))
    }

    pub fn schema(&self) -> &MechanismSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Bind `bundle` and run the callback for `phase`. Errors from the callback
    /// are returned as-is; buffers keep whatever it wrote before failing.
    pub fn invoke(&self, phase: Phase, bundle: BufferBundle<'_>) -> Result<()> {
        let Some(callback) = self.callbacks.get(phase) else {
            return Ok(());
        };
        let pack = PointerPack::bind(&self.schema, bundle)?;
        tracing::trace!(
            mechanism = self.name(),
            %phase,
            width = pack.width(),
            dt = pack.dt(),
            "dispatching callback"
        );
        callback(&pack).map_err(|source| {
            tracing::error!(mechanism = self.name(), %phase, error = %source, "callback failed");
            Error::Callback {
                mechanism: self.schema.name_smol().clone(),
                phase,
                source,
            }
        })
    }
}

/// Where a mechanism instance is in its per-cell-group lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unbound,
    Initialized,
    Advancing,
    ComputingCurrents,
    WritingIons,
}

impl LifecycleState {
    /// State reached by running `phase` from `self`, if that transition is legal.
    pub fn next(self, phase: Phase) -> Option<LifecycleState> {
        use LifecycleState::*;
        match (self, phase) {
            (Unbound, Phase::Init) => Some(Initialized),
            (Initialized | WritingIons, Phase::AdvanceState) => Some(Advancing),
            (Advancing, Phase::ComputeCurrents) => Some(ComputingCurrents),
            (ComputingCurrents, Phase::WriteIons) => Some(WritingIons),
            _ => None,
        }
    }

    fn after(phase: Phase) -> LifecycleState {
        match phase {
            Phase::Init => LifecycleState::Initialized,
            Phase::AdvanceState => LifecycleState::Advancing,
            Phase::ComputeCurrents => LifecycleState::ComputingCurrents,
            Phase::WriteIons => LifecycleState::WritingIons,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            LifecycleState::Unbound => "unbound",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Advancing => "advancing",
            LifecycleState::ComputingCurrents => "computing currents",
            LifecycleState::WritingIons => "writing ions",
        }
    }
}

/// Binding of one mechanism to one cell group. Tracks the lifecycle and pins
/// the node index handed over at `init`.
#[derive(Debug)]
pub struct GroupBinding {
    mechanism: Arc<Mechanism>,
    state: LifecycleState,
    node_index: Vec<i32>,
    strict: bool,
}

impl GroupBinding {
    pub fn new(mechanism: Arc<Mechanism>) -> Self {
        GroupBinding {
            mechanism,
            state: LifecycleState::Unbound,
            node_index: Vec::new(),
            strict: true,
        }
    }

    /// Whether out-of-order phases and node index changes are rejected.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn mechanism(&self) -> &Arc<Mechanism> {
        &self.mechanism
    }

    fn name(&self) -> SmolStr {
        self.mechanism.schema().name_smol().clone()
    }

    pub fn invoke(&mut self, phase: Phase, bundle: BufferBundle<'_>) -> Result<()> {
        let next = self.state.next(phase);
        if self.strict && next.is_none() {
            return Err(Error::Lifecycle {
                mechanism: self.name(),
                phase,
                state: self.state.describe(),
            });
        }
        if phase == Phase::Init {
            self.node_index = bundle.node_index.to_vec();
        } else if self.strict && bundle.node_index != self.node_index.as_slice() {
            return Err(Error::BindingChanged(self.name()));
        }
        self.mechanism.invoke(phase, bundle)?;
        self.state = next.unwrap_or_else(|| LifecycleState::after(phase));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let s = LifecycleState::Unbound;
        assert_eq!(s.next(Phase::AdvanceState), None);
        let s = s.next(Phase::Init).unwrap();
        let s = s.next(Phase::AdvanceState).unwrap();
        let s = s.next(Phase::ComputeCurrents).unwrap();
        let s = s.next(Phase::WriteIons).unwrap();
        assert_eq!(s.next(Phase::Init), None);
        assert_eq!(s.next(Phase::AdvanceState), Some(LifecycleState::Advancing));
    }

    #[test]
    fn test_callbacks_debug_lists_set_slots() {
        let callbacks = Callbacks::new().on_write_ions(|_| Ok(()));
        assert!(callbacks.is_set(Phase::WriteIons));
        assert!(!callbacks.is_set(Phase::Init));
        assert!(format!("{:?}", callbacks).contains("write_ions"));
    }
}
