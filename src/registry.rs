//! Schema registry: turns declarations into slot indices and the immutable
//! attribute map a pointer pack dispatches over.

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use std::fmt;

use crate::error::{Result, SchemaError};
use crate::ion::{IonInfo, IonQuantity};
use crate::schema::{
    validate_name, FieldInfo, GlobalSlot, IonSlot, MechanismKind, ParameterSlot, RandomSlot,
    RandomVariable, SlotIndex, StateSlot,
};

/// Attributes every pointer pack carries regardless of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    NodeIndex,
    V,
    I,
    G,
    Dt,
    Width,
    TemperatureDegC,
    DiamUm,
    AreaUm2,
}

impl Builtin {
    pub const ALL: [Builtin; 9] = [
        Builtin::NodeIndex,
        Builtin::V,
        Builtin::I,
        Builtin::G,
        Builtin::Dt,
        Builtin::Width,
        Builtin::TemperatureDegC,
        Builtin::DiamUm,
        Builtin::AreaUm2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::NodeIndex => "node_index",
            Builtin::V => "v",
            Builtin::I => "i",
            Builtin::G => "g",
            Builtin::Dt => "dt",
            Builtin::Width => "width",
            Builtin::TemperatureDegC => "temperature_degC",
            Builtin::DiamUm => "diam_um",
            Builtin::AreaUm2 => "area_um2",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// What a named attribute resolves to. Fixed once the schema is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Builtin(Builtin),
    Global(GlobalSlot),
    State(StateSlot),
    Parameter(ParameterSlot),
    Random(RandomSlot),
    Ion(IonSlot, IonQuantity),
}

impl Binding {
    /// Short description used in error messages.
    pub fn category(&self) -> &'static str {
        match self {
            Binding::Builtin(Builtin::Dt) | Binding::Builtin(Builtin::Width) => {
                "a read-only scalar"
            }
            Binding::Builtin(Builtin::NodeIndex) => "an index array",
            Binding::Builtin(Builtin::DiamUm) | Binding::Builtin(Builtin::AreaUm2) => {
                "a read-only array"
            }
            Binding::Builtin(_) => "an array",
            Binding::Global(_) => "a scalar",
            Binding::State(_) | Binding::Parameter(_) => "an array",
            Binding::Random(_) => "a read-only array",
            Binding::Ion(_, IonQuantity::Index) => "an index array",
            Binding::Ion(_, IonQuantity::IonicCharge) => "a read-only array",
            Binding::Ion(_, _) => "an array",
        }
    }
}

/// Collects declarations for one mechanism. Indices are handed out in
/// declaration order, starting at zero, separately for each category.
#[derive(Debug, Default)]
pub struct MechanismDecl {
    globals: Vec<FieldInfo>,
    state_vars: Vec<FieldInfo>,
    parameters: Vec<FieldInfo>,
    random_variables: Vec<RandomVariable>,
    ions: Vec<IonInfo>,
    attributes: FxHashMap<SmolStr, Binding>,
    is_linear: bool,
    has_post_events: bool,
}

impl MechanismDecl {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&mut self, name: &SmolStr, binding: Binding) -> std::result::Result<(), SchemaError> {
        if Builtin::from_name(name).is_some() {
            return Err(SchemaError::ReservedName(name.clone()));
        }
        if self.attributes.contains_key(name) {
            return Err(SchemaError::DuplicateField(name.clone()));
        }
        self.attributes.insert(name.clone(), binding);
        Ok(())
    }

    fn next_index(len: usize) -> std::result::Result<u32, SchemaError> {
        u32::try_from(len).map_err(|_| SchemaError::Malformed("too many declarations".into()))
    }

    pub fn declare_global(
        &mut self,
        name: impl Into<SmolStr>,
        unit: impl Into<SmolStr>,
        default: f64,
    ) -> Result<GlobalSlot> {
        let field = FieldInfo::new(name, unit, default);
        self.push_global(field)
    }

    pub fn declare_global_in(
        &mut self,
        name: impl Into<SmolStr>,
        unit: impl Into<SmolStr>,
        default: f64,
        range: (f64, f64),
    ) -> Result<GlobalSlot> {
        let field = FieldInfo::new(name, unit, default).with_range(range.0, range.1);
        self.push_global(field)
    }

    fn push_global(&mut self, field: FieldInfo) -> Result<GlobalSlot> {
        field.validate()?;
        let slot = SlotIndex::new(Self::next_index(self.globals.len())?);
        self.claim(&field.name, Binding::Global(slot))?;
        tracing::debug!(name = %field.name, index = slot.get(), "declared global");
        self.globals.push(field);
        Ok(slot)
    }

    pub fn declare_state(
        &mut self,
        name: impl Into<SmolStr>,
        unit: impl Into<SmolStr>,
        default: f64,
    ) -> Result<StateSlot> {
        let field = FieldInfo::new(name, unit, default);
        self.push_state(field)
    }

    pub fn declare_state_in(
        &mut self,
        name: impl Into<SmolStr>,
        unit: impl Into<SmolStr>,
        default: f64,
        range: (f64, f64),
    ) -> Result<StateSlot> {
        let field = FieldInfo::new(name, unit, default).with_range(range.0, range.1);
        self.push_state(field)
    }

    fn push_state(&mut self, field: FieldInfo) -> Result<StateSlot> {
        field.validate()?;
        let slot = SlotIndex::new(Self::next_index(self.state_vars.len())?);
        self.claim(&field.name, Binding::State(slot))?;
        tracing::debug!(name = %field.name, index = slot.get(), "declared state variable");
        self.state_vars.push(field);
        Ok(slot)
    }

    pub fn declare_parameter(
        &mut self,
        name: impl Into<SmolStr>,
        unit: impl Into<SmolStr>,
        default: f64,
    ) -> Result<ParameterSlot> {
        let field = FieldInfo::new(name, unit, default);
        self.push_parameter(field)
    }

    pub fn declare_parameter_in(
        &mut self,
        name: impl Into<SmolStr>,
        unit: impl Into<SmolStr>,
        default: f64,
        range: (f64, f64),
    ) -> Result<ParameterSlot> {
        let field = FieldInfo::new(name, unit, default).with_range(range.0, range.1);
        self.push_parameter(field)
    }

    fn push_parameter(&mut self, field: FieldInfo) -> Result<ParameterSlot> {
        field.validate()?;
        let slot = SlotIndex::new(Self::next_index(self.parameters.len())?);
        self.claim(&field.name, Binding::Parameter(slot))?;
        tracing::debug!(name = %field.name, index = slot.get(), "declared parameter");
        self.parameters.push(field);
        Ok(slot)
    }

    pub fn declare_random(&mut self, name: impl Into<SmolStr>, index: u32) -> Result<RandomSlot> {
        let name = name.into();
        validate_name(&name)?;
        let slot = SlotIndex::new(Self::next_index(self.random_variables.len())?);
        self.claim(&name, Binding::Random(slot))?;
        tracing::debug!(name = %name, stream = index, "declared random variable");
        self.random_variables.push(RandomVariable { name, index });
        Ok(slot)
    }

    /// Declare an ion dependency. Claims all eight derived attribute names; a
    /// valence expectation is only recorded here and checked at catalogue build.
    pub fn declare_ion(&mut self, info: IonInfo) -> Result<IonSlot> {
        validate_name(&info.name)?;
        if info.verify_valence && info.expected_valence == 0 {
            return Err(SchemaError::Malformed(format!(
                "ion '{}' verifies a valence of zero",
                info.name
            ))
            .into());
        }
        let slot: IonSlot = SlotIndex::new(Self::next_index(self.ions.len())?);
        let derived: Vec<(SmolStr, IonQuantity)> = info.attribute_names().collect();
        let mut seen = FxHashSet::default();
        for (name, _) in &derived {
            if !seen.insert(name) {
                return Err(SchemaError::DuplicateField(name.clone()).into());
            }
        }
        for (name, _) in &derived {
            if Builtin::from_name(name).is_some() {
                return Err(SchemaError::ReservedName(name.clone()).into());
            }
            if self.attributes.contains_key(name) {
                return Err(SchemaError::DuplicateField(name.clone()).into());
            }
        }
        for (name, quantity) in derived {
            self.attributes.insert(name, Binding::Ion(slot, quantity));
        }
        tracing::debug!(
            ion = %info.name,
            index = slot.get(),
            verify_valence = info.verify_valence,
            expected_valence = info.expected_valence,
            "declared ion"
        );
        self.ions.push(info);
        Ok(slot)
    }

    pub fn set_linear(&mut self, is_linear: bool) {
        self.is_linear = is_linear;
    }

    pub fn set_post_events(&mut self, has_post_events: bool) {
        self.has_post_events = has_post_events;
    }

    /// Seal the declarations into an immutable schema.
    pub fn finalize(
        self,
        name: impl Into<SmolStr>,
        kind: MechanismKind,
    ) -> Result<MechanismSchema> {
        let name = name.into();
        validate_name(&name)?;
        let mut attributes = self.attributes;
        for builtin in Builtin::ALL {
            attributes.insert(SmolStr::new_inline(builtin.name()), Binding::Builtin(builtin));
        }
        tracing::info!(
            mechanism = %name,
            %kind,
            globals = self.globals.len(),
            state_vars = self.state_vars.len(),
            parameters = self.parameters.len(),
            ions = self.ions.len(),
            "finalized mechanism schema"
        );
        Ok(MechanismSchema {
            name,
            kind,
            globals: self.globals,
            state_vars: self.state_vars,
            parameters: self.parameters,
            random_variables: self.random_variables,
            ions: self.ions,
            is_linear: self.is_linear,
            has_post_events: self.has_post_events,
            attributes,
        })
    }
}

/// A finalized mechanism description.
#[derive(Debug, Clone)]
pub struct MechanismSchema {
    name: SmolStr,
    kind: MechanismKind,
    globals: Vec<FieldInfo>,
    state_vars: Vec<FieldInfo>,
    parameters: Vec<FieldInfo>,
    random_variables: Vec<RandomVariable>,
    ions: Vec<IonInfo>,
    is_linear: bool,
    has_post_events: bool,
    attributes: FxHashMap<SmolStr, Binding>,
}

impl MechanismSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_smol(&self) -> &SmolStr {
        &self.name
    }

    pub fn kind(&self) -> MechanismKind {
        self.kind
    }

    pub fn globals(&self) -> &[FieldInfo] {
        &self.globals
    }

    pub fn state_vars(&self) -> &[FieldInfo] {
        &self.state_vars
    }

    pub fn parameters(&self) -> &[FieldInfo] {
        &self.parameters
    }

    pub fn random_variables(&self) -> &[RandomVariable] {
        &self.random_variables
    }

    pub fn ions(&self) -> &[IonInfo] {
        &self.ions
    }

    pub fn is_linear(&self) -> bool {
        self.is_linear
    }

    pub fn has_post_events(&self) -> bool {
        self.has_post_events
    }

    /// Resolve an attribute name.
    pub fn lookup(&self, attribute: &str) -> Option<Binding> {
        self.attributes.get(attribute).copied()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(|k| k.as_str())
    }

    pub fn global_slot(&self, name: &str) -> Option<GlobalSlot> {
        match self.lookup(name)? {
            Binding::Global(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn state_slot(&self, name: &str) -> Option<StateSlot> {
        match self.lookup(name)? {
            Binding::State(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn parameter_slot(&self, name: &str) -> Option<ParameterSlot> {
        match self.lookup(name)? {
            Binding::Parameter(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn ion_slot(&self, ion: &str) -> Option<IonSlot> {
        self.ions
            .iter()
            .position(|i| i.name == ion)
            .and_then(|p| u32::try_from(p).ok())
            .map(SlotIndex::new)
    }
}

impl fmt::Display for MechanismSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}
