use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{Error, Result, SchemaError};
use crate::ion::IonInfo;
use crate::registry::{MechanismDecl, MechanismSchema};

/// Whether a mechanism contributes per unit membrane area or at discrete sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MechanismKind {
    #[default]
    Density,
    Point,
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MechanismKind::Density => write!(f, "density"),
            MechanismKind::Point => write!(f, "point"),
        }
    }
}

/// A named scalar declaration: global, state variable or parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: SmolStr,
    #[serde(default)]
    pub unit: SmolStr,
    #[serde(default)]
    pub default: f64,
    #[serde(default = "FieldInfo::full_range")]
    pub range: (f64, f64),
}

impl FieldInfo {
    pub fn new(name: impl Into<SmolStr>, unit: impl Into<SmolStr>, default: f64) -> Self {
        FieldInfo {
            name: name.into(),
            unit: unit.into(),
            default,
            range: Self::full_range(),
        }
    }

    pub fn with_range(mut self, lower: f64, upper: f64) -> Self {
        self.range = (lower, upper);
        self
    }

    fn full_range() -> (f64, f64) {
        (-f64::MAX, f64::MAX)
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), SchemaError> {
        validate_name(&self.name)?;
        let (lower, upper) = self.range;
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(SchemaError::Malformed(format!(
                "field '{}' has an empty range [{}, {}]",
                self.name, lower, upper
            )));
        }
        if !self.default.is_finite() || self.default < lower || self.default > upper {
            return Err(SchemaError::Malformed(format!(
                "default {} of field '{}' lies outside [{}, {}]",
                self.default, self.name, lower, upper
            )));
        }
        Ok(())
    }
}

/// A random-number stream the engine supplies per compartment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomVariable {
    pub name: SmolStr,
    pub index: u32,
}

/// Names must be usable as attribute identifiers.
pub(crate) fn validate_name(name: &str) -> std::result::Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::Malformed(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

// -- Slot indices --

/// Index space of global scalars.
#[derive(Debug)]
pub enum Global {}
/// Index space of per-compartment state variables.
#[derive(Debug)]
pub enum State {}
/// Index space of per-compartment parameters.
#[derive(Debug)]
pub enum Parameter {}
/// Index space of random-number streams.
#[derive(Debug)]
pub enum Random {}
/// Index space of ion dependencies.
#[derive(Debug)]
pub enum Ion {}

/// Stable position of a declaration within its category. Assigned in
/// declaration order starting at zero, independently per category.
pub struct SlotIndex<K> {
    raw: u32,
    _kind: PhantomData<fn() -> K>,
}

impl<K> SlotIndex<K> {
    pub(crate) fn new(raw: u32) -> Self {
        SlotIndex {
            raw,
            _kind: PhantomData,
        }
    }

    pub fn get(self) -> usize {
        self.raw as usize
    }
}

impl<K> Clone for SlotIndex<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for SlotIndex<K> {}

impl<K> PartialEq for SlotIndex<K> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<K> Eq for SlotIndex<K> {}

impl<K> Hash for SlotIndex<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<K> fmt::Debug for SlotIndex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotIndex({})", self.raw)
    }
}

pub type GlobalSlot = SlotIndex<Global>;
pub type StateSlot = SlotIndex<State>;
pub type ParameterSlot = SlotIndex<Parameter>;
pub type RandomSlot = SlotIndex<Random>;
pub type IonSlot = SlotIndex<Ion>;

// -- Declarative description --

/// Field declaration as written in a description file: either the short
/// `["name", "unit", default]` tuple or a full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldDecl {
    Tuple(SmolStr, SmolStr, f64),
    Full(FieldInfo),
}

impl From<FieldDecl> for FieldInfo {
    fn from(decl: FieldDecl) -> Self {
        match decl {
            FieldDecl::Tuple(name, unit, default) => FieldInfo::new(name, unit, default),
            FieldDecl::Full(info) => info,
        }
    }
}

/// A complete mechanism declaration that can be loaded from JSON.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDescription {
    pub name: SmolStr,
    pub kind: MechanismKind,
    pub globals: Vec<FieldDecl>,
    pub state_vars: Vec<FieldDecl>,
    pub parameters: Vec<FieldDecl>,
    pub random_variables: Vec<RandomVariable>,
    pub ions: Vec<IonInfo>,
    pub is_linear: bool,
    pub has_post_events: bool,
}

impl SchemaDescription {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Schema(SchemaError::Malformed(e.to_string())))
    }

    /// Run every declaration through the registry, in order.
    pub fn declare(&self) -> Result<MechanismSchema> {
        let mut decl = MechanismDecl::new();
        for field in &self.globals {
            let FieldInfo { name, unit, default, range } = field.clone().into();
            decl.declare_global_in(name, unit, default, range)?;
        }
        for field in &self.state_vars {
            let FieldInfo { name, unit, default, range } = field.clone().into();
            decl.declare_state_in(name, unit, default, range)?;
        }
        for field in &self.parameters {
            let FieldInfo { name, unit, default, range } = field.clone().into();
            decl.declare_parameter_in(name, unit, default, range)?;
        }
        for random in &self.random_variables {
            decl.declare_random(random.name.clone(), random.index)?;
        }
        for ion in &self.ions {
            decl.declare_ion(ion.clone())?;
        }
        decl.set_linear(self.is_linear);
        decl.set_post_events(self.has_post_events);
        decl.finalize(self.name.clone(), self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(validate_name("x").is_ok());
        assert!(validate_name("_gbar2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("2x").is_err());
        assert!(validate_name("e-k").is_err());
    }

    #[test]
    fn test_default_outside_range() {
        let field = FieldInfo::new("g", "S/cm2", -1.0).with_range(0.0, 1.0);
        assert!(matches!(field.validate(), Err(SchemaError::Malformed(_))));
    }
}
