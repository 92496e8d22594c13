//! Pointer pack: the per-call view a mechanism callback reads and writes.
//!
//! Every writable array is exposed as a slice of [`Cell`]s over the engine's
//! buffer, so several attributes can be held at once and each write lands in
//! engine memory immediately. Cells also keep a pack on the thread that built
//! it.

use smol_str::SmolStr;
use std::cell::Cell;
use std::fmt;

use crate::bundle::BufferBundle;
use crate::error::{Error, Result};
use crate::ion::{IonQuantity, IonView};
use crate::registry::{Binding, Builtin, MechanismSchema};
use crate::schema::{GlobalSlot, IonSlot, ParameterSlot, RandomSlot, StateSlot};

/// Writable view of one engine array.
#[derive(Clone, Copy)]
pub struct Array<'a> {
    cells: &'a [Cell<f64>],
}

impl<'a> Array<'a> {
    pub(crate) fn new(cells: &'a [Cell<f64>]) -> Self {
        Array { cells }
    }

    pub(crate) fn from_mut(values: &'a mut [f64]) -> Self {
        Array::new(Cell::from_mut(values).as_slice_of_cells())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Panics if `k` is out of bounds.
    pub fn get(&self, k: usize) -> f64 {
        self.cells[k].get()
    }

    pub fn try_get(&self, k: usize) -> Option<f64> {
        self.cells.get(k).map(Cell::get)
    }

    /// Panics if `k` is out of bounds.
    pub fn set(&self, k: usize, value: f64) {
        self.cells[k].set(value);
    }

    pub fn update(&self, k: usize, f: impl FnOnce(f64) -> f64) {
        let cell = &self.cells[k];
        cell.set(f(cell.get()));
    }

    pub fn fill(&self, value: f64) {
        for cell in self.cells {
            cell.set(value);
        }
    }

    /// Panics if the lengths differ.
    pub fn copy_from_slice(&self, values: &[f64]) {
        assert_eq!(self.cells.len(), values.len(), "array length mismatch");
        for (cell, value) in self.cells.iter().zip(values) {
            cell.set(*value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + 'a {
        self.cells.iter().map(Cell::get)
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }

    /// Values at the given positions, in order.
    pub fn gather(&self, index: &[i32]) -> Vec<f64> {
        index.iter().map(|&k| self.get(k as usize)).collect()
    }

    /// Write `values[k]` to position `index[k]`.
    pub fn scatter(&self, index: &[i32], values: &[f64]) {
        for (&k, value) in index.iter().zip(values) {
            self.set(k as usize, *value);
        }
    }

    /// Write `value` to every listed position.
    pub fn scatter_fill(&self, index: &[i32], value: f64) {
        for &k in index {
            self.set(k as usize, value);
        }
    }

    pub fn as_cells(&self) -> &'a [Cell<f64>] {
        self.cells
    }
}

impl fmt::Debug for Array<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Read-only view of one engine array.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnly<'a> {
    values: &'a [f64],
}

impl<'a> ReadOnly<'a> {
    pub(crate) fn new(values: &'a [f64]) -> Self {
        ReadOnly { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, k: usize) -> f64 {
        self.values[k]
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + 'a {
        self.values.iter().copied()
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.values
    }
}

/// Right-hand side of an assignment through [`PointerPack::assign`].
#[derive(Debug, Clone, Copy)]
pub enum Value<'v> {
    /// Broadcast to every element.
    Scalar(f64),
    /// Replace element-wise.
    Slice(&'v [f64]),
}

impl From<f64> for Value<'_> {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

impl<'v> From<&'v [f64]> for Value<'v> {
    fn from(values: &'v [f64]) -> Self {
        Value::Slice(values)
    }
}

impl<'v> From<&'v Vec<f64>> for Value<'v> {
    fn from(values: &'v Vec<f64>) -> Self {
        Value::Slice(values)
    }
}

impl<'v, const N: usize> From<&'v [f64; N]> for Value<'v> {
    fn from(values: &'v [f64; N]) -> Self {
        Value::Slice(values)
    }
}

/// A resolved named attribute.
#[derive(Debug, Clone, Copy)]
pub enum Attr<'a> {
    Scalar(f64),
    Array(Array<'a>),
    ReadOnly(ReadOnly<'a>),
    Index(&'a [i32]),
}

/// Named and slot-indexed access to a mechanism's buffers for one call.
#[derive(Debug)]
pub struct PointerPack<'a> {
    schema: &'a MechanismSchema,
    dt: f64,
    node_index: &'a [i32],
    v: Array<'a>,
    i: Array<'a>,
    g: Array<'a>,
    temperature_degc: Option<Array<'a>>,
    diam_um: Option<ReadOnly<'a>>,
    area_um2: Option<ReadOnly<'a>>,
    globals: Array<'a>,
    states: Vec<Array<'a>>,
    parameters: Vec<Array<'a>>,
    random: Vec<ReadOnly<'a>>,
    ions: Vec<IonView<'a>>,
}

impl<'a> PointerPack<'a> {
    /// Bind a bundle to the attribute layout of `schema`.
    pub fn bind(schema: &'a MechanismSchema, bundle: BufferBundle<'a>) -> Result<Self> {
        let mismatch = |detail: String| Error::BundleMismatch {
            mechanism: schema.name_smol().clone(),
            detail,
        };
        let width = bundle.node_index.len();

        let counts = [
            ("globals", bundle.globals.len(), schema.globals().len()),
            ("state variables", bundle.state_vars.len(), schema.state_vars().len()),
            ("parameters", bundle.parameters.len(), schema.parameters().len()),
            ("random streams", bundle.random_numbers.len(), schema.random_variables().len()),
            ("ions", bundle.ions.len(), schema.ions().len()),
        ];
        for (what, got, declared) in counts {
            if got != declared {
                return Err(mismatch(format!("{} {}, schema declares {}", got, what, declared)));
            }
        }

        let shared = bundle.v.len().min(bundle.i.len()).min(bundle.g.len());
        if let Some(bad) = bundle
            .node_index
            .iter()
            .find(|&&k| k < 0 || k as usize >= shared)
        {
            return Err(mismatch(format!(
                "node index {} outside shared arrays of length {}",
                bad, shared
            )));
        }

        let env = [
            ("temperature_degC", bundle.temperature_degc.as_deref().map(<[f64]>::len)),
            ("diam_um", bundle.diam_um.map(<[f64]>::len)),
            ("area_um2", bundle.area_um2.map(<[f64]>::len)),
        ];
        for (what, len) in env {
            if let Some(len) = len.filter(|&len| len < shared) {
                return Err(mismatch(format!(
                    "{} of length {} shorter than shared arrays of length {}",
                    what, len, shared
                )));
            }
        }

        for (buffers, info) in bundle.ions.iter().zip(schema.ions()) {
            if buffers.index.len() != width {
                return Err(mismatch(format!(
                    "index_{} has {} entries for width {}",
                    info.name,
                    buffers.index.len(),
                    width
                )));
            }
            let span = buffers.span().unwrap_or(usize::MAX);
            if let Some(bad) = buffers.index.iter().find(|&&k| k < 0 || k as usize >= span) {
                return Err(mismatch(format!(
                    "index_{} entry {} outside ion arrays of length {}",
                    info.name, bad, span
                )));
            }
        }

        let per_node = bundle
            .state_vars
            .iter()
            .map(|s| s.len())
            .chain(bundle.parameters.iter().map(|p| p.len()))
            .chain(bundle.random_numbers.iter().map(|r| r.len()));
        for len in per_node {
            if len != width {
                return Err(mismatch(format!(
                    "per-compartment array of length {} for width {}",
                    len, width
                )));
            }
        }

        let ions = bundle
            .ions
            .into_iter()
            .zip(schema.ions())
            .map(|(buffers, info)| IonView::bind(info.name.clone(), buffers))
            .collect();

        Ok(PointerPack {
            schema,
            dt: bundle.dt,
            node_index: bundle.node_index,
            v: Array::from_mut(bundle.v),
            i: Array::from_mut(bundle.i),
            g: Array::from_mut(bundle.g),
            temperature_degc: bundle.temperature_degc.map(Array::from_mut),
            diam_um: bundle.diam_um.map(ReadOnly::new),
            area_um2: bundle.area_um2.map(ReadOnly::new),
            globals: Array::from_mut(bundle.globals),
            states: bundle.state_vars.into_iter().map(Array::from_mut).collect(),
            parameters: bundle.parameters.into_iter().map(Array::from_mut).collect(),
            random: bundle.random_numbers.into_iter().map(ReadOnly::new).collect(),
            ions,
        })
    }

    pub fn schema(&self) -> &'a MechanismSchema {
        self.schema
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn width(&self) -> usize {
        self.node_index.len()
    }

    pub fn node_index(&self) -> &'a [i32] {
        self.node_index
    }

    /// Membrane voltage of the whole cell group, addressed by node index.
    pub fn v(&self) -> Array<'a> {
        self.v
    }

    /// Current density of the whole cell group, addressed by node index.
    pub fn i(&self) -> Array<'a> {
        self.i
    }

    /// Conductance density of the whole cell group, addressed by node index.
    pub fn g(&self) -> Array<'a> {
        self.g
    }

    pub fn temperature_degc(&self) -> Result<Array<'a>> {
        self.temperature_degc
            .ok_or_else(|| Error::MissingBuffer(Builtin::TemperatureDegC.name().into()))
    }

    pub fn diam_um(&self) -> Result<ReadOnly<'a>> {
        self.diam_um
            .ok_or_else(|| Error::MissingBuffer(Builtin::DiamUm.name().into()))
    }

    pub fn area_um2(&self) -> Result<ReadOnly<'a>> {
        self.area_um2
            .ok_or_else(|| Error::MissingBuffer(Builtin::AreaUm2.name().into()))
    }

    // -- Slot access. Panics on a slot issued for another mechanism. --

    pub fn global(&self, slot: GlobalSlot) -> f64 {
        self.globals.get(slot.get())
    }

    pub fn set_global(&self, slot: GlobalSlot, value: f64) {
        self.globals.set(slot.get(), value);
    }

    pub fn state(&self, slot: StateSlot) -> Array<'a> {
        self.states[slot.get()]
    }

    pub fn parameter(&self, slot: ParameterSlot) -> Array<'a> {
        self.parameters[slot.get()]
    }

    pub fn random(&self, slot: RandomSlot) -> ReadOnly<'a> {
        self.random[slot.get()]
    }

    pub fn ion(&self, slot: IonSlot) -> &IonView<'a> {
        &self.ions[slot.get()]
    }

    // -- Named access --

    fn binding(&self, attribute: &str) -> Result<Binding> {
        self.schema
            .lookup(attribute)
            .ok_or_else(|| Error::UnboundAttribute {
                mechanism: self.schema.name_smol().clone(),
                attribute: attribute.into(),
            })
    }

    /// Resolve a named attribute to its current buffer.
    pub fn attr(&self, attribute: &str) -> Result<Attr<'a>> {
        let binding = self.binding(attribute)?;
        self.resolve(binding)
    }

    fn resolve(&self, binding: Binding) -> Result<Attr<'a>> {
        let attr = match binding {
            Binding::Builtin(Builtin::NodeIndex) => Attr::Index(self.node_index),
            Binding::Builtin(Builtin::V) => Attr::Array(self.v),
            Binding::Builtin(Builtin::I) => Attr::Array(self.i),
            Binding::Builtin(Builtin::G) => Attr::Array(self.g),
            Binding::Builtin(Builtin::Dt) => Attr::Scalar(self.dt),
            Binding::Builtin(Builtin::Width) => Attr::Scalar(self.width() as f64),
            Binding::Builtin(Builtin::TemperatureDegC) => Attr::Array(self.temperature_degc()?),
            Binding::Builtin(Builtin::DiamUm) => Attr::ReadOnly(self.diam_um()?),
            Binding::Builtin(Builtin::AreaUm2) => Attr::ReadOnly(self.area_um2()?),
            Binding::Global(slot) => Attr::Scalar(self.global(slot)),
            Binding::State(slot) => Attr::Array(self.state(slot)),
            Binding::Parameter(slot) => Attr::Array(self.parameter(slot)),
            Binding::Random(slot) => Attr::ReadOnly(self.random(slot)),
            Binding::Ion(slot, IonQuantity::Index) => Attr::Index(self.ion(slot).index()),
            Binding::Ion(slot, IonQuantity::IonicCharge) => {
                Attr::ReadOnly(self.ion(slot).ionic_charge()?)
            }
            Binding::Ion(slot, quantity) => Attr::Array(self.ion(slot).quantity(quantity)?),
        };
        Ok(attr)
    }

    /// The positions a node-aligned attribute is addressed through, if any.
    /// Shared membrane arrays go through `node_index`, ion quantities through
    /// the ion's own index.
    fn alignment(&self, binding: Binding) -> Option<&'a [i32]> {
        match binding {
            Binding::Builtin(
                Builtin::V
                | Builtin::I
                | Builtin::G
                | Builtin::TemperatureDegC
                | Builtin::DiamUm
                | Builtin::AreaUm2,
            ) => Some(self.node_index),
            Binding::Ion(slot, _) => Some(self.ion(slot).index()),
            _ => None,
        }
    }

    fn kind_error(attribute: &str, binding: Binding, expected: &'static str) -> Error {
        Error::AttributeKind {
            attribute: attribute.into(),
            expected,
            found: binding.category(),
        }
    }

    /// Writable array behind `attribute`.
    pub fn array(&self, attribute: &str) -> Result<Array<'a>> {
        let binding = self.binding(attribute)?;
        match self.resolve(binding)? {
            Attr::Array(array) => Ok(array),
            Attr::ReadOnly(_) | Attr::Index(_) => Err(Error::ReadOnlyAttribute(attribute.into())),
            Attr::Scalar(_) => Err(Self::kind_error(attribute, binding, "an array")),
        }
    }

    /// Index array behind `attribute` (`node_index` or `index_<ion>`).
    pub fn indices(&self, attribute: &str) -> Result<&'a [i32]> {
        let binding = self.binding(attribute)?;
        match self.resolve(binding)? {
            Attr::Index(index) => Ok(index),
            _ => Err(Self::kind_error(attribute, binding, "an index array")),
        }
    }

    pub fn scalar(&self, attribute: &str) -> Result<f64> {
        let binding = self.binding(attribute)?;
        match self.resolve(binding)? {
            Attr::Scalar(value) => Ok(value),
            _ => Err(Self::kind_error(attribute, binding, "a scalar")),
        }
    }

    pub fn set_scalar(&self, attribute: &str, value: f64) -> Result<()> {
        match self.binding(attribute)? {
            Binding::Global(slot) => {
                self.set_global(slot, value);
                Ok(())
            }
            Binding::Builtin(Builtin::Dt | Builtin::Width) => {
                Err(Error::ReadOnlyAttribute(attribute.into()))
            }
            binding => Err(Self::kind_error(attribute, binding, "a scalar")),
        }
    }

    /// Node-aligned copy of an array attribute: one value per compartment of
    /// this call (per entry of the ion index for ion quantities).
    pub fn values(&self, attribute: &str) -> Result<Vec<f64>> {
        let binding = self.binding(attribute)?;
        let alignment = self.alignment(binding);
        match (self.resolve(binding)?, alignment) {
            (Attr::Array(array), Some(index)) => Ok(array.gather(index)),
            (Attr::Array(array), None) => Ok(array.to_vec()),
            (Attr::ReadOnly(values), Some(index)) => {
                Ok(index.iter().map(|&k| values.get(k as usize)).collect())
            }
            (Attr::ReadOnly(values), None) => Ok(values.iter().collect()),
            _ => Err(Self::kind_error(attribute, binding, "an array")),
        }
    }

    /// Assign to a named attribute. A scalar broadcasts; a slice replaces
    /// element-wise and must match the attribute's node-aligned length.
    pub fn assign<'v>(&self, attribute: &str, value: impl Into<Value<'v>>) -> Result<()> {
        let value = value.into();
        let binding = self.binding(attribute)?;
        let shape_error = |expected: usize, actual: usize| Error::ShapeMismatch {
            attribute: attribute.into(),
            expected,
            actual,
        };

        if let Binding::Global(slot) = binding {
            return match value {
                Value::Scalar(x) => {
                    self.set_global(slot, x);
                    Ok(())
                }
                Value::Slice([x]) => {
                    self.set_global(slot, *x);
                    Ok(())
                }
                Value::Slice(values) => Err(shape_error(1, values.len())),
            };
        }

        let array = match self.resolve(binding)? {
            Attr::Array(array) => array,
            Attr::Scalar(_) | Attr::ReadOnly(_) | Attr::Index(_) => {
                return Err(Error::ReadOnlyAttribute(SmolStr::from(attribute)))
            }
        };
        match (self.alignment(binding), value) {
            (Some(index), Value::Scalar(x)) => array.scatter_fill(index, x),
            (Some(index), Value::Slice(values)) => {
                if values.len() != index.len() {
                    return Err(shape_error(index.len(), values.len()));
                }
                array.scatter(index, values);
            }
            (None, Value::Scalar(x)) => array.fill(x),
            (None, Value::Slice(values)) => {
                if values.len() != array.len() {
                    return Err(shape_error(array.len(), values.len()));
                }
                array.copy_from_slice(values);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_writes_through() {
        let mut backing = vec![0.0; 4];
        {
            let array = Array::from_mut(&mut backing);
            array.set(1, 2.5);
            array.update(1, |x| x * 2.0);
            array.scatter_fill(&[0, 3], -1.0);
        }
        assert_eq!(backing, vec![-1.0, 5.0, 0.0, -1.0]);
    }

    #[test]
    fn test_gather_follows_index() {
        let mut backing = vec![10.0, 20.0, 30.0];
        let array = Array::from_mut(&mut backing);
        assert_eq!(array.gather(&[2, 0]), vec![30.0, 10.0]);
    }
}
