//! Ion dependencies: declaration flags, the eight per-ion quantities a pointer
//! pack exposes, and the engine-side valence lookup used at catalogue build.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smol_str::{format_smolstr, SmolStr};
use std::cell::Cell;
use std::fmt;

use crate::error::{Error, Result};
use crate::view::{Array, ReadOnly};

/// How a mechanism uses one ion species. Field defaults match the engine's
/// binding options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IonInfo {
    pub name: SmolStr,
    pub write_int_concentration: bool,
    pub write_ext_concentration: bool,
    pub use_diff_concentration: bool,
    pub write_rev_potential: bool,
    pub read_rev_potential: bool,
    pub read_valence: bool,
    pub verify_valence: bool,
    pub expected_valence: i32,
}

impl Default for IonInfo {
    fn default() -> Self {
        IonInfo {
            name: SmolStr::default(),
            write_int_concentration: true,
            write_ext_concentration: false,
            use_diff_concentration: false,
            write_rev_potential: false,
            read_rev_potential: true,
            read_valence: false,
            verify_valence: false,
            expected_valence: 1,
        }
    }
}

impl IonInfo {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        IonInfo {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Require the engine's valence for this ion to equal `valence`.
    pub fn verified_valence(mut self, valence: i32) -> Self {
        self.expected_valence = valence;
        self.verify_valence = true;
        self
    }

    pub fn with_int_concentration(mut self, write: bool) -> Self {
        self.write_int_concentration = write;
        self
    }

    pub fn with_ext_concentration(mut self, write: bool) -> Self {
        self.write_ext_concentration = write;
        self
    }

    pub fn with_diff_concentration(mut self, enable: bool) -> Self {
        self.use_diff_concentration = enable;
        self
    }

    pub fn with_rev_potential(mut self, read: bool, write: bool) -> Self {
        self.read_rev_potential = read;
        self.write_rev_potential = write;
        self
    }

    pub fn with_read_valence(mut self, read: bool) -> Self {
        self.read_valence = read;
        self
    }

    /// All attribute names this ion contributes to a pointer pack.
    pub fn attribute_names(&self) -> impl Iterator<Item = (SmolStr, IonQuantity)> + '_ {
        IonQuantity::ALL
            .iter()
            .map(move |q| (q.attribute(&self.name), *q))
    }
}

/// The per-ion quantities reachable from a pointer pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IonQuantity {
    CurrentDensity,
    Conductivity,
    ReversalPotential,
    InternalConcentration,
    ExternalConcentration,
    DiffusiveConcentration,
    IonicCharge,
    Index,
}

impl IonQuantity {
    pub const ALL: [IonQuantity; 8] = [
        IonQuantity::CurrentDensity,
        IonQuantity::Conductivity,
        IonQuantity::ReversalPotential,
        IonQuantity::InternalConcentration,
        IonQuantity::ExternalConcentration,
        IonQuantity::DiffusiveConcentration,
        IonQuantity::IonicCharge,
        IonQuantity::Index,
    ];

    /// Attribute name for this quantity of `ion`, e.g. `eca` or `index_ca`.
    pub fn attribute(self, ion: &str) -> SmolStr {
        match self {
            IonQuantity::CurrentDensity => format_smolstr!("i{}", ion),
            IonQuantity::Conductivity => format_smolstr!("c{}", ion),
            IonQuantity::ReversalPotential => format_smolstr!("e{}", ion),
            IonQuantity::InternalConcentration => format_smolstr!("{}i", ion),
            IonQuantity::ExternalConcentration => format_smolstr!("{}o", ion),
            IonQuantity::DiffusiveConcentration => format_smolstr!("{}d", ion),
            IonQuantity::IonicCharge => format_smolstr!("{}q", ion),
            IonQuantity::Index => format_smolstr!("index_{}", ion),
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, IonQuantity::IonicCharge | IonQuantity::Index)
    }
}

impl fmt::Display for IonQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IonQuantity::CurrentDensity => "current density",
            IonQuantity::Conductivity => "conductivity",
            IonQuantity::ReversalPotential => "reversal potential",
            IonQuantity::InternalConcentration => "internal concentration",
            IonQuantity::ExternalConcentration => "external concentration",
            IonQuantity::DiffusiveConcentration => "diffusive concentration",
            IonQuantity::IonicCharge => "ionic charge",
            IonQuantity::Index => "index",
        };
        f.write_str(name)
    }
}

/// Engine buffers for one ion species, as handed over for a single call.
/// Quantity arrays span the ion's own compartments; `index` maps each of the
/// mechanism's compartments into them.
#[derive(Debug, Default)]
pub struct IonBuffers<'a> {
    pub current_density: Option<&'a mut [f64]>,
    pub conductivity: Option<&'a mut [f64]>,
    pub reversal_potential: Option<&'a mut [f64]>,
    pub internal_concentration: Option<&'a mut [f64]>,
    pub external_concentration: Option<&'a mut [f64]>,
    pub diffusive_concentration: Option<&'a mut [f64]>,
    pub ionic_charge: Option<&'a [f64]>,
    pub index: &'a [i32],
}

impl IonBuffers<'_> {
    /// Length of the shortest quantity array supplied, if any.
    pub(crate) fn span(&self) -> Option<usize> {
        [
            self.current_density.as_deref().map(<[f64]>::len),
            self.conductivity.as_deref().map(<[f64]>::len),
            self.reversal_potential.as_deref().map(<[f64]>::len),
            self.internal_concentration.as_deref().map(<[f64]>::len),
            self.external_concentration.as_deref().map(<[f64]>::len),
            self.diffusive_concentration.as_deref().map(<[f64]>::len),
            self.ionic_charge.map(<[f64]>::len),
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

/// Bound view of one ion's buffers inside a pointer pack.
#[derive(Debug, Clone)]
pub struct IonView<'a> {
    name: SmolStr,
    current_density: Option<Array<'a>>,
    conductivity: Option<Array<'a>>,
    reversal_potential: Option<Array<'a>>,
    internal_concentration: Option<Array<'a>>,
    external_concentration: Option<Array<'a>>,
    diffusive_concentration: Option<Array<'a>>,
    ionic_charge: Option<ReadOnly<'a>>,
    index: &'a [i32],
}

fn cells<'a>(buffer: Option<&'a mut [f64]>) -> Option<Array<'a>> {
    buffer.map(|b| Array::new(Cell::from_mut(b).as_slice_of_cells()))
}

impl<'a> IonView<'a> {
    pub(crate) fn bind(name: SmolStr, buffers: IonBuffers<'a>) -> Self {
        IonView {
            name,
            current_density: cells(buffers.current_density),
            conductivity: cells(buffers.conductivity),
            reversal_potential: cells(buffers.reversal_potential),
            internal_concentration: cells(buffers.internal_concentration),
            external_concentration: cells(buffers.external_concentration),
            diffusive_concentration: cells(buffers.diffusive_concentration),
            ionic_charge: buffers.ionic_charge.map(ReadOnly::new),
            index: buffers.index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ion's compartment positions for each of the mechanism's compartments.
    pub fn index(&self) -> &'a [i32] {
        self.index
    }

    /// Writable quantity. Fails for the read-only charge and index.
    pub fn quantity(&self, quantity: IonQuantity) -> Result<Array<'a>> {
        let slot = match quantity {
            IonQuantity::CurrentDensity => self.current_density,
            IonQuantity::Conductivity => self.conductivity,
            IonQuantity::ReversalPotential => self.reversal_potential,
            IonQuantity::InternalConcentration => self.internal_concentration,
            IonQuantity::ExternalConcentration => self.external_concentration,
            IonQuantity::DiffusiveConcentration => self.diffusive_concentration,
            IonQuantity::IonicCharge | IonQuantity::Index => {
                return Err(Error::ReadOnlyAttribute(quantity.attribute(&self.name)))
            }
        };
        slot.ok_or_else(|| Error::MissingBuffer(quantity.attribute(&self.name)))
    }

    pub fn current_density(&self) -> Result<Array<'a>> {
        self.quantity(IonQuantity::CurrentDensity)
    }

    pub fn conductivity(&self) -> Result<Array<'a>> {
        self.quantity(IonQuantity::Conductivity)
    }

    pub fn reversal_potential(&self) -> Result<Array<'a>> {
        self.quantity(IonQuantity::ReversalPotential)
    }

    pub fn internal_concentration(&self) -> Result<Array<'a>> {
        self.quantity(IonQuantity::InternalConcentration)
    }

    pub fn external_concentration(&self) -> Result<Array<'a>> {
        self.quantity(IonQuantity::ExternalConcentration)
    }

    pub fn diffusive_concentration(&self) -> Result<Array<'a>> {
        self.quantity(IonQuantity::DiffusiveConcentration)
    }

    pub fn ionic_charge(&self) -> Result<ReadOnly<'a>> {
        self.ionic_charge
            .ok_or_else(|| Error::MissingBuffer(IonQuantity::IonicCharge.attribute(&self.name)))
    }
}

/// Engine-side knowledge of ion species, consulted when a catalogue is built.
pub trait ValenceResolver {
    fn valence(&self, ion: &str) -> Option<i32>;
}

/// Ion species table. The default holds the species every cable cell knows.
#[derive(Debug, Clone)]
pub struct IonTable {
    valences: FxHashMap<SmolStr, i32>,
}

impl IonTable {
    pub fn empty() -> Self {
        IonTable {
            valences: FxHashMap::default(),
        }
    }

    pub fn with_ion(mut self, name: impl Into<SmolStr>, valence: i32) -> Self {
        self.set_ion(name, valence);
        self
    }

    pub fn set_ion(&mut self, name: impl Into<SmolStr>, valence: i32) {
        self.valences.insert(name.into(), valence);
    }

    pub fn ions(&self) -> impl Iterator<Item = (&str, i32)> {
        self.valences.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for IonTable {
    fn default() -> Self {
        IonTable::empty()
            .with_ion("na", 1)
            .with_ion("k", 1)
            .with_ion("ca", 2)
    }
}

impl ValenceResolver for IonTable {
    fn valence(&self, ion: &str) -> Option<i32> {
        self.valences.get(ion).copied()
    }
}
