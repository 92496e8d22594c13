//! C mirror of the engine's mechanism ABI, the native descriptor a finalized
//! schema is lowered to, and conversion of a raw parameter pack into a
//! [`BufferBundle`].

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_ulong, c_void};
use std::ptr;

use crate::bundle::BufferBundle;
use crate::config::CatalogueConfig;
use crate::error::{Error, Result, SchemaError};
use crate::ion::{IonBuffers, IonInfo};
use crate::registry::MechanismSchema;
use crate::schema::{FieldInfo, MechanismKind};

pub type ArbValue = f64;
pub type ArbIndex = c_int;
pub type ArbSize = u32;

pub const ARB_MECH_ABI_VERSION_MAJOR: c_ulong = 0;
pub const ARB_MECH_ABI_VERSION_MINOR: c_ulong = 6;
pub const ARB_MECH_ABI_VERSION_PATCH: c_ulong = 0;
pub const ARB_MECH_ABI_VERSION: c_ulong = (ARB_MECH_ABI_VERSION_MAJOR * 100
    + ARB_MECH_ABI_VERSION_MINOR)
    * 100
    + ARB_MECH_ABI_VERSION_PATCH;

pub const ARB_MECHANISM_KIND_POINT: u32 = 1;
pub const ARB_MECHANISM_KIND_DENSITY: u32 = 2;

pub const ARB_BACKEND_KIND_CPU: u32 = 1;

impl MechanismKind {
    pub fn abi_kind(self) -> u32 {
        match self {
            MechanismKind::Density => ARB_MECHANISM_KIND_DENSITY,
            MechanismKind::Point => ARB_MECHANISM_KIND_POINT,
        }
    }
}

// --- C-Compatible Data Structures ---

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ArbFieldInfo {
    pub name: *const c_char,
    pub unit: *const c_char,
    pub default_value: ArbValue,
    pub range_low: ArbValue,
    pub range_high: ArbValue,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ArbIonInfo {
    pub name: *const c_char,
    pub write_int_concentration: bool,
    pub write_ext_concentration: bool,
    pub use_diff_concentration: bool,
    pub write_rev_potential: bool,
    pub read_rev_potential: bool,
    pub read_valence: bool,
    pub verify_valence: bool,
    pub expected_valence: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ArbRandomVariableInfo {
    pub name: *const c_char,
    pub index: ArbSize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ArbMechanismType {
    pub abi_version: c_ulong,
    pub fingerprint: *const c_char,
    pub name: *const c_char,
    pub kind: u32,
    pub is_linear: bool,
    pub has_post_events: bool,
    pub globals: *const ArbFieldInfo,
    pub n_globals: ArbSize,
    pub state_vars: *const ArbFieldInfo,
    pub n_state_vars: ArbSize,
    pub parameters: *const ArbFieldInfo,
    pub n_parameters: ArbSize,
    pub ions: *const ArbIonInfo,
    pub n_ions: ArbSize,
    pub random_variables: *const ArbRandomVariableInfo,
    pub n_random_variables: ArbSize,
}

impl ArbMechanismType {
    /// Record with no name and no fields.
    pub fn empty() -> Self {
        ArbMechanismType {
            abi_version: ARB_MECH_ABI_VERSION,
            fingerprint: ptr::null(),
            name: ptr::null(),
            kind: 0,
            is_linear: false,
            has_post_events: false,
            globals: ptr::null(),
            n_globals: 0,
            state_vars: ptr::null(),
            n_state_vars: 0,
            parameters: ptr::null(),
            n_parameters: 0,
            ions: ptr::null(),
            n_ions: 0,
            random_variables: ptr::null(),
            n_random_variables: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct ArbIonState {
    pub current_density: *mut ArbValue,
    pub conductivity: *mut ArbValue,
    pub reversal_potential: *mut ArbValue,
    pub internal_concentration: *mut ArbValue,
    pub external_concentration: *mut ArbValue,
    pub diffusive_concentration: *mut ArbValue,
    pub ionic_charge: *mut ArbValue,
    pub index: *mut ArbIndex,
}

#[repr(C)]
#[derive(Debug)]
pub struct ArbDeliverableEventStream {
    pub n_streams: ArbSize,
    pub begin: *const ArbSize,
    pub end: *const ArbSize,
    pub events: *const c_void,
}

#[repr(C)]
#[derive(Debug)]
pub struct ArbConstraintPartition {
    pub n_contiguous: ArbSize,
    pub n_constant: ArbSize,
    pub n_independent: ArbSize,
    pub n_none: ArbSize,
    pub contiguous: *mut ArbIndex,
    pub constant: *mut ArbIndex,
    pub independent: *mut ArbIndex,
    pub none: *mut ArbIndex,
}

/// Raw parameter pack handed to every lifecycle entry point.
#[repr(C)]
#[derive(Debug)]
pub struct ArbMechanismPpack {
    pub width: ArbIndex,
    pub n_detectors: ArbIndex,
    pub dt: ArbValue,
    pub vec_v: *mut ArbValue,
    pub vec_i: *mut ArbValue,
    pub vec_g: *mut ArbValue,
    pub temperature_degc: *mut ArbValue,
    pub diam_um: *mut ArbValue,
    pub area_um2: *mut ArbValue,
    pub time_since_spike: *mut ArbValue,
    pub node_index: *mut ArbIndex,
    pub peer_index: *mut ArbIndex,
    pub multiplicity: *mut ArbIndex,
    pub weight: *mut ArbValue,
    pub mechanism_id: ArbSize,
    pub events: ArbDeliverableEventStream,
    pub index_constraints: ArbConstraintPartition,
    pub globals: *mut ArbValue,
    pub state_vars: *mut *mut ArbValue,
    pub parameters: *mut *mut ArbValue,
    pub ion_states: *mut ArbIonState,
    pub random_numbers: *const *const ArbValue,
}

pub type ArbMechanismMethod = unsafe extern "C-unwind" fn(*mut ArbMechanismPpack);
pub type ArbMechanismMethodEvents =
    unsafe extern "C-unwind" fn(*mut ArbMechanismPpack, *mut ArbDeliverableEventStream);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ArbMechanismInterface {
    pub backend: u32,
    pub partition_width: ArbSize,
    pub alignment: ArbSize,
    pub init_mechanism: ArbMechanismMethod,
    pub compute_currents: ArbMechanismMethod,
    pub apply_events: ArbMechanismMethodEvents,
    pub advance_state: ArbMechanismMethod,
    pub write_ions: ArbMechanismMethod,
    pub post_event: ArbMechanismMethod,
}

pub type ArbGetMechanismType = extern "C" fn() -> ArbMechanismType;
pub type ArbGetMechanismInterface = extern "C" fn() -> *mut ArbMechanismInterface;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ArbMechanism {
    pub type_: ArbGetMechanismType,
    pub i_cpu: ArbGetMechanismInterface,
    pub i_gpu: ArbGetMechanismInterface,
}

// --- Native descriptor ---

/// C view of a finalized schema. Owns every string and table the exported
/// [`ArbMechanismType`] points into.
#[derive(Debug)]
pub struct NativeDescriptor {
    name: CString,
    fingerprint: CString,
    kind: u32,
    is_linear: bool,
    has_post_events: bool,
    globals: Vec<ArbFieldInfo>,
    state_vars: Vec<ArbFieldInfo>,
    parameters: Vec<ArbFieldInfo>,
    ions: Vec<ArbIonInfo>,
    random_variables: Vec<ArbRandomVariableInfo>,
    strings: Vec<CString>,
}

// SAFETY: the raw pointers inside point into heap buffers owned by the same
// descriptor, which is never mutated after construction.
unsafe impl Send for NativeDescriptor {}
unsafe impl Sync for NativeDescriptor {}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| {
        Error::Schema(SchemaError::Malformed(format!(
            "'{}' contains an interior NUL byte",
            s.escape_default()
        )))
    })
}

impl NativeDescriptor {
    pub fn new(schema: &MechanismSchema, config: &CatalogueConfig) -> Result<Self> {
        let mut strings = Vec::new();
        let mut intern = |s: &str| -> Result<*const c_char> {
            let owned = c_string(s)?;
            let ptr = owned.as_ptr();
            strings.push(owned);
            Ok(ptr)
        };

        let fields = |list: &[FieldInfo], intern: &mut dyn FnMut(&str) -> Result<*const c_char>| {
            list.iter()
                .map(|f| {
                    Ok(ArbFieldInfo {
                        name: intern(&f.name)?,
                        unit: intern(&f.unit)?,
                        default_value: f.default,
                        range_low: f.range.0,
                        range_high: f.range.1,
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        let globals = fields(schema.globals(), &mut intern)?;
        let state_vars = fields(schema.state_vars(), &mut intern)?;
        let parameters = fields(schema.parameters(), &mut intern)?;

        let ions = schema
            .ions()
            .iter()
            .map(|ion: &IonInfo| {
                Ok(ArbIonInfo {
                    name: intern(&ion.name)?,
                    write_int_concentration: ion.write_int_concentration,
                    write_ext_concentration: ion.write_ext_concentration,
                    use_diff_concentration: ion.use_diff_concentration,
                    write_rev_potential: ion.write_rev_potential,
                    read_rev_potential: ion.read_rev_potential,
                    read_valence: ion.read_valence,
                    verify_valence: ion.verify_valence,
                    expected_valence: ion.expected_valence,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let random_variables = schema
            .random_variables()
            .iter()
            .map(|r| {
                Ok(ArbRandomVariableInfo {
                    name: intern(&r.name)?,
                    index: r.index,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(NativeDescriptor {
            name: c_string(schema.name())?,
            fingerprint: c_string(&config.fingerprint)?,
            kind: schema.kind().abi_kind(),
            is_linear: schema.is_linear(),
            has_post_events: schema.has_post_events(),
            globals,
            state_vars,
            parameters,
            ions,
            random_variables,
            strings,
        })
    }

    pub fn name(&self) -> &CString {
        &self.name
    }

    /// Record handed to the engine's catalogue loader. Valid while `self` lives.
    pub fn mechanism_type(&self) -> ArbMechanismType {
        ArbMechanismType {
            abi_version: ARB_MECH_ABI_VERSION,
            fingerprint: self.fingerprint.as_ptr(),
            name: self.name.as_ptr(),
            kind: self.kind,
            is_linear: self.is_linear,
            has_post_events: self.has_post_events,
            globals: self.globals.as_ptr(),
            n_globals: self.globals.len() as ArbSize,
            state_vars: self.state_vars.as_ptr(),
            n_state_vars: self.state_vars.len() as ArbSize,
            parameters: self.parameters.as_ptr(),
            n_parameters: self.parameters.len() as ArbSize,
            ions: self.ions.as_ptr(),
            n_ions: self.ions.len() as ArbSize,
            random_variables: self.random_variables.as_ptr(),
            n_random_variables: self.random_variables.len() as ArbSize,
        }
    }

    pub fn interned_strings(&self) -> usize {
        self.strings.len()
    }
}

// --- Raw pack conversion ---

unsafe fn raw_slice<'a, T>(ptr: *const T, len: usize) -> Option<&'a [T]> {
    if ptr.is_null() {
        None
    } else if len == 0 {
        Some(&[])
    } else {
        Some(std::slice::from_raw_parts(ptr, len))
    }
}

unsafe fn raw_slice_mut<'a, T>(ptr: *mut T, len: usize) -> Option<&'a mut [T]> {
    if ptr.is_null() {
        None
    } else if len == 0 {
        Some(Default::default())
    } else {
        Some(std::slice::from_raw_parts_mut(ptr, len))
    }
}

/// Length of an array addressed through `index`.
fn span(index: &[ArbIndex]) -> usize {
    index.iter().map(|&k| k.max(0) as usize + 1).max().unwrap_or(0)
}

/// Build a bundle over the buffers of a raw pack.
///
/// Shared arrays (`v`, `i`, `g`, temperature, diameter, area) are exposed up to
/// the largest node index; ion quantities up to the largest entry of that
/// ion's index.
///
/// # Safety
///
/// `pp` must come from the engine for a mechanism with `schema`'s layout, every
/// non-null pointer must be valid for the lengths above, and distinct fields
/// must not alias for the lifetime of the bundle.
pub unsafe fn bundle_from_raw<'a>(
    pp: &'a ArbMechanismPpack,
    schema: &MechanismSchema,
) -> Result<BufferBundle<'a>> {
    let missing = |what: &str| Error::MissingBuffer(what.into());
    let width = pp.width.max(0) as usize;
    let node_index = raw_slice(pp.node_index, width).ok_or_else(|| missing("node_index"))?;
    let shared = span(node_index);

    let v = raw_slice_mut(pp.vec_v, shared).ok_or_else(|| missing("v"))?;
    let i = raw_slice_mut(pp.vec_i, shared).ok_or_else(|| missing("i"))?;
    let g = raw_slice_mut(pp.vec_g, shared).ok_or_else(|| missing("g"))?;

    let n_globals = schema.globals().len();
    let globals = if n_globals == 0 {
        Default::default()
    } else {
        raw_slice_mut(pp.globals, n_globals).ok_or_else(|| missing("globals"))?
    };

    let per_node = |table: *mut *mut ArbValue,
                    n: usize,
                    what: &str|
     -> Result<Vec<&'a mut [f64]>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let rows =
            raw_slice(table as *const *mut ArbValue, n).ok_or_else(|| missing(what))?;
        rows.iter()
            .map(|&row| raw_slice_mut(row, width).ok_or_else(|| missing(what)))
            .collect()
    };
    let state_vars = per_node(pp.state_vars, schema.state_vars().len(), "state_vars")?;
    let parameters = per_node(pp.parameters, schema.parameters().len(), "parameters")?;

    let n_random = schema.random_variables().len();
    let random_numbers = if n_random == 0 {
        Vec::new()
    } else {
        let rows = raw_slice(pp.random_numbers, n_random)
            .ok_or_else(|| missing("random_numbers"))?;
        rows.iter()
            .map(|&row| raw_slice(row, width).ok_or_else(|| missing("random_numbers")))
            .collect::<Result<Vec<_>>>()?
    };

    let n_ions = schema.ions().len();
    let mut ions = Vec::with_capacity(n_ions);
    if n_ions > 0 {
        let states = raw_slice(pp.ion_states as *const ArbIonState, n_ions)
            .ok_or_else(|| missing("ion_states"))?;
        for (state, info) in states.iter().zip(schema.ions()) {
            let index = raw_slice(state.index as *const ArbIndex, width)
                .ok_or_else(|| Error::MissingBuffer(format!("index_{}", info.name).into()))?;
            let len = span(index);
            ions.push(IonBuffers {
                current_density: raw_slice_mut(state.current_density, len),
                conductivity: raw_slice_mut(state.conductivity, len),
                reversal_potential: raw_slice_mut(state.reversal_potential, len),
                internal_concentration: raw_slice_mut(state.internal_concentration, len),
                external_concentration: raw_slice_mut(state.external_concentration, len),
                diffusive_concentration: raw_slice_mut(state.diffusive_concentration, len),
                ionic_charge: raw_slice(state.ionic_charge as *const ArbValue, len),
                index,
            });
        }
    }

    Ok(BufferBundle {
        dt: pp.dt,
        node_index,
        v,
        i,
        g,
        temperature_degc: raw_slice_mut(pp.temperature_degc, shared),
        diam_um: raw_slice(pp.diam_um as *const ArbValue, shared),
        area_um2: raw_slice(pp.area_um2 as *const ArbValue, shared),
        globals,
        state_vars,
        parameters,
        random_numbers,
        ions,
    })
}
