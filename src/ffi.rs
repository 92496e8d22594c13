// src/ffi.rs
#![cfg(feature = "ffi")]
//! Native entry points handed to the engine's catalogue loader.
//!
//! Every catalogue slot gets its own set of monomorphized trampolines, so a call
//! from the engine resolves its mechanism from the function pointer alone.

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::OnceLock;

use crate::abi::{
    self, ArbDeliverableEventStream, ArbMechanism, ArbMechanismInterface, ArbMechanismPpack,
    ArbMechanismType, ARB_BACKEND_KIND_CPU,
};
use crate::catalogue::{self, MAX_MECHANISMS};
use crate::config::CatalogueConfig;
use crate::dispatch::Phase;
use crate::error::{Error, Result};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: &str) {
    let message = CString::new(message.replace('\0', " ")).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

// --- Memory Management ---

/// Frees a C string returned by the library.
#[no_mangle]
pub extern "C" fn mechcat_free_string(string: *mut c_char) {
    if !string.is_null() {
        unsafe {
            let _ = CString::from_raw(string);
        }
    }
}

/// Returns the last error raised on this thread, or null.
/// The returned C string must be freed with `mechcat_free_string`.
#[no_mangle]
pub extern "C" fn mechcat_last_error() -> *mut c_char {
    LAST_ERROR.with(|slot| match slot.borrow().as_ref() {
        Some(message) => message.clone().into_raw(),
        None => ptr::null_mut(),
    })
}

// --- Dispatch ---

unsafe fn try_dispatch(slot: usize, phase: Phase, pp: *mut ArbMechanismPpack) -> Result<()> {
    let pp = pp
        .as_ref()
        .ok_or_else(|| Error::MissingBuffer("ppack".into()))?;
    let loaded = catalogue::global().loaded()?;
    let mechanism = loaded.mechanism(slot).ok_or(Error::UnknownSlot {
        slot,
        len: loaded.len(),
    })?;
    let bundle = abi::bundle_from_raw(pp, mechanism.schema())?;
    mechanism.invoke(phase, bundle)
}

/// Failures cannot be returned through the engine's `void` entry points; they
/// are logged, stored for `mechcat_last_error` and unwound into the caller.
unsafe fn dispatch(slot: usize, phase: Phase, pp: *mut ArbMechanismPpack) {
    if let Err(err) = try_dispatch(slot, phase, pp) {
        let message = err.to_string();
        tracing::error!(slot, %phase, error = %message, "native call failed");
        set_last_error(&message);
        panic!("{}", message);
    }
}

unsafe extern "C-unwind" fn slot_init<const SLOT: usize>(pp: *mut ArbMechanismPpack) {
    dispatch(SLOT, Phase::Init, pp)
}

unsafe extern "C-unwind" fn slot_advance_state<const SLOT: usize>(pp: *mut ArbMechanismPpack) {
    dispatch(SLOT, Phase::AdvanceState, pp)
}

unsafe extern "C-unwind" fn slot_compute_currents<const SLOT: usize>(pp: *mut ArbMechanismPpack) {
    dispatch(SLOT, Phase::ComputeCurrents, pp)
}

unsafe extern "C-unwind" fn slot_write_ions<const SLOT: usize>(pp: *mut ArbMechanismPpack) {
    dispatch(SLOT, Phase::WriteIons, pp)
}

unsafe extern "C-unwind" fn no_events(
    _: *mut ArbMechanismPpack,
    _: *mut ArbDeliverableEventStream,
) {
}

unsafe extern "C-unwind" fn no_post_event(_: *mut ArbMechanismPpack) {}

extern "C" fn slot_type<const SLOT: usize>() -> ArbMechanismType {
    catalogue::global()
        .native_descriptor(SLOT)
        .map(|desc| desc.mechanism_type())
        .unwrap_or_else(|_| ArbMechanismType::empty())
}

extern "C" fn slot_interface<const SLOT: usize>() -> *mut ArbMechanismInterface {
    match interfaces().get(SLOT) {
        Some(iface) => iface as *const ArbMechanismInterface as *mut ArbMechanismInterface,
        None => ptr::null_mut(),
    }
}

extern "C" fn null_interface() -> *mut ArbMechanismInterface {
    ptr::null_mut()
}

macro_rules! slot_table {
    ($($slot:literal)*) => {
        const SLOT_COUNT: usize = [$($slot),*].len();

        fn build_interfaces(config: &CatalogueConfig) -> Vec<ArbMechanismInterface> {
            vec![$(ArbMechanismInterface {
                backend: ARB_BACKEND_KIND_CPU,
                partition_width: config.partition_width,
                alignment: config.alignment,
                init_mechanism: slot_init::<$slot>,
                compute_currents: slot_compute_currents::<$slot>,
                apply_events: no_events,
                advance_state: slot_advance_state::<$slot>,
                write_ions: slot_write_ions::<$slot>,
                post_event: no_post_event,
            }),*]
        }

        fn build_records() -> Vec<ArbMechanism> {
            vec![$(ArbMechanism {
                type_: slot_type::<$slot>,
                i_cpu: slot_interface::<$slot>,
                i_gpu: null_interface,
            }),*]
        }
    };
}

slot_table!(
    0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
    16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
);

const _: () = assert!(SLOT_COUNT == MAX_MECHANISMS);

fn interfaces() -> &'static [ArbMechanismInterface] {
    static INTERFACES: OnceLock<Vec<ArbMechanismInterface>> = OnceLock::new();
    INTERFACES.get_or_init(|| build_interfaces(catalogue::global().config()))
}

fn records() -> &'static [ArbMechanism] {
    static RECORDS: OnceLock<Vec<ArbMechanism>> = OnceLock::new();
    RECORDS.get_or_init(build_records)
}

// --- Catalogue Export ---

/// Freezes the process catalogue and returns its mechanism records.
///
/// # Safety
///
/// `n` must be null or valid for a single write.
pub unsafe fn export(n: *mut c_int) -> *const c_void {
    crate::logging::init();
    let count = match catalogue::global().freeze() {
        Ok(loaded) => loaded.len(),
        Err(err) => {
            tracing::error!(error = %err, "catalogue export failed");
            set_last_error(&err.to_string());
            0
        }
    };
    if !n.is_null() {
        *n = count as c_int;
    }
    tracing::debug!(mechanisms = count, "catalogue exported");
    records().as_ptr() as *const c_void
}

/// Loader entry point: writes the mechanism count to `n` and returns an array
/// of that many `ArbMechanism` records.
#[no_mangle]
pub extern "C" fn get_catalogue(n: *mut c_int) -> *const c_void {
    unsafe { export(n) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ArbConstraintPartition;
    use crate::dispatch::{Callbacks, Mechanism};
    use crate::registry::MechanismDecl;
    use crate::schema::MechanismKind;
    use std::ffi::CStr;

    fn empty_pack() -> ArbMechanismPpack {
        ArbMechanismPpack {
            width: 0,
            n_detectors: 0,
            dt: 0.0,
            vec_v: ptr::null_mut(),
            vec_i: ptr::null_mut(),
            vec_g: ptr::null_mut(),
            temperature_degc: ptr::null_mut(),
            diam_um: ptr::null_mut(),
            area_um2: ptr::null_mut(),
            time_since_spike: ptr::null_mut(),
            node_index: ptr::null_mut(),
            peer_index: ptr::null_mut(),
            multiplicity: ptr::null_mut(),
            weight: ptr::null_mut(),
            mechanism_id: 0,
            events: ArbDeliverableEventStream {
                n_streams: 0,
                begin: ptr::null(),
                end: ptr::null(),
                events: ptr::null(),
            },
            index_constraints: ArbConstraintPartition {
                n_contiguous: 0,
                n_constant: 0,
                n_independent: 0,
                n_none: 0,
                contiguous: ptr::null_mut(),
                constant: ptr::null_mut(),
                independent: ptr::null_mut(),
                none: ptr::null_mut(),
            },
            globals: ptr::null_mut(),
            state_vars: ptr::null_mut(),
            parameters: ptr::null_mut(),
            ion_states: ptr::null_mut(),
            random_numbers: ptr::null(),
        }
    }

    #[test]
    fn test_exported_catalogue_dispatches_by_slot() {
        let mut decl = MechanismDecl::new();
        let x = decl.declare_state("x", "mV", 0.0).unwrap();
        let schema = decl.finalize("ffi_leak", MechanismKind::Density).unwrap();
        let callbacks = Callbacks::new().on_init(move |pp| {
            pp.state(x).fill(3.0);
            Ok(())
        });
        catalogue::global()
            .register(Mechanism::new(schema, callbacks))
            .unwrap();

        let mut n: c_int = 0;
        let records = get_catalogue(&mut n) as *const ArbMechanism;
        assert_eq!(n, 1);

        let record = unsafe { &*records };
        let ty = (record.type_)();
        assert_eq!(unsafe { CStr::from_ptr(ty.name) }.to_str().unwrap(), "ffi_leak");
        assert!((record.i_gpu)().is_null());
        let iface = unsafe { &*(record.i_cpu)() };
        assert_eq!(iface.backend, ARB_BACKEND_KIND_CPU);

        let mut v = vec![-65.0; 2];
        let mut i = vec![0.0; 2];
        let mut g = vec![0.0; 2];
        let mut node_index = vec![1, 0];
        let mut x_values = vec![0.0; 2];
        let mut rows = vec![x_values.as_mut_ptr()];
        let mut pp = empty_pack();
        pp.width = 2;
        pp.vec_v = v.as_mut_ptr();
        pp.vec_i = i.as_mut_ptr();
        pp.vec_g = g.as_mut_ptr();
        pp.node_index = node_index.as_mut_ptr();
        pp.state_vars = rows.as_mut_ptr();

        unsafe { (iface.init_mechanism)(&mut pp) };
        assert_eq!(x_values, vec![3.0, 3.0]);

        pp.node_index = ptr::null_mut();
        let failed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
            (iface.init_mechanism)(&mut pp)
        }));
        assert!(failed.is_err());
        let message = mechcat_last_error();
        assert!(!message.is_null());
        assert!(unsafe { CStr::from_ptr(message) }
            .to_str()
            .unwrap()
            .contains("node_index"));
        mechcat_free_string(message);
    }
}
