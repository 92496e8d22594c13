//! The raw buffers an engine hands to a mechanism for a single callback.

use crate::ion::IonBuffers;

/// Borrowed engine memory for one callback invocation.
///
/// `v`, `i`, `g` and the optional temperature, diameter and area arrays are the
/// cell group's shared arrays and are addressed through `node_index`. Globals
/// hold one value per mechanism instance; state variables, parameters and
/// random streams hold one value per entry of `node_index`.
#[derive(Debug, Default)]
pub struct BufferBundle<'a> {
    pub dt: f64,
    pub node_index: &'a [i32],
    pub v: &'a mut [f64],
    pub i: &'a mut [f64],
    pub g: &'a mut [f64],
    pub temperature_degc: Option<&'a mut [f64]>,
    pub diam_um: Option<&'a [f64]>,
    pub area_um2: Option<&'a [f64]>,
    pub globals: &'a mut [f64],
    pub state_vars: Vec<&'a mut [f64]>,
    pub parameters: Vec<&'a mut [f64]>,
    pub random_numbers: Vec<&'a [f64]>,
    pub ions: Vec<IonBuffers<'a>>,
}

impl<'a> BufferBundle<'a> {
    /// Number of compartments this call covers.
    pub fn width(&self) -> usize {
        self.node_index.len()
    }
}
