//! In-process host: owns the buffers of one or more cell groups and drives
//! mechanisms through the lifecycle the way a simulation engine would.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::sync::Arc;

use crate::bundle::BufferBundle;
use crate::config::HostConfig;
use crate::dispatch::{GroupBinding, LifecycleState, Mechanism, Phase};
use crate::error::{Error, Result};
use crate::ion::{IonBuffers, ValenceResolver};
use crate::registry::{Binding, MechanismSchema};

/// An ion species known to a cell group, with its resting values.
#[derive(Debug, Clone, PartialEq)]
pub struct IonSpecies {
    pub name: SmolStr,
    pub valence: i32,
    pub internal_concentration: f64,
    pub external_concentration: f64,
    pub reversal_potential: f64,
}

impl IonSpecies {
    pub fn new(name: impl Into<SmolStr>, valence: i32) -> Self {
        IonSpecies {
            name: name.into(),
            valence,
            internal_concentration: 1.0,
            external_concentration: 1.0,
            reversal_potential: 0.0,
        }
    }

    pub fn with_concentrations(mut self, internal: f64, external: f64) -> Self {
        self.internal_concentration = internal;
        self.external_concentration = external;
        self
    }

    pub fn with_reversal_potential(mut self, e_rev: f64) -> Self {
        self.reversal_potential = e_rev;
        self
    }

    /// Sodium, potassium and calcium with the engine's default resting values.
    pub fn defaults() -> Vec<IonSpecies> {
        vec![
            IonSpecies::new("na", 1)
                .with_concentrations(10.0, 140.0)
                .with_reversal_potential(50.0),
            IonSpecies::new("k", 1)
                .with_concentrations(54.4, 2.5)
                .with_reversal_potential(-77.0),
            IonSpecies::new("ca", 2)
                .with_concentrations(5e-5, 2.0)
                .with_reversal_potential(132.5),
        ]
    }
}

/// Buffers of one ion species over the compartments that use it.
///
/// `nodes` is kept sorted; every quantity array runs parallel to it.
#[derive(Debug, Clone)]
pub struct IonStore {
    species: IonSpecies,
    nodes: Vec<i32>,
    current_density: Vec<f64>,
    conductivity: Vec<f64>,
    reversal_potential: Vec<f64>,
    internal_concentration: Vec<f64>,
    external_concentration: Vec<f64>,
    diffusive_concentration: Vec<f64>,
    ionic_charge: Vec<f64>,
}

impl IonStore {
    fn new(species: IonSpecies) -> Self {
        IonStore {
            species,
            nodes: Vec::new(),
            current_density: Vec::new(),
            conductivity: Vec::new(),
            reversal_potential: Vec::new(),
            internal_concentration: Vec::new(),
            external_concentration: Vec::new(),
            diffusive_concentration: Vec::new(),
            ionic_charge: Vec::new(),
        }
    }

    pub fn species(&self) -> &IonSpecies {
        &self.species
    }

    /// Cell group compartments this ion is present on.
    pub fn nodes(&self) -> &[i32] {
        &self.nodes
    }

    pub fn current_density(&self) -> &[f64] {
        &self.current_density
    }

    pub fn conductivity(&self) -> &[f64] {
        &self.conductivity
    }

    pub fn reversal_potential(&self) -> &[f64] {
        &self.reversal_potential
    }

    pub fn internal_concentration(&self) -> &[f64] {
        &self.internal_concentration
    }

    pub fn external_concentration(&self) -> &[f64] {
        &self.external_concentration
    }

    pub fn diffusive_concentration(&self) -> &[f64] {
        &self.diffusive_concentration
    }

    pub fn ionic_charge(&self) -> &[f64] {
        &self.ionic_charge
    }

    /// Extend the ion's domain to `nodes`, filling new positions with resting
    /// values.
    fn cover(&mut self, nodes: &[i32]) {
        for &node in nodes {
            let Err(pos) = self.nodes.binary_search(&node) else {
                continue;
            };
            let s = &self.species;
            self.nodes.insert(pos, node);
            self.current_density.insert(pos, 0.0);
            self.conductivity.insert(pos, 0.0);
            self.reversal_potential.insert(pos, s.reversal_potential);
            self.internal_concentration.insert(pos, s.internal_concentration);
            self.external_concentration.insert(pos, s.external_concentration);
            self.diffusive_concentration.insert(pos, s.internal_concentration);
            self.ionic_charge.insert(pos, s.valence as f64);
        }
    }

    /// Positions of `nodes` within this ion's arrays.
    fn index_of(&self, nodes: &[i32]) -> Vec<i32> {
        nodes
            .iter()
            .map(|n| self.nodes.binary_search(n).map_or(-1, |pos| pos as i32))
            .collect()
    }

    fn reset_currents(&mut self) {
        self.current_density.fill(0.0);
        self.conductivity.fill(0.0);
    }

    fn buffers<'a>(&'a mut self, index: &'a [i32]) -> IonBuffers<'a> {
        let IonStore {
            current_density,
            conductivity,
            reversal_potential,
            internal_concentration,
            external_concentration,
            diffusive_concentration,
            ionic_charge,
            ..
        } = self;
        IonBuffers {
            current_density: Some(current_density.as_mut_slice()),
            conductivity: Some(conductivity.as_mut_slice()),
            reversal_potential: Some(reversal_potential.as_mut_slice()),
            internal_concentration: Some(internal_concentration.as_mut_slice()),
            external_concentration: Some(external_concentration.as_mut_slice()),
            diffusive_concentration: Some(diffusive_concentration.as_mut_slice()),
            ionic_charge: Some(ionic_charge.as_slice()),
            index,
        }
    }
}

#[derive(Debug, Clone)]
struct SharedBuffers {
    v: Vec<f64>,
    i: Vec<f64>,
    g: Vec<f64>,
    temperature_degc: Vec<f64>,
    diam_um: Vec<f64>,
    area_um2: Vec<f64>,
}

#[derive(Debug)]
struct InstanceBuffers {
    node_index: Vec<i32>,
    globals: Vec<f64>,
    state_vars: Vec<Vec<f64>>,
    parameters: Vec<Vec<f64>>,
    random_numbers: Vec<Vec<f64>>,
    /// Group ion store of each declared ion, in declaration order.
    ion_species: Vec<usize>,
    ion_index: Vec<Vec<i32>>,
}

fn bundle<'a>(
    dt: f64,
    shared: &'a mut SharedBuffers,
    ions: &'a mut [IonStore],
    buffers: &'a mut InstanceBuffers,
) -> BufferBundle<'a> {
    let InstanceBuffers {
        node_index,
        globals,
        state_vars,
        parameters,
        random_numbers,
        ion_species,
        ion_index,
    } = buffers;
    let ion_index: &'a [Vec<i32>] = ion_index;

    let mut picked: Vec<Option<IonBuffers<'a>>> = Vec::new();
    picked.resize_with(ion_species.len(), || None);
    for (species, store) in ions.iter_mut().enumerate() {
        if let Some(k) = ion_species.iter().position(|&s| s == species) {
            picked[k] = Some(store.buffers(&ion_index[k]));
        }
    }

    BufferBundle {
        dt,
        node_index: node_index.as_slice(),
        v: shared.v.as_mut_slice(),
        i: shared.i.as_mut_slice(),
        g: shared.g.as_mut_slice(),
        temperature_degc: Some(shared.temperature_degc.as_mut_slice()),
        diam_um: Some(shared.diam_um.as_slice()),
        area_um2: Some(shared.area_um2.as_slice()),
        globals: globals.as_mut_slice(),
        state_vars: state_vars.iter_mut().map(Vec::as_mut_slice).collect(),
        parameters: parameters.iter_mut().map(Vec::as_mut_slice).collect(),
        random_numbers: random_numbers.iter().map(Vec::as_slice).collect(),
        ions: picked.into_iter().flatten().collect(),
    }
}

/// One mechanism placed on a set of compartments of a cell group.
#[derive(Debug)]
pub struct MechanismInstance {
    binding: GroupBinding,
    buffers: InstanceBuffers,
}

impl MechanismInstance {
    pub fn schema(&self) -> &MechanismSchema {
        self.binding.mechanism().schema()
    }

    pub fn name(&self) -> &str {
        self.schema().name()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.binding.state()
    }

    pub fn node_index(&self) -> &[i32] {
        &self.buffers.node_index
    }

    pub fn global(&self, name: &str) -> Option<f64> {
        match self.schema().lookup(name)? {
            Binding::Global(slot) => Some(self.buffers.globals[slot.get()]),
            _ => None,
        }
    }

    pub fn state(&self, name: &str) -> Option<&[f64]> {
        match self.schema().lookup(name)? {
            Binding::State(slot) => Some(&self.buffers.state_vars[slot.get()]),
            _ => None,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&[f64]> {
        match self.schema().lookup(name)? {
            Binding::Parameter(slot) => Some(&self.buffers.parameters[slot.get()]),
            _ => None,
        }
    }

    pub fn random(&self, name: &str) -> Option<&[f64]> {
        match self.schema().lookup(name)? {
            Binding::Random(slot) => Some(&self.buffers.random_numbers[slot.get()]),
            _ => None,
        }
    }

    /// Index of this instance's compartments into the arrays of `ion`.
    pub fn ion_index(&self, ion: &str) -> Option<&[i32]> {
        let slot = self.schema().ion_slot(ion)?;
        self.buffers.ion_index.get(slot.get()).map(Vec::as_slice)
    }
}

/// The compartments of one cell group and every mechanism placed on them.
#[derive(Debug)]
pub struct CellGroup {
    config: HostConfig,
    shared: SharedBuffers,
    species: FxHashMap<SmolStr, usize>,
    ions: Vec<IonStore>,
    instances: Vec<MechanismInstance>,
    rng: StdRng,
    time: f64,
}

impl CellGroup {
    pub fn new(n_compartments: usize, config: &HostConfig) -> Self {
        let mut group = CellGroup {
            config: config.clone(),
            shared: SharedBuffers {
                v: vec![config.initial_voltage; n_compartments],
                i: vec![0.0; n_compartments],
                g: vec![0.0; n_compartments],
                temperature_degc: vec![config.temperature_degc; n_compartments],
                diam_um: vec![1.0; n_compartments],
                area_um2: vec![1.0; n_compartments],
            },
            species: FxHashMap::default(),
            ions: Vec::new(),
            instances: Vec::new(),
            rng: StdRng::seed_from_u64(config.seed),
            time: 0.0,
        };
        for species in IonSpecies::defaults() {
            group.set_ion(species);
        }
        group
    }

    /// Add or replace an ion species.
    pub fn with_ion(mut self, species: IonSpecies) -> Self {
        self.set_ion(species);
        self
    }

    fn set_ion(&mut self, species: IonSpecies) {
        match self.species.get(&species.name) {
            Some(&k) => {
                let nodes = std::mem::take(&mut self.ions[k].nodes);
                self.ions[k] = IonStore::new(species);
                self.ions[k].cover(&nodes);
            }
            None => {
                self.species.insert(species.name.clone(), self.ions.len());
                self.ions.push(IonStore::new(species));
            }
        }
    }

    /// Set the same diameter and area on every compartment.
    pub fn with_geometry(mut self, diam_um: f64, area_um2: f64) -> Self {
        self.shared.diam_um.fill(diam_um);
        self.shared.area_um2.fill(area_um2);
        self
    }

    pub fn n_compartments(&self) -> usize {
        self.shared.v.len()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn voltage(&self) -> &[f64] {
        &self.shared.v
    }

    pub fn voltage_mut(&mut self) -> &mut [f64] {
        &mut self.shared.v
    }

    pub fn current(&self) -> &[f64] {
        &self.shared.i
    }

    pub fn conductance(&self) -> &[f64] {
        &self.shared.g
    }

    pub fn temperature_degc(&self) -> &[f64] {
        &self.shared.temperature_degc
    }

    pub fn instances(&self) -> &[MechanismInstance] {
        &self.instances
    }

    pub fn instance(&self, k: usize) -> Option<&MechanismInstance> {
        self.instances.get(k)
    }

    /// First instance of the mechanism called `name`.
    pub fn find(&self, name: &str) -> Option<&MechanismInstance> {
        self.instances.iter().find(|m| m.name() == name)
    }

    pub fn ion(&self, name: &str) -> Option<&IonStore> {
        self.species.get(name).map(|&k| &self.ions[k])
    }

    pub fn place(&mut self, mechanism: Arc<Mechanism>, nodes: &[i32]) -> Result<usize> {
        self.place_with(mechanism, nodes, &[])
    }

    /// Place `mechanism` on `nodes`, overriding declared defaults of
    /// parameters or globals by name. Returns the instance number.
    pub fn place_with(
        &mut self,
        mechanism: Arc<Mechanism>,
        nodes: &[i32],
        overrides: &[(&str, f64)],
    ) -> Result<usize> {
        let schema = mechanism.schema();
        let n = self.n_compartments();
        if let Some(bad) = nodes.iter().find(|&&k| k < 0 || k as usize >= n) {
            return Err(Error::BundleMismatch {
                mechanism: schema.name().into(),
                detail: format!("node {} outside cell group of {} compartments", bad, n),
            });
        }

        let mut ion_species = Vec::with_capacity(schema.ions().len());
        for ion in schema.ions() {
            let &species = self.species.get(&ion.name).ok_or_else(|| Error::UnknownIon {
                mechanism: schema.name().into(),
                ion: ion.name.clone(),
            })?;
            let found = self.ions[species].species.valence;
            if ion.verify_valence && found != ion.expected_valence {
                return Err(Error::ValenceMismatch {
                    mechanism: schema.name().into(),
                    ion: ion.name.clone(),
                    expected: ion.expected_valence,
                    found,
                });
            }
            ion_species.push(species);
        }

        let width = nodes.len();
        let mut buffers = InstanceBuffers {
            node_index: nodes.to_vec(),
            globals: schema.globals().iter().map(|f| f.default).collect(),
            state_vars: schema.state_vars().iter().map(|f| vec![f.default; width]).collect(),
            parameters: schema.parameters().iter().map(|f| vec![f.default; width]).collect(),
            random_numbers: vec![vec![0.0; width]; schema.random_variables().len()],
            ion_species,
            ion_index: Vec::new(),
        };
        for &(name, value) in overrides {
            match schema.lookup(name) {
                Some(Binding::Parameter(slot)) => buffers.parameters[slot.get()].fill(value),
                Some(Binding::Global(slot)) => buffers.globals[slot.get()] = value,
                Some(binding) => {
                    return Err(Error::AttributeKind {
                        attribute: name.into(),
                        expected: "a parameter or global",
                        found: binding.category(),
                    })
                }
                None => {
                    return Err(Error::UnboundAttribute {
                        mechanism: schema.name().into(),
                        attribute: name.into(),
                    })
                }
            }
        }

        for &species in &buffers.ion_species {
            self.ions[species].cover(nodes);
        }
        tracing::debug!(mechanism = schema.name(), width, "placed mechanism");
        let binding =
            GroupBinding::new(mechanism.clone()).with_strict(self.config.strict_lifecycle);
        self.instances.push(MechanismInstance { binding, buffers });
        self.reindex_ions();
        Ok(self.instances.len() - 1)
    }

    fn reindex_ions(&mut self) {
        let ions = &self.ions;
        for instance in &mut self.instances {
            let b = &mut instance.buffers;
            b.ion_index = b
                .ion_species
                .iter()
                .map(|&s| ions[s].index_of(&b.node_index))
                .collect();
        }
    }

    fn refresh_random(&mut self) {
        let CellGroup { instances, rng, .. } = self;
        for instance in instances.iter_mut() {
            for stream in &mut instance.buffers.random_numbers {
                stream.iter_mut().for_each(|x| *x = rng.sample(StandardNormal));
            }
        }
    }

    fn run_phase(&mut self, phase: Phase, dt: f64, only_unbound: bool) -> Result<()> {
        let CellGroup {
            shared,
            ions,
            instances,
            ..
        } = self;
        for instance in instances.iter_mut() {
            if only_unbound && instance.binding.state() != LifecycleState::Unbound {
                continue;
            }
            let bundle = bundle(dt, shared, ions, &mut instance.buffers);
            instance.binding.invoke(phase, bundle)?;
        }
        Ok(())
    }

    /// Initialize every instance that has not been initialized yet.
    pub fn init(&mut self) -> Result<()> {
        self.refresh_random();
        self.run_phase(Phase::Init, 0.0, true)
    }

    /// One step: advance state, accumulate currents from zero, write ions.
    pub fn step(&mut self, dt: f64) -> Result<()> {
        self.refresh_random();
        self.run_phase(Phase::AdvanceState, dt, false)?;

        self.shared.i.fill(0.0);
        self.shared.g.fill(0.0);
        self.ions.iter_mut().for_each(IonStore::reset_currents);
        self.run_phase(Phase::ComputeCurrents, dt, false)?;
        self.run_phase(Phase::WriteIons, dt, false)?;

        if self.config.integrate_voltage {
            let cm = self.config.membrane_capacitance;
            for (v, i) in self.shared.v.iter_mut().zip(&self.shared.i) {
                *v -= dt * i / cm;
            }
        }
        self.time += dt;
        Ok(())
    }

    /// Step until `t_end`; returns the number of steps taken.
    pub fn run(&mut self, t_end: f64, dt: f64) -> Result<usize> {
        let mut steps = 0;
        while self.time + 0.5 * dt < t_end {
            self.step(dt)?;
            steps += 1;
        }
        Ok(steps)
    }
}

impl ValenceResolver for CellGroup {
    fn valence(&self, ion: &str) -> Option<i32> {
        self.ion(ion).map(|store| store.species.valence)
    }
}

/// Independent cell groups stepped concurrently.
#[derive(Debug, Default)]
pub struct Host {
    config: HostConfig,
    groups: Vec<CellGroup>,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        Host {
            config,
            groups: Vec::new(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Add a group of `n_compartments`; returns its number.
    pub fn add_group(&mut self, n_compartments: usize) -> usize {
        let k = self.groups.len();
        let config = HostConfig {
            seed: self.config.seed.wrapping_add(k as u64),
            ..self.config.clone()
        };
        self.groups.push(CellGroup::new(n_compartments, &config));
        k
    }

    pub fn group(&self, k: usize) -> Option<&CellGroup> {
        self.groups.get(k)
    }

    pub fn group_mut(&mut self, k: usize) -> Option<&mut CellGroup> {
        self.groups.get_mut(k)
    }

    pub fn groups(&self) -> &[CellGroup] {
        &self.groups
    }

    pub fn init(&mut self) -> Result<()> {
        tracing::info!(groups = self.groups.len(), "initializing cell groups");
        self.groups.par_iter_mut().try_for_each(CellGroup::init)
    }

    pub fn step(&mut self, dt: f64) -> Result<()> {
        self.groups.par_iter_mut().try_for_each(|group| group.step(dt))
    }

    pub fn run(&mut self, t_end: f64, dt: f64) -> Result<()> {
        self.groups
            .par_iter_mut()
            .try_for_each(|group| group.run(t_end, dt).map(|_| ()))
    }
}
