//! # neurobuild-model
//!
//! Cell builder for the Allen Cell Types perisomatic model 472912177
//! (a Pvalb-IRES-Cre interneuron).
//!
//! The builder turns a reconstructed morphology into a fully parameterized
//! compartmental cell in one synchronous pass:
//!
//! 1. load the SWC reconstruction, dropping the native axon and applying the
//!    requested x/y/z offset;
//! 2. attach the standardized two-section synthetic axon to the soma midpoint;
//! 3. insert the passive leak on every section;
//! 4. insert the eleven active mechanisms on the soma;
//! 5. discretize (`nseg = 1 + 2*floor(L/40)`);
//! 6. assign the published biophysical parameter table.
//!
//! The native axon is dropped deliberately: the fitted parameters assume the
//! standardized stub, which also keeps the compartment count down.
//! Construction is all-or-nothing — any loader or parameter error aborts the
//! build and no cell is returned.

use neurobuild_core::{
    BuildError, Capacitance, Cell, Conductance, Mechanism, Micron, Resistivity, Result, Section,
    SectionGroup, Voltage,
};
use neurobuild_swc::{load_swc, LoadOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// MODEL CONSTANTS
// =============================================================================

/// Allen Cell Types Database model id.
pub const MODEL_ID: u32 = 472912177;

/// Reconstruction file the model was fitted against.
pub const MORPHOLOGY_FILE: &str = "Pvalb-IRES-Cre_Ai14_IVSCC_-176847.04.02.01_470522102_m.swc";

/// Display name used when none is given.
pub const DEFAULT_CELL_NAME: &str = "Neuron472912177_instance";

/// Synthetic axon stub geometry: two sections in series.
pub const AXON_STUB_SECTIONS: usize = 2;
pub const AXON_STUB_LENGTH: Micron = 30.0;
pub const AXON_STUB_DIAM: Micron = 1.0;

/// The active mechanisms carried by the soma.
pub const SOMA_MECHANISMS: [Mechanism; 11] = [
    Mechanism::CaDynamics,
    Mechanism::CaHva,
    Mechanism::CaLva,
    Mechanism::Ih,
    Mechanism::ImV2,
    Mechanism::KT,
    Mechanism::Kd,
    Mechanism::Kv2like,
    Mechanism::Kv31,
    Mechanism::NaV,
    Mechanism::Sk,
];

/// Fitted somatic channel parameters (range parameter name, value).
const SOMA_CHANNEL_PARAMETERS: [(&str, f64); 13] = [
    ("gbar_Ih", 5.11629e-05),
    ("gbar_NaV", 0.0585202),
    ("gbar_Kd", 0.000311925),
    ("gbar_Kv2like", 0.0510602),
    ("gbar_Kv3_1", 0.650761),
    ("gbar_K_T", 0.0333859),
    ("gbar_Im_v2", 0.00775049),
    ("gbar_SK", 0.00273401),
    ("gbar_Ca_HVA", 0.00056479),
    ("gbar_Ca_LVA", 0.00321148),
    ("gamma_CaDynamics", 0.00772044),
    ("decay_CaDynamics", 20.3002),
    ("g_pas", 0.000267055),
];

// =============================================================================
// DISCRETIZATION
// =============================================================================

/// Segment count for a section of the given length: odd, minimum 1,
/// stepping up by 2 for every 40 um.
pub fn nseg_for_length(length: Micron) -> usize {
    1 + 2 * (length / 40.0) as usize
}

// =============================================================================
// BIOPHYSICS TABLE
// =============================================================================

/// Passive properties shared by a section group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassivePatch {
    pub cm: Capacitance,
    pub g_pas: Conductance,
}

/// Somatic properties: passive plus reversal potentials and channel table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SomaPatch {
    pub cm: Capacitance,
    pub g_pas: Conductance,
    pub ena: Voltage,
    pub ek: Voltage,
    /// Channel and calcium-dynamics range parameters, fully suffixed.
    pub channels: Vec<(String, f64)>,
}

/// The full parameter table assigned during construction.
///
/// `ra` and `e_pas` are uniform across the cell; capacitance and leak vary by
/// group; reversal potentials and channel conductances apply to the soma only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biophysics {
    pub ra: Resistivity,
    pub e_pas: Voltage,
    pub axon: PassivePatch,
    pub dend: PassivePatch,
    pub soma: SomaPatch,
}

impl Default for Biophysics {
    /// Published values for model 472912177.
    fn default() -> Self {
        Self {
            ra: 143.65,
            e_pas: -95.5370941162,
            axon: PassivePatch {
                cm: 2.16,
                g_pas: 0.000662463571112,
            },
            dend: PassivePatch {
                cm: 2.16,
                g_pas: 9.80198332219e-06,
            },
            soma: SomaPatch {
                cm: 2.16,
                g_pas: 0.000267055,
                ena: 53.0,
                ek: -107.0,
                channels: SOMA_CHANNEL_PARAMETERS
                    .iter()
                    .map(|&(name, value)| (name.to_string(), value))
                    .collect(),
            },
        }
    }
}

// =============================================================================
// CELL BUILDER
// =============================================================================

/// Builds a parameterized cell from a morphology file and spatial offset.
#[derive(Debug, Clone)]
pub struct CellBuilder {
    name: Option<String>,
    offset: [f64; 3],
    morphology: PathBuf,
    biophysics: Biophysics,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            offset: [0.0; 3],
            morphology: PathBuf::from(MORPHOLOGY_FILE),
            biophysics: Biophysics::default(),
        }
    }

    /// Display name. An empty name counts as unset and resolves to
    /// [`DEFAULT_CELL_NAME`].
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spatial offset applied to every reconstruction sample (um).
    pub fn offset(mut self, x: f64, y: f64, z: f64) -> Self {
        self.offset = [x, y, z];
        self
    }

    pub fn morphology(mut self, path: impl AsRef<Path>) -> Self {
        self.morphology = path.as_ref().to_path_buf();
        self
    }

    pub fn biophysics(mut self, biophysics: Biophysics) -> Self {
        self.biophysics = biophysics;
        self
    }

    /// Run the full construction sequence. Step order matters: mechanisms can
    /// only be parameterized after insertion, and discretization reads the
    /// lengths the loader and the axon stub established.
    pub fn build(&self) -> Result<Cell> {
        let name = match &self.name {
            Some(n) if !n.is_empty() => n.clone(),
            _ => DEFAULT_CELL_NAME.to_string(),
        };
        let mut cell = Cell::new(name);

        load_swc(
            &self.morphology,
            &mut cell,
            &LoadOptions {
                use_axon: false,
                shift: self.offset,
            },
        )?;
        self.attach_axon_stub(&mut cell)?;
        self.insert_mechanisms(&mut cell)?;
        discretize(&mut cell);
        self.apply_biophysics(&mut cell)?;
        Ok(cell)
    }

    /// Replace the (dropped) native axon with two fixed stub sections in
    /// series off the soma midpoint.
    fn attach_axon_stub(&self, cell: &mut Cell) -> Result<()> {
        let soma = *cell.soma().first().ok_or(BuildError::MissingSoma)?;
        let mut previous = soma;
        for i in 0..AXON_STUB_SECTIONS {
            let mut section = Section::new(format!("axon[{}]", i));
            section.length = AXON_STUB_LENGTH;
            section.diam = AXON_STUB_DIAM;
            section.nseg = 1;
            let id = cell.add_section(section, SectionGroup::Axon);
            let position = if previous == soma { 0.5 } else { 1.0 };
            cell.connect(id, previous, position)?;
            previous = id;
        }
        Ok(())
    }

    /// Passive leak everywhere; the active set on soma sections only.
    fn insert_mechanisms(&self, cell: &mut Cell) -> Result<()> {
        for id in cell.all() {
            cell.section_mut(id).insert(Mechanism::Pas)?;
        }
        for id in cell.soma().to_vec() {
            let section = cell.section_mut(id);
            for mechanism in SOMA_MECHANISMS {
                section.insert(mechanism)?;
            }
        }
        Ok(())
    }

    fn apply_biophysics(&self, cell: &mut Cell) -> Result<()> {
        let table = &self.biophysics;
        for id in cell.all() {
            let section = cell.section_mut(id);
            section.ra = table.ra;
            section.set_param("e_pas", table.e_pas)?;
        }
        for id in cell.axon().to_vec() {
            let section = cell.section_mut(id);
            section.cm = table.axon.cm;
            section.set_param("g_pas", table.axon.g_pas)?;
        }
        for id in cell.dend().to_vec() {
            let section = cell.section_mut(id);
            section.cm = table.dend.cm;
            section.set_param("g_pas", table.dend.g_pas)?;
        }
        for id in cell.soma().to_vec() {
            let section = cell.section_mut(id);
            section.cm = table.soma.cm;
            section.ena = Some(table.soma.ena);
            section.ek = Some(table.soma.ek);
            section.set_param("g_pas", table.soma.g_pas)?;
            for (param, value) in &table.soma.channels {
                section.set_param(param, *value)?;
            }
        }
        Ok(())
    }
}

impl Default for CellBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the segment-count rule to every section of the cell.
fn discretize(cell: &mut Cell) {
    for id in cell.all() {
        let section = cell.section_mut(id);
        section.nseg = nseg_for_length(section.length);
    }
}

// =============================================================================
// TESTS
// =============================================================================
