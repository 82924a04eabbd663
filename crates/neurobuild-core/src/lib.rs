//! # neurobuild-core
//!
//! Section, cell, and mechanism primitives for building compartmental neuron
//! models.
//!
//! This crate is the "engine" surface that model builders mutate: cylindrical
//! sections with geometry and cable properties, cells that own their sections
//! in anatomical groups, and a closed catalog of membrane mechanisms with
//! validated parameter assignment. It deliberately contains no solver — the
//! output of construction is a fully parameterized cell description.
//!
//! ## Key concepts
//!
//! - **Section**: a cable segment (soma, dendrite, axon) with length,
//!   diameter, and discretization count `nseg`
//! - **Mechanism**: a membrane process (passive leak, ion channel, calcium
//!   buffer) inserted onto a section, contributing named range parameters
//! - **Cell**: an insertion-ordered arena of sections partitioned into the
//!   `soma`, `dend`, and `axon` groups
//!
//! Every cell owns its sections exclusively; there is no process-wide section
//! registry, so two cells never share mutable state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised while constructing a cell
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SWC parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("morphology contains no soma samples")]
    MissingSoma,

    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("mechanism {0} already inserted")]
    DuplicateMechanism(&'static str),

    #[error("unknown parameter {param} on section {section}")]
    UnknownParameter { section: String, param: String },

    #[error("parameter {param} requires mechanism {mechanism}, not inserted on section {section}")]
    MechanismNotInserted {
        section: String,
        param: String,
        mechanism: &'static str,
    },

    #[error("invalid connection position {0} (must be within 0..=1)")]
    InvalidPosition(f64),
}

pub type Result<T> = std::result::Result<T, BuildError>;

// =============================================================================
// UNITS
// =============================================================================

/// Length (um)
pub type Micron = f64;

/// Voltage (mV)
pub type Voltage = f64;

/// Conductance density (S/cm^2)
pub type Conductance = f64;

/// Specific membrane capacitance (uF/cm^2)
pub type Capacitance = f64;

/// Axial resistivity (ohm-cm)
pub type Resistivity = f64;

// =============================================================================
// MECHANISM CATALOG
// =============================================================================

/// The closed set of membrane mechanisms supported by this model family.
///
/// Each variant corresponds to one NMODL density mechanism; the suffix is the
/// name the mechanism would carry inside the simulation engine, and range
/// parameters are formed as `<base>_<suffix>` (e.g. `gbar_NaV`, `g_pas`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mechanism {
    /// Passive leak
    Pas,
    /// Intracellular calcium buffering/decay
    CaDynamics,
    /// High-voltage-activated calcium channel
    CaHva,
    /// Low-voltage-activated calcium channel
    CaLva,
    /// Hyperpolarization-activated cation channel
    Ih,
    /// Muscarinic potassium channel (v2 kinetics)
    ImV2,
    /// Transient potassium channel
    KT,
    /// Slowly inactivating potassium channel
    Kd,
    /// Kv2-like delayed rectifier
    Kv2like,
    /// Kv3.1 fast delayed rectifier
    Kv31,
    /// Transient sodium channel
    NaV,
    /// Small-conductance calcium-activated potassium channel
    Sk,
}

impl Mechanism {
    /// Every supported mechanism, passive leak first.
    pub const ALL: [Mechanism; 12] = [
        Mechanism::Pas,
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

    /// Engine-facing mechanism name (NMODL suffix).
    pub fn suffix(&self) -> &'static str {
        match self {
            Mechanism::Pas => "pas",
            Mechanism::CaDynamics => "CaDynamics",
            Mechanism::CaHva => "Ca_HVA",
            Mechanism::CaLva => "Ca_LVA",
            Mechanism::Ih => "Ih",
            Mechanism::ImV2 => "Im_v2",
            Mechanism::KT => "K_T",
            Mechanism::Kd => "Kd",
            Mechanism::Kv2like => "Kv2like",
            Mechanism::Kv31 => "Kv3_1",
            Mechanism::NaV => "NaV",
            Mechanism::Sk => "SK",
        }
    }

    /// Base names of the range parameters this mechanism contributes.
    pub fn parameter_bases(&self) -> &'static [&'static str] {
        match self {
            Mechanism::Pas => &["g", "e"],
            Mechanism::CaDynamics => &["gamma", "decay"],
            _ => &["gbar"],
        }
    }

    /// Fully suffixed range-parameter names, e.g. `gbar_NaV`.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameter_bases()
            .iter()
            .map(|base| format!("{}_{}", base, self.suffix()))
            .collect()
    }

    /// Which mechanism owns a fully suffixed parameter name, if any.
    pub fn owner_of(param: &str) -> Option<Mechanism> {
        Mechanism::ALL
            .into_iter()
            .find(|m| m.parameter_names().iter().any(|p| p == param))
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A mechanism inserted on a section, with its assigned range parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertedMechanism {
    pub mechanism: Mechanism,
    pub parameters: HashMap<String, f64>,
}

impl InsertedMechanism {
    fn new(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            parameters: HashMap::new(),
        }
    }
}

// =============================================================================
// SECTIONS
// =============================================================================

/// A 3-D morphology sample along a section (position + local diameter, um).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pt3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub diam: f64,
}

/// Index of a section inside its owning cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionId(usize);

impl SectionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Attachment of a child section onto its parent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub parent: SectionId,
    /// Normalized position along the parent, 0 = proximal, 1 = distal.
    pub position: f64,
}

/// A cylindrical cable section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// Section name, e.g. `soma[0]`, `dend[3]`, `axon[1]`
    pub name: String,
    /// Length (um)
    pub length: Micron,
    /// Diameter (um)
    pub diam: Micron,
    /// Number of discretization segments
    pub nseg: usize,
    /// Axial resistivity (ohm-cm)
    pub ra: Resistivity,
    /// Membrane capacitance (uF/cm^2)
    pub cm: Capacitance,
    /// Sodium reversal potential (mV), set only where sodium channels live
    pub ena: Option<Voltage>,
    /// Potassium reversal potential (mV)
    pub ek: Option<Voltage>,
    /// 3-D samples from the reconstruction; empty for synthetic sections
    pub points: Vec<Pt3d>,
    /// Attachment to the parent section, if any
    pub parent: Option<Attachment>,
    /// Child sections attached to this one
    pub children: Vec<SectionId>,
    mechanisms: Vec<InsertedMechanism>,
}

impl Section {
    /// Create a section with engine default properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: 100.0,
            diam: 1.0,
            nseg: 1,
            ra: 100.0,
            cm: 1.0,
            ena: None,
            ek: None,
            points: Vec::new(),
            parent: None,
            children: Vec::new(),
            mechanisms: Vec::new(),
        }
    }

    /// Insert a mechanism. Each mechanism may be inserted at most once.
    pub fn insert(&mut self, mechanism: Mechanism) -> Result<()> {
        if self.has_mechanism(mechanism) {
            return Err(BuildError::DuplicateMechanism(mechanism.suffix()));
        }
        self.mechanisms.push(InsertedMechanism::new(mechanism));
        Ok(())
    }

    pub fn has_mechanism(&self, mechanism: Mechanism) -> bool {
        self.mechanisms.iter().any(|m| m.mechanism == mechanism)
    }

    /// Mechanisms inserted on this section, in insertion order.
    pub fn mechanisms(&self) -> impl Iterator<Item = &InsertedMechanism> {
        self.mechanisms.iter()
    }

    /// Assign a mechanism range parameter by its fully suffixed name.
    ///
    /// The name is validated against the inserted mechanisms: assigning a
    /// parameter of an absent mechanism or a name no mechanism owns is an
    /// error rather than a silent attribute write.
    pub fn set_param(&mut self, name: &str, value: f64) -> Result<()> {
        for inserted in &mut self.mechanisms {
            if inserted.mechanism.parameter_names().iter().any(|p| p == name) {
                inserted.parameters.insert(name.to_string(), value);
                return Ok(());
            }
        }
        match Mechanism::owner_of(name) {
            Some(owner) => Err(BuildError::MechanismNotInserted {
                section: self.name.clone(),
                param: name.to_string(),
                mechanism: owner.suffix(),
            }),
            None => Err(BuildError::UnknownParameter {
                section: self.name.clone(),
                param: name.to_string(),
            }),
        }
    }

    /// Read back a previously assigned range parameter.
    pub fn param(&self, name: &str) -> Option<f64> {
        self.mechanisms
            .iter()
            .find_map(|m| m.parameters.get(name).copied())
    }

    /// Membrane surface area of one segment (cm^2).
    pub fn segment_area(&self) -> f64 {
        let seg_length = self.length / self.nseg as f64;
        std::f64::consts::PI * self.diam * seg_length * 1e-8
    }
}

// =============================================================================
// CELLS
// =============================================================================

/// Anatomical group a section belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionGroup {
    Soma,
    Dend,
    Axon,
}

/// A cell: a named, insertion-ordered collection of connected sections.
///
/// Sections live in an arena owned by the cell; the `soma`, `dend`, and
/// `axon` groups hold ids into it, and `all` is their order-preserving union
/// (identical to arena insertion order). Iteration order matters: both
/// discretization and parameter assignment walk `all` in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    name: String,
    sections: Vec<Section>,
    soma: Vec<SectionId>,
    dend: Vec<SectionId>,
    axon: Vec<SectionId>,
}

impl Cell {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sections: Vec::new(),
            soma: Vec::new(),
            dend: Vec::new(),
            axon: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a section to the arena and its anatomical group.
    pub fn add_section(&mut self, section: Section, group: SectionGroup) -> SectionId {
        let id = SectionId(self.sections.len());
        self.sections.push(section);
        match group {
            SectionGroup::Soma => self.soma.push(id),
            SectionGroup::Dend => self.dend.push(id),
            SectionGroup::Axon => self.axon.push(id),
        }
        id
    }

    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id.0]
    }

    pub fn section_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.0]
    }

    /// Look up a section id by name.
    pub fn find(&self, name: &str) -> Result<SectionId> {
        self.sections
            .iter()
            .position(|s| s.name == name)
            .map(SectionId)
            .ok_or_else(|| BuildError::SectionNotFound(name.to_string()))
    }

    /// Connect a child's proximal end to `position` along the parent.
    pub fn connect(&mut self, child: SectionId, parent: SectionId, position: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&position) {
            return Err(BuildError::InvalidPosition(position));
        }
        self.sections[child.0].parent = Some(Attachment { parent, position });
        let children = &mut self.sections[parent.0].children;
        if !children.contains(&child) {
            children.push(child);
        }
        Ok(())
    }

    pub fn soma(&self) -> &[SectionId] {
        &self.soma
    }

    pub fn dend(&self) -> &[SectionId] {
        &self.dend
    }

    pub fn axon(&self) -> &[SectionId] {
        &self.axon
    }

    /// Every section id, in insertion order (soma ∪ dend ∪ axon).
    pub fn all(&self) -> Vec<SectionId> {
        (0..self.sections.len()).map(SectionId).collect()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Total number of discretization segments across the cell.
    pub fn total_segments(&self) -> usize {
        self.sections.iter().map(|s| s.nseg).sum()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn two_section_cell() -> (Cell, SectionId, SectionId) {
        let mut cell = Cell::new("test");
        let soma = cell.add_section(Section::new("soma[0]"), SectionGroup::Soma);
        let dend = cell.add_section(Section::new("dend[0]"), SectionGroup::Dend);
        (cell, soma, dend)
    }

    #[test]
    fn groups_partition_all() {
        let (mut cell, soma, dend) = two_section_cell();
        let axon = cell.add_section(Section::new("axon[0]"), SectionGroup::Axon);

        assert_eq!(cell.soma(), &[soma]);
        assert_eq!(cell.dend(), &[dend]);
        assert_eq!(cell.axon(), &[axon]);
        // `all` is the insertion-ordered union of the three groups
        assert_eq!(cell.all(), vec![soma, dend, axon]);
        assert_eq!(cell.len(), 3);
    }

    #[test]
    fn connect_records_parent_and_child() {
        let (mut cell, soma, dend) = two_section_cell();
        cell.connect(dend, soma, 0.5).unwrap();

        let attachment = cell.section(dend).parent.unwrap();
        assert_eq!(attachment.parent, soma);
        assert_eq!(attachment.position, 0.5);
        assert_eq!(cell.section(soma).children, vec![dend]);
    }

    #[test]
    fn connect_rejects_position_outside_section() {
        let (mut cell, soma, dend) = two_section_cell();
        let err = cell.connect(dend, soma, 1.5).unwrap_err();
        assert!(matches!(err, BuildError::InvalidPosition(_)));
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut sec = Section::new("soma[0]");
        sec.insert(Mechanism::NaV).unwrap();
        let err = sec.insert(Mechanism::NaV).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateMechanism("NaV")));
    }

    #[test]
    fn set_param_requires_inserted_mechanism() {
        let mut sec = Section::new("dend[0]");
        let err = sec.set_param("g_pas", 1e-4).unwrap_err();
        assert!(matches!(
            err,
            BuildError::MechanismNotInserted { mechanism: "pas", .. }
        ));

        sec.insert(Mechanism::Pas).unwrap();
        sec.set_param("g_pas", 1e-4).unwrap();
        sec.set_param("e_pas", -90.0).unwrap();
        assert_eq!(sec.param("g_pas"), Some(1e-4));
        assert_eq!(sec.param("e_pas"), Some(-90.0));
    }

    #[test]
    fn set_param_rejects_unknown_names() {
        let mut sec = Section::new("soma[0]");
        sec.insert(Mechanism::Pas).unwrap();
        let err = sec.set_param("gbar_hh", 0.12).unwrap_err();
        assert!(matches!(err, BuildError::UnknownParameter { .. }));
    }

    #[test]
    fn parameter_names_are_suffixed() {
        assert_eq!(Mechanism::Pas.parameter_names(), vec!["g_pas", "e_pas"]);
        assert_eq!(Mechanism::NaV.parameter_names(), vec!["gbar_NaV"]);
        assert_eq!(
            Mechanism::CaDynamics.parameter_names(),
            vec!["gamma_CaDynamics", "decay_CaDynamics"]
        );
        assert_eq!(Mechanism::owner_of("gbar_Kv3_1"), Some(Mechanism::Kv31));
        assert_eq!(Mechanism::owner_of("gbar_nope"), None);
    }

    #[test]
    fn display_is_the_cell_name() {
        let cell = Cell::new("Neuron472912177_instance");
        assert_eq!(cell.to_string(), "Neuron472912177_instance");
    }

    #[test]
    fn total_segments_sums_nseg() {
        let (mut cell, soma, dend) = two_section_cell();
        cell.section_mut(soma).nseg = 1;
        cell.section_mut(dend).nseg = 5;
        assert_eq!(cell.total_segments(), 6);
    }

    #[test]
    fn segment_area_scales_with_nseg() {
        let mut sec = Section::new("dend[0]");
        sec.length = 100.0;
        sec.diam = 10.0;
        sec.nseg = 1;
        let whole = sec.segment_area();
        sec.nseg = 5;
        assert!((sec.segment_area() - whole / 5.0).abs() < 1e-12);
    }
}
