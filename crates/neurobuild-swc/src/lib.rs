//! # neurobuild-swc
//!
//! Loader for SWC neuron reconstructions (CNIC interchange format: one sample
//! per line, `id type x y z radius parent`).
//!
//! The loader turns the sample tree into connected [`Section`]s on a target
//! [`Cell`]: all soma samples collapse into a single `soma[0]` section, and
//! every unbranched run of neurite samples becomes one section attached to
//! its parent. Sections hanging off the soma attach at the soma midpoint
//! (0.5); sections hanging off another section attach at its distal end.
//!
//! Two policy knobs come in through [`LoadOptions`]:
//!
//! - `use_axon: false` drops every axon-typed sample **and its whole
//!   subtree** before section building — the standard move when a model
//!   substitutes its own synthetic axon stub;
//! - `shift` translates every sample by a fixed x/y/z offset, so several
//!   instances of the same reconstruction can be placed side by side.

use itertools::Itertools;
use log::{info, warn};
use neurobuild_core::{BuildError, Cell, Pt3d, Result, Section, SectionGroup, SectionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

// =============================================================================
// SWC SAMPLES
// =============================================================================

/// SWC structure identifiers, per the CNIC specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Structure {
    Undefined,
    Soma,
    Axon,
    BasalDendrite,
    ApicalDendrite,
    ForkPoint,
    EndPoint,
    Custom,
}

impl From<u32> for Structure {
    fn from(v: u32) -> Self {
        match v {
            0 => Structure::Undefined,
            1 => Structure::Soma,
            2 => Structure::Axon,
            3 => Structure::BasalDendrite,
            4 => Structure::ApicalDendrite,
            5 => Structure::ForkPoint,
            6 => Structure::EndPoint,
            _ => Structure::Custom,
        }
    }
}

impl Structure {
    pub fn is_soma(&self) -> bool {
        matches!(self, Structure::Soma)
    }

    pub fn is_axon(&self) -> bool {
        matches!(self, Structure::Axon)
    }
}

/// One reconstruction sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwcNode {
    pub id: u64,
    pub structure: Structure,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub radius: f64,
    /// `None` for root samples (parent -1 in the file).
    pub parent: Option<u64>,
}

/// Loader policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Keep axon-typed samples. When false the whole axon subtree is dropped.
    pub use_axon: bool,
    /// Translation applied to every sample (um).
    pub shift: [f64; 3],
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_axon: true,
            shift: [0.0; 3],
        }
    }
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_error(line: usize, message: impl Into<String>) -> BuildError {
    BuildError::Parse {
        line,
        message: message.into(),
    }
}

/// Parse SWC text into samples. Comment (`#`) and blank lines are skipped;
/// parse failures report the 1-based line number.
pub fn parse_swc(text: &str) -> Result<Vec<SwcNode>> {
    let mut nodes = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 7 {
            return Err(parse_error(
                line_no,
                format!("expected 7 fields, found {}", fields.len()),
            ));
        }

        let id = fields[0]
            .parse::<u64>()
            .map_err(|_| parse_error(line_no, format!("bad sample id {:?}", fields[0])))?;
        let structure: Structure = fields[1]
            .parse::<u32>()
            .map_err(|_| parse_error(line_no, format!("bad structure id {:?}", fields[1])))?
            .into();
        let mut coords = [0.0f64; 4];
        for (slot, field) in coords.iter_mut().zip(&fields[2..6]) {
            *slot = field
                .parse::<f64>()
                .map_err(|_| parse_error(line_no, format!("bad numeric field {:?}", field)))?;
        }
        let parent_raw = fields[6]
            .parse::<i64>()
            .map_err(|_| parse_error(line_no, format!("bad parent id {:?}", fields[6])))?;
        let parent = if parent_raw < 0 {
            None
        } else {
            Some(parent_raw as u64)
        };

        if !seen.insert(id) {
            warn!("duplicate sample id {} at line {}", id, line_no);
        }
        if coords[3] == 0.0 {
            warn!("zero-radius sample {} ({:?}) at line {}", id, structure, line_no);
        }

        nodes.push(SwcNode {
            id,
            structure,
            x: coords[0],
            y: coords[1],
            z: coords[2],
            radius: coords[3],
            parent,
        });
    }

    Ok(nodes)
}

/// Read and parse an SWC file.
pub fn read_swc(path: impl AsRef<Path>) -> Result<Vec<SwcNode>> {
    let text = fs::read_to_string(path)?;
    parse_swc(&text)
}

// =============================================================================
// SECTION BUILDING
// =============================================================================

fn distance(a: &Pt3d, b: &Pt3d) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2) + (a.z - b.z).powi(2)).sqrt()
}

fn arc_length(points: &[Pt3d]) -> f64 {
    points.windows(2).map(|w| distance(&w[0], &w[1])).sum()
}

fn sample_point(node: &SwcNode, shift: &[f64; 3]) -> Pt3d {
    Pt3d {
        x: node.x + shift[0],
        y: node.y + shift[1],
        z: node.z + shift[2],
        diam: 2.0 * node.radius,
    }
}

/// A chain of samples waiting to become a section.
struct PendingChain {
    start: u64,
    parent_section: SectionId,
    parent_position: f64,
    anchor: Pt3d,
}

/// Populate a cell's `soma`/`dend`/`axon` groups from parsed samples.
///
/// This is the in-memory half of [`load_swc`]; tests and callers that already
/// hold samples use it directly.
pub fn load_nodes(nodes: &[SwcNode], cell: &mut Cell, options: &LoadOptions) -> Result<()> {
    let by_id: HashMap<u64, &SwcNode> = nodes.iter().map(|n| (n.id, n)).collect();

    info!(
        "structure breakdown: {:?}",
        nodes.iter().map(|n| n.structure).counts()
    );

    // File-order child lists keep section numbering deterministic.
    let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = node.parent {
            if by_id.contains_key(&parent) {
                children.entry(parent).or_default().push(node.id);
            }
        }
    }

    // Walk down from the roots, pruning axon subtrees when requested.
    let mut kept: HashSet<u64> = HashSet::new();
    let mut queue: VecDeque<u64> = nodes
        .iter()
        .filter(|n| n.parent.map_or(true, |p| !by_id.contains_key(&p)))
        .map(|n| n.id)
        .collect();
    let mut visited: HashSet<u64> = HashSet::new();
    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            warn!("cycle detected at sample {}", id);
            continue;
        }
        if !options.use_axon && by_id[&id].structure.is_axon() {
            continue; // drops the whole subtree below this sample
        }
        kept.insert(id);
        if let Some(kids) = children.get(&id) {
            queue.extend(kids.iter().copied());
        }
    }
    if kept.len() < nodes.len() {
        info!("dropped {} of {} samples", nodes.len() - kept.len(), nodes.len());
    }

    // All soma samples collapse into one section.
    let soma_nodes: Vec<&SwcNode> = nodes
        .iter()
        .filter(|n| kept.contains(&n.id) && n.structure.is_soma())
        .collect();
    if soma_nodes.is_empty() {
        return Err(BuildError::MissingSoma);
    }
    let soma_ids: HashSet<u64> = soma_nodes.iter().map(|n| n.id).collect();

    let soma_points: Vec<Pt3d> = soma_nodes
        .iter()
        .map(|n| sample_point(n, &options.shift))
        .collect();
    let mut soma = Section::new("soma[0]");
    if soma_points.len() == 1 {
        // Spherical soma convention: a single sample stands for a sphere.
        soma.length = soma_points[0].diam;
        soma.diam = soma_points[0].diam;
    } else {
        soma.length = arc_length(&soma_points);
        soma.diam = soma_points.iter().map(|p| p.diam).sum::<f64>() / soma_points.len() as f64;
    }
    soma.points = soma_points;
    let soma_id = cell.add_section(soma, SectionGroup::Soma);
    let soma_anchor = cell.section(soma_id).points[0];

    // Seed one pending chain per neurite attached to the soma (or orphaned).
    let mut pending: VecDeque<PendingChain> = VecDeque::new();
    for node in nodes {
        if !kept.contains(&node.id) || node.structure.is_soma() {
            continue;
        }
        match node.parent {
            Some(p) if soma_ids.contains(&p) => pending.push_back(PendingChain {
                start: node.id,
                parent_section: soma_id,
                parent_position: 0.5,
                anchor: sample_point(by_id[&p], &options.shift),
            }),
            Some(p) if kept.contains(&p) => {} // reached through its parent chain
            _ => {
                warn!("sample {} has no surviving parent, attaching to soma", node.id);
                pending.push_back(PendingChain {
                    start: node.id,
                    parent_section: soma_id,
                    parent_position: 0.5,
                    anchor: soma_anchor,
                });
            }
        }
    }

    let mut dend_count = 0usize;
    let mut axon_count = 0usize;
    while let Some(chain) = pending.pop_front() {
        // Extend through every sample with exactly one surviving child.
        let mut run = vec![chain.start];
        let mut tail = chain.start;
        loop {
            let kids: Vec<u64> = children
                .get(&tail)
                .map(|k| k.iter().filter(|id| kept.contains(id)).copied().collect())
                .unwrap_or_default();
            if kids.len() == 1 {
                tail = kids[0];
                run.push(tail);
            } else {
                break;
            }
        }

        let mut points = vec![chain.anchor];
        points.extend(run.iter().map(|id| sample_point(by_id[id], &options.shift)));
        let run_diam =
            run.iter().map(|id| 2.0 * by_id[id].radius).sum::<f64>() / run.len() as f64;

        let (name, group) = if by_id[&chain.start].structure.is_axon() {
            let name = format!("axon[{}]", axon_count);
            axon_count += 1;
            (name, SectionGroup::Axon)
        } else {
            let name = format!("dend[{}]", dend_count);
            dend_count += 1;
            (name, SectionGroup::Dend)
        };

        let mut section = Section::new(name);
        section.length = arc_length(&points);
        section.diam = run_diam;
        section.points = points;
        let tail_point = *section.points.last().unwrap();
        let id = cell.add_section(section, group);
        cell.connect(id, chain.parent_section, chain.parent_position)?;

        // Each branch below the tail starts a new section at our distal end.
        if let Some(kids) = children.get(&tail) {
            for &kid in kids.iter().filter(|id| kept.contains(id)) {
                pending.push_back(PendingChain {
                    start: kid,
                    parent_section: id,
                    parent_position: 1.0,
                    anchor: tail_point,
                });
            }
        }
    }

    info!(
        "built {} sections ({} soma, {} dend, {} axon)",
        cell.len(),
        cell.soma().len(),
        cell.dend().len(),
        cell.axon().len()
    );
    Ok(())
}

/// Load an SWC reconstruction file into a cell.
///
/// The loader contract: populate the target cell's section groups, excluding
/// the axon and translating samples as directed by `options`. Fails on
/// missing files, malformed samples, and reconstructions without a soma;
/// nothing is guaranteed about the cell's contents after a failure.
pub fn load_swc(path: impl AsRef<Path>, cell: &mut Cell, options: &LoadOptions) -> Result<()> {
    let nodes = read_swc(path)?;
    load_nodes(&nodes, cell, options)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // 3-sample soma, 2-sample axon, and a Y-branched dendrite:
    // dend chains of length 85, 45, and 30 um.
    const FIXTURE: &str = "\
# test interneuron reconstruction
1 1 0 0 0 5 -1
2 1 10 0 0 5 1
3 1 20 0 0 5 2
4 2 20 10 0 0.5 3
5 2 20 40 0 0.5 4
6 3 20 45 0 0.75 3
7 3 20 85 0 0.75 6
8 3 20 130 0 0.5 7
9 3 50 85 0 0.5 7
";

    fn no_axon() -> LoadOptions {
        LoadOptions {
            use_axon: false,
            ..LoadOptions::default()
        }
    }

    #[test]
    fn parses_samples_and_roots() {
        let nodes = parse_swc(FIXTURE).unwrap();
        assert_eq!(nodes.len(), 9);
        assert_eq!(nodes[0].parent, None);
        assert_eq!(nodes[8].parent, Some(7));
        assert_eq!(nodes[3].structure, Structure::Axon);
        assert!(nodes[0].structure.is_soma());
    }

    #[test]
    fn parse_reports_line_numbers() {
        let err = parse_swc("# header\n1 1 0 0 0 5 -1\n2 3 oops 0 0 1 1\n").unwrap_err();
        match err {
            BuildError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }

        let err = parse_swc("1 1 0 0 0 5\n").unwrap_err();
        assert!(matches!(err, BuildError::Parse { line: 1, .. }));
    }

    #[test]
    fn excludes_axon_subtree() {
        let nodes = parse_swc(FIXTURE).unwrap();
        let mut cell = Cell::new("test");
        load_nodes(&nodes, &mut cell, &no_axon()).unwrap();

        assert_eq!(cell.soma().len(), 1);
        assert_eq!(cell.dend().len(), 3);
        assert!(cell.axon().is_empty());
        assert_eq!(cell.len(), 4);
    }

    #[test]
    fn keeps_axon_when_requested() {
        let nodes = parse_swc(FIXTURE).unwrap();
        let mut cell = Cell::new("test");
        load_nodes(&nodes, &mut cell, &LoadOptions::default()).unwrap();

        assert_eq!(cell.axon().len(), 1);
        let axon = cell.section(cell.axon()[0]);
        assert_eq!(axon.name, "axon[0]");
        // anchor (20,0,0) -> (20,10,0) -> (20,40,0)
        assert!((axon.length - 40.0).abs() < 1e-9);
    }

    #[test]
    fn chains_split_at_branch_points() {
        let nodes = parse_swc(FIXTURE).unwrap();
        let mut cell = Cell::new("test");
        load_nodes(&nodes, &mut cell, &no_axon()).unwrap();

        let lengths: Vec<f64> = cell
            .dend()
            .iter()
            .map(|&id| cell.section(id).length)
            .collect();
        assert!((lengths[0] - 85.0).abs() < 1e-9);
        assert!((lengths[1] - 45.0).abs() < 1e-9);
        assert!((lengths[2] - 30.0).abs() < 1e-9);

        // First chain hangs off the soma midpoint, branches off the chain end.
        let first = cell.section(cell.dend()[0]).parent.unwrap();
        assert_eq!(first.parent, cell.soma()[0]);
        assert_eq!(first.position, 0.5);
        let branch = cell.section(cell.dend()[1]).parent.unwrap();
        assert_eq!(branch.parent, cell.dend()[0]);
        assert_eq!(branch.position, 1.0);
    }

    #[test]
    fn soma_geometry_from_samples() {
        let nodes = parse_swc(FIXTURE).unwrap();
        let mut cell = Cell::new("test");
        load_nodes(&nodes, &mut cell, &no_axon()).unwrap();

        let soma = cell.section(cell.soma()[0]);
        assert_eq!(soma.name, "soma[0]");
        assert!((soma.length - 20.0).abs() < 1e-9);
        assert!((soma.diam - 10.0).abs() < 1e-9);
        assert_eq!(soma.points.len(), 3);
    }

    #[test]
    fn single_sample_soma_is_spherical() {
        let nodes = parse_swc("1 1 0 0 0 6.2 -1\n2 3 0 20 0 1 1\n").unwrap();
        let mut cell = Cell::new("test");
        load_nodes(&nodes, &mut cell, &no_axon()).unwrap();

        let soma = cell.section(cell.soma()[0]);
        assert!((soma.length - 12.4).abs() < 1e-9);
        assert!((soma.diam - 12.4).abs() < 1e-9);
    }

    #[test]
    fn shift_translates_every_sample() {
        let nodes = parse_swc(FIXTURE).unwrap();
        let options = LoadOptions {
            use_axon: false,
            shift: [100.0, -50.0, 10.0],
        };
        let mut shifted = Cell::new("shifted");
        load_nodes(&nodes, &mut shifted, &options).unwrap();
        let mut plain = Cell::new("plain");
        load_nodes(&nodes, &mut plain, &no_axon()).unwrap();

        for (a, b) in shifted.sections().zip(plain.sections()) {
            for (pa, pb) in a.points.iter().zip(&b.points) {
                assert!((pa.x - pb.x - 100.0).abs() < 1e-12);
                assert!((pa.y - pb.y + 50.0).abs() < 1e-12);
                assert!((pa.z - pb.z - 10.0).abs() < 1e-12);
                assert_eq!(pa.diam, pb.diam);
            }
            // geometry is shift-invariant
            assert!((a.length - b.length).abs() < 1e-12);
        }
    }

    #[test]
    fn missing_soma_is_an_error() {
        let nodes = parse_swc("1 3 0 0 0 1 -1\n2 3 0 10 0 1 1\n").unwrap();
        let mut cell = Cell::new("test");
        let err = load_nodes(&nodes, &mut cell, &no_axon()).unwrap_err();
        assert!(matches!(err, BuildError::MissingSoma));
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut cell = Cell::new("test");
        let err = load_swc("no/such/file.swc", &mut cell, &no_axon()).unwrap_err();
        assert!(matches!(err, BuildError::Io(_)));
    }

    #[test]
    fn loads_the_committed_fixture() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../data/interneuron.swc");
        let mut cell = Cell::new("test");
        load_swc(path, &mut cell, &no_axon()).unwrap();
        assert_eq!(cell.len(), 4);
    }
}
