//! Instance-level reading of a parsed STEP exchange structure
//!
//! `Table` converts shells into truck topology. Body roots and their names,
//! the declared length unit, knot vector limits and poly loop shells are read
//! here from the parsed instances.

use std::collections::{HashMap, HashSet};

use truck_modeling::{InnerSpace, Point3};
use truck_stepio::r#in::ruststep::ast::{DataSection, EntityInstance, Name, Parameter, Record};
use truck_stepio::r#in::alias::{Curve3D, ElementarySurface, Line, Plane, Surface};
use truck_topology::compress::{
    CompressedEdge, CompressedEdgeIndex, CompressedFace, CompressedShell,
};

use crate::kernel::{KernelError, KernelResult, LengthUnit};

/// Shell geometry as converted from STEP
pub(crate) type StepShell = CompressedShell<Point3, Curve3D, Surface>;

/// Instance keywords that define one body each
const SOLID_ROOTS: &[&str] = &["MANIFOLD_SOLID_BREP", "BREP_WITH_VOIDS", "FACETED_BREP"];
const SURFACE_ROOTS: &[&str] = &["SHELL_BASED_SURFACE_MODEL"];

/// Knots allowed in one B-spline knot vector
const MAX_KNOTS: usize = 1 << 16;

/// A body root with the shells it owns
#[derive(Debug, Clone)]
pub(crate) struct BodyRoot {
    pub id: u64,
    pub name: Option<String>,
    pub shells: Vec<u64>,
}

fn params(record: &Record) -> &[Parameter] {
    match &record.parameter {
        Parameter::List(items) => items,
        _ => &[],
    }
}

fn as_ref_id(param: &Parameter) -> Option<u64> {
    match param {
        Parameter::Ref(Name::Entity(id)) => Some(*id),
        _ => None,
    }
}

fn as_list(param: &Parameter) -> &[Parameter] {
    match param {
        Parameter::List(items) => items,
        _ => &[],
    }
}

fn as_str(param: &Parameter) -> Option<&str> {
    match param {
        Parameter::String(s) => Some(s),
        _ => None,
    }
}

fn as_enum(param: &Parameter) -> Option<&str> {
    match param {
        Parameter::Enumeration(e) => Some(e.trim_matches('.')),
        _ => None,
    }
}

fn as_f64(param: &Parameter) -> Option<f64> {
    match param {
        Parameter::Real(x) => Some(*x),
        Parameter::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

fn as_count(param: &Parameter) -> Option<usize> {
    match param {
        Parameter::Integer(i) => usize::try_from(*i).ok(),
        _ => None,
    }
}

/// Every entity reference inside `param`, nested lists included
fn collect_refs(param: &Parameter, out: &mut Vec<u64>) {
    match param {
        Parameter::Ref(Name::Entity(id)) => out.push(*id),
        Parameter::List(items) => items.iter().for_each(|p| collect_refs(p, out)),
        _ => {}
    }
}

/// Sum of a knot multiplicity list, `None` when it is not one
fn knot_count(list: &Parameter) -> Option<usize> {
    as_list(list)
        .iter()
        .try_fold(0usize, |sum, m| sum.checked_add(as_count(m)?))
}

/// Instance lookup over one `DATA` section
pub(crate) struct Instances<'a> {
    records: HashMap<u64, &'a Record>,
    complex: Vec<(u64, &'a [Record])>,
}

impl<'a> Instances<'a> {
    pub fn new(data: &'a DataSection) -> Self {
        let mut records = HashMap::new();
        let mut complex = Vec::new();
        for instance in &data.entities {
            match instance {
                EntityInstance::Simple { id, record } => {
                    records.insert(*id, record);
                }
                EntityInstance::Complex { id, subsuper } => {
                    complex.push((*id, subsuper.0.as_slice()));
                }
            }
        }
        Self { records, complex }
    }

    fn record(&self, id: u64) -> KernelResult<&'a Record> {
        self.records.get(&id).copied().ok_or_else(|| {
            KernelError::StepImport(format!("reference to missing instance #{}", id))
        })
    }

    fn keyword_of(&self, id: u64, expected: &[&str]) -> KernelResult<&'a Record> {
        let record = self.record(id)?;
        if expected.contains(&record.name.as_str()) {
            Ok(record)
        } else {
            Err(KernelError::StepImport(format!(
                "#{} is {}, expected {}",
                id,
                record.name,
                expected.join(" or ")
            )))
        }
    }

    /// Body roots in instance id order
    pub fn roots(&self, include_surface_models: bool) -> Vec<BodyRoot> {
        let mut roots: Vec<BodyRoot> = self
            .records
            .iter()
            .filter(|(_, r)| {
                let keyword = r.name.as_str();
                SOLID_ROOTS.contains(&keyword)
                    || (include_surface_models && SURFACE_ROOTS.contains(&keyword))
            })
            .map(|(&id, record)| {
                let p = params(record);
                let mut shells = Vec::new();
                p.iter().skip(1).for_each(|s| collect_refs(s, &mut shells));
                BodyRoot {
                    id,
                    name: p
                        .first()
                        .and_then(as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                    shells,
                }
            })
            .collect();
        roots.sort_by_key(|r| r.id);
        roots
    }

    /// Length unit of the file; millimetre when none is declared
    pub fn length_unit(&self) -> LengthUnit {
        self.complex
            .iter()
            .filter(|(_, parts)| parts.iter().any(|r| r.name == "LENGTH_UNIT"))
            .find_map(|(_, parts)| parts.iter().find_map(classify_length_unit))
            .unwrap_or_default()
    }

    /// Reject B-splines whose knot multiplicities are negative, oversized or
    /// inconsistent with their control points
    pub fn check_knots(&self) -> KernelResult<()> {
        let simple = self.records.iter().map(|(id, r)| (*id, *r, true));
        let complex = self
            .complex
            .iter()
            .flat_map(|(id, parts)| parts.iter().map(move |r| (*id, r, false)));

        for (id, record, is_simple) in simple.chain(complex) {
            let p = params(record);
            let lists: Vec<&Parameter> = match record.name.as_str() {
                "B_SPLINE_CURVE_WITH_KNOTS" if is_simple => p.get(6).into_iter().collect(),
                "B_SPLINE_CURVE_WITH_KNOTS" => p.first().into_iter().collect(),
                "B_SPLINE_SURFACE_WITH_KNOTS" if is_simple => p.iter().skip(8).take(2).collect(),
                "B_SPLINE_SURFACE_WITH_KNOTS" => p.iter().take(2).collect(),
                _ => continue,
            };
            let invalid = || KernelError::StepImport(format!("#{}: invalid knot multiplicities", id));
            if lists.is_empty() {
                return Err(invalid());
            }
            for list in lists {
                let count = knot_count(list)
                    .filter(|&c| c <= MAX_KNOTS)
                    .ok_or_else(invalid)?;
                if is_simple && record.name == "B_SPLINE_CURVE_WITH_KNOTS" {
                    let degree = p.get(1).and_then(as_count).ok_or_else(invalid)?;
                    let points = p.get(2).map(|l| as_list(l).len()).unwrap_or(0);
                    if points.checked_add(degree + 1) != Some(count) {
                        return Err(KernelError::StepImport(format!(
                            "#{}: {} knots for {} control points of degree {}",
                            id, count, points, degree
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of `EDGE_CURVE` instances reachable from `root`
    pub fn count_edges(&self, root: u64) -> usize {
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        let mut count = 0;
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(record) = self.records.get(&id) else {
                continue;
            };
            if record.name == "EDGE_CURVE" {
                count += 1;
                continue;
            }
            collect_refs(&record.parameter, &mut stack);
        }
        count
    }

    /// Whether any face of `shell` is bounded by a `POLY_LOOP`
    pub fn has_poly_loops(&self, shell: u64) -> bool {
        let children = |id: u64| -> Vec<u64> {
            self.records
                .get(&id)
                .and_then(|r| params(r).get(1))
                .map(as_list)
                .unwrap_or_default()
                .iter()
                .filter_map(as_ref_id)
                .collect()
        };
        children(shell).into_iter().flat_map(children).any(|bound| {
            self.records
                .get(&bound)
                .and_then(|r| params(r).get(1))
                .and_then(as_ref_id)
                .and_then(|l| self.records.get(&l))
                .is_some_and(|l| l.name == "POLY_LOOP")
        })
    }

    fn point(&self, id: u64) -> KernelResult<Point3> {
        let record = self.keyword_of(id, &["CARTESIAN_POINT"])?;
        let coords: Vec<f64> = params(record)
            .get(1)
            .map(as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(as_f64)
            .collect();
        match coords.as_slice() {
            [x, y, z] => Ok(Point3::new(*x, *y, *z)),
            _ => Err(KernelError::StepImport(format!(
                "#{} is not a 3D point",
                id
            ))),
        }
    }

    /// Shell of a faceted body with one line edge per distinct loop segment
    pub fn faceted_shell(&self, shell: u64) -> KernelResult<StepShell> {
        let record = self.keyword_of(shell, &["CLOSED_SHELL", "OPEN_SHELL"])?;
        let mut vertices: Vec<Point3> = Vec::new();
        let mut vertex_ids: HashMap<u64, usize> = HashMap::new();
        let mut edges: Vec<CompressedEdge<Curve3D>> = Vec::new();
        let mut edge_ids: HashMap<(usize, usize), usize> = HashMap::new();
        let mut faces = Vec::new();

        let face_refs = params(record).get(1).map(as_list).unwrap_or_default();
        for face_id in face_refs.iter().filter_map(as_ref_id) {
            let face = self.keyword_of(face_id, &["FACE", "FACE_SURFACE", "ADVANCED_FACE"])?;
            let mut boundaries = Vec::new();
            let mut outline: Vec<usize> = Vec::new();

            let bounds = params(face).get(1).map(as_list).unwrap_or_default();
            for bound_id in bounds.iter().filter_map(as_ref_id) {
                let bound = self.keyword_of(bound_id, &["FACE_BOUND", "FACE_OUTER_BOUND"])?;
                let bound_params = params(bound);
                let loop_id = bound_params.get(1).and_then(as_ref_id).ok_or_else(|| {
                    KernelError::StepImport(format!("#{} has no loop", bound_id))
                })?;
                let poly_loop = self.keyword_of(loop_id, &["POLY_LOOP"])?;

                let mut ring = Vec::new();
                let point_refs = params(poly_loop).get(1).map(as_list).unwrap_or_default();
                for point_id in point_refs.iter().filter_map(as_ref_id) {
                    let index = match vertex_ids.get(&point_id) {
                        Some(&index) => index,
                        None => {
                            vertices.push(self.point(point_id)?);
                            vertex_ids.insert(point_id, vertices.len() - 1);
                            vertices.len() - 1
                        }
                    };
                    if ring.last() != Some(&index) {
                        ring.push(index);
                    }
                }
                if ring.len() > 1 && ring.first() == ring.last() {
                    ring.pop();
                }
                if ring.len() < 3 {
                    return Err(KernelError::StepImport(format!(
                        "#{} has fewer than three points",
                        loop_id
                    )));
                }
                if bound_params.get(2).and_then(as_enum) == Some("F") {
                    ring.reverse();
                }

                let boundary: Vec<CompressedEdgeIndex> = ring
                    .iter()
                    .zip(ring.iter().cycle().skip(1))
                    .map(|(&a, &b)| {
                        let key = (a.min(b), a.max(b));
                        let index = *edge_ids.entry(key).or_insert_with(|| {
                            edges.push(CompressedEdge {
                                vertices: key,
                                curve: Curve3D::Line(Line(vertices[key.0], vertices[key.1])),
                            });
                            edges.len() - 1
                        });
                        CompressedEdgeIndex {
                            index,
                            orientation: a == key.0,
                        }
                    })
                    .collect();
                if outline.is_empty() {
                    outline = ring;
                }
                boundaries.push(boundary);
            }

            let plane = plane_through(&outline, &vertices).ok_or_else(|| {
                KernelError::StepImport(format!("face #{} is degenerate", face_id))
            })?;
            faces.push(CompressedFace {
                boundaries,
                orientation: true,
                surface: Surface::ElementarySurface(Box::new(ElementarySurface::Plane(plane))),
            });
        }

        if edges.is_empty() {
            return Err(KernelError::StepImport(format!(
                "shell #{} has no faces",
                shell
            )));
        }
        Ok(CompressedShell {
            vertices,
            edges,
            faces,
        })
    }
}

/// Plane through the first three non-collinear points of a loop
fn plane_through(ring: &[usize], vertices: &[Point3]) -> Option<Plane> {
    let origin = vertices[*ring.first()?];
    let one = vertices[*ring.get(1)?];
    ring.iter().skip(2).map(|&i| vertices[i]).find_map(|another| {
        let normal = (one - origin).cross(another - origin);
        (normal.magnitude() > 1e-12).then(|| Plane::new(origin, one, another))
    })
}

fn classify_length_unit(record: &Record) -> Option<LengthUnit> {
    let p = params(record);
    match record.name.as_str() {
        "CONVERSION_BASED_UNIT" => {
            match p.first().and_then(as_str).map(|s| s.trim().to_ascii_uppercase()).as_deref() {
                Some("INCH") => Some(LengthUnit::Inch),
                Some("FOOT") => Some(LengthUnit::Foot),
                _ => None,
            }
        }
        "SI_UNIT" => {
            if p.get(1).and_then(as_enum) != Some("METRE") {
                return None;
            }
            Some(match p.first().and_then(as_enum) {
                None => LengthUnit::Meter,
                Some("MILLI") => LengthUnit::Millimeter,
                Some("CENTI") => LengthUnit::Centimeter,
                Some(other) => {
                    tracing::warn!("Unsupported SI length prefix {}, assuming millimetre", other);
                    LengthUnit::Millimeter
                }
            })
        }
        _ => None,
    }
}
