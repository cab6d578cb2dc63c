//! Truck CAD Kernel Backend
//!
//! Reads and writes STEP through truck-stepio and evaluates edges on the
//! resulting truck curves. Faceted bodies bounded by poly loops are built
//! into the same compressed shells with line edges.
//!
//! There is no boolean modelling; composition groups bodies without merging.

mod body;
mod edges;
mod exchange;
mod primitive;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use glam::{DMat3, DMat4, DVec3};
use parking_lot::Mutex;
use uuid::Uuid;

use self::body::Body;
pub use self::edges::MAX_POLYLINE_POINTS;
use super::{
    BoundingBox, ComponentInfo, EdgeCurve, EdgeId, EdgeInfo, GeometryKernel, KernelError,
    KernelResult, LengthUnit, Solid, StepExportOptions, StepImportOptions,
};

/// Truck-based geometry kernel
pub struct TruckKernel {
    /// Storage for body data (keyed by UUID)
    bodies: Mutex<HashMap<Uuid, Arc<Body>>>,
}

impl TruckKernel {
    /// Create a new Truck kernel
    pub fn new() -> Self {
        Self {
            bodies: Mutex::new(HashMap::new()),
        }
    }

    /// Store a body and return a handle to it
    fn store_body(&self, body: Body) -> Solid {
        let id = Uuid::new_v4();
        self.bodies.lock().insert(id, Arc::new(body));
        Solid::new(id)
    }

    fn get_body(&self, solid: &Solid) -> KernelResult<Arc<Body>> {
        self.bodies
            .lock()
            .get(&solid.id())
            .cloned()
            .ok_or(KernelError::SolidNotFound(solid.id()))
    }

    /// Number of live bodies
    pub fn live_count(&self) -> usize {
        self.bodies.lock().len()
    }
}

impl Default for TruckKernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Rotation plus translation, no scale, shear or reflection
fn check_rigid(matrix: &DMat4) -> KernelResult<()> {
    if !matrix.is_finite() {
        return Err(KernelError::InvalidTransform(
            "matrix has non-finite entries".into(),
        ));
    }
    if !matrix.row(3).abs_diff_eq(glam::DVec4::W, 1e-9) {
        return Err(KernelError::InvalidTransform(
            "matrix is not affine".into(),
        ));
    }
    let rotation = DMat3::from_mat4(*matrix);
    if !(rotation.transpose() * rotation).abs_diff_eq(DMat3::IDENTITY, 1e-6) {
        return Err(KernelError::InvalidTransform(
            "matrix scales or shears".into(),
        ));
    }
    if rotation.determinant() <= 0.0 {
        return Err(KernelError::InvalidTransform("matrix mirrors".into()));
    }
    Ok(())
}

/// Extents of a body from its vertices and edge curves
fn body_bounds(body: &Body) -> BoundingBox {
    let mut bbox = BoundingBox::from_points(body.vertices());
    for edge in body.edges.iter().filter_map(|&e| body.resolve(e).ok()) {
        bbox = bbox.union(&edge.bounds());
    }
    bbox
}

/// Prefix an import failure with the file it came from
fn in_file(path: &Path) -> impl Fn(KernelError) -> KernelError + '_ {
    move |e| match e {
        KernelError::StepImport(reason) => {
            KernelError::StepImport(format!("{}: {}", path.display(), reason))
        }
        other => other,
    }
}

impl GeometryKernel for TruckKernel {
    fn name(&self) -> &str {
        "truck"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn import_step(&self, path: &Path, options: &StepImportOptions) -> KernelResult<Solid> {
        let bytes = fs::read(path)
            .map_err(|e| KernelError::FileIo(format!("{}: {}", path.display(), e)))?;
        let content = String::from_utf8_lossy(&bytes);
        let body = Body::from_step_text(&content, options).map_err(in_file(path))?;

        tracing::info!(
            "Imported STEP {:?}: {} component(s), {} edge(s)",
            path,
            body.components.len(),
            body.edges.len()
        );
        Ok(self.store_body(body))
    }

    fn export_step(
        &self,
        solid: &Solid,
        path: &Path,
        options: &StepExportOptions,
    ) -> KernelResult<()> {
        let body = self.get_body(solid)?;
        let product_name = options
            .product_name
            .clone()
            .or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "assembly".into());
        let text = body
            .to_step(&product_name, options)
            .map_err(|e| KernelError::StepExport(format!("{}: {}", path.display(), e)))?;
        fs::write(path, text)
            .map_err(|e| KernelError::StepExport(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Exported STEP to {:?}", path);
        Ok(())
    }

    fn bounding_box(&self, solid: &Solid) -> KernelResult<BoundingBox> {
        let body = self.get_body(solid)?;
        let bbox = body_bounds(&body);
        if bbox.is_empty() {
            return Err(KernelError::EmptyGeometry(format!(
                "solid {} has no measurable geometry",
                solid.id()
            )));
        }
        Ok(bbox)
    }

    fn unit(&self, solid: &Solid) -> KernelResult<LengthUnit> {
        Ok(self.get_body(solid)?.unit)
    }

    fn transform(&self, solid: &Solid, matrix: &DMat4) -> KernelResult<Solid> {
        check_rigid(matrix)?;
        let body = self.get_body(solid)?;
        Ok(self.store_body(body.transformed(matrix)))
    }

    fn compose(&self, items: &[(&Solid, &str)]) -> KernelResult<Solid> {
        if items.is_empty() {
            return Err(KernelError::Composition("nothing to compose".into()));
        }
        let bodies = items
            .iter()
            .map(|(solid, _)| self.get_body(solid))
            .collect::<KernelResult<Vec<_>>>()?;
        let pairs: Vec<(&Body, &str)> = bodies
            .iter()
            .zip(items)
            .map(|(body, (_, label))| (body.as_ref(), *label))
            .collect();
        let composed = Body::compose(&pairs)?;
        Ok(self.store_body(composed))
    }

    fn components(&self, solid: &Solid) -> KernelResult<Vec<ComponentInfo>> {
        let body = self.get_body(solid)?;
        Ok(body
            .components
            .iter()
            .enumerate()
            .map(|(index, c)| ComponentInfo {
                index,
                name: c.name.clone(),
            })
            .collect())
    }

    fn get_edges(&self, solid: &Solid) -> KernelResult<Vec<EdgeInfo>> {
        let body = self.get_body(solid)?;
        let edges = body
            .edges
            .iter()
            .enumerate()
            .map(|(index, &edge)| {
                let id = EdgeId::new(solid.id(), index as u32);
                let (start, end, curve) = match body.resolve(edge) {
                    Ok(trimmed) => (trimmed.start, trimmed.end, trimmed.classify()),
                    Err(entity) => (
                        DVec3::ZERO,
                        DVec3::ZERO,
                        EdgeCurve::Unsupported(entity.to_string()),
                    ),
                };
                EdgeInfo {
                    id,
                    component: edge.component,
                    start,
                    end,
                    curve,
                }
            })
            .collect();
        Ok(edges)
    }

    fn discretize_edge(
        &self,
        solid: &Solid,
        edge: EdgeId,
        deflection: f64,
    ) -> KernelResult<Vec<DVec3>> {
        if !(deflection > 0.0 && deflection.is_finite()) {
            return Err(KernelError::OperationFailed(format!(
                "deflection must be positive, got {}",
                deflection
            )));
        }
        let not_found = KernelError::EdgeNotFound {
            solid_id: solid.id(),
            index: edge.index,
        };
        if edge.solid_id != solid.id() {
            return Err(not_found);
        }
        let body = self.get_body(solid)?;
        let &reference = body.edges.get(edge.index as usize).ok_or(not_found)?;

        match body.resolve(reference) {
            Ok(trimmed) => Ok(trimmed.discretize(deflection)),
            Err(entity) => Err(KernelError::OperationFailed(format!(
                "cannot discretize {} (edge {})",
                entity, edge.index
            ))),
        }
    }

    fn create_box(&self, min: DVec3, size: DVec3) -> KernelResult<Solid> {
        Ok(self.store_body(primitive::box_body(min, size)?))
    }

    fn create_cylinder(
        &self,
        base_center: DVec3,
        radius: f64,
        height: f64,
        axis: DVec3,
    ) -> KernelResult<Solid> {
        Ok(self.store_body(primitive::cylinder_body(
            base_center,
            radius,
            height,
            axis,
        )?))
    }

    fn release(&self, id: Uuid) -> bool {
        self.bodies.lock().remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DQuat;

    const HEADER: &str = "ISO-10303-21;
HEADER;
FILE_DESCRIPTION((''),'2;1');
FILE_NAME('fixture.stp','',(''),(''),'','','');
FILE_SCHEMA(('AUTOMOTIVE_DESIGN'));
ENDSEC;
DATA;
";

    const TETRAHEDRON: &str = "#1=CARTESIAN_POINT('',(0.,0.,0.));
#2=CARTESIAN_POINT('',(10.,0.,0.));
#3=CARTESIAN_POINT('',(0.,10.,0.));
#4=CARTESIAN_POINT('',(0.,0.,10.));
#11=POLY_LOOP('',(#1,#3,#2));
#12=POLY_LOOP('',(#1,#2,#4));
#13=POLY_LOOP('',(#2,#3,#4));
#14=POLY_LOOP('',(#3,#1,#4));
#21=FACE_OUTER_BOUND('',#11,.T.);
#22=FACE_OUTER_BOUND('',#12,.T.);
#23=FACE_OUTER_BOUND('',#13,.T.);
#24=FACE_OUTER_BOUND('',#14,.T.);
#31=FACE('',(#21));
#32=FACE('',(#22));
#33=FACE('',(#23));
#34=FACE('',(#24));
#40=CLOSED_SHELL('',(#31,#32,#33,#34));
#41=FACETED_BREP('tetra',#40);
#50=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));
";

    fn write_fixture(dir: &Path, name: &str, data: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("{}{}ENDSEC;\nEND-ISO-10303-21;\n", HEADER, data)).unwrap();
        path
    }

    #[test]
    fn test_box_bounding_box() {
        let kernel = TruckKernel::new();
        let solid = kernel
            .create_box(DVec3::new(1.0, 2.0, 3.0), DVec3::new(10.0, 20.0, 30.0))
            .unwrap();
        let bbox = kernel.bounding_box(&solid).unwrap();
        assert!(bbox.min.abs_diff_eq(DVec3::new(1.0, 2.0, 3.0), 1e-9));
        assert!(bbox.max.abs_diff_eq(DVec3::new(11.0, 22.0, 33.0), 1e-9));
    }

    #[test]
    fn test_cylinder_bounding_box_is_exact() {
        let kernel = TruckKernel::new();
        let solid = kernel
            .create_cylinder(DVec3::ZERO, 5.0, 20.0, DVec3::Z)
            .unwrap();
        let bbox = kernel.bounding_box(&solid).unwrap();
        assert!(bbox.min.abs_diff_eq(DVec3::new(-5.0, -5.0, 0.0), 1e-6));
        assert!(bbox.max.abs_diff_eq(DVec3::new(5.0, 5.0, 20.0), 1e-6));
    }

    #[test]
    fn test_transform_rejects_scale() {
        let kernel = TruckKernel::new();
        let solid = kernel.create_box(DVec3::ZERO, DVec3::ONE).unwrap();
        let scaled = DMat4::from_scale(DVec3::splat(2.0));
        assert!(matches!(
            kernel.transform(&solid, &scaled),
            Err(KernelError::InvalidTransform(_))
        ));
        let mirrored = DMat4::from_scale(DVec3::new(-1.0, 1.0, 1.0));
        assert!(kernel.transform(&solid, &mirrored).is_err());
    }

    #[test]
    fn test_transform_rotates_bounding_box() {
        let kernel = TruckKernel::new();
        let solid = kernel
            .create_box(DVec3::ZERO, DVec3::new(10.0, 2.0, 2.0))
            .unwrap();
        let matrix = DMat4::from_rotation_translation(
            DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2),
            DVec3::new(100.0, 0.0, 0.0),
        );
        let moved = kernel.transform(&solid, &matrix).unwrap();
        let bbox = kernel.bounding_box(&moved).unwrap();
        assert!(bbox.min.abs_diff_eq(DVec3::new(98.0, 0.0, 0.0), 1e-9));
        assert!(bbox.max.abs_diff_eq(DVec3::new(100.0, 10.0, 2.0), 1e-9));
        // The source handle is untouched
        let original = kernel.bounding_box(&solid).unwrap();
        assert!(original.max.abs_diff_eq(DVec3::new(10.0, 2.0, 2.0), 1e-9));
    }

    #[test]
    fn test_compose_keeps_component_labels() {
        let kernel = TruckKernel::new();
        let a = kernel.create_box(DVec3::ZERO, DVec3::ONE).unwrap();
        let b = kernel
            .create_cylinder(DVec3::new(5.0, 0.0, 0.0), 1.0, 2.0, DVec3::Z)
            .unwrap();
        let composed = kernel.compose(&[(&a, "base"), (&b, "pin")]).unwrap();

        let components = kernel.components(&composed).unwrap();
        let names: Vec<_> = components.iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec![Some("base".into()), Some("pin".into())]);

        let edges = kernel.get_edges(&composed).unwrap();
        assert_eq!(edges.iter().filter(|e| e.component == 0).count(), 12);
        assert!(edges.iter().filter(|e| e.component == 1).count() >= 3);
        assert!(kernel.compose(&[]).is_err());
    }

    #[test]
    fn test_discretize_circle_edge() {
        let kernel = TruckKernel::new();
        let solid = kernel
            .create_cylinder(DVec3::ZERO, 5.0, 1.0, DVec3::Z)
            .unwrap();
        let edges = kernel.get_edges(&solid).unwrap();
        let circle = edges
            .iter()
            .find(|e| matches!(e.curve, EdgeCurve::Circle(_)))
            .unwrap();
        let EdgeCurve::Circle(arc) = &circle.curve else {
            unreachable!()
        };
        assert_relative_eq!(arc.radius, 5.0, epsilon = 1e-9);

        let points = kernel.discretize_edge(&solid, circle.id, 0.05).unwrap();
        assert!(points.len() > 4);
        assert_eq!(points.first(), Some(&circle.start));
        assert_eq!(points.last(), Some(&circle.end));
        for p in &points {
            assert_relative_eq!(p.truncate().length(), 5.0, epsilon = 1e-6);
        }

        let foreign = EdgeId::new(Uuid::new_v4(), circle.id.index);
        assert!(matches!(
            kernel.discretize_edge(&solid, foreign, 0.05),
            Err(KernelError::EdgeNotFound { .. })
        ));
        assert!(kernel.discretize_edge(&solid, circle.id, 0.0).is_err());
    }

    #[test]
    fn test_fine_deflection_is_capped() {
        let kernel = TruckKernel::new();
        let solid = kernel
            .create_cylinder(DVec3::ZERO, 500.0, 1.0, DVec3::Z)
            .unwrap();
        let edges = kernel.get_edges(&solid).unwrap();
        for edge in edges.iter().filter(|e| matches!(e.curve, EdgeCurve::Circle(_))) {
            let points = kernel.discretize_edge(&solid, edge.id, 1e-9).unwrap();
            assert!(points.len() <= MAX_POLYLINE_POINTS, "{} points", points.len());
            assert_eq!(points.first(), Some(&edge.start));
            assert_eq!(points.last(), Some(&edge.end));
        }
    }

    #[test]
    fn test_step_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.stp");
        let kernel = TruckKernel::new();
        let cube = kernel.create_box(DVec3::ZERO, DVec3::splat(10.0)).unwrap();
        kernel
            .export_step(&cube, &path, &StepExportOptions::default())
            .unwrap();

        let imported = kernel
            .import_step(&path, &StepImportOptions::default())
            .unwrap();
        let bbox = kernel.bounding_box(&imported).unwrap();
        assert!(bbox.abs_diff_eq(
            &BoundingBox::new(DVec3::ZERO, DVec3::splat(10.0)),
            1e-9
        ));
        assert_eq!(kernel.get_edges(&imported).unwrap().len(), 12);
        assert_eq!(kernel.unit(&imported).unwrap(), LengthUnit::Millimeter);
    }

    #[test]
    fn test_import_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = TruckKernel::new();

        let missing = dir.path().join("missing.stp");
        let err = kernel
            .import_step(&missing, &StepImportOptions::default())
            .unwrap_err();
        assert!(matches!(err, KernelError::FileIo(_)));
        assert!(err.to_string().contains("missing.stp"));

        let empty = dir.path().join("empty.stp");
        fs::write(&empty, "").unwrap();
        let err = kernel
            .import_step(&empty, &StepImportOptions::default())
            .unwrap_err();
        assert!(matches!(err, KernelError::StepImport(_)));
        assert!(err.to_string().contains("empty.stp"));
    }

    #[test]
    fn test_huge_knot_multiplicity_fails_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "knots.stp",
            &format!(
                "{}#60=B_SPLINE_CURVE_WITH_KNOTS('',1,(#1,#2),.UNSPECIFIED.,.F.,.F.,\
                 (1000000000000,2),(0.,1.),.UNSPECIFIED.);\n",
                TETRAHEDRON
            ),
        );
        let err = TruckKernel::new()
            .import_step(&path, &StepImportOptions::default())
            .unwrap_err();
        assert!(matches!(err, KernelError::StepImport(_)));
        assert!(err.to_string().contains("knots.stp"));
        assert!(err.to_string().contains("#60"));
    }

    #[test]
    fn test_faceted_tetrahedron_has_line_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "tetra.stp", TETRAHEDRON);
        let kernel = TruckKernel::new();
        let solid = kernel
            .import_step(&path, &StepImportOptions::default())
            .unwrap();

        let components = kernel.components(&solid).unwrap();
        assert_eq!(components[0].name.as_deref(), Some("tetra"));
        let edges = kernel.get_edges(&solid).unwrap();
        assert_eq!(edges.len(), 6);
        assert!(edges.iter().all(|e| e.curve == EdgeCurve::Line));
        let bbox = kernel.bounding_box(&solid).unwrap();
        assert!(bbox.abs_diff_eq(
            &BoundingBox::new(DVec3::ZERO, DVec3::splat(10.0)),
            1e-12
        ));
    }

    #[test]
    fn test_dangling_edge_geometry_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(
            dir.path(),
            "mixed.stp",
            &format!(
                "{}#101=CARTESIAN_POINT('',(20.,0.,0.));
#102=VERTEX_POINT('',#101);
#103=EDGE_CURVE('',#102,#102,#999,.T.);
#104=ORIENTED_EDGE('',*,*,#103,.T.);
#105=EDGE_LOOP('',(#104));
#106=FACE_OUTER_BOUND('',#105,.T.);
#107=ADVANCED_FACE('',(#106),#998,.T.);
#108=CLOSED_SHELL('',(#107));
#109=MANIFOLD_SOLID_BREP('broken',#108);
",
                TETRAHEDRON
            ),
        );
        let kernel = TruckKernel::new();
        let solid = kernel
            .import_step(&path, &StepImportOptions::default())
            .unwrap();
        let edges = kernel.get_edges(&solid).unwrap();
        let unsupported: Vec<_> = edges
            .iter()
            .filter(|e| matches!(e.curve, EdgeCurve::Unsupported(_)))
            .collect();
        assert_eq!(unsupported.len(), 1);
        assert_eq!(unsupported[0].component, 1);
        assert!(kernel.discretize_edge(&solid, unsupported[0].id, 0.1).is_err());
    }

    #[test]
    fn test_release() {
        let kernel = TruckKernel::new();
        let solid = kernel.create_box(DVec3::ZERO, DVec3::ONE).unwrap();
        assert_eq!(kernel.live_count(), 1);
        assert!(kernel.release(solid.id()));
        assert!(!kernel.release(solid.id()));
        assert!(matches!(
            kernel.bounding_box(&solid),
            Err(KernelError::SolidNotFound(_))
        ));
    }
}
