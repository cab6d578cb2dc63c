//! Geometry kernel trait definitions
//!
//! These types define the capability surface every geometry backend must
//! provide to the assembler and the flattener.

use std::f64::consts::TAU;
use std::path::Path;

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an edge within a solid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId {
    /// ID of the solid this edge belongs to
    pub solid_id: Uuid,
    /// Index of the edge within the solid
    pub index: u32,
}

impl EdgeId {
    /// Create a new edge ID
    pub fn new(solid_id: Uuid, index: u32) -> Self {
        Self { solid_id, index }
    }
}

/// Length unit declared by a model file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    Millimeter,
    Centimeter,
    Meter,
    Inch,
    Foot,
}

impl LengthUnit {
    /// Size of one unit in millimetres
    pub fn millimeters(self) -> f64 {
        match self {
            LengthUnit::Millimeter => 1.0,
            LengthUnit::Centimeter => 10.0,
            LengthUnit::Meter => 1000.0,
            LengthUnit::Inch => 25.4,
            LengthUnit::Foot => 304.8,
        }
    }

    /// Convert a length expressed in `self` into `target`
    pub fn convert(self, value: f64, target: LengthUnit) -> f64 {
        if self == target {
            value
        } else {
            value * self.millimeters() / target.millimeters()
        }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl BoundingBox {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Inverted box that any `include` call will replace
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.include(p);
        }
        bbox
    }

    pub fn include(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// True when no point has been included
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Finite, non-inverted and not collapsed to a single point
    pub fn is_valid(&self) -> bool {
        !self.is_empty()
            && self.min.is_finite()
            && self.max.is_finite()
            && self.size().max_element() > 0.0
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn max_dimension(&self) -> f64 {
        self.size().max_element()
    }

    pub fn corners(&self) -> [DVec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            DVec3::new(a.x, a.y, a.z),
            DVec3::new(b.x, a.y, a.z),
            DVec3::new(a.x, b.y, a.z),
            DVec3::new(b.x, b.y, a.z),
            DVec3::new(a.x, a.y, b.z),
            DVec3::new(b.x, a.y, b.z),
            DVec3::new(a.x, b.y, b.z),
            DVec3::new(b.x, b.y, b.z),
        ]
    }

    /// Axis-aligned box around the transformed corners
    pub fn transformed(&self, matrix: &DMat4) -> BoundingBox {
        BoundingBox::from_points(self.corners().map(|c| matrix.transform_point3(c)))
    }

    pub fn translated(&self, offset: DVec3) -> BoundingBox {
        BoundingBox {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Grow by `amount` on every side
    pub fn expanded(&self, amount: f64) -> BoundingBox {
        BoundingBox {
            min: self.min - DVec3::splat(amount),
            max: self.max + DVec3::splat(amount),
        }
    }

    /// Volume of the intersection with `other` (zero when touching or apart)
    pub fn overlap_volume(&self, other: &BoundingBox) -> f64 {
        let extent = (self.max.min(other.max) - self.min.max(other.min)).max(DVec3::ZERO);
        extent.x * extent.y * extent.z
    }

    pub fn abs_diff_eq(&self, other: &BoundingBox, tolerance: f64) -> bool {
        self.min.abs_diff_eq(other.min, tolerance) && self.max.abs_diff_eq(other.max, tolerance)
    }
}

/// Circle or circular arc carried by an edge
///
/// The edge covers parameters `start_param..=end_param` (radians, increasing,
/// counter-clockwise about `axis` starting from `x_axis`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircleArc {
    pub center: DVec3,
    pub axis: DVec3,
    pub x_axis: DVec3,
    pub radius: f64,
    pub start_param: f64,
    pub end_param: f64,
}

impl CircleArc {
    pub fn y_axis(&self) -> DVec3 {
        self.axis.cross(self.x_axis)
    }

    pub fn point_at(&self, param: f64) -> DVec3 {
        self.center + self.radius * (param.cos() * self.x_axis + param.sin() * self.y_axis())
    }

    pub fn sweep(&self) -> f64 {
        self.end_param - self.start_param
    }

    pub fn is_full(&self) -> bool {
        self.sweep() >= TAU - 1e-9
    }
}

/// Classification of the curve underlying an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgeCurve {
    Line,
    Circle(CircleArc),
    Ellipse,
    BSpline,
    Polyline,
    /// Curve the kernel cannot evaluate, with its entity name
    Unsupported(String),
}

/// Information about an edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Index of the owning component within the solid
    pub component: usize,
    /// Start point of the edge
    pub start: DVec3,
    /// End point of the edge
    pub end: DVec3,
    pub curve: EdgeCurve,
}

/// One body inside a (possibly composed) solid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub index: usize,
    pub name: Option<String>,
}

/// Error type for geometry kernel operations
#[derive(Debug, Clone, Error)]
pub enum KernelError {
    #[error("Kernel not available: {0}")]
    KernelNotAvailable(String),

    #[error("File I/O error: {0}")]
    FileIo(String),

    #[error("STEP import failed: {0}")]
    StepImport(String),

    #[error("STEP export failed: {0}")]
    StepExport(String),

    #[error("Solid not found: {0}")]
    SolidNotFound(Uuid),

    #[error("Edge {index} not found in solid {solid_id}")]
    EdgeNotFound { solid_id: Uuid, index: u32 },

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    #[error("Composition failed: {0}")]
    Composition(String),

    #[error("Empty geometry: {0}")]
    EmptyGeometry(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Opaque handle to geometry stored inside a kernel
///
/// Handles are not `Clone`: each one has a single owner, which is
/// responsible for releasing it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Solid {
    id: Uuid,
}

impl Solid {
    /// Wrap an id issued by a kernel
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Options for STEP file import
#[derive(Debug, Clone)]
pub struct StepImportOptions {
    /// Accept open shell models (`SHELL_BASED_SURFACE_MODEL`) as components
    pub include_surface_models: bool,
}

impl Default for StepImportOptions {
    fn default() -> Self {
        Self {
            include_surface_models: true,
        }
    }
}

/// Options for STEP file export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepExportOptions {
    /// Author in the STEP header
    pub author: Option<String>,
    /// Organization in the STEP header
    pub organization: Option<String>,
    /// Product name; the file stem is used when unset
    pub product_name: Option<String>,
    /// `FILE_NAME` time stamp, left empty for reproducible output
    pub time_stamp: Option<String>,
}

/// The geometry kernel trait
///
/// Implementations provide the actual geometry operations. All methods take
/// `&self`; backends synchronise their own storage.
pub trait GeometryKernel: Send + Sync {
    /// Get the name of this kernel
    fn name(&self) -> &str;

    /// Check if the kernel is available
    fn is_available(&self) -> bool;

    /// Import a STEP file as one solid with one component per body
    ///
    /// # Arguments
    /// * `path` - Path to the STEP file
    /// * `options` - Import options
    fn import_step(&self, path: &Path, options: &StepImportOptions) -> KernelResult<Solid>;

    /// Export a solid to a STEP file
    ///
    /// # Arguments
    /// * `solid` - The solid to export
    /// * `path` - Output file path
    /// * `options` - Export options
    fn export_step(
        &self,
        solid: &Solid,
        path: &Path,
        options: &StepExportOptions,
    ) -> KernelResult<()>;

    /// Axis-aligned bounding box of a solid
    fn bounding_box(&self, solid: &Solid) -> KernelResult<BoundingBox>;

    /// Length unit of a solid's coordinates
    fn unit(&self, solid: &Solid) -> KernelResult<LengthUnit>;

    /// Apply a rigid transform, producing a new solid
    ///
    /// # Arguments
    /// * `solid` - The solid to transform (left untouched)
    /// * `matrix` - Rotation plus translation, no scale or shear
    fn transform(&self, solid: &Solid, matrix: &DMat4) -> KernelResult<Solid>;

    /// Group solids into one compound without fusing them
    ///
    /// # Arguments
    /// * `items` - Solids with the name given to each of their components
    fn compose(&self, items: &[(&Solid, &str)]) -> KernelResult<Solid>;

    /// Components of a solid in stable order
    fn components(&self, solid: &Solid) -> KernelResult<Vec<ComponentInfo>>;

    /// Get all edges of a solid with their geometric information
    ///
    /// # Arguments
    /// * `solid` - The solid to query
    fn get_edges(&self, solid: &Solid) -> KernelResult<Vec<EdgeInfo>>;

    /// Approximate an edge by a polyline
    ///
    /// # Arguments
    /// * `solid` - The solid owning the edge
    /// * `edge` - Edge to sample
    /// * `deflection` - Maximum chord deviation
    fn discretize_edge(
        &self,
        solid: &Solid,
        edge: EdgeId,
        deflection: f64,
    ) -> KernelResult<Vec<DVec3>>;

    /// Create a box primitive spanning `min..min + size`
    fn create_box(&self, min: DVec3, size: DVec3) -> KernelResult<Solid>;

    /// Create a cylinder primitive standing on `base_center` along `axis`
    fn create_cylinder(
        &self,
        base_center: DVec3,
        radius: f64,
        height: f64,
        axis: DVec3,
    ) -> KernelResult<Solid>;

    /// Drop the geometry behind a handle id; returns whether it existed
    fn release(&self, id: Uuid) -> bool;
}

/// A null kernel that always returns errors (used when no kernel is available)
#[derive(Debug, Default)]
pub struct NullKernel;

fn unavailable<T>() -> KernelResult<T> {
    Err(KernelError::KernelNotAvailable(
        "No geometry kernel available".into(),
    ))
}

impl GeometryKernel for NullKernel {
    fn name(&self) -> &str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn import_step(&self, _path: &Path, _options: &StepImportOptions) -> KernelResult<Solid> {
        Err(KernelError::KernelNotAvailable(
            "No geometry kernel available for STEP import".into(),
        ))
    }

    fn export_step(
        &self,
        _solid: &Solid,
        _path: &Path,
        _options: &StepExportOptions,
    ) -> KernelResult<()> {
        Err(KernelError::KernelNotAvailable(
            "No geometry kernel available for STEP export".into(),
        ))
    }

    fn bounding_box(&self, _solid: &Solid) -> KernelResult<BoundingBox> {
        unavailable()
    }

    fn unit(&self, _solid: &Solid) -> KernelResult<LengthUnit> {
        unavailable()
    }

    fn transform(&self, _solid: &Solid, _matrix: &DMat4) -> KernelResult<Solid> {
        unavailable()
    }

    fn compose(&self, _items: &[(&Solid, &str)]) -> KernelResult<Solid> {
        unavailable()
    }

    fn components(&self, _solid: &Solid) -> KernelResult<Vec<ComponentInfo>> {
        unavailable()
    }

    fn get_edges(&self, _solid: &Solid) -> KernelResult<Vec<EdgeInfo>> {
        unavailable()
    }

    fn discretize_edge(
        &self,
        _solid: &Solid,
        _edge: EdgeId,
        _deflection: f64,
    ) -> KernelResult<Vec<DVec3>> {
        unavailable()
    }

    fn create_box(&self, _min: DVec3, _size: DVec3) -> KernelResult<Solid> {
        unavailable()
    }

    fn create_cylinder(
        &self,
        _base_center: DVec3,
        _radius: f64,
        _height: f64,
        _axis: DVec3,
    ) -> KernelResult<Solid> {
        unavailable()
    }

    fn release(&self, _id: Uuid) -> bool {
        false
    }
}

/// Get the default geometry kernel based on available features
pub fn default_kernel() -> Box<dyn GeometryKernel> {
    #[cfg(feature = "truck")]
    {
        Box::new(super::TruckKernel::new())
    }

    #[cfg(not(feature = "truck"))]
    {
        Box::new(NullKernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DQuat;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(LengthUnit::Meter.convert(0.25, LengthUnit::Millimeter), 250.0);
        assert_eq!(LengthUnit::Inch.convert(1.0, LengthUnit::Millimeter), 25.4);
        assert_eq!(LengthUnit::Millimeter.convert(3.0, LengthUnit::Millimeter), 3.0);
    }

    #[test]
    fn test_bounding_box_validity() {
        assert!(!BoundingBox::empty().is_valid());
        let point = BoundingBox::from_points([DVec3::ONE]);
        assert!(!point.is_valid());
        let sheet = BoundingBox::new(DVec3::ZERO, DVec3::new(5.0, 5.0, 0.0));
        assert!(sheet.is_valid());
        let bad = BoundingBox::new(DVec3::ZERO, DVec3::new(f64::NAN, 1.0, 1.0));
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_overlap_volume() {
        let a = BoundingBox::new(DVec3::ZERO, DVec3::splat(10.0));
        let touching = a.translated(DVec3::new(10.0, 0.0, 0.0));
        let apart = a.translated(DVec3::new(12.0, 0.0, 0.0));
        let inside = a.translated(DVec3::new(5.0, 5.0, 5.0));
        assert_eq!(a.overlap_volume(&touching), 0.0);
        assert_eq!(a.overlap_volume(&apart), 0.0);
        assert_eq!(a.overlap_volume(&inside), 125.0);
    }

    #[test]
    fn test_transformed_box() {
        let a = BoundingBox::new(DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0));
        let m = DMat4::from_rotation_translation(
            DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2),
            DVec3::new(10.0, 0.0, 0.0),
        );
        let t = a.transformed(&m);
        assert!(t.min.abs_diff_eq(DVec3::new(9.0, 0.0, 0.0), 1e-12));
        assert!(t.max.abs_diff_eq(DVec3::new(10.0, 2.0, 1.0), 1e-12));
    }

    #[test]
    fn test_circle_arc_points() {
        let arc = CircleArc {
            center: DVec3::ZERO,
            axis: DVec3::Z,
            x_axis: DVec3::X,
            radius: 2.0,
            start_param: 0.0,
            end_param: TAU,
        };
        assert!(arc.is_full());
        assert!(arc.point_at(std::f64::consts::FRAC_PI_2).abs_diff_eq(DVec3::new(0.0, 2.0, 0.0), 1e-12));
    }

    #[test]
    fn test_null_kernel() {
        let kernel = NullKernel;
        assert!(!kernel.is_available());
        assert!(matches!(
            kernel.create_box(DVec3::ZERO, DVec3::ONE),
            Err(KernelError::KernelNotAvailable(_))
        ));
        assert!(!kernel.release(Uuid::new_v4()));
    }
}
