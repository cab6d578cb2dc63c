//! Box and cylinder primitives built with truck sweeps

use std::f64::consts::TAU;

use glam::DVec3;
use truck_modeling::{Solid as TruckSolid, Vector3, builder};
use truck_stepio::out::{CompleteStepDisplay, StepHeaderDescriptor, StepModel};

use super::body::Body;
use super::edges::point;
use crate::kernel::{KernelError, KernelResult, StepImportOptions};

fn vector(v: DVec3) -> Vector3 {
    Vector3::new(v.x, v.y, v.z)
}

/// Convert a modelled solid into body storage, naming its one component
fn into_body(solid: &TruckSolid, name: &str) -> KernelResult<Body> {
    let compressed = solid.compress();
    let text = CompleteStepDisplay::new(
        StepModel::from(&compressed),
        StepHeaderDescriptor {
            organization_system: "StepDraft".to_owned(),
            ..Default::default()
        },
    )
    .to_string();
    let mut body = Body::from_step_text(&text, &StepImportOptions::default())?;
    for component in &mut body.components {
        component.name = Some(name.to_string());
    }
    Ok(body)
}

/// Axis-aligned box with its minimum corner at `min`
pub(crate) fn box_body(min: DVec3, size: DVec3) -> KernelResult<Body> {
    if !min.is_finite() || !size.is_finite() || size.min_element() <= 0.0 {
        return Err(KernelError::OperationFailed(format!(
            "box size must be positive, got {:?}",
            size
        )));
    }

    let vertex = builder::vertex(point(min));
    let edge = builder::tsweep(&vertex, Vector3::new(size.x, 0.0, 0.0));
    let face = builder::tsweep(&edge, Vector3::new(0.0, size.y, 0.0));
    let solid = builder::tsweep(&face, Vector3::new(0.0, 0.0, size.z));
    into_body(&solid, "box")
}

/// Right circular cylinder standing on `base_center` along `axis`
pub(crate) fn cylinder_body(
    base_center: DVec3,
    radius: f64,
    height: f64,
    axis: DVec3,
) -> KernelResult<Body> {
    let axis = axis
        .try_normalize()
        .ok_or_else(|| KernelError::OperationFailed("cylinder axis is zero".into()))?;
    let positive = |v: f64| v > 0.0 && v.is_finite();
    if !base_center.is_finite() || !positive(radius) || !positive(height) {
        return Err(KernelError::OperationFailed(format!(
            "cylinder radius and height must be positive, got {} and {}",
            radius, height
        )));
    }

    let up = if axis.z.abs() < 0.9 { DVec3::Z } else { DVec3::X };
    let x_axis = axis.cross(up).normalize();

    let vertex = builder::vertex(point(base_center + x_axis * radius));
    let circle = builder::rsweep(
        &vertex,
        point(base_center),
        vector(axis),
        truck_modeling::Rad(TAU),
    );
    let disk = builder::try_attach_plane(&[circle])
        .map_err(|e| KernelError::OperationFailed(format!("Failed to create face: {:?}", e)))?;
    let solid = builder::tsweep(&disk, vector(axis * height));
    into_body(&solid, "cylinder")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::EdgeCurve;

    #[test]
    fn test_box_topology() {
        let body = box_body(DVec3::ZERO, DVec3::splat(10.0)).unwrap();
        assert_eq!(body.edges.len(), 12);
        let faces: usize = body.components[0]
            .shells
            .iter()
            .map(|s| s.faces.len())
            .sum();
        assert_eq!(faces, 6);
        assert_eq!(body.components[0].name.as_deref(), Some("box"));
    }

    #[test]
    fn test_box_rejects_degenerate_size() {
        assert!(box_body(DVec3::ZERO, DVec3::new(1.0, 0.0, 1.0)).is_err());
        assert!(box_body(DVec3::ZERO, DVec3::new(1.0, f64::NAN, 1.0)).is_err());
    }

    #[test]
    fn test_cylinder_edges_are_circles_and_seams() {
        let body = cylinder_body(DVec3::ZERO, 5.0, 20.0, DVec3::Z).unwrap();
        let curves: Vec<EdgeCurve> = body
            .edges
            .iter()
            .filter_map(|&e| body.resolve(e).ok())
            .map(|e| e.classify())
            .collect();
        assert_eq!(curves.len(), body.edges.len());
        assert!(curves.iter().all(|c| matches!(c, EdgeCurve::Line | EdgeCurve::Circle(_))));
        let swept: f64 = curves
            .iter()
            .filter_map(|c| match c {
                EdgeCurve::Circle(arc) => Some(arc.sweep()),
                _ => None,
            })
            .sum();
        // top and bottom rims
        assert!((swept - 2.0 * TAU).abs() < 1e-6, "swept {}", swept);
        assert!(cylinder_body(DVec3::ZERO, 5.0, 20.0, DVec3::ZERO).is_err());
        assert!(cylinder_body(DVec3::ZERO, -1.0, 20.0, DVec3::Z).is_err());
    }
}
