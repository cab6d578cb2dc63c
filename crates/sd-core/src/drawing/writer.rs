//! DXF serialisation

use std::fs;
use std::path::{Path, PathBuf};

use dxf::entities::{Arc as DArc, Circle as DCircle, Entity as DEntity, EntityType, Line as DLine};
use dxf::enums::{AcadVersion, Units};
use dxf::tables::Layer as DLayer;
use dxf::{Color, Drawing as DxfDrawing, Point as DPoint};
use glam::DVec2;
use sd_kernel::LengthUnit;
use tracing::info;

use super::{Drawing, UNASSIGNED_LAYER};
use crate::error::ConversionError;
use crate::projection::Geometry2D;

/// ACI colours handed out to part layers in turn
const LAYER_COLORS: [u8; 6] = [1, 2, 3, 4, 5, 6];
const UNASSIGNED_COLOR: u8 = 8;

#[inline]
fn dpoint(p: DVec2) -> DPoint {
    DPoint {
        x: p.x,
        y: p.y,
        z: 0.0,
    }
}

fn insunits(unit: LengthUnit) -> Units {
    match unit {
        LengthUnit::Millimeter => Units::Millimeters,
        LengthUnit::Centimeter => Units::Centimeters,
        LengthUnit::Meter => Units::Meters,
        LengthUnit::Inch => Units::Inches,
        LengthUnit::Foot => Units::Feet,
    }
}

fn degrees(radians: f64) -> f64 {
    radians.to_degrees().rem_euclid(360.0)
}

fn entity(geometry: &Geometry2D) -> EntityType {
    match *geometry {
        Geometry2D::Line { start, end } => EntityType::Line(DLine::new(dpoint(start), dpoint(end))),
        Geometry2D::Arc {
            center,
            radius,
            start_angle,
            end_angle,
        } => EntityType::Arc(DArc::new(
            dpoint(center),
            radius,
            degrees(start_angle),
            degrees(end_angle),
        )),
        Geometry2D::Circle { center, radius } => {
            EntityType::Circle(DCircle::new(dpoint(center), radius))
        }
    }
}

/// Build the in-memory DXF document
pub fn to_dxf_drawing(drawing: &Drawing) -> DxfDrawing {
    let mut dxf = DxfDrawing::new();
    dxf.header.version = AcadVersion::R2013;
    dxf.header.default_drawing_units = insunits(drawing.unit);

    let mut colors = LAYER_COLORS.iter().cycle();
    for name in &drawing.layers {
        let index = if name == UNASSIGNED_LAYER {
            UNASSIGNED_COLOR
        } else {
            colors.next().copied().unwrap_or(7)
        };
        dxf.add_layer(DLayer {
            name: name.clone(),
            color: Color::from_index(index),
            ..Default::default()
        });
    }

    for primitive in &drawing.primitives {
        let mut e = DEntity::new(entity(&primitive.geometry));
        e.common.layer = primitive.layer.clone();
        dxf.add_entity(e);
    }
    dxf
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `drawing` to `path`
///
/// The file is written next to its destination and renamed into place, so a
/// failed write never leaves a truncated drawing behind.
pub fn write_dxf(drawing: &Drawing, path: &Path) -> Result<(), ConversionError> {
    let failed = |reason: String| ConversionError::Serialization {
        path: path.to_path_buf(),
        reason,
    };

    let dxf = to_dxf_drawing(drawing);
    let temp = temp_sibling(path);
    let written = dxf
        .save_file(&temp)
        .map_err(|e| e.to_string())
        .and_then(|_| fs::rename(&temp, path).map_err(|e| e.to_string()));
    if let Err(reason) = written {
        let _ = fs::remove_file(&temp);
        return Err(failed(reason));
    }

    info!(
        "Wrote {} ({} layer(s), {} entities)",
        path.display(),
        drawing.layers.len(),
        drawing.primitives.len()
    );
    Ok(())
}
