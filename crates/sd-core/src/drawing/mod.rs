//! 2D drawings built from projection views
//!
//! Each projected primitive is tagged with the layer of the part it came
//! from. Views are laid side by side along X so one drawing holds them all.

mod layers;
mod writer;

use std::fmt;

use glam::DVec2;
use sd_kernel::{BoundingBox, LengthUnit};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::projection::{Geometry2D, ProjectionView, ViewDirection};

pub use layers::{SourceManifest, UNASSIGNED_LAYER, derive_layer_names, sanitize_layer_name};
pub use writer::{to_dxf_drawing, write_dxf};

/// Spacing used when the model has no extent
const FALLBACK_VIEW_SPACING: f64 = 100.0;

/// Visibility class of a primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    /// Wireframe flattening shows every boundary edge
    #[default]
    Visible,
}

/// One typed entity of a drawing
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingPrimitive {
    pub geometry: Geometry2D,
    pub layer: String,
    pub view: ViewDirection,
    pub visibility: Visibility,
}

/// Conditions the caller should know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawingWarning {
    /// Malformed or unsupported edges left out of a view
    SkippedEdges { view: ViewDirection, count: usize },
    /// Primitives whose source part could not be traced
    Unassigned { count: usize },
}

impl fmt::Display for DrawingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawingWarning::SkippedEdges { view, count } => {
                write!(f, "{} edge(s) skipped in the {} view", count, view)
            }
            DrawingWarning::Unassigned { count } => write!(
                f,
                "{} primitive(s) placed on the {} layer",
                count, UNASSIGNED_LAYER
            ),
        }
    }
}

/// A finished drawing, ready to serialise
#[derive(Debug, Clone)]
pub struct Drawing {
    /// Part layers in manifest order, then the unassigned layer
    pub layers: Vec<String>,
    pub primitives: Vec<DrawingPrimitive>,
    /// Unit of every coordinate
    pub unit: LengthUnit,
    pub warnings: Vec<DrawingWarning>,
}

impl Drawing {
    pub fn primitives_on<'a>(&'a self, layer: &'a str) -> impl Iterator<Item = &'a DrawingPrimitive> {
        self.primitives.iter().filter(move |p| p.layer == layer)
    }

    pub fn primitives_in(&self, view: ViewDirection) -> impl Iterator<Item = &DrawingPrimitive> {
        self.primitives.iter().filter(move |p| p.view == view)
    }
}

/// Lays out views and assigns layers
#[derive(Debug, Clone, Copy)]
pub struct DrawingBuilder {
    /// Distance between view centres as a multiple of the largest model extent
    pub view_spacing: f64,
}

impl Default for DrawingBuilder {
    fn default() -> Self {
        Self { view_spacing: 1.5 }
    }
}

impl DrawingBuilder {
    pub fn new(view_spacing: f64) -> Self {
        Self { view_spacing }
    }

    /// Translation that places view number `index`
    ///
    /// The model centre of every view lands on `(index × spacing, 0)`.
    pub fn view_offset(&self, index: usize, direction: ViewDirection, model_bbox: &BoundingBox) -> DVec2 {
        let spacing = model_bbox.max_dimension() * self.view_spacing;
        let spacing = if spacing.is_finite() && spacing > 0.0 {
            spacing
        } else {
            FALLBACK_VIEW_SPACING
        };
        let center = if model_bbox.is_empty() {
            DVec2::ZERO
        } else {
            direction.project(model_bbox.center())
        };
        DVec2::new(index as f64 * spacing, 0.0) - center
    }

    /// Combine `views` into one drawing
    pub fn build(
        &self,
        views: &[ProjectionView],
        manifest: &SourceManifest,
        model_bbox: &BoundingBox,
        unit: LengthUnit,
    ) -> Drawing {
        let mut primitives = Vec::new();
        let mut warnings = Vec::new();
        let mut unassigned = 0;

        for (index, view) in views.iter().enumerate() {
            let offset = self.view_offset(index, view.direction, model_bbox);
            for primitive in &view.primitives {
                let layer = match manifest.layer_for(primitive.component) {
                    Some(layer) => layer,
                    None => {
                        unassigned += 1;
                        UNASSIGNED_LAYER
                    }
                };
                primitives.push(DrawingPrimitive {
                    geometry: primitive.geometry.translated(offset),
                    layer: layer.to_string(),
                    view: view.direction,
                    visibility: Visibility::Visible,
                });
            }
            if view.skipped_edges > 0 {
                warnings.push(DrawingWarning::SkippedEdges {
                    view: view.direction,
                    count: view.skipped_edges,
                });
            }
            debug!(
                "{} view placed at {:?} with {} primitive(s)",
                view.direction,
                offset,
                view.primitives.len()
            );
        }

        if unassigned > 0 {
            warn!(
                "{} primitive(s) could not be traced to a part and go to {}",
                unassigned, UNASSIGNED_LAYER
            );
            warnings.push(DrawingWarning::Unassigned { count: unassigned });
        }

        let mut layers = manifest.layers().to_vec();
        layers.push(UNASSIGNED_LAYER.to_string());
        Drawing {
            layers,
            primitives,
            unit,
            warnings,
        }
    }
}
