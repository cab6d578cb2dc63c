//! Orthographic projection of solids onto standard view planes
//!
//! Every boundary edge is projected (wireframe flattening, no hidden-line
//! removal). Circles parallel to the view plane stay exact arcs and circles;
//! other curves go through the kernel's bounded discretization.

mod dedup;

use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

use glam::{DVec2, DVec3};
use sd_kernel::{CircleArc, EdgeCurve, EdgeInfo, GeometryKernel, Solid};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProjectionError;

pub use dedup::deduplicate;

/// Standard orthographic view directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewDirection {
    Top,
    Front,
    Right,
    Back,
    Left,
    Bottom,
}

impl ViewDirection {
    pub const ALL: [ViewDirection; 6] = [
        ViewDirection::Top,
        ViewDirection::Front,
        ViewDirection::Right,
        ViewDirection::Back,
        ViewDirection::Left,
        ViewDirection::Bottom,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ViewDirection::Top => "top",
            ViewDirection::Front => "front",
            ViewDirection::Right => "right",
            ViewDirection::Back => "back",
            ViewDirection::Left => "left",
            ViewDirection::Bottom => "bottom",
        }
    }

    /// In-plane axes `(u, v)` of the drawing frame
    pub fn frame(&self) -> (DVec3, DVec3) {
        match self {
            ViewDirection::Top => (DVec3::X, DVec3::Y),
            ViewDirection::Bottom => (DVec3::X, DVec3::NEG_Y),
            ViewDirection::Front => (DVec3::X, DVec3::Z),
            ViewDirection::Back => (DVec3::NEG_X, DVec3::Z),
            ViewDirection::Right => (DVec3::Y, DVec3::Z),
            ViewDirection::Left => (DVec3::NEG_Y, DVec3::Z),
        }
    }

    /// Direction towards the viewer, `u × v`
    pub fn normal(&self) -> DVec3 {
        let (u, v) = self.frame();
        u.cross(v)
    }

    /// 2D drawing coordinates of a model point
    pub fn project(&self, point: DVec3) -> DVec2 {
        let (u, v) = self.frame();
        DVec2::new(point.dot(u), point.dot(v))
    }
}

impl fmt::Display for ViewDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ViewDirection {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ViewDirection::ALL
            .into_iter()
            .find(|v| v.name() == wanted)
            .ok_or_else(|| ProjectionError::InvalidDirection(s.to_string()))
    }
}

/// 2D geometry in a view's drawing frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Geometry2D {
    Line {
        start: DVec2,
        end: DVec2,
    },
    /// Counter-clockwise from `start_angle` to `end_angle` (radians)
    Arc {
        center: DVec2,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    Circle {
        center: DVec2,
        radius: f64,
    },
}

impl Geometry2D {
    pub fn translated(&self, offset: DVec2) -> Geometry2D {
        match *self {
            Geometry2D::Line { start, end } => Geometry2D::Line {
                start: start + offset,
                end: end + offset,
            },
            Geometry2D::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => Geometry2D::Arc {
                center: center + offset,
                radius,
                start_angle,
                end_angle,
            },
            Geometry2D::Circle { center, radius } => Geometry2D::Circle {
                center: center + offset,
                radius,
            },
        }
    }

    /// Counter-clockwise sweep of an arc in `(0, 2π]`
    pub fn sweep(start_angle: f64, end_angle: f64) -> f64 {
        let sweep = (end_angle - start_angle).rem_euclid(TAU);
        if sweep == 0.0 { TAU } else { sweep }
    }
}

/// A projected primitive and the compound component it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedPrimitive {
    pub geometry: Geometry2D,
    pub component: usize,
}

/// Result of projecting one solid along one view direction
#[derive(Debug, Clone)]
pub struct ProjectionView {
    pub direction: ViewDirection,
    pub primitives: Vec<ProjectedPrimitive>,
    /// Malformed or unsupported edges left out
    pub skipped_edges: usize,
    /// Edges seen end-on or otherwise reduced to a point
    pub collapsed_edges: usize,
}

/// Edge-by-edge projector
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    /// Maximum chord deviation for approximated curves
    pub curve_tolerance: f64,
    /// Distance under which geometry is considered coincident
    pub dedup_tolerance: f64,
}

impl Default for Projector {
    fn default() -> Self {
        Self {
            curve_tolerance: 0.5,
            dedup_tolerance: 1e-6,
        }
    }
}

enum EdgeOutcome {
    Primitives(Vec<Geometry2D>),
    Collapsed,
    Skipped(String),
}

impl Projector {
    pub fn new(curve_tolerance: f64, dedup_tolerance: f64) -> Self {
        Self {
            curve_tolerance,
            dedup_tolerance,
        }
    }

    /// Project every edge of `solid` onto the plane of `direction`
    pub fn project(
        &self,
        kernel: &dyn GeometryKernel,
        solid: &Solid,
        direction: ViewDirection,
    ) -> Result<ProjectionView, ProjectionError> {
        let edges = kernel
            .get_edges(solid)
            .map_err(|e| ProjectionError::Kernel(e.to_string()))?;

        let mut primitives = Vec::new();
        let mut skipped_edges = 0;
        let mut collapsed_edges = 0;

        for edge in &edges {
            match self.project_edge(kernel, solid, edge, direction) {
                EdgeOutcome::Primitives(geometry) => {
                    primitives.extend(geometry.into_iter().map(|geometry| ProjectedPrimitive {
                        geometry,
                        component: edge.component,
                    }))
                }
                EdgeOutcome::Collapsed => collapsed_edges += 1,
                EdgeOutcome::Skipped(reason) => {
                    debug!("Skipping edge {}: {}", edge.id.index, reason);
                    skipped_edges += 1;
                }
            }
        }

        let projected = primitives.len();
        let primitives = deduplicate(primitives, self.dedup_tolerance);
        if skipped_edges > 0 {
            warn!(
                "{} view: skipped {} of {} edge(s)",
                direction,
                skipped_edges,
                edges.len()
            );
        }
        debug!(
            "{} view: {} edge(s) -> {} primitive(s), {} after merging, {} collapsed",
            direction,
            edges.len(),
            projected,
            primitives.len(),
            collapsed_edges
        );

        Ok(ProjectionView {
            direction,
            primitives,
            skipped_edges,
            collapsed_edges,
        })
    }

    fn project_edge(
        &self,
        kernel: &dyn GeometryKernel,
        solid: &Solid,
        edge: &EdgeInfo,
        direction: ViewDirection,
    ) -> EdgeOutcome {
        match &edge.curve {
            EdgeCurve::Line => {
                let start = direction.project(edge.start);
                let end = direction.project(edge.end);
                self.line(start, end)
            }
            EdgeCurve::Circle(arc) if self.faces_viewer(arc, direction) => {
                self.circle(arc, direction)
            }
            EdgeCurve::Circle(arc) if arc.axis.dot(direction.normal()).abs() <= 1e-9 => {
                self.edge_on_circle(arc, direction)
            }
            EdgeCurve::Unsupported(entity) => {
                EdgeOutcome::Skipped(format!("unsupported curve {}", entity))
            }
            EdgeCurve::Circle(_) | EdgeCurve::Ellipse | EdgeCurve::BSpline | EdgeCurve::Polyline => {
                match kernel.discretize_edge(solid, edge.id, self.curve_tolerance) {
                    Ok(points) => self.polyline(&points, direction),
                    Err(e) => EdgeOutcome::Skipped(e.to_string()),
                }
            }
        }
    }

    fn line(&self, start: DVec2, end: DVec2) -> EdgeOutcome {
        if !start.is_finite() || !end.is_finite() {
            return EdgeOutcome::Skipped("non-finite coordinates".into());
        }
        if start.distance(end) <= self.dedup_tolerance {
            return EdgeOutcome::Collapsed;
        }
        EdgeOutcome::Primitives(vec![Geometry2D::Line { start, end }])
    }

    fn faces_viewer(&self, arc: &CircleArc, direction: ViewDirection) -> bool {
        arc.axis.dot(direction.normal()).abs() >= 1.0 - 1e-9
    }

    fn circle(&self, arc: &CircleArc, direction: ViewDirection) -> EdgeOutcome {
        let center = direction.project(arc.center);
        if !(arc.radius > self.dedup_tolerance && arc.radius.is_finite()) {
            return EdgeOutcome::Collapsed;
        }
        if arc.is_full() {
            return EdgeOutcome::Primitives(vec![Geometry2D::Circle {
                center,
                radius: arc.radius,
            }]);
        }

        let angle_of = |param: f64| {
            let d = direction.project(arc.point_at(param)) - center;
            d.y.atan2(d.x).rem_euclid(TAU)
        };
        let (from, to) = (angle_of(arc.start_param), angle_of(arc.end_param));
        // Counter-clockwise about the axis looks clockwise when it points away
        let (start_angle, end_angle) = if arc.axis.dot(direction.normal()) > 0.0 {
            (from, to)
        } else {
            (to, from)
        };
        EdgeOutcome::Primitives(vec![Geometry2D::Arc {
            center,
            radius: arc.radius,
            start_angle,
            end_angle,
        }])
    }

    /// A circle whose plane contains the view normal projects to a segment
    fn edge_on_circle(&self, arc: &CircleArc, direction: ViewDirection) -> EdgeOutcome {
        let Some(along) = arc.axis.cross(direction.normal()).try_normalize() else {
            return EdgeOutcome::Skipped("degenerate circle axis".into());
        };
        let (a, b) = (arc.x_axis.dot(along), arc.y_axis().dot(along));
        let offset = |t: f64| arc.radius * (a * t.cos() + b * t.sin());

        let (lo, hi) = if arc.is_full() {
            (-arc.radius, arc.radius)
        } else {
            let mut candidates = vec![offset(arc.start_param), offset(arc.end_param)];
            let peak = b.atan2(a);
            for t in [peak, peak + std::f64::consts::PI] {
                let t = arc.start_param + (t - arc.start_param).rem_euclid(TAU);
                if t <= arc.end_param {
                    candidates.push(offset(t));
                }
            }
            candidates
                .into_iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                    (lo.min(s), hi.max(s))
                })
        };

        let center = direction.project(arc.center);
        let axis = direction.project(along);
        self.line(center + axis * lo, center + axis * hi)
    }

    fn polyline(&self, points: &[DVec3], direction: ViewDirection) -> EdgeOutcome {
        let mut projected: Vec<DVec2> = Vec::with_capacity(points.len());
        for p in points.iter().map(|p| direction.project(*p)) {
            if !p.is_finite() {
                return EdgeOutcome::Skipped("non-finite coordinates".into());
            }
            if projected
                .last()
                .is_none_or(|last| last.distance(p) > self.dedup_tolerance)
            {
                projected.push(p);
            }
        }
        if projected.len() < 2 {
            return EdgeOutcome::Collapsed;
        }

        if let Some((start, end)) = collinear_extent(&projected, self.dedup_tolerance) {
            return self.line(start, end);
        }

        EdgeOutcome::Primitives(
            projected
                .windows(2)
                .map(|w| Geometry2D::Line {
                    start: w[0],
                    end: w[1],
                })
                .collect(),
        )
    }
}

/// Extreme points of `points` when they all lie on one line
fn collinear_extent(points: &[DVec2], tolerance: f64) -> Option<(DVec2, DVec2)> {
    let origin = points[0];
    let far = points
        .iter()
        .copied()
        .max_by(|a, b| a.distance_squared(origin).total_cmp(&b.distance_squared(origin)))?;
    let axis = (far - origin).try_normalize()?;
    let normal = axis.perp();

    if points.iter().any(|p| (*p - origin).dot(normal).abs() > tolerance) {
        return None;
    }
    let params = points.iter().map(|p| (*p - origin).dot(axis));
    let (lo, hi) = params.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
        (lo.min(t), hi.max(t))
    });
    Some((origin + axis * lo, origin + axis * hi))
}
