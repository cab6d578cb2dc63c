//! Merging of coincident projected geometry

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::TAU;

use glam::DVec2;

use super::{Geometry2D, ProjectedPrimitive};

/// Buckets points on a grid of `tolerance`-sized cells
struct SpatialHash {
    cell: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl SpatialHash {
    fn new(tolerance: f64) -> Self {
        Self {
            cell: tolerance.max(1e-12),
            buckets: HashMap::new(),
        }
    }

    fn key(&self, p: DVec2) -> (i64, i64) {
        (
            (p.x / self.cell).floor() as i64,
            (p.y / self.cell).floor() as i64,
        )
    }

    fn insert(&mut self, p: DVec2, index: usize) {
        self.buckets.entry(self.key(p)).or_default().push(index);
    }

    /// Indices stored in the 3×3 block of cells around `p`
    fn near(&self, p: DVec2) -> impl Iterator<Item = usize> + '_ {
        let (kx, ky) = self.key(p);
        (-1..=1)
            .flat_map(move |dx| (-1..=1).map(move |dy| (kx.saturating_add(dx), ky.saturating_add(dy))))
            .filter_map(|k| self.buckets.get(&k))
            .flatten()
            .copied()
    }
}

/// Endpoints ordered so that a line and its reverse compare equal
fn canonical(start: DVec2, end: DVec2) -> (DVec2, DVec2) {
    if (start.x, start.y) <= (end.x, end.y) {
        (start, end)
    } else {
        (end, start)
    }
}

/// A circle carrying the arcs that lie on it
struct CircleGroup {
    center: DVec2,
    radius: f64,
    full: bool,
    /// `(start, end)` with `start` in `[0, 2π)` and `end > start`
    spans: Vec<(f64, f64)>,
}

impl CircleGroup {
    fn into_geometry(self, tolerance: f64) -> Vec<Geometry2D> {
        let circle = Geometry2D::Circle {
            center: self.center,
            radius: self.radius,
        };
        if self.full {
            return vec![circle];
        }

        let angular = tolerance / self.radius;
        let mut spans = self.spans;
        spans.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        let mut merged = merge_spans(spans, angular);

        // a span running past 2π continues at the front of the turn
        while merged.len() > 1 {
            let first = merged[0];
            let last = merged[merged.len() - 1];
            if last.1 < first.0 + TAU - angular {
                break;
            }
            merged.pop();
            merged[0] = (last.0 - TAU, first.1.max(last.1 - TAU));
            merged = merge_spans(merged, angular);
        }

        if merged.iter().any(|(s, e)| e - s >= TAU - angular) {
            return vec![circle];
        }
        merged
            .into_iter()
            .map(|(start, end)| Geometry2D::Arc {
                center: self.center,
                radius: self.radius,
                start_angle: start.rem_euclid(TAU),
                end_angle: end.rem_euclid(TAU),
            })
            .collect()
    }
}

/// Join overlapping spans of a list sorted by start angle
fn merge_spans(spans: Vec<(f64, f64)>, angular: f64) -> Vec<(f64, f64)> {
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 + angular => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn merge_component(geometry: Vec<Geometry2D>, tolerance: f64) -> Vec<Geometry2D> {
    let mut lines: Vec<(DVec2, DVec2)> = Vec::new();
    let mut line_index = SpatialHash::new(tolerance);
    let mut circles: Vec<CircleGroup> = Vec::new();
    let mut circle_index = SpatialHash::new(tolerance);

    let mut group_for = |circles: &mut Vec<CircleGroup>, center: DVec2, radius: f64| {
        let existing = circle_index.near(center).find(|&i| {
            circles[i].center.distance(center) <= tolerance
                && (circles[i].radius - radius).abs() <= tolerance
        });
        existing.unwrap_or_else(|| {
            circles.push(CircleGroup {
                center,
                radius,
                full: false,
                spans: Vec::new(),
            });
            circle_index.insert(center, circles.len() - 1);
            circles.len() - 1
        })
    };

    for item in geometry {
        match item {
            Geometry2D::Line { start, end } => {
                let (a, b) = canonical(start, end);
                let close = |p: DVec2, q: DVec2| p.distance(q) <= tolerance;
                let duplicate = line_index.near(a).any(|i| {
                    let (c, d) = lines[i];
                    (close(a, c) && close(b, d)) || (close(a, d) && close(b, c))
                });
                if !duplicate {
                    // indexed by both ends, canonical order can flip within tolerance
                    line_index.insert(a, lines.len());
                    line_index.insert(b, lines.len());
                    lines.push((a, b));
                }
            }
            Geometry2D::Circle { center, radius } => {
                let group = group_for(&mut circles, center, radius);
                circles[group].full = true;
            }
            Geometry2D::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                let group = group_for(&mut circles, center, radius);
                let start = start_angle.rem_euclid(TAU);
                let end = start + Geometry2D::sweep(start_angle, end_angle);
                circles[group].spans.push((start, end));
            }
        }
    }

    let mut merged: Vec<Geometry2D> = lines
        .into_iter()
        .map(|(start, end)| Geometry2D::Line { start, end })
        .collect();
    for group in circles {
        merged.extend(group.into_geometry(tolerance));
    }
    merged
}

/// Merge coincident primitives within each source component
///
/// Lines match in either orientation; arcs on a common circle are joined and
/// become a circle once they cover the full turn.
pub fn deduplicate(
    primitives: Vec<ProjectedPrimitive>,
    tolerance: f64,
) -> Vec<ProjectedPrimitive> {
    let mut by_component: BTreeMap<usize, Vec<Geometry2D>> = BTreeMap::new();
    for primitive in primitives {
        by_component
            .entry(primitive.component)
            .or_default()
            .push(primitive.geometry);
    }

    by_component
        .into_iter()
        .flat_map(|(component, geometry)| {
            merge_component(geometry, tolerance)
                .into_iter()
                .map(move |geometry| ProjectedPrimitive {
                    geometry,
                    component,
                })
        })
        .collect()
}
