//! Edge evaluation on truck curves: classification, sampling, extents

use std::f64::consts::{PI, TAU};

use glam::DVec3;
use truck_modeling::{BoundedCurve, ParameterDivision1D, ParametricCurve, Point3};
use truck_stepio::r#in::alias::Curve3D;

use crate::kernel::{BoundingBox, CircleArc, EdgeCurve};

/// Upper bound on the points returned for one edge
pub const MAX_POLYLINE_POINTS: usize = 2048;

/// Samples used to recognise lines and circles
const FIT_SAMPLES: usize = 16;

pub(crate) fn dvec(p: Point3) -> DVec3 {
    DVec3::new(p.x, p.y, p.z)
}

pub(crate) fn point(v: DVec3) -> Point3 {
    Point3::new(v.x, v.y, v.z)
}

/// An edge curve oriented from its start vertex to its end vertex
pub(crate) struct TrimmedEdge<'a> {
    curve: &'a Curve3D,
    pub start: DVec3,
    pub end: DVec3,
    /// Parameters at `start` and at `end`; `from > to` for a reversed curve
    from: f64,
    to: f64,
}

impl<'a> TrimmedEdge<'a> {
    pub fn new(curve: &'a Curve3D, start: DVec3, end: DVec3) -> Self {
        let (t0, t1) = curve.range_tuple();
        let front = dvec(curve.subs(t0));
        let reversed = start.distance(end) > 1e-12 && front.distance(end) < front.distance(start);
        let (from, to) = if reversed { (t1, t0) } else { (t0, t1) };
        Self {
            curve,
            start,
            end,
            from,
            to,
        }
    }

    fn at(&self, s: f64) -> DVec3 {
        dvec(self.curve.subs(self.from + (self.to - self.from) * s))
    }

    fn samples(&self, count: usize) -> Vec<DVec3> {
        (0..=count).map(|i| self.at(i as f64 / count as f64)).collect()
    }

    fn is_closed(&self, tolerance: f64) -> bool {
        self.start.distance(self.end) <= tolerance
    }

    pub fn classify(&self) -> EdgeCurve {
        if let Curve3D::Line(_) = self.curve {
            return EdgeCurve::Line;
        }
        let samples = self.samples(FIT_SAMPLES);
        let scale = extent(&samples).max(1e-9);
        let tolerance = 1e-7 * scale;

        if !self.is_closed(tolerance) && collinear(&samples, tolerance) {
            return EdgeCurve::Line;
        }
        if let Some(arc) = fit_circle(&samples, tolerance, self.is_closed(tolerance)) {
            return EdgeCurve::Circle(arc);
        }
        match self.curve {
            Curve3D::Polyline(_) => EdgeCurve::Polyline,
            Curve3D::Conic(_) => EdgeCurve::Ellipse,
            _ => EdgeCurve::BSpline,
        }
    }

    /// Points along the edge within `deflection`, start and end included
    pub fn discretize(&self, deflection: f64) -> Vec<DVec3> {
        let range = (self.from.min(self.to), self.from.max(self.to));
        // finer than this only feeds the resampling below
        let floor = 1e-7 * extent(&self.samples(FIT_SAMPLES));
        let (_, points) = self.curve.parameter_division(range, deflection.max(floor));
        let mut points: Vec<DVec3> = points.into_iter().map(dvec).collect();
        if self.from > self.to {
            points.reverse();
        }

        if points.len() > MAX_POLYLINE_POINTS {
            let last = MAX_POLYLINE_POINTS - 1;
            points = (0..MAX_POLYLINE_POINTS)
                .map(|i| self.at(i as f64 / last as f64))
                .collect();
        }
        if points.len() < 2 {
            points = vec![self.start, self.end];
        }
        if let Some(first) = points.first_mut() {
            *first = self.start;
        }
        if let Some(last) = points.last_mut() {
            *last = self.end;
        }
        points
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut bbox = BoundingBox::from_points([self.start, self.end]);
        match self.classify() {
            EdgeCurve::Line => {}
            EdgeCurve::Circle(arc) => {
                for k in 0..3 {
                    let (x, y) = (arc.x_axis[k], arc.y_axis()[k]);
                    let phase = y.atan2(x);
                    for t in [phase, phase + PI] {
                        let t = arc.start_param + (t - arc.start_param).rem_euclid(TAU);
                        if t <= arc.end_param {
                            bbox.include(arc.point_at(t));
                        }
                    }
                }
            }
            _ => {
                let scale = self.start.distance(self.end).max(extent(&self.samples(FIT_SAMPLES)));
                for p in self.discretize((scale * 1e-4).max(1e-9)) {
                    bbox.include(p);
                }
            }
        }
        bbox
    }
}

fn extent(points: &[DVec3]) -> f64 {
    BoundingBox::from_points(points.iter().copied()).max_dimension()
}

fn collinear(points: &[DVec3], tolerance: f64) -> bool {
    let (Some(&a), Some(&b)) = (points.first(), points.last()) else {
        return false;
    };
    let Some(axis) = (b - a).try_normalize() else {
        return false;
    };
    points
        .iter()
        .all(|p| (*p - a).reject_from_normalized(axis).length() <= tolerance)
}

/// Circle through the samples, oriented along the traversal
fn fit_circle(samples: &[DVec3], tolerance: f64, closed: bool) -> Option<CircleArc> {
    let n = samples.len();
    let (a, b, c) = (samples[0], samples[n / 3], samples[2 * n / 3]);
    let (ab, ac) = (b - a, c - a);
    let normal = ab.cross(ac);
    if normal.length_squared() <= tolerance * tolerance {
        return None;
    }
    let center = a
        + (normal.cross(ab) * ac.length_squared() + ac.cross(normal) * ab.length_squared())
            / (2.0 * normal.length_squared());
    let radius = center.distance(a);

    let area: DVec3 = samples
        .windows(2)
        .map(|w| (w[0] - center).cross(w[1] - center))
        .sum();
    let axis = area.try_normalize()?;
    let fits = samples.iter().all(|p| {
        ((p.distance(center) - radius).abs() <= tolerance)
            && ((*p - center).dot(axis).abs() <= tolerance)
    });
    if !fits {
        return None;
    }

    let x_axis = (a - center) / radius;
    let sweep: f64 = samples
        .windows(2)
        .map(|w| {
            let (u, v) = (w[0] - center, w[1] - center);
            u.cross(v).dot(axis).atan2(u.dot(v))
        })
        .sum();
    let end_param = if closed && sweep > PI { TAU } else { sweep };
    Some(CircleArc {
        center,
        axis,
        x_axis,
        radius,
        start_param: 0.0,
        end_param,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use truck_stepio::r#in::alias::Line;

    fn segment() -> Curve3D {
        Curve3D::Line(Line(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 0.0, 0.0)))
    }

    #[test]
    fn test_line_follows_vertex_order() {
        let curve = segment();
        let edge = TrimmedEdge::new(&curve, DVec3::new(4.0, 0.0, 0.0), DVec3::ZERO);
        assert_eq!(edge.classify(), EdgeCurve::Line);
        let points = edge.discretize(0.1);
        assert_eq!(points.first(), Some(&DVec3::new(4.0, 0.0, 0.0)));
        assert_eq!(points.last(), Some(&DVec3::ZERO));
    }

    #[test]
    fn test_fit_circle_on_half_turn() {
        let samples: Vec<DVec3> = (0..=FIT_SAMPLES)
            .map(|i| {
                let t = PI * i as f64 / FIT_SAMPLES as f64;
                DVec3::new(1.0 + 2.0 * t.cos(), 2.0 * t.sin(), 3.0)
            })
            .collect();
        let arc = fit_circle(&samples, 1e-9, false).unwrap();
        assert!(arc.center.abs_diff_eq(DVec3::new(1.0, 0.0, 3.0), 1e-9));
        assert!(arc.axis.abs_diff_eq(DVec3::Z, 1e-9));
        assert_relative_eq!(arc.radius, 2.0, epsilon = 1e-9);
        assert_relative_eq!(arc.end_param, PI, epsilon = 1e-9);
        assert!(!arc.is_full());
    }

    #[test]
    fn test_fit_circle_rejects_ellipse() {
        let samples: Vec<DVec3> = (0..=FIT_SAMPLES)
            .map(|i| {
                let t = PI * i as f64 / FIT_SAMPLES as f64;
                DVec3::new(3.0 * t.cos(), t.sin(), 0.0)
            })
            .collect();
        assert!(fit_circle(&samples, 1e-7, false).is_none());
    }
}
