//! Placement planning
//!
//! Computes one rigid placement per part so that no two placed bounding
//! boxes intersect. Automatic placement walks a row-major grid in the XY
//! plane; explicit coordinates override it per part.

use glam::{DMat4, DQuat, DVec3, EulerRot};
use serde::{Deserialize, Serialize};
use sd_kernel::BoundingBox;
use tracing::debug;

use crate::error::{GeometryError, LayoutError};

/// A rigid transform: rotation about the model origin, then translation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub rotation: DQuat,
    pub translation: DVec3,
}

impl Default for Placement {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Placement {
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    pub fn new(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_translation(translation: DVec3) -> Self {
        Self::new(DQuat::IDENTITY, translation)
    }

    pub fn matrix(&self) -> DMat4 {
        DMat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// Axis-aligned box of `bbox` after this placement
    pub fn apply_to_box(&self, bbox: &BoundingBox) -> BoundingBox {
        bbox.transformed(&self.matrix())
    }
}

/// Rotation from X, Y, Z Euler angles in radians
pub fn rotation_from_euler_xyz(angles: [f64; 3]) -> DQuat {
    DQuat::from_euler(EulerRot::XYZ, angles[0], angles[1], angles[2])
}

/// Grid cell sizing strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStrategy {
    /// Largest extent seen so far plus the margin
    Auto,
    /// Constant cell pitch
    Fixed { size: f64 },
}

/// Layout policy for automatic placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutPolicy {
    /// Clearance kept between neighbouring boxes
    pub margin: f64,
    pub cell: CellStrategy,
    /// Grid columns; `ceil(sqrt(n))` when unset
    pub columns: Option<usize>,
    /// Fail when two explicit placements overlap
    pub reject_explicit_overlap: bool,
}

impl Default for LayoutPolicy {
    fn default() -> Self {
        Self {
            margin: 10.0,
            cell: CellStrategy::Auto,
            columns: None,
            reject_explicit_overlap: true,
        }
    }
}

impl LayoutPolicy {
    pub fn validate(&self) -> Result<(), LayoutError> {
        if !(self.margin >= 0.0 && self.margin.is_finite()) {
            return Err(LayoutError::InvalidPolicy(format!(
                "margin must be a non-negative length, got {}",
                self.margin
            )));
        }
        if let CellStrategy::Fixed { size } = self.cell {
            if !(size > 0.0 && size.is_finite()) {
                return Err(LayoutError::InvalidPolicy(format!(
                    "fixed cell size must be positive, got {}",
                    size
                )));
            }
        }
        if self.columns == Some(0) {
            return Err(LayoutError::InvalidPolicy("columns must be at least 1".into()));
        }
        Ok(())
    }
}

/// Per-part placement wishes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlacementRequest {
    /// Applied to the part whether it is placed explicitly or by the grid
    pub rotation: DQuat,
    /// Explicit translation in the part's model unit
    pub position: Option<DVec3>,
}

/// One part as seen by the planner
#[derive(Debug, Clone)]
pub struct LayoutItem {
    pub label: String,
    /// Untransformed bounding box
    pub bbox: BoundingBox,
    pub request: PlacementRequest,
}

impl LayoutItem {
    pub fn new(label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            bbox,
            request: PlacementRequest::default(),
        }
    }

    pub fn with_request(mut self, request: PlacementRequest) -> Self {
        self.request = request;
        self
    }
}

/// Deterministic grid planner
#[derive(Debug, Clone, Default)]
pub struct PlacementPlanner {
    policy: LayoutPolicy,
}

impl PlacementPlanner {
    pub fn new(policy: LayoutPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LayoutPolicy {
        &self.policy
    }

    /// Compute one placement per item, in input order
    pub fn plan(&self, items: &[LayoutItem]) -> Result<Vec<Placement>, LayoutError> {
        self.policy.validate()?;
        if items.is_empty() {
            return Err(LayoutError::Empty);
        }
        for item in items {
            if !item.bbox.is_valid() {
                return Err(GeometryError {
                    part: item.label.clone(),
                    reason: "bounding box is empty or degenerate".into(),
                }
                .into());
            }
        }

        let mut placements: Vec<Option<Placement>> = vec![None; items.len()];
        let mut explicit_boxes: Vec<(usize, BoundingBox)> = Vec::new();

        for (index, item) in items.iter().enumerate() {
            let Some(position) = item.request.position else {
                continue;
            };
            let placement = Placement::new(item.request.rotation, position);
            let placed = placement.apply_to_box(&item.bbox);
            if self.policy.reject_explicit_overlap {
                if let Some((other, _)) = explicit_boxes
                    .iter()
                    .find(|(_, b)| b.overlap_volume(&placed) > 0.0)
                {
                    return Err(LayoutError::ExplicitOverlap {
                        first: items[*other].label.clone(),
                        second: item.label.clone(),
                    });
                }
            }
            explicit_boxes.push((index, placed));
            placements[index] = Some(placement);
        }

        let auto_count = items.len() - explicit_boxes.len();
        let columns = self
            .policy
            .columns
            .unwrap_or_else(|| (auto_count as f64).sqrt().ceil() as usize)
            .max(1);
        let mut grid = GridCursor::new(columns);
        let margin = self.policy.margin;

        for (index, item) in items.iter().enumerate() {
            if placements[index].is_some() {
                continue;
            }
            let rotation = item.request.rotation;
            let rotated = Placement::new(rotation, DVec3::ZERO).apply_to_box(&item.bbox);
            let extent = rotated.max_dimension();
            let cell = match self.policy.cell {
                CellStrategy::Auto => {
                    grid.max_seen = grid.max_seen.max(extent);
                    grid.max_seen + margin
                }
                CellStrategy::Fixed { size } => {
                    if extent + margin > size {
                        return Err(LayoutError::CellTooSmall {
                            part: item.label.clone(),
                            required: extent + margin,
                            cell: size,
                        });
                    }
                    size
                }
            };

            let placement = loop {
                let origin = grid.next_cell(cell);
                let placement = Placement::new(rotation, origin - rotated.min);
                let placed = placement.apply_to_box(&item.bbox).expanded(margin);
                let blocked = explicit_boxes
                    .iter()
                    .any(|(_, b)| b.overlap_volume(&placed) > 0.0);
                if !blocked {
                    break placement;
                }
            };
            debug!(
                "Placed '{}' at ({:.3}, {:.3}, {:.3})",
                item.label, placement.translation.x, placement.translation.y, placement.translation.z
            );
            placements[index] = Some(placement);
        }

        Ok(placements.into_iter().flatten().collect())
    }
}

/// Row-major walk over grid cells of varying pitch
struct GridCursor {
    columns: usize,
    column: usize,
    x: f64,
    y: f64,
    row_pitch: f64,
    max_seen: f64,
}

impl GridCursor {
    fn new(columns: usize) -> Self {
        Self {
            columns,
            column: 0,
            x: 0.0,
            y: 0.0,
            row_pitch: 0.0,
            max_seen: 0.0,
        }
    }

    /// Origin of the next cell, advancing by `pitch`
    fn next_cell(&mut self, pitch: f64) -> DVec3 {
        if self.column == self.columns {
            self.column = 0;
            self.x = 0.0;
            self.y += self.row_pitch;
            self.row_pitch = 0.0;
        }
        let origin = DVec3::new(self.x, self.y, 0.0);
        self.x += pitch;
        self.column += 1;
        self.row_pitch = self.row_pitch.max(pitch);
        origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cube(label: &str, min: DVec3, size: f64) -> LayoutItem {
        LayoutItem::new(label, BoundingBox::new(min, min + DVec3::splat(size)))
    }

    fn policy(margin: f64) -> LayoutPolicy {
        LayoutPolicy {
            margin,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_part_moves_to_origin() {
        let planner = PlacementPlanner::new(policy(5.0));
        let placements = planner
            .plan(&[cube("a", DVec3::new(-3.0, 4.0, 7.0), 10.0)])
            .unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].rotation, DQuat::IDENTITY);
        assert!(placements[0]
            .translation
            .abs_diff_eq(DVec3::new(3.0, -4.0, -7.0), 1e-12));
    }

    #[test]
    fn test_two_cubes_with_margin() {
        let planner = PlacementPlanner::new(policy(2.0));
        let items = [cube("a", DVec3::ZERO, 10.0), cube("b", DVec3::ZERO, 10.0)];
        let placements = planner.plan(&items).unwrap();

        let a = placements[0].apply_to_box(&items[0].bbox);
        let b = placements[1].apply_to_box(&items[1].bbox);
        assert_relative_eq!(b.min.x - a.max.x, 2.0);
        assert_relative_eq!(b.min.x, 12.0);
        assert_eq!(a.overlap_volume(&b), 0.0);
    }

    #[test]
    fn test_placements_never_overlap() {
        let planner = PlacementPlanner::new(policy(1.5));
        let items: Vec<LayoutItem> = (0..11)
            .map(|i| {
                let size = 1.0 + (i * 7 % 5) as f64 * 3.0;
                cube(&format!("p{}", i), DVec3::new(i as f64, -2.0, 0.5), size)
            })
            .collect();
        let placements = planner.plan(&items).unwrap();
        let boxes: Vec<BoundingBox> = items
            .iter()
            .zip(&placements)
            .map(|(item, p)| p.apply_to_box(&item.bbox))
            .collect();
        for i in 0..boxes.len() {
            assert_relative_eq!(boxes[i].min.z, 0.0, epsilon = 1e-12);
            for j in (i + 1)..boxes.len() {
                assert_eq!(
                    boxes[i].expanded(0.5).overlap_volume(&boxes[j].expanded(0.5)),
                    0.0,
                    "{} and {} overlap",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let planner = PlacementPlanner::new(policy(3.0));
        let items: Vec<LayoutItem> = (0..6)
            .map(|i| cube(&format!("p{}", i), DVec3::ZERO, 2.0 + i as f64))
            .collect();
        let first = planner.plan(&items).unwrap();
        for _ in 0..5 {
            assert_eq!(planner.plan(&items).unwrap(), first);
        }
    }

    #[test]
    fn test_fixed_cell_too_small() {
        let planner = PlacementPlanner::new(LayoutPolicy {
            margin: 1.0,
            cell: CellStrategy::Fixed { size: 10.0 },
            ..Default::default()
        });
        let err = planner
            .plan(&[cube("big", DVec3::ZERO, 10.0)])
            .unwrap_err();
        assert!(matches!(err, LayoutError::CellTooSmall { .. }));
    }

    #[test]
    fn test_fixed_cells_use_constant_pitch() {
        let planner = PlacementPlanner::new(LayoutPolicy {
            margin: 1.0,
            cell: CellStrategy::Fixed { size: 20.0 },
            columns: Some(2),
            ..Default::default()
        });
        let items: Vec<LayoutItem> = (0..3)
            .map(|i| cube(&format!("p{}", i), DVec3::ZERO, 5.0))
            .collect();
        let placements = planner.plan(&items).unwrap();
        let origins: Vec<DVec3> = placements.iter().map(|p| p.translation).collect();
        assert_eq!(
            origins,
            vec![
                DVec3::ZERO,
                DVec3::new(20.0, 0.0, 0.0),
                DVec3::new(0.0, 20.0, 0.0)
            ]
        );
    }

    #[test]
    fn test_explicit_placement_overrides_and_blocks_cells() {
        let planner = PlacementPlanner::new(policy(1.0));
        let fixed = cube("fixed", DVec3::ZERO, 10.0).with_request(PlacementRequest {
            rotation: DQuat::IDENTITY,
            position: Some(DVec3::ZERO),
        });
        let items = [fixed, cube("auto", DVec3::ZERO, 10.0)];
        let placements = planner.plan(&items).unwrap();
        assert_eq!(placements[0], Placement::IDENTITY);

        let fixed_box = placements[0].apply_to_box(&items[0].bbox);
        let auto_box = placements[1].apply_to_box(&items[1].bbox);
        assert_eq!(fixed_box.overlap_volume(&auto_box), 0.0);
        assert!(auto_box.min.x >= fixed_box.max.x + 1.0 - 1e-9);
    }

    #[test]
    fn test_explicit_overlap_rejected() {
        let at = |label: &str, x: f64| {
            cube(label, DVec3::ZERO, 10.0).with_request(PlacementRequest {
                rotation: DQuat::IDENTITY,
                position: Some(DVec3::new(x, 0.0, 0.0)),
            })
        };
        let items = [at("a", 0.0), at("b", 5.0)];

        let strict = PlacementPlanner::new(policy(0.0));
        let err = strict.plan(&items).unwrap_err();
        assert!(matches!(
            err,
            LayoutError::ExplicitOverlap { ref first, ref second } if first == "a" && second == "b"
        ));

        let lenient = PlacementPlanner::new(LayoutPolicy {
            reject_explicit_overlap: false,
            ..policy(0.0)
        });
        assert!(lenient.plan(&items).is_ok());
    }

    #[test]
    fn test_rotation_applies_only_to_requesting_part() {
        let planner = PlacementPlanner::new(policy(0.0));
        let long = LayoutItem::new(
            "long",
            BoundingBox::new(DVec3::ZERO, DVec3::new(10.0, 2.0, 2.0)),
        );
        let rotated = long.clone().with_request(PlacementRequest {
            rotation: rotation_from_euler_xyz([0.0, 0.0, std::f64::consts::FRAC_PI_2]),
            position: None,
        });
        let placements = planner.plan(&[rotated.clone(), long.clone()]).unwrap();
        assert_eq!(placements[1].rotation, DQuat::IDENTITY);

        let placed = placements[0].apply_to_box(&rotated.bbox);
        assert!(placed.min.abs_diff_eq(DVec3::ZERO, 1e-9));
        assert!(placed.max.abs_diff_eq(DVec3::new(2.0, 10.0, 2.0), 1e-9));
    }

    #[test]
    fn test_invalid_inputs() {
        let planner = PlacementPlanner::default();
        assert!(matches!(planner.plan(&[]), Err(LayoutError::Empty)));

        let flat = LayoutItem::new("flat", BoundingBox::new(DVec3::ZERO, DVec3::ZERO));
        assert!(matches!(
            planner.plan(&[flat]),
            Err(LayoutError::Geometry(_))
        ));

        let negative = PlacementPlanner::new(policy(-1.0));
        assert!(matches!(
            negative.plan(&[cube("a", DVec3::ZERO, 1.0)]),
            Err(LayoutError::InvalidPolicy(_))
        ));
    }
}
