//! Assembly job descriptions
//!
//! A request is a JSON list of products. Each product names a STEP file
//! (`<base>/<productId>.stp`) plus an optional position and rotation.

use std::fs;
use std::path::{Path, PathBuf};

use glam::DVec3;
use sd_kernel::LengthUnit;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AssemblyError;
use crate::placement::rotation_from_euler_xyz;
use crate::jobs::PartSpec;

/// One product of an assembly request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default)]
    pub id: String,
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    /// Position in the request's length unit; placed by the grid when absent
    #[serde(default)]
    pub position: Option<[f64; 3]>,
    /// XYZ Euler angles in radians
    #[serde(default)]
    pub rotation: Option<[f64; 3]>,
    #[serde(default)]
    pub scale: Option<[f64; 3]>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub child_position: Option<serde_json::Value>,
    #[serde(default)]
    pub level: u32,
}

/// Parsed assembly request
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyRequest {
    pub products: Vec<Product>,
    /// Unit of `position` values
    pub position_unit: LengthUnit,
}

impl AssemblyRequest {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products,
            position_unit: LengthUnit::Meter,
        }
    }

    pub fn with_position_unit(mut self, unit: LengthUnit) -> Self {
        self.position_unit = unit;
        self
    }

    /// Parse the JSON product list
    pub fn from_json(json: &str) -> Result<Self, AssemblyError> {
        let products: Vec<Product> =
            serde_json::from_str(json).map_err(|e| AssemblyError::Request(e.to_string()))?;
        for (index, product) in products.iter().enumerate() {
            if product.product_id.trim().is_empty() {
                return Err(AssemblyError::Request(format!(
                    "product {} has an empty productId",
                    index
                )));
            }
            let finite = |v: &Option<[f64; 3]>| v.is_none_or(|a| a.iter().all(|x| x.is_finite()));
            if !finite(&product.position) || !finite(&product.rotation) {
                return Err(AssemblyError::Request(format!(
                    "product '{}' has a non-finite position or rotation",
                    product.product_id
                )));
            }
        }
        Ok(Self::new(products))
    }

    pub fn load(path: &Path) -> Result<Self, AssemblyError> {
        let content = fs::read_to_string(path)
            .map_err(|e| AssemblyError::Request(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// STEP file of a product
    pub fn step_path(base: &Path, product: &Product) -> PathBuf {
        base.join(format!("{}.stp", product.product_id))
    }

    /// Part descriptions with files resolved against `base`
    pub fn to_part_specs(&self, base: &Path) -> Vec<PartSpec> {
        self.products
            .iter()
            .map(|product| {
                if let Some(scale) = product.scale {
                    if scale.iter().any(|s| (s - 1.0).abs() > 1e-9) {
                        warn!(
                            "Ignoring scale {:?} of '{}': placements are rigid",
                            scale, product.product_id
                        );
                    }
                }
                let name = if product.name.trim().is_empty() {
                    None
                } else {
                    Some(product.name.clone())
                };
                PartSpec {
                    path: Self::step_path(base, product),
                    name,
                    rotation: product
                        .rotation
                        .map(rotation_from_euler_xyz)
                        .unwrap_or_default(),
                    position: product.position.map(DVec3::from_array),
                    position_unit: self.position_unit,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DQuat;

    const REQUEST: &str = r#"[
        {
            "id": "product-123",
            "productId": "382090006301",
            "name": "Bracket",
            "position": [0.5, 0, 0.25],
            "rotation": [0, 0, 1.5707963267948966],
            "scale": [1, 1, 1],
            "parentId": null,
            "childPosition": null,
            "level": 0
        },
        { "productId": "bolt" }
    ]"#;

    #[test]
    fn test_parse_request() {
        let request = AssemblyRequest::from_json(REQUEST).unwrap();
        assert_eq!(request.products.len(), 2);
        assert_eq!(request.products[0].product_id, "382090006301");
        assert_eq!(request.products[1].position, None);
        assert_eq!(request.position_unit, LengthUnit::Meter);
    }

    #[test]
    fn test_part_specs() {
        let request = AssemblyRequest::from_json(REQUEST).unwrap();
        let specs = request.to_part_specs(Path::new("/data/stp"));

        assert_eq!(specs[0].path, PathBuf::from("/data/stp/382090006301.stp"));
        assert_eq!(specs[0].name.as_deref(), Some("Bracket"));
        assert_eq!(specs[0].position, Some(DVec3::new(0.5, 0.0, 0.25)));
        let turned = specs[0].rotation * DVec3::X;
        assert!(turned.abs_diff_eq(DVec3::Y, 1e-12));

        assert_eq!(specs[1].name, None);
        assert_eq!(specs[1].rotation, DQuat::IDENTITY);
        assert_eq!(specs[1].position, None);
    }

    #[test]
    fn test_rejects_bad_requests() {
        assert!(matches!(
            AssemblyRequest::from_json("{}"),
            Err(AssemblyError::Request(_))
        ));
        assert!(AssemblyRequest::from_json(r#"[{"productId": ""}]"#).is_err());
        assert!(AssemblyRequest::from_json(r#"[{"name": "x"}]"#).is_err());
    }
}
