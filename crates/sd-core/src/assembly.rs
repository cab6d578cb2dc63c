//! Assembly composition
//!
//! Applies placements to loaded parts and groups the results into one
//! composed solid. Parts stay distinct components of the compound; the
//! manifest records which components belong to which part.

use std::fs;
use std::path::{Path, PathBuf};

use sd_kernel::{BoundingBox, KernelSession, LengthUnit, Solid, StepExportOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AssemblyError, CompositionError};
use crate::part::Part;
use crate::placement::Placement;

/// One placed part inside an assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub part_id: Uuid,
    /// Unique component name within the assembly
    pub label: String,
    pub source: PathBuf,
    pub placement: Placement,
    /// Indices of the compound components owned by this part
    pub components: Vec<usize>,
    /// Bounding box after placement
    pub bbox: BoundingBox,
}

/// Ordered record of the parts and placements that make up an assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub unit: LengthUnit,
    pub entries: Vec<ManifestEntry>,
}

impl AssemblyManifest {
    /// Label of the part owning compound component `index`
    pub fn label_for_component(&self, index: usize) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.components.contains(&index))
            .map(|e| e.label.as_str())
    }

    pub fn to_json(&self) -> Result<String, AssemblyError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AssemblyError::Request(format!("manifest encoding: {}", e)))
    }

    /// Write the manifest as JSON
    pub fn save(&self, path: &Path) -> Result<(), AssemblyError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|e| AssemblyError::Export {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Read a manifest written by [`AssemblyManifest::save`]
    pub fn load(path: &Path) -> Result<Self, AssemblyError> {
        let content = fs::read_to_string(path)
            .map_err(|e| AssemblyError::Request(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| AssemblyError::Request(format!("{}: {}", path.display(), e)))
    }

    /// Sidecar path used for the manifest of `output`
    pub fn sidecar_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_owned();
        name.push(".manifest.json");
        PathBuf::from(name)
    }
}

/// A composed assembly
#[derive(Debug)]
pub struct Assembly {
    pub manifest: AssemblyManifest,
    pub solid: Solid,
    pub bbox: BoundingBox,
}

/// Unique labels for `names`, suffixing repeats with `_2`, `_3`...
pub fn unique_labels<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for name in names {
        let base = if name.trim().is_empty() { "part" } else { name };
        let mut label = base.to_string();
        let mut i = 1;
        while labels.contains(&label) {
            i += 1;
            label = format!("{}_{}", base, i);
        }
        labels.push(label);
    }
    labels
}

/// Composes placed parts through one kernel session
pub struct Assembler<'s, 'k> {
    session: &'s KernelSession<'k>,
}

impl<'s, 'k> Assembler<'s, 'k> {
    pub fn new(session: &'s KernelSession<'k>) -> Self {
        Self { session }
    }

    /// Transform and group `parts`; inputs are not modified
    ///
    /// Fails atomically: no handle created here outlives an error.
    pub fn assemble(
        &self,
        parts: &[Part],
        placements: &[Placement],
    ) -> Result<Assembly, CompositionError> {
        if parts.is_empty() || parts.len() != placements.len() {
            return Err(CompositionError {
                part: None,
                reason: format!(
                    "{} part(s) but {} placement(s)",
                    parts.len(),
                    placements.len()
                ),
            });
        }

        let mut transformed = Vec::with_capacity(parts.len());
        let result = self.compose(parts, placements, &mut transformed);
        for solid in transformed {
            self.session.release(solid);
        }
        result
    }

    fn compose(
        &self,
        parts: &[Part],
        placements: &[Placement],
        transformed: &mut Vec<Solid>,
    ) -> Result<Assembly, CompositionError> {
        let kernel = self.session.kernel();
        let labels = unique_labels(parts.iter().map(Part::name));
        let unit = parts[0].unit();

        let mut entries = Vec::with_capacity(parts.len());
        let mut expected = BoundingBox::empty();
        let mut next_component = 0;

        for ((part, placement), label) in parts.iter().zip(placements).zip(&labels) {
            let failed = |reason: String| CompositionError {
                part: Some(label.clone()),
                reason,
            };
            if part.unit() != unit {
                return Err(failed(format!(
                    "length unit {:?} differs from the assembly unit {:?}",
                    part.unit(),
                    unit
                )));
            }

            let solid = self
                .session
                .transform(part.solid(), &placement.matrix())
                .map_err(|e| failed(e.to_string()))?;
            let bbox = kernel
                .bounding_box(&solid)
                .map_err(|e| failed(e.to_string()));
            let count = kernel
                .components(&solid)
                .map(|c| c.len())
                .map_err(|e| failed(e.to_string()));
            transformed.push(solid);
            let (bbox, count) = (bbox?, count?);

            debug!("Placed '{}' with {} component(s)", label, count);
            expected = expected.union(&bbox);
            entries.push(ManifestEntry {
                part_id: part.id(),
                label: label.clone(),
                source: part.source().to_path_buf(),
                placement: *placement,
                components: (next_component..next_component + count).collect(),
                bbox,
            });
            next_component += count;
        }

        let items: Vec<(&Solid, &str)> = transformed
            .iter()
            .zip(&labels)
            .map(|(solid, label)| (solid, label.as_str()))
            .collect();
        let solid = self.session.compose(&items).map_err(|e| CompositionError {
            part: None,
            reason: e.to_string(),
        })?;

        let bbox = match kernel.bounding_box(&solid) {
            Ok(bbox) => bbox,
            Err(e) => {
                self.session.release(solid);
                return Err(CompositionError {
                    part: None,
                    reason: e.to_string(),
                });
            }
        };
        let tolerance = 1e-9 * expected.max_dimension().max(1.0);
        if !bbox.abs_diff_eq(&expected, tolerance) {
            self.session.release(solid);
            return Err(CompositionError {
                part: None,
                reason: format!(
                    "composed extent {:?}..{:?} differs from the placed parts {:?}..{:?}",
                    bbox.min, bbox.max, expected.min, expected.max
                ),
            });
        }

        info!(
            "Assembled {} part(s), extent {:?}",
            entries.len(),
            bbox.size()
        );
        Ok(Assembly {
            manifest: AssemblyManifest { unit, entries },
            solid,
            bbox,
        })
    }

    /// Write the composed solid as STEP
    pub fn export(
        &self,
        assembly: &Assembly,
        path: &Path,
        options: &StepExportOptions,
    ) -> Result<(), AssemblyError> {
        self.session
            .kernel()
            .export_step(&assembly.solid, path, options)
            .map_err(|e| AssemblyError::Export {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}
