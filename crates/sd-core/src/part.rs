//! Loaded parts

use std::path::{Path, PathBuf};

use sd_kernel::{BoundingBox, KernelSession, LengthUnit, Solid, StepImportOptions};
use tracing::debug;
use uuid::Uuid;

use crate::error::{GeometryError, LoadError, PartError};

/// One loaded solid with its untransformed extent
///
/// The geometry handle is owned exclusively by the part.
#[derive(Debug)]
pub struct Part {
    id: Uuid,
    name: String,
    source: PathBuf,
    bbox: BoundingBox,
    unit: LengthUnit,
    solid: Solid,
}

impl Part {
    /// Import a STEP file
    ///
    /// The part is named `name` or, when absent, after the file stem.
    pub fn load(session: &KernelSession, path: &Path, name: Option<&str>) -> Result<Part, PartError> {
        let solid = session
            .import_step(path, &StepImportOptions::default())
            .map_err(|e| LoadError::from_kernel(path, e))?;
        let name = match name {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "part".into()),
        };
        Self::from_solid(session, solid, name, path.to_path_buf())
    }

    /// Wrap a solid already held by the session
    pub fn from_solid(
        session: &KernelSession,
        solid: Solid,
        name: impl Into<String>,
        source: impl Into<PathBuf>,
    ) -> Result<Part, PartError> {
        let name = name.into();
        let measured = session
            .kernel()
            .bounding_box(&solid)
            .and_then(|bbox| Ok((bbox, session.kernel().unit(&solid)?)));

        let (bbox, unit) = match measured {
            Ok((bbox, unit)) if bbox.is_valid() => (bbox, unit),
            Ok((bbox, _)) => {
                session.release(solid);
                return Err(GeometryError {
                    part: name,
                    reason: format!(
                        "bounding box {:?}..{:?} has no usable extent",
                        bbox.min, bbox.max
                    ),
                }
                .into());
            }
            Err(e) => {
                session.release(solid);
                return Err(GeometryError {
                    part: name,
                    reason: e.to_string(),
                }
                .into());
            }
        };

        debug!(
            "Loaded part '{}': size {:?} {:?}",
            name,
            bbox.size(),
            unit
        );
        Ok(Part {
            id: Uuid::new_v4(),
            name,
            source: source.into(),
            bbox,
            unit,
            solid,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Bounding box in the part's own coordinates
    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn unit(&self) -> LengthUnit {
        self.unit
    }

    pub fn solid(&self) -> &Solid {
        &self.solid
    }

    /// Give the geometry back to the session early
    pub fn release(self, session: &KernelSession) -> bool {
        session.release(self.solid)
    }
}
