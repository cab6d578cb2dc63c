//! The `convert` job: STEP solid to multi-view DXF drawing

use std::path::{Path, PathBuf};

use sd_kernel::{BoundingBox, KernelContext, KernelSession, LengthUnit, Solid};
use tracing::{info, warn};

use crate::assembly::AssemblyManifest;
use crate::config::{Config, OutputFormat};
use crate::drawing::{DrawingBuilder, DrawingWarning, SourceManifest, write_dxf};
use crate::error::{ConversionError, ProjectionError};
use crate::jobs::{AssemblyReport, CancelToken, PartSpec, build_assembly, write_assembly};
use crate::part::Part;
use crate::projection::{Projector, ViewDirection};

/// Per-view outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewReport {
    pub view: ViewDirection,
    pub primitives: usize,
    pub skipped_edges: usize,
    pub collapsed_edges: usize,
}

/// Result of a successful `convert` job
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub output: PathBuf,
    pub layers: Vec<String>,
    pub views: Vec<ViewReport>,
    pub warnings: Vec<DrawingWarning>,
}

/// Project the solid in `input` onto the configured views and write a DXF
///
/// Layers follow the `<input>.manifest.json` sidecar when one is present,
/// otherwise the bodies of the file.
pub fn convert(
    context: &KernelContext,
    input: &Path,
    output: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<ConversionReport, ConversionError> {
    config.validate()?;
    if cancel.is_cancelled() {
        return Err(ConversionError::Cancelled);
    }
    info!("Converting {} -> {}", input.display(), output.display());

    let session = context.acquire();
    let part = Part::load(&session, input, None)?;
    let manifest = source_manifest(&session, &part, input)?;
    flatten(
        &session,
        part.solid(),
        part.bbox(),
        part.unit(),
        &manifest,
        output,
        config,
        cancel,
    )
}

/// Assemble `parts` into `step_output`, then flatten the result into `dxf_output`
///
/// Layers come straight from the in-memory manifest.
pub fn assemble_and_convert(
    context: &KernelContext,
    parts: &[PartSpec],
    step_output: &Path,
    dxf_output: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<(AssemblyReport, ConversionReport), ConversionError> {
    config.validate()?;
    let session = context.acquire();
    let assembly = build_assembly(&session, parts, config, cancel)?;
    let assembled = write_assembly(&session, &assembly, step_output, config)?;

    let manifest = SourceManifest::from_assembly(&assembly.manifest);
    let converted = flatten(
        &session,
        &assembly.solid,
        &assembly.bbox,
        assembly.manifest.unit,
        &manifest,
        dxf_output,
        config,
        cancel,
    )?;
    Ok((assembled, converted))
}

fn source_manifest(
    session: &KernelSession,
    part: &Part,
    input: &Path,
) -> Result<SourceManifest, ConversionError> {
    let components = session
        .kernel()
        .components(part.solid())
        .map_err(|e| ProjectionError::Kernel(e.to_string()))?;

    let sidecar = AssemblyManifest::sidecar_path(input);
    if sidecar.exists() {
        match AssemblyManifest::load(&sidecar) {
            Ok(manifest) if covers_components(&manifest, components.len()) => {
                return Ok(SourceManifest::from_assembly(&manifest));
            }
            Ok(_) => warn!(
                "Ignoring {}: its components do not match the {} of the model",
                sidecar.display(),
                components.len()
            ),
            Err(e) => warn!("Ignoring unreadable manifest: {}", e),
        }
    }
    Ok(SourceManifest::from_components(&components, part.name()))
}

/// True when every model component belongs to exactly one manifest entry
fn covers_components(manifest: &AssemblyManifest, count: usize) -> bool {
    let mut owned = vec![false; count];
    for &component in manifest.entries.iter().flat_map(|e| e.components.iter()) {
        match owned.get_mut(component) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    owned.into_iter().all(|o| o)
}

#[allow(clippy::too_many_arguments)]
fn flatten(
    session: &KernelSession,
    solid: &Solid,
    bbox: &BoundingBox,
    unit: LengthUnit,
    manifest: &SourceManifest,
    output: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<ConversionReport, ConversionError> {
    let projector = Projector::new(config.curve_tolerance, config.dedup_tolerance);
    let mut views = Vec::with_capacity(config.views.len());
    for &direction in &config.views {
        if cancel.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }
        views.push(projector.project(session.kernel(), solid, direction)?);
    }

    let drawing = DrawingBuilder::new(config.view_spacing).build(&views, manifest, bbox, unit);
    match config.format {
        OutputFormat::Dxf => write_dxf(&drawing, output)?,
    }

    for warning in &drawing.warnings {
        warn!("{}", warning);
    }
    Ok(ConversionReport {
        output: output.to_path_buf(),
        layers: drawing.layers,
        views: views
            .iter()
            .map(|v| ViewReport {
                view: v.direction,
                primitives: v.primitives.len(),
                skipped_edges: v.skipped_edges,
                collapsed_edges: v.collapsed_edges,
            })
            .collect(),
        warnings: drawing.warnings,
    })
}
