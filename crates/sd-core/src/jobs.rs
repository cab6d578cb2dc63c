//! The `assemble` job
//!
//! A job owns one kernel session from start to finish. Part loads may run on
//! worker threads; planning and composition wait for all of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::{DQuat, DVec3};
use rayon::prelude::*;
use sd_kernel::{BoundingBox, KernelContext, KernelSession, LengthUnit, StepExportOptions};
use tracing::info;

use crate::assembly::{Assembler, Assembly, AssemblyManifest};
use crate::config::Config;
use crate::error::AssemblyError;
use crate::part::Part;
use crate::placement::{LayoutItem, PlacementPlanner, PlacementRequest};

/// Cooperative cancellation flag shared with a running job
///
/// Jobs check it between part loads and between views, never in the middle
/// of composition.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One part of an assembly job
#[derive(Debug, Clone, PartialEq)]
pub struct PartSpec {
    pub path: PathBuf,
    /// Part label; the file stem when unset
    pub name: Option<String>,
    pub rotation: DQuat,
    /// Explicit position; the grid places the part when unset
    pub position: Option<DVec3>,
    /// Unit of `position`
    pub position_unit: LengthUnit,
}

impl PartSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
            rotation: DQuat::IDENTITY,
            position: None,
            position_unit: LengthUnit::Millimeter,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rotation(mut self, rotation: DQuat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn at(mut self, position: DVec3, unit: LengthUnit) -> Self {
        self.position = Some(position);
        self.position_unit = unit;
        self
    }

    /// Placement wishes expressed in the loaded part's unit
    fn request_for(&self, part: &Part) -> PlacementRequest {
        let scale = self.position_unit.convert(1.0, part.unit());
        PlacementRequest {
            rotation: self.rotation,
            position: self.position.map(|p| p * scale),
        }
    }
}

/// Result of a successful `assemble` job
#[derive(Debug, Clone)]
pub struct AssemblyReport {
    pub output: PathBuf,
    pub manifest: AssemblyManifest,
    pub bbox: BoundingBox,
    pub unit: LengthUnit,
}

/// Load, place and compose `parts`, then write the assembly to `output` as STEP
///
/// Fails without writing anything when a part cannot be loaded.
pub fn assemble(
    context: &KernelContext,
    parts: &[PartSpec],
    output: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<AssemblyReport, AssemblyError> {
    config.validate()?;
    let session = context.acquire();
    let assembly = build_assembly(&session, parts, config, cancel)?;
    write_assembly(&session, &assembly, output, config)
}

fn load_parts(
    session: &KernelSession,
    specs: &[PartSpec],
    parallel: bool,
    cancel: &CancelToken,
) -> Result<Vec<Part>, AssemblyError> {
    let load = |spec: &PartSpec| -> Result<Part, AssemblyError> {
        if cancel.is_cancelled() {
            return Err(AssemblyError::Cancelled);
        }
        Ok(Part::load(session, &spec.path, spec.name.as_deref())?)
    };

    let results: Vec<Result<Part, AssemblyError>> = if parallel {
        specs.par_iter().map(load).collect()
    } else {
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = load(spec);
            let failed = result.is_err();
            results.push(result);
            if failed {
                break;
            }
        }
        results
    };

    // report the earliest failure in request order
    let mut parts = Vec::with_capacity(results.len());
    let mut failure = None;
    for result in results {
        match result {
            Ok(part) => parts.push(part),
            Err(e) if failure.is_none() => failure = Some(e),
            Err(_) => {}
        }
    }
    match failure {
        Some(e) => {
            for part in parts {
                part.release(session);
            }
            Err(e)
        }
        None => Ok(parts),
    }
}

/// Load, plan and compose inside an existing session
pub(crate) fn build_assembly(
    session: &KernelSession,
    specs: &[PartSpec],
    config: &Config,
    cancel: &CancelToken,
) -> Result<Assembly, AssemblyError> {
    if specs.is_empty() {
        return Err(AssemblyError::EmptyRequest);
    }
    info!("Assembling {} part(s)", specs.len());

    let parts = load_parts(session, specs, config.parallel_loads, cancel)?;
    let items: Vec<LayoutItem> = parts
        .iter()
        .zip(specs)
        .map(|(part, spec)| {
            LayoutItem::new(part.name(), *part.bbox()).with_request(spec.request_for(part))
        })
        .collect();
    let placements = PlacementPlanner::new(config.layout.clone()).plan(&items)?;

    if cancel.is_cancelled() {
        return Err(AssemblyError::Cancelled);
    }
    let assembly = Assembler::new(session).assemble(&parts, &placements)?;
    for part in parts {
        part.release(session);
    }
    Ok(assembly)
}

/// Export the composed solid and, when configured, its manifest sidecar
pub(crate) fn write_assembly(
    session: &KernelSession,
    assembly: &Assembly,
    output: &Path,
    config: &Config,
) -> Result<AssemblyReport, AssemblyError> {
    let options = StepExportOptions {
        author: config.step.author.clone(),
        organization: config.step.organization.clone(),
        ..Default::default()
    };
    Assembler::new(session).export(assembly, output, &options)?;
    if config.write_manifest {
        assembly
            .manifest
            .save(&AssemblyManifest::sidecar_path(output))?;
    }

    info!(
        "Wrote assembly {} ({} part(s))",
        output.display(),
        assembly.manifest.entries.len()
    );
    Ok(AssemblyReport {
        output: output.to_path_buf(),
        manifest: assembly.manifest.clone(),
        bbox: assembly.bbox,
        unit: assembly.manifest.unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::LayoutPolicy;
    use sd_kernel::{GeometryKernel, TruckKernel};

    fn write_cube(dir: &Path, name: &str, size: f64) -> PathBuf {
        let kernel = TruckKernel::new();
        let path = dir.join(format!("{}.stp", name));
        let solid = kernel.create_box(DVec3::ZERO, DVec3::splat(size)).unwrap();
        kernel.export_step(&solid, &path, &Default::default()).unwrap();
        path
    }

    fn config(margin: f64, parallel: bool) -> Config {
        Config {
            layout: LayoutPolicy {
                margin,
                ..Default::default()
            },
            parallel_loads: parallel,
            ..Default::default()
        }
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        shared.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_explicit_position_converted_to_model_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cube(dir.path(), "cube", 10.0);
        let context = KernelContext::new(Box::new(TruckKernel::new()));
        let spec = PartSpec::new(&path).at(DVec3::new(0.5, 0.0, 0.25), LengthUnit::Meter);

        let report = assemble(
            &context,
            &[spec],
            &dir.path().join("out.stp"),
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(report
            .bbox
            .min
            .abs_diff_eq(DVec3::new(500.0, 0.0, 250.0), 1e-9));
        assert_eq!(report.unit, LengthUnit::Millimeter);
    }

    #[test]
    fn test_sequential_and_parallel_loads_agree() {
        let dir = tempfile::tempdir().unwrap();
        let specs: Vec<PartSpec> = (0..4)
            .map(|i| PartSpec::new(write_cube(dir.path(), &format!("c{}", i), 1.0 + i as f64)))
            .collect();
        let context = KernelContext::new(Box::new(TruckKernel::new()));

        let mut placements = Vec::new();
        for parallel in [false, true] {
            let report = assemble(
                &context,
                &specs,
                &dir.path().join(format!("out_{}.stp", parallel)),
                &config(1.0, parallel),
                &CancelToken::new(),
            )
            .unwrap();
            placements.push(
                report
                    .manifest
                    .entries
                    .iter()
                    .map(|e| (e.label.clone(), e.placement))
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(placements[0], placements[1]);
        assert_eq!(placements[0][2].0, "c2");
    }

    #[test]
    fn test_first_failure_in_request_order() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_cube(dir.path(), "good", 1.0);
        let specs = [
            PartSpec::new(&good),
            PartSpec::new(dir.path().join("first.stp")),
            PartSpec::new(dir.path().join("second.stp")),
        ];
        let context = KernelContext::new(Box::new(TruckKernel::new()));
        let output = dir.path().join("out.stp");

        let err = assemble(&context, &specs, &output, &Config::default(), &CancelToken::new())
            .unwrap_err();
        match err {
            AssemblyError::Load(e) => assert!(e.path().ends_with("first.stp")),
            other => panic!("unexpected error: {}", other),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_cancelled_job_leaves_no_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cube(dir.path(), "cube", 1.0);
        let context = KernelContext::new(Box::new(TruckKernel::new()));
        let cancel = CancelToken::new();
        cancel.cancel();

        let session = context.acquire();
        let err = build_assembly(&session, &[PartSpec::new(&path)], &Config::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Cancelled));
        assert_eq!(session.live_handles(), 0);
    }

    #[test]
    fn test_empty_request() {
        let context = KernelContext::new(Box::new(TruckKernel::new()));
        let dir = tempfile::tempdir().unwrap();
        let err = assemble(
            &context,
            &[],
            &dir.path().join("out.stp"),
            &Config::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::EmptyRequest));
    }
}
