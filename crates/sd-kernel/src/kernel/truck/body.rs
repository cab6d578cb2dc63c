//! Body storage on truck compressed shells
//!
//! A body keeps one component per STEP body root. Shells that truck cannot
//! convert stay in the body as unsupported edges so callers can report them.

use glam::{DMat4, DVec3};
use tracing::{debug, warn};
use truck_modeling::{Matrix4, Transformed};
use truck_stepio::out::{CompleteStepDisplay, StepHeaderDescriptor, StepModels};
use truck_stepio::r#in::{Table, ruststep};
use truck_topology::compress::{CompressedEdge, CompressedFace, CompressedShell, CompressedSolid};

use super::edges::{TrimmedEdge, dvec, point};
use super::exchange::{Instances, StepShell};
use crate::kernel::{KernelError, KernelResult, LengthUnit, StepExportOptions, StepImportOptions};

#[derive(Debug, Clone)]
pub(crate) struct Component {
    pub name: Option<String>,
    pub shells: Vec<StepShell>,
    /// Descriptions of edges in shells that could not be converted
    pub unsupported: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeSource {
    Curve { shell: usize, edge: usize },
    /// Index into the component's `unsupported` list
    Unsupported(usize),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeRef {
    pub component: usize,
    pub source: EdgeSource,
}

#[derive(Debug, Clone)]
pub(crate) struct Body {
    pub components: Vec<Component>,
    pub unit: LengthUnit,
    /// Edges of every component in stable order
    pub edges: Vec<EdgeRef>,
}

impl Body {
    pub fn new(components: Vec<Component>, unit: LengthUnit) -> Self {
        let mut edges = Vec::new();
        for (index, component) in components.iter().enumerate() {
            for (shell, compressed) in component.shells.iter().enumerate() {
                edges.extend((0..compressed.edges.len()).map(|edge| EdgeRef {
                    component: index,
                    source: EdgeSource::Curve { shell, edge },
                }));
            }
            edges.extend((0..component.unsupported.len()).map(|u| EdgeRef {
                component: index,
                source: EdgeSource::Unsupported(u),
            }));
        }
        Self {
            components,
            unit,
            edges,
        }
    }

    /// Build from the text of a STEP file
    pub fn from_step_text(text: &str, options: &StepImportOptions) -> KernelResult<Self> {
        let exchange = ruststep::parser::parse(text)
            .map_err(|e| KernelError::StepImport(format!("failed to parse: {}", e)))?;
        let data = exchange
            .data
            .first()
            .ok_or_else(|| KernelError::StepImport("no DATA section".into()))?;

        let instances = Instances::new(data);
        instances.check_knots()?;
        let roots = instances.roots(options.include_surface_models);
        if roots.is_empty() {
            return Err(KernelError::StepImport(
                "no solid or shell bodies found".into(),
            ));
        }

        let table = Table::from_data_section(data);
        let components = roots
            .iter()
            .map(|root| {
                let mut component = Component {
                    name: root.name.clone(),
                    shells: Vec::new(),
                    unsupported: Vec::new(),
                };
                for &shell_id in &root.shells {
                    let converted = if instances.has_poly_loops(shell_id) {
                        instances.faceted_shell(shell_id)
                    } else {
                        table
                            .shell
                            .get(&shell_id)
                            .ok_or_else(|| format!("#{} is not a shell", shell_id))
                            .and_then(|holder| {
                                table.to_compressed_shell(holder).map_err(|e| e.to_string())
                            })
                            .map_err(KernelError::StepImport)
                    };
                    match converted {
                        Ok(shell) => component.shells.push(shell),
                        Err(e) => {
                            warn!("Skipping shell #{} of body #{}: {}", shell_id, root.id, e);
                            let count = instances.count_edges(shell_id).max(1);
                            component.unsupported.extend(
                                (0..count).map(|_| format!("EDGE_CURVE in shell #{}", shell_id)),
                            );
                        }
                    }
                }
                component
            })
            .collect();

        let unit = instances.length_unit();
        debug!("STEP body: {} root(s), unit {:?}", roots.len(), unit);
        Ok(Self::new(components, unit))
    }

    /// Edge curve with its vertices, or the description of an unsupported edge
    pub fn resolve(&self, edge: EdgeRef) -> Result<TrimmedEdge<'_>, &str> {
        let component = &self.components[edge.component];
        match edge.source {
            EdgeSource::Curve { shell, edge } => {
                let shell = &component.shells[shell];
                let compressed = &shell.edges[edge];
                let (a, b) = compressed.vertices;
                Ok(TrimmedEdge::new(
                    &compressed.curve,
                    dvec(shell.vertices[a]),
                    dvec(shell.vertices[b]),
                ))
            }
            EdgeSource::Unsupported(index) => Err(component.unsupported[index].as_str()),
        }
    }

    /// Vertices of every converted shell
    pub fn vertices(&self) -> impl Iterator<Item = DVec3> + '_ {
        self.components
            .iter()
            .flat_map(|c| &c.shells)
            .flat_map(|s| s.vertices.iter().copied().map(dvec))
    }

    /// Apply a rigid motion to every vertex, curve and surface
    pub fn transformed(&self, matrix: &DMat4) -> Body {
        let components = self
            .components
            .iter()
            .map(|component| Component {
                name: component.name.clone(),
                shells: component
                    .shells
                    .iter()
                    .map(|shell| transform_shell(shell, matrix))
                    .collect(),
                unsupported: component.unsupported.clone(),
            })
            .collect();
        Body::new(components, self.unit)
    }

    /// Group bodies into one, renaming each body's components
    pub fn compose(items: &[(&Body, &str)]) -> KernelResult<Body> {
        let Some((first, _)) = items.first() else {
            return Err(KernelError::Composition("nothing to compose".into()));
        };
        let unit = first.unit;

        let mut components = Vec::new();
        for (body, name) in items {
            if body.unit != unit {
                return Err(KernelError::Composition(format!(
                    "component '{}' is in {:?}, expected {:?}",
                    name, body.unit, unit
                )));
            }
            components.extend(body.components.iter().map(|c| Component {
                name: Some((*name).to_string()),
                ..c.clone()
            }));
        }
        Ok(Body::new(components, unit))
    }

    /// Render as a STEP exchange structure with one solid per component
    ///
    /// Coordinates are written in millimetres.
    pub fn to_step(&self, product_name: &str, options: &StepExportOptions) -> KernelResult<String> {
        if let Some(component) = self.components.iter().find(|c| !c.unsupported.is_empty()) {
            return Err(KernelError::StepExport(format!(
                "component {} has {} edge(s) that cannot be written",
                component.name.as_deref().unwrap_or("(unnamed)"),
                component.unsupported.len()
            )));
        }

        let scale = self.unit.millimeters();
        let to_mm = DMat4::from_scale(DVec3::splat(scale));
        let solids: Vec<CompressedSolid<_, _, _>> = self
            .components
            .iter()
            .map(|component| CompressedSolid {
                boundaries: component
                    .shells
                    .iter()
                    .map(|shell| {
                        if scale == 1.0 {
                            shell.clone()
                        } else {
                            transform_shell(shell, &to_mm)
                        }
                    })
                    .collect(),
            })
            .collect();
        if solids.iter().all(|s| s.boundaries.is_empty()) {
            return Err(KernelError::StepExport("no geometry to write".into()));
        }

        let header = StepHeaderDescriptor {
            file_name: product_name.to_string(),
            time_stamp: options.time_stamp.clone().unwrap_or_default(),
            authors: options.author.iter().cloned().collect(),
            organization: options.organization.iter().cloned().collect(),
            organization_system: "StepDraft".to_owned(),
            ..Default::default()
        };
        Ok(CompleteStepDisplay::new(StepModels::from_iter(solids.iter()), header).to_string())
    }
}

fn to_matrix4(matrix: &DMat4) -> Matrix4 {
    Matrix4::from(matrix.to_cols_array_2d())
}

fn transform_shell(shell: &StepShell, matrix: &DMat4) -> StepShell {
    let m = to_matrix4(matrix);
    CompressedShell {
        vertices: shell
            .vertices
            .iter()
            .map(|p| point(matrix.transform_point3(dvec(*p))))
            .collect(),
        edges: shell
            .edges
            .iter()
            .map(|e| CompressedEdge {
                vertices: e.vertices,
                curve: e.curve.transformed(m),
            })
            .collect(),
        faces: shell
            .faces
            .iter()
            .map(|f| CompressedFace {
                boundaries: f.boundaries.clone(),
                orientation: f.orientation,
                surface: f.surface.transformed(m),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: &str = "#50=(LENGTH_UNIT()NAMED_UNIT(*)SI_UNIT(.MILLI.,.METRE.));";

    fn step(body: &str) -> String {
        format!(
            "ISO-10303-21;\nHEADER;\nFILE_DESCRIPTION((''),'2;1');\n\
             FILE_NAME('t.stp','',(''),(''),'','','');\n\
             FILE_SCHEMA(('AUTOMOTIVE_DESIGN'));\nENDSEC;\nDATA;\n{}\n{}\nENDSEC;\nEND-ISO-10303-21;\n",
            body, UNIT
        )
    }

    const TRIANGLE: &str = "#1=CARTESIAN_POINT('',(0.,0.,0.));
#2=CARTESIAN_POINT('',(10.,0.,0.));
#3=CARTESIAN_POINT('',(0.,10.,0.));
#11=POLY_LOOP('',(#1,#2,#3));
#21=FACE_OUTER_BOUND('',#11,.T.);
#31=FACE('',(#21));
#40=OPEN_SHELL('',(#31));
#41=SHELL_BASED_SURFACE_MODEL('sheet',(#40));";

    #[test]
    fn test_surface_models_can_be_excluded() {
        let text = step(TRIANGLE);
        let excluded = StepImportOptions {
            include_surface_models: false,
        };
        assert!(Body::from_step_text(&text, &excluded).is_err());
    }

    #[test]
    fn test_unconvertible_shell_keeps_its_edges() {
        let text = step(
            "#1=CARTESIAN_POINT('',(0.,0.,0.));
#2=VERTEX_POINT('',#1);
#3=EDGE_CURVE('',#2,#2,#999,.T.);
#4=ORIENTED_EDGE('',*,*,#3,.T.);
#5=EDGE_LOOP('',(#4));
#6=FACE_OUTER_BOUND('',#5,.T.);
#7=ADVANCED_FACE('',(#6),#998,.T.);
#8=CLOSED_SHELL('',(#7));
#9=MANIFOLD_SOLID_BREP('broken',#8);",
        );
        let body = Body::from_step_text(&text, &StepImportOptions::default()).unwrap();
        assert_eq!(body.components.len(), 1);
        assert!(body.components[0].shells.is_empty());
        assert_eq!(body.edges.len(), 1);
        assert_eq!(body.resolve(body.edges[0]).err(), Some("EDGE_CURVE in shell #8"));
        assert!(body.to_step("broken", &StepExportOptions::default()).is_err());
    }

    #[test]
    fn test_transform_moves_vertices() {
        let text = step(TRIANGLE);
        let body = Body::from_step_text(&text, &StepImportOptions::default()).unwrap();
        let moved = body.transformed(&DMat4::from_translation(DVec3::new(0.0, 0.0, 5.0)));
        assert!(moved.vertices().all(|v| (v.z - 5.0).abs() < 1e-12));
        let edge = moved.resolve(moved.edges[0]).unwrap();
        assert!((edge.start.z - 5.0).abs() < 1e-12);
        assert!(edge.discretize(0.1).iter().all(|p| (p.z - 5.0).abs() < 1e-12));
    }

    #[test]
    fn test_compose_renames_and_rejects_mixed_units() {
        let text = step(TRIANGLE);
        let body = Body::from_step_text(&text, &StepImportOptions::default()).unwrap();
        let composed = Body::compose(&[(&body, "left"), (&body, "right")]).unwrap();
        let names: Vec<_> = composed.components.iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec![Some("left".into()), Some("right".into())]);
        assert_eq!(composed.edges.len(), 6);
        assert_eq!(composed.edges[3].component, 1);

        let inches = Body {
            unit: LengthUnit::Inch,
            ..body.clone()
        };
        assert!(Body::compose(&[(&body, "a"), (&inches, "b")]).is_err());
    }
}
