//! Error types for assembly and flattening jobs

use std::path::{Path, PathBuf};

use sd_kernel::KernelError;
use thiserror::Error;

/// A STEP input could not be loaded
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("cannot read {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("{} is not a valid STEP file: {reason}", path.display())]
    InvalidStep { path: PathBuf, reason: String },

    #[error("kernel failed loading {}: {reason}", path.display())]
    Kernel { path: PathBuf, reason: String },
}

impl LoadError {
    /// The offending file
    pub fn path(&self) -> &Path {
        match self {
            LoadError::Unreadable { path, .. }
            | LoadError::InvalidStep { path, .. }
            | LoadError::Kernel { path, .. } => path,
        }
    }

    pub(crate) fn from_kernel(path: &Path, error: KernelError) -> Self {
        let path = path.to_path_buf();
        match error {
            KernelError::FileIo(reason) => LoadError::Unreadable { path, reason },
            KernelError::StepImport(reason) => LoadError::InvalidStep { path, reason },
            other => LoadError::Kernel {
                path,
                reason: other.to_string(),
            },
        }
    }
}

/// Degenerate or empty geometry
#[derive(Debug, Clone, Error)]
#[error("degenerate geometry in part '{part}': {reason}")]
pub struct GeometryError {
    pub part: String,
    pub reason: String,
}

/// Transform or composition failure during assembly
#[derive(Debug, Clone, Error)]
#[error("composition failed for {}: {reason}", subject(part))]
pub struct CompositionError {
    /// Part being placed when the failure happened, `None` for the final grouping
    pub part: Option<String>,
    pub reason: String,
}

fn subject(part: &Option<String>) -> String {
    match part {
        Some(name) => format!("part '{}'", name),
        None => "the assembly".into(),
    }
}

/// Placement planning failure
#[derive(Debug, Clone, Error)]
pub enum LayoutError {
    #[error("no parts to place")]
    Empty,

    #[error("invalid layout policy: {0}")]
    InvalidPolicy(String),

    #[error("part '{part}' needs a cell of {required} but the fixed cell size is {cell}")]
    CellTooSmall {
        part: String,
        required: f64,
        cell: f64,
    },

    #[error("explicit placements of '{first}' and '{second}' overlap")]
    ExplicitOverlap { first: String, second: String },

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Projection failure for one view
#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    #[error("invalid projection direction: {0}")]
    InvalidDirection(String),

    #[error("kernel projection failure: {0}")]
    Kernel(String),
}

/// Configuration loading and validation errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Deserialization error: {0}")]
    Deserialize(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loading a single part
#[derive(Debug, Clone, Error)]
pub enum PartError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Failure of an `assemble` job
#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid assembly request: {0}")]
    Request(String),

    #[error("assembly request contains no parts")]
    EmptyRequest,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error("failed to write {}: {reason}", path.display())]
    Export { path: PathBuf, reason: String },

    #[error("assembly job cancelled")]
    Cancelled,
}

impl From<PartError> for AssemblyError {
    fn from(error: PartError) -> Self {
        match error {
            PartError::Load(e) => AssemblyError::Load(e),
            PartError::Geometry(e) => AssemblyError::Geometry(e),
        }
    }
}

/// Failure of a `convert` job
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("failed to serialize drawing to {}: {reason}", path.display())]
    Serialization { path: PathBuf, reason: String },

    #[error("conversion job cancelled")]
    Cancelled,
}

impl From<PartError> for ConversionError {
    fn from(error: PartError) -> Self {
        match error {
            PartError::Load(e) => ConversionError::Load(e),
            PartError::Geometry(e) => ConversionError::Geometry(e),
        }
    }
}
