//! Geometry kernel adapter for StepDraft
//!
//! This crate provides:
//! - The `GeometryKernel` capability trait and its value types
//! - A truck backend reading and writing STEP through truck-stepio
//! - Scoped kernel sessions that release geometry when a job ends

pub mod kernel;

// Re-exports for convenience
#[cfg(feature = "truck")]
pub use kernel::{MAX_POLYLINE_POINTS, TruckKernel};
pub use kernel::{
    BoundingBox, CircleArc, ComponentInfo, EdgeCurve, EdgeId, EdgeInfo, GeometryKernel,
    KernelContext, KernelError, KernelResult, KernelSession, LengthUnit, NullKernel, Solid,
    StepExportOptions, StepImportOptions, default_kernel,
};
