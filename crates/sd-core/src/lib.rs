//! StepDraft core
//!
//! This crate contains the two StepDraft jobs and everything they need:
//! - Part: a loaded STEP solid with its bounding box
//! - Placement planning and assembly composition
//! - Projection of solids onto standard orthographic views
//! - Drawing: layered 2D primitives and the DXF writer
//! - Config: job settings stored as RON or JSON

pub mod assembly;
pub mod config;
pub mod convert;
pub mod drawing;
pub mod error;
pub mod jobs;
pub mod part;
pub mod placement;
pub mod projection;
pub mod request;

pub use assembly::*;
pub use config::*;
pub use convert::*;
pub use drawing::*;
pub use error::*;
pub use jobs::*;
pub use part::*;
pub use placement::*;
pub use projection::*;
pub use request::*;
