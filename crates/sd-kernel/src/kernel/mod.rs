//! Geometry kernel abstraction

#[cfg(feature = "truck")]
mod truck;
mod session;
mod traits;

#[cfg(feature = "truck")]
pub use self::truck::{MAX_POLYLINE_POINTS, TruckKernel};
pub use session::{KernelContext, KernelSession};
pub use traits::*;
