//! Scoped access to a geometry kernel
//!
//! A [`KernelContext`] owns one kernel instance. Jobs take a [`KernelSession`]
//! from it; only one session is open per context at a time, and every handle
//! created through a session is released when the session ends.

use std::path::Path;

use glam::{DMat4, DVec3};
use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{GeometryKernel, KernelResult, Solid, StepImportOptions, default_kernel};

/// One kernel instance plus the gate serialising jobs on it
pub struct KernelContext {
    kernel: Box<dyn GeometryKernel>,
    gate: Mutex<()>,
}

impl KernelContext {
    pub fn new(kernel: Box<dyn GeometryKernel>) -> Self {
        Self {
            kernel,
            gate: Mutex::new(()),
        }
    }

    /// Context around [`default_kernel`]
    pub fn with_default_kernel() -> Self {
        Self::new(default_kernel())
    }

    pub fn kernel(&self) -> &dyn GeometryKernel {
        self.kernel.as_ref()
    }

    /// Open a session, waiting for any other session on this context to end
    pub fn acquire(&self) -> KernelSession<'_> {
        KernelSession::new(self.kernel.as_ref(), self.gate.lock())
    }

    /// Open a session if none is currently open
    pub fn try_acquire(&self) -> Option<KernelSession<'_>> {
        self.gate
            .try_lock()
            .map(|guard| KernelSession::new(self.kernel.as_ref(), guard))
    }
}

impl Default for KernelContext {
    fn default() -> Self {
        Self::with_default_kernel()
    }
}

/// Exclusive use of a kernel context for the duration of one job
pub struct KernelSession<'a> {
    kernel: &'a dyn GeometryKernel,
    _guard: MutexGuard<'a, ()>,
    live: Mutex<Vec<Uuid>>,
}

impl<'a> KernelSession<'a> {
    fn new(kernel: &'a dyn GeometryKernel, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            kernel,
            _guard: guard,
            live: Mutex::new(Vec::new()),
        }
    }

    /// Underlying kernel for read-only queries
    pub fn kernel(&self) -> &'a dyn GeometryKernel {
        self.kernel
    }

    fn track(&self, result: KernelResult<Solid>) -> KernelResult<Solid> {
        if let Ok(solid) = &result {
            self.live.lock().push(solid.id());
        }
        result
    }

    pub fn import_step(&self, path: &Path, options: &StepImportOptions) -> KernelResult<Solid> {
        self.track(self.kernel.import_step(path, options))
    }

    pub fn transform(&self, solid: &Solid, matrix: &DMat4) -> KernelResult<Solid> {
        self.track(self.kernel.transform(solid, matrix))
    }

    pub fn compose(&self, items: &[(&Solid, &str)]) -> KernelResult<Solid> {
        self.track(self.kernel.compose(items))
    }

    pub fn create_box(&self, min: DVec3, size: DVec3) -> KernelResult<Solid> {
        self.track(self.kernel.create_box(min, size))
    }

    pub fn create_cylinder(
        &self,
        base_center: DVec3,
        radius: f64,
        height: f64,
        axis: DVec3,
    ) -> KernelResult<Solid> {
        self.track(self.kernel.create_cylinder(base_center, radius, height, axis))
    }

    /// Release one handle before the session ends
    pub fn release(&self, solid: Solid) -> bool {
        let id = solid.id();
        self.live.lock().retain(|live| *live != id);
        self.kernel.release(id)
    }

    /// Number of handles still owned by this session
    pub fn live_handles(&self) -> usize {
        self.live.lock().len()
    }
}

impl Drop for KernelSession<'_> {
    fn drop(&mut self) {
        let live = std::mem::take(self.live.get_mut());
        if !live.is_empty() {
            tracing::debug!("Releasing {} kernel handle(s) at session end", live.len());
        }
        for id in live {
            self.kernel.release(id);
        }
    }
}
