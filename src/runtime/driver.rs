//! Device-side collaborator: loading images, resolving kernels, launching.

use crate::error::DriverError;
use crate::runtime::compiler::Artifact;
use crate::runtime::data::MarshaledValue;

/// Opaque handle to an image loaded on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(usize);

impl ModuleHandle {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Opaque handle to a resolved kernel entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolHandle(usize);

impl SymbolHandle {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Launch geometry.
///
/// The default is one block of one thread with no dynamic shared memory,
/// enough to run a kernel body once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: (u32, u32, u32),
    pub block_dim: (u32, u32, u32),
    pub shared_mem_bytes: u32,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            grid_dim: (1, 1, 1),
            block_dim: (1, 1, 1),
            shared_mem_bytes: 0,
        }
    }
}

/// The loader/driver a module runs against.
///
/// Implementations own whatever device context they need; nothing here
/// relies on an ambient "current context".
pub trait Driver {
    /// Virtual architecture to compile for, e.g. `compute_75`.
    ///
    /// `None` leaves the choice to [`DEFAULT_ARCH`](crate::runtime::options::DEFAULT_ARCH);
    /// the architecture flag is emitted either way.
    fn target_arch(&self) -> Option<String> {
        None
    }

    fn load(&self, artifact: &Artifact) -> Result<ModuleHandle, DriverError>;

    /// `Ok(None)` when the image has no such symbol.
    fn resolve_symbol(
        &self,
        module: ModuleHandle,
        name: &str,
    ) -> Result<Option<SymbolHandle>, DriverError>;

    fn launch(
        &self,
        symbol: SymbolHandle,
        config: &LaunchConfig,
        args: &[MarshaledValue],
    ) -> Result<(), DriverError>;

    /// Block until all queued device work has finished.
    fn synchronize(&self) -> Result<(), DriverError>;

    fn unload(&self, module: ModuleHandle);
}
