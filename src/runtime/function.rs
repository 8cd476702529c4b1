use std::fmt;
use std::rc::Weak;

use crate::error::{CudaError, DriverError, Result};
use crate::runtime::data::{marshal_all, HostValue};
use crate::runtime::driver::{LaunchConfig, SymbolHandle};
use crate::runtime::module::LoadedImage;

/// A kernel entry point resolved from a [`CudaModule`](crate::CudaModule).
///
/// Holds only a weak reference to the module's loaded image: once the
/// module is dropped, calls fail with [`CudaError::ModuleReleased`].
#[derive(Clone)]
pub struct CudaFunction {
    name: String,
    symbol: SymbolHandle,
    image: Weak<LoadedImage>,
}

impl CudaFunction {
    pub(crate) fn new(name: String, symbol: SymbolHandle, image: Weak<LoadedImage>) -> Self {
        Self {
            name,
            symbol,
            image,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> SymbolHandle {
        self.symbol
    }

    /// Launch with the default configuration (one block, one thread).
    pub fn call(&self, args: &[HostValue]) -> Result<()> {
        self.launch(LaunchConfig::default(), args)
    }

    /// Launch with an explicit configuration and wait for completion.
    ///
    /// All arguments are marshaled before the device is touched, so an
    /// unsupported argument leaves no device-side effects.
    pub fn launch(&self, config: LaunchConfig, args: &[HostValue]) -> Result<()> {
        let values = marshal_all(args)?;

        let image = self
            .image
            .upgrade()
            .ok_or_else(|| CudaError::ModuleReleased(self.name.clone()))?;
        let driver = image.driver();

        log::debug!(
            "launching {} grid={:?} block={:?} with {} argument(s)",
            self.name,
            config.grid_dim,
            config.block_dim,
            values.len()
        );

        driver
            .launch(self.symbol, &config, &values)
            .map_err(launch_failure)?;
        driver.synchronize().map_err(launch_failure)?;
        Ok(())
    }
}

fn launch_failure(err: DriverError) -> CudaError {
    CudaError::LaunchFailure {
        code: err.code,
        message: err.message,
    }
}

impl fmt::Debug for CudaFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaFunction")
            .field("name", &self.name)
            .field("symbol", &self.symbol)
            .field("live", &(self.image.strong_count() > 0))
            .finish()
    }
}
