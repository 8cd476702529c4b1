use std::rc::Rc;

use crate::runtime::compiler::Compiler;
use crate::runtime::driver::Driver;

/// The compiler and device driver modules are built against.
///
/// Cloning is cheap; clones share the same collaborators.
#[derive(Clone)]
pub struct Context {
    compiler: Rc<dyn Compiler>,
    driver: Rc<dyn Driver>,
}

impl Context {
    pub fn new(compiler: impl Compiler + 'static, driver: impl Driver + 'static) -> Self {
        Self {
            compiler: Rc::new(compiler),
            driver: Rc::new(driver),
        }
    }

    pub fn from_shared(compiler: Rc<dyn Compiler>, driver: Rc<dyn Driver>) -> Self {
        Self { compiler, driver }
    }

    /// NVRTC and the CUDA driver API on device `device_id`.
    #[cfg(feature = "cuda")]
    pub fn cuda(device_id: i32) -> crate::error::Result<Self> {
        use crate::runtime::runtime_compiler::{CudaDriver, NvrtcCompiler};

        let driver = CudaDriver::new(device_id)?;
        Ok(Self::new(NvrtcCompiler::new(), driver))
    }

    pub fn compiler(&self) -> &dyn Compiler {
        self.compiler.as_ref()
    }

    pub fn driver(&self) -> &Rc<dyn Driver> {
        &self.driver
    }
}
