//! # Runtime Module - Dynamic CUDA Kernel Compilation
//!
//! Compiles CUDA C++ source at runtime, loads the result and exposes the
//! kernels it declares as callable functions.
//!
//! ## Key Components
//!
//! - **Compilation pipeline** ([`compiler`]): flattens [`CompileOptions`],
//!   fixes up linkage, runs the compiler and classifies its log
//! - **Diagnostics** ([`diagnostics`]): structured errors and warnings from
//!   the raw compiler log
//! - **Modules and functions** ([`module`], [`function`]): name-based lookup
//!   with a per-module cache
//! - **Parameter binding** ([`data`]): host values to launch parameters
//! - **Backend** (`runtime_compiler`, feature `cuda`): NVRTC and the driver API
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CUDA C++ Source│
//! └────────┬────────┘
//!          │  CompileOptions → flags
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │    Compiler     │────▶│ Diagnostic parse │──▶ warnings / failure
//! └────────┬────────┘     └──────────────────┘
//!          │  Artifact (PTX)
//!          ▼
//! ┌─────────────────┐
//! │   CudaModule    │  Loaded through the Driver
//! └────────┬────────┘
//!          │  get_function(name)
//!          ▼
//! ┌─────────────────┐
//! │  CudaFunction   │  marshal → launch → synchronize
//! └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "cuda")]
//! # fn main() -> Result<(), cudaffi::CudaError> {
//! use cudaffi::{host_args, CompileOptions, Context, CudaModule};
//!
//! let ctx = Context::cuda(0)?;
//! let mut module = CudaModule::new(
//!     &ctx,
//!     r#"__global__ void one(unsigned int x) { printf("%u\n", x); }"#,
//!     CompileOptions::new(),
//! )?;
//!
//! let one = module.get_function("one")?;
//! one.call(&host_args![1])?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "cuda"))]
//! # fn main() {}
//! ```

pub mod compiler;
pub mod context;
pub mod data;
pub mod diagnostics;
pub mod driver;
pub mod function;
pub mod module;
pub mod options;
#[cfg(feature = "cuda")]
pub mod runtime_compiler;

pub use compiler::{
    Artifact, CompilationWarning, CompileStatus, Compiled, Compiler, CompilerOutput,
};
pub use context::Context;
pub use data::{marshal, marshal_all, CType, CudaData, HostValue, KernelParams, MarshaledValue};
pub use diagnostics::{Diagnostic, Severity};
pub use driver::{Driver, LaunchConfig, ModuleHandle, SymbolHandle};
pub use function::CudaFunction;
pub use module::CudaModule;
pub use options::{CompileOptions, DEFAULT_ARCH};
#[cfg(feature = "cuda")]
pub use runtime_compiler::{CudaDriver, NvrtcCompiler};
