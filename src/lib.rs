//! # cudaffi - Runtime CUDA Kernels from Rust
//!
//! Compile small CUDA C++ snippets at runtime, load the result and call the
//! kernels it declares with ordinary Rust values. Compiler toolchains, raw
//! device handles and argument packing stay behind this API.
//!
//! ## Key Features
//!
//! - **Runtime Compilation**: NVRTC turns source into PTX, no nvcc needed
//! - **Structured Diagnostics**: compiler errors and warnings come back as
//!   data; warnings never block a successful build
//! - **Name-Based Lookup**: kernels are resolved by their source name and
//!   cached per module
//! - **Argument Marshaling**: integers, floats, booleans and strings are
//!   packed into launch parameters automatically
//! - **Explicit Context**: the compiler and driver a module uses are passed
//!   in, never taken from global state
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "cuda")]
//! # fn main() -> Result<(), cudaffi::CudaError> {
//! use cudaffi::{host_args, CompileOptions, Context, CudaModule};
//!
//! let ctx = Context::cuda(0)?;
//! let mut module = CudaModule::from_file(&ctx, "kernels/one_arg.cu", CompileOptions::new())?;
//!
//! for warning in module.warnings() {
//!     eprintln!("{}", warning);
//! }
//!
//! module.call("one", &host_args![1])?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "cuda"))]
//! # fn main() {}
//! ```
//!
//! ## Feature Flags
//!
//! - `cuda`: link NVRTC and the CUDA driver API and enable
//!   [`Context::cuda`]. Without it, bring your own [`Compiler`] and
//!   [`Driver`] implementations.
//!
//! ## Threading
//!
//! Everything here is synchronous and single-threaded. Modules and
//! functions are `!Send`; share them across threads only behind your own
//! serialization.

pub mod error;
pub mod runtime;

pub use error::{CompilationFailure, CudaError, DriverError, Result};
pub use runtime::{
    Artifact, CType, CompilationWarning, CompileOptions, Compiler, CompilerOutput, CompileStatus,
    Context, CudaData, CudaFunction, CudaModule, Diagnostic, Driver, HostValue, LaunchConfig,
    MarshaledValue, ModuleHandle, Severity, SymbolHandle,
};

#[cfg(feature = "cuda")]
pub use runtime::{CudaDriver, NvrtcCompiler};
