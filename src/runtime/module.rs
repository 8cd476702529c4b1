use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use crate::error::{CudaError, Result};
use crate::runtime::compiler::{self, Artifact, CompilationWarning};
use crate::runtime::context::Context;
use crate::runtime::data::HostValue;
use crate::runtime::driver::{Driver, ModuleHandle};
use crate::runtime::function::CudaFunction;
use crate::runtime::options::CompileOptions;

/// Program name used for modules built from inline source.
pub const DEFAULT_PROGRAM_NAME: &str = "kernel.cu";

/// An artifact loaded on the device. Unloaded when dropped.
pub(crate) struct LoadedImage {
    artifact: Artifact,
    handle: ModuleHandle,
    driver: Rc<dyn Driver>,
}

impl LoadedImage {
    pub(crate) fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }
}

impl Drop for LoadedImage {
    fn drop(&mut self) {
        log::debug!("unloading {}", self.artifact.name());
        self.driver.unload(self.handle);
    }
}

/// A compiled and loaded CUDA module.
///
/// Construction compiles synchronously; a module only exists if compilation
/// succeeded. Functions are resolved lazily and cached per name.
pub struct CudaModule {
    image: Rc<LoadedImage>,
    options: CompileOptions,
    compile_args: Vec<String>,
    warnings: Vec<CompilationWarning>,
    functions: HashMap<String, CudaFunction>,
}

impl CudaModule {
    /// Compile and load inline source.
    pub fn new(ctx: &Context, source: &str, options: CompileOptions) -> Result<Self> {
        Self::build(ctx, DEFAULT_PROGRAM_NAME, source, options)
    }

    /// Same as [`CudaModule::new`].
    pub fn from_source(ctx: &Context, source: &str, options: CompileOptions) -> Result<Self> {
        Self::new(ctx, source, options)
    }

    /// Read `path` and compile it, using its file name as the program name.
    pub fn from_file(ctx: &Context, path: impl AsRef<Path>, options: CompileOptions) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| CudaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_PROGRAM_NAME.to_string());
        Self::build(ctx, &name, &source, options)
    }

    fn build(ctx: &Context, name: &str, source: &str, options: CompileOptions) -> Result<Self> {
        let driver = Rc::clone(ctx.driver());
        let arch = driver.target_arch();
        let compiled = compiler::compile(ctx.compiler(), name, source, &options, arch.as_deref())?;

        let handle = driver.load(&compiled.artifact)?;
        log::debug!("loaded {} as {:?}", name, handle);

        Ok(Self {
            image: Rc::new(LoadedImage {
                artifact: compiled.artifact,
                handle,
                driver,
            }),
            options,
            compile_args: compiled.flags,
            warnings: compiled.warnings,
            functions: HashMap::new(),
        })
    }

    /// Look up a kernel by name, resolving it on first use.
    ///
    /// Misses are not cached: asking again for an absent name fails again.
    pub fn get_function(&mut self, name: &str) -> Result<CudaFunction> {
        if let Some(function) = self.functions.get(name) {
            return Ok(function.clone());
        }

        let symbol = self
            .image
            .driver()
            .resolve_symbol(self.image.handle, name)?
            .ok_or_else(|| CudaError::FunctionNameNotFound {
                name: name.to_string(),
            })?;

        let function = CudaFunction::new(name.to_string(), symbol, Rc::downgrade(&self.image));
        self.functions.insert(name.to_string(), function.clone());
        Ok(function)
    }

    /// Look up `name` and call it with the default launch configuration.
    pub fn call(&mut self, name: &str, args: &[HostValue]) -> Result<()> {
        self.get_function(name)?.call(args)
    }

    /// Program name the module was compiled under.
    pub fn name(&self) -> &str {
        self.image.artifact.name()
    }

    /// Flags the compiler was invoked with.
    pub fn compile_args(&self) -> &[String] {
        &self.compile_args
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Warnings reported by an otherwise successful compilation.
    pub fn warnings(&self) -> &[CompilationWarning] {
        &self.warnings
    }

    pub fn artifact(&self) -> &Artifact {
        &self.image.artifact
    }

    /// Kernel names the compiled image declares.
    pub fn entry_points(&self) -> Vec<String> {
        self.image.artifact.entry_points()
    }
}

impl fmt::Debug for CudaModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaModule")
            .field("name", &self.name())
            .field("handle", &self.image.handle)
            .field("compile_args", &self.compile_args)
            .field("warnings", &self.warnings.len())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}
