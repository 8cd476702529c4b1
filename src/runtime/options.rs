use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Flag prefix used to pin the virtual architecture of the generated PTX.
pub const ARCH_FLAG: &str = "--gpu-architecture=";

/// Architecture used when neither the options nor the driver name one.
/// Matches NVRTC's own default, so the flag never changes what is generated.
pub const DEFAULT_ARCH: &str = "compute_52";

/// Options recognised when compiling a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Leave the source's linkage alone instead of wrapping it in `extern "C"`.
    pub no_extern: bool,

    /// Raw compiler flags, passed first and in order.
    pub compile_options: Vec<String>,

    /// Include directories, each passed as a `-I <dir>` pair.
    pub include_dirs: Vec<PathBuf>,

    /// Virtual architecture (`compute_75`). Defaults to the device's own,
    /// then to [`DEFAULT_ARCH`].
    pub arch: Option<String>,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_extern(mut self, no_extern: bool) -> Self {
        self.no_extern = no_extern;
        self
    }

    pub fn option(mut self, flag: impl Into<String>) -> Self {
        self.compile_options.push(flag.into());
        self
    }

    pub fn options<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compile_options.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    /// Flatten into the flag list handed to the compiler.
    ///
    /// Order: explicit flags, then exactly one architecture flag (explicit
    /// `arch`, else `default_arch`, else [`DEFAULT_ARCH`]), then one `-I`,
    /// `<dir>` pair per include dir.
    pub fn flatten(&self, default_arch: Option<&str>) -> Vec<String> {
        let mut flags = self.compile_options.clone();

        let arch = self.arch.as_deref().or(default_arch).unwrap_or(DEFAULT_ARCH);
        flags.push(format!("{}{}", ARCH_FLAG, arch));

        for dir in &self.include_dirs {
            flags.push("-I".to_string());
            flags.push(dir.to_string_lossy().into_owned());
        }

        flags
    }
}
