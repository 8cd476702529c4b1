//! In-process stand-ins for NVRTC and the CUDA driver.
//!
//! `FakeNvrtc` understands just enough CUDA C++ to behave like the real
//! compiler on the fixtures: it rejects unknown flags, resolves includes
//! against `-I` directories, reports missing semicolons after `printf`
//! calls, warns about format strings lacking arguments, and emits PTX with
//! one `.entry` per `__global__` function (mangled unless declared with C
//! linkage). `FakeDriver` loads that PTX, checks argument widths against
//! the declared parameters and records every launch.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use cudaffi::{
    Artifact, Compiler, CompilerOutput, Context, Driver, DriverError, LaunchConfig,
    MarshaledValue, ModuleHandle, SymbolHandle,
};

pub const ARCH: &str = "compute_75";

const KNOWN_FLAGS: &[&str] = &[
    "--gpu-architecture=",
    "-arch=",
    "--fmad=",
    "-fmad=",
    "--use_fast_math",
    "-use_fast_math",
    "-lineinfo",
    "--generate-line-info",
    "-G",
    "--device-debug",
    "--std=",
    "-std=",
    "-default-device",
    "--define-macro=",
    "-D",
];

fn is_known(flag: &str) -> bool {
    KNOWN_FLAGS.iter().any(|known| {
        flag == *known || ((known.ends_with('=') || *known == "-D") && flag.starts_with(known))
    })
}

#[derive(Default)]
pub struct FakeNvrtc {
    /// Sources exactly as received, one entry per compilation.
    pub sources: Rc<RefCell<Vec<String>>>,
}

struct Kernel {
    name: String,
    params: Vec<&'static str>,
    c_linkage: bool,
}

impl Compiler for FakeNvrtc {
    fn compile(&self, name: &str, source: &str, flags: &[String]) -> CompilerOutput {
        self.sources.borrow_mut().push(source.to_string());

        let mut include_dirs = Vec::new();
        let mut arch = "compute_52".to_string();
        let mut iter = flags.iter();
        while let Some(flag) = iter.next() {
            if flag == "-I" {
                match iter.next() {
                    Some(dir) => include_dirs.push(PathBuf::from(dir)),
                    None => return unrecognized(flag),
                }
            } else if let Some(dir) = flag
                .strip_prefix("--include-path=")
                .or_else(|| flag.strip_prefix("-I"))
            {
                include_dirs.push(PathBuf::from(dir));
            } else if let Some(target) = flag.strip_prefix("--gpu-architecture=") {
                arch = target.to_string();
            } else if !is_known(flag) {
                return unrecognized(flag);
            }
        }

        let mut log = String::new();
        let mut errors = 0;
        let mut warned = false;
        let mut line_no = 0usize;

        for line in source.lines() {
            line_no += 1;
            let trimmed = line.trim();

            if let Some(rest) = trimmed.strip_prefix("#line ") {
                if let Some(n) = rest.split_whitespace().next().and_then(|n| n.parse::<usize>().ok()) {
                    line_no = n.saturating_sub(1);
                }
                continue;
            }

            if let Some(header) = include_target(trimmed) {
                if !include_dirs.iter().any(|dir| dir.join(header).is_file()) {
                    log.push_str(&format!(
                        "{}({}): catastrophic error: cannot open source file \"{}\"\n",
                        name, line_no, header
                    ));
                    log.push_str(&format!(
                        "\n1 catastrophic error detected in the compilation of \"{}\".\nCompilation terminated.\n",
                        name
                    ));
                    return CompilerOutput::failure(6, "NVRTC_ERROR_COMPILATION", log);
                }
                continue;
            }

            let code = line.split("//").next().unwrap_or(line).trim();
            if let Some(at) = code.find("printf(") {
                if !code.ends_with(';') {
                    log.push_str(&format!("{}({}): error: expected a \";\"\n", name, line_no + 1));
                    log.push_str(&format!("  {}\n  ^\n\n", line.trim_end()));
                    errors += 1;
                } else if lacks_format_args(&code[at + "printf(".len()..]) {
                    log.push_str(&format!(
                        "{}({}): warning #267-D: the format string requires additional arguments\n",
                        name, line_no
                    ));
                    log.push_str(&format!("  {}\n  ^\n\n", line.trim_end()));
                    warned = true;
                }
            }
        }

        if errors > 0 {
            log.push_str(&format!(
                "{} error{} detected in the compilation of \"{}\".\n",
                errors,
                if errors == 1 { "" } else { "s" },
                name
            ));
            return CompilerOutput::failure(6, "NVRTC_ERROR_COMPILATION", log);
        }
        if warned {
            log.push_str(
                "Remark: The warnings can be suppressed with \"-diag-suppress <warning-number>\"\n",
            );
        }

        let mut ptx = format!(
            "//\n// Generated by FakeNvrtc\n//\n\n.version 8.0\n.target {}\n.address_size 64\n\n",
            arch.replace("compute_", "sm_")
        );
        for kernel in kernels(source) {
            let symbol = if kernel.c_linkage {
                kernel.name.clone()
            } else {
                mangle(&kernel.name, kernel.params.len())
            };
            ptx.push_str(&format!(".visible .entry {}(\n", symbol));
            for (i, ty) in kernel.params.iter().enumerate() {
                let sep = if i + 1 < kernel.params.len() { "," } else { "" };
                ptx.push_str(&format!("\t.param {} {}_param_{}{}\n", ty, symbol, i, sep));
            }
            ptx.push_str(")\n{\n\tret;\n}\n\n");
        }

        CompilerOutput::success(ptx.into_bytes(), log)
    }
}

fn unrecognized(flag: &str) -> CompilerOutput {
    CompilerOutput::failure(
        5,
        "NVRTC_ERROR_INVALID_OPTION",
        format!("nvrtc error   : unrecognized option {}\n", flag),
    )
}

fn include_target(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("#include")?.trim();
    let rest = rest.strip_prefix('"')?;
    rest.split('"').next()
}

/// True when a printf call's format string has more conversions than arguments.
fn lacks_format_args(call: &str) -> bool {
    let Some(body) = call.strip_prefix('"') else {
        return false;
    };

    let mut specs = 0;
    let mut chars = body.char_indices().peekable();
    let mut end = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => {
                end = Some(i);
                break;
            }
            '%' => {
                if chars.peek().map(|(_, c)| *c) == Some('%') {
                    chars.next();
                } else {
                    specs += 1;
                }
            }
            _ => {}
        }
    }

    let Some(end) = end else {
        return false;
    };
    let mut depth = 0;
    let mut args = 0;
    for c in body[end + 1..].chars() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => break,
            ')' => depth -= 1,
            ',' if depth == 0 => args += 1,
            _ => {}
        }
    }
    specs > args
}

/// Open `extern "C" { ... }` blocks, tracked by brace depth.
#[derive(Default)]
struct LinkageBlocks {
    depth: usize,
    open: Vec<usize>,
}

impl LinkageBlocks {
    fn in_block(&self) -> bool {
        !self.open.is_empty()
    }

    fn scan(&mut self, code: &str) {
        let mut rest = code;
        while let Some(at) = rest.find(['{', '}']) {
            if rest.as_bytes()[at] == b'{' {
                if rest[..at].trim_end().ends_with("extern \"C\"") {
                    self.open.push(self.depth);
                }
                self.depth += 1;
            } else {
                self.depth = self.depth.saturating_sub(1);
                if self.open.last() == Some(&self.depth) {
                    self.open.pop();
                }
            }
            rest = &rest[at + 1..];
        }
    }
}

fn kernels(source: &str) -> Vec<Kernel> {
    let mut found = Vec::new();
    let mut blocks = LinkageBlocks::default();

    for line in source.lines() {
        let code = line.split("//").next().unwrap_or(line);
        let Some(at) = code.find("__global__") else {
            blocks.scan(code);
            continue;
        };

        blocks.scan(&code[..at]);
        let c_linkage = code[..at].contains("extern \"C\"") || blocks.in_block();
        blocks.scan(&code[at..]);

        let rest = code[at + "__global__".len()..].trim_start();
        let rest = rest.strip_prefix("void").unwrap_or(rest).trim_start();
        if let Some(open) = rest.find('(') {
            let name = rest[..open].trim().to_string();
            let close = rest[open..].find(')').map_or(rest.len(), |c| open + c);
            let params = param_types(&rest[open + 1..close]);
            found.push(Kernel {
                name,
                params,
                c_linkage,
            });
        }
    }

    found
}

fn param_types(list: &str) -> Vec<&'static str> {
    let list = list.trim();
    if list.is_empty() || list == "void" {
        return Vec::new();
    }
    list.split(',')
        .map(|param| {
            if param.contains('*') {
                ".u64"
            } else if param.contains("double") {
                ".f64"
            } else if param.contains("float") {
                ".f32"
            } else if param.contains("long long") {
                ".u64"
            } else if param.contains("bool") {
                ".u8"
            } else {
                ".u32"
            }
        })
        .collect()
}

fn mangle(name: &str, params: usize) -> String {
    let suffix = if params == 0 {
        "v".to_string()
    } else {
        "j".repeat(params)
    };
    format!("_Z{}{}{}", name.len(), name, suffix)
}

fn param_width(ty: &str) -> usize {
    match ty {
        ".u64" | ".s64" | ".f64" | ".b64" => 8,
        ".u8" | ".s8" | ".b8" => 1,
        ".u16" | ".s16" | ".b16" => 2,
        _ => 4,
    }
}

/// One recorded launch.
#[derive(Debug, Clone)]
pub struct Launch {
    pub kernel: String,
    pub config: LaunchConfig,
    pub args: Vec<Vec<u8>>,
    /// Buffers behind pointer arguments, as seen at launch time.
    pub pointees: Vec<Option<Vec<u8>>>,
}

#[derive(Debug, Default)]
pub struct DriverState {
    modules: HashMap<usize, Vec<(String, Vec<usize>)>>,
    next_module: usize,
    pub loaded: usize,
    pub unloaded: Vec<ModuleHandle>,
    pub resolves: Vec<String>,
    pub launches: Vec<Launch>,
    pub syncs: usize,
    pub fail_launch: Option<DriverError>,
    pub fail_sync: Option<DriverError>,
}

pub struct FakeDriver {
    state: Rc<RefCell<DriverState>>,
}

impl FakeDriver {
    pub fn new() -> (Self, Rc<RefCell<DriverState>>) {
        let state = Rc::new(RefCell::new(DriverState::default()));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

fn encode(module: usize, index: usize) -> SymbolHandle {
    SymbolHandle::from_raw((module << 16) | index)
}

fn decode(symbol: SymbolHandle) -> (usize, usize) {
    (symbol.as_raw() >> 16, symbol.as_raw() & 0xffff)
}

impl Driver for FakeDriver {
    fn target_arch(&self) -> Option<String> {
        Some(ARCH.to_string())
    }

    fn load(&self, artifact: &Artifact) -> Result<ModuleHandle, DriverError> {
        let text = String::from_utf8_lossy(artifact.as_bytes()).into_owned();
        if !text.contains(".version") {
            return Err(DriverError::new(218, "a PTX JIT compilation failed"));
        }

        let mut kernels: Vec<(String, Vec<usize>)> = Vec::new();
        let mut in_params = false;
        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(at) = trimmed.find(".entry ") {
                let name = trimmed[at + ".entry ".len()..]
                    .split('(')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_string();
                kernels.push((name, Vec::new()));
                in_params = true;
            } else if in_params && trimmed.starts_with(')') {
                in_params = false;
            } else if in_params && trimmed.starts_with(".param") {
                if let (Some(kernel), Some(ty)) = (kernels.last_mut(), trimmed.split_whitespace().nth(1)) {
                    kernel.1.push(param_width(ty));
                }
            }
        }

        let mut state = self.state.borrow_mut();
        state.next_module += 1;
        let handle = state.next_module;
        state.modules.insert(handle, kernels);
        state.loaded += 1;
        Ok(ModuleHandle::from_raw(handle))
    }

    fn resolve_symbol(
        &self,
        module: ModuleHandle,
        name: &str,
    ) -> Result<Option<SymbolHandle>, DriverError> {
        let mut state = self.state.borrow_mut();
        state.resolves.push(name.to_string());
        let kernels = state
            .modules
            .get(&module.as_raw())
            .ok_or_else(|| DriverError::new(400, "invalid resource handle"))?;
        Ok(kernels
            .iter()
            .position(|(kernel, _)| kernel == name)
            .map(|index| encode(module.as_raw(), index)))
    }

    fn launch(
        &self,
        symbol: SymbolHandle,
        config: &LaunchConfig,
        args: &[MarshaledValue],
    ) -> Result<(), DriverError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_launch.take() {
            return Err(err);
        }

        let (module, index) = decode(symbol);
        let (name, widths) = state
            .modules
            .get(&module)
            .and_then(|kernels| kernels.get(index))
            .cloned()
            .ok_or_else(|| DriverError::new(400, "invalid resource handle"))?;

        let sizes: Vec<usize> = args.iter().map(MarshaledValue::byte_size).collect();
        if sizes != widths {
            return Err(DriverError::new(1, "invalid argument"));
        }

        state.launches.push(Launch {
            kernel: name,
            config: *config,
            args: args.iter().map(|a| a.as_bytes().to_vec()).collect(),
            pointees: args.iter().map(|a| a.pointee().map(<[u8]>::to_vec)).collect(),
        });
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DriverError> {
        let mut state = self.state.borrow_mut();
        state.syncs += 1;
        match state.fail_sync.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn unload(&self, module: ModuleHandle) {
        let mut state = self.state.borrow_mut();
        state.modules.remove(&module.as_raw());
        state.unloaded.push(module);
    }
}

/// A context over the fakes, plus handles to inspect them.
pub fn fake_context() -> (Context, Rc<RefCell<DriverState>>, Rc<RefCell<Vec<String>>>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let compiler = FakeNvrtc::default();
    let sources = Rc::clone(&compiler.sources);
    let (driver, state) = FakeDriver::new();
    (Context::new(compiler, driver), state, sources)
}

/// A driver that keeps the trait's default `target_arch`, as a backend that
/// cannot query its device would.
pub struct ArchUnknown(FakeDriver);

impl Driver for ArchUnknown {
    fn load(&self, artifact: &Artifact) -> Result<ModuleHandle, DriverError> {
        self.0.load(artifact)
    }

    fn resolve_symbol(
        &self,
        module: ModuleHandle,
        name: &str,
    ) -> Result<Option<SymbolHandle>, DriverError> {
        self.0.resolve_symbol(module, name)
    }

    fn launch(
        &self,
        symbol: SymbolHandle,
        config: &LaunchConfig,
        args: &[MarshaledValue],
    ) -> Result<(), DriverError> {
        self.0.launch(symbol, config, args)
    }

    fn synchronize(&self) -> Result<(), DriverError> {
        self.0.synchronize()
    }

    fn unload(&self, module: ModuleHandle) {
        self.0.unload(module)
    }
}

/// Like [`fake_context`], but the driver reports no architecture.
pub fn fake_context_without_arch() -> (Context, Rc<RefCell<DriverState>>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let (driver, state) = FakeDriver::new();
    (Context::new(FakeNvrtc::default(), ArchUnknown(driver)), state)
}
