//! The compilation pipeline: source + options in, artifact or diagnostics out.

use std::borrow::Cow;
use std::fmt;

use crate::error::CompilationFailure;
use crate::runtime::diagnostics::{self, Diagnostic};
use crate::runtime::options::CompileOptions;

const GLOBAL: &str = "__global__";
const EXTERN_C: &str = "extern \"C\"";

/// Outcome reported by the external compiler itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileStatus {
    Success,
    Failed { code: i32, description: String },
}

impl CompileStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileStatus::Success)
    }
}

/// Everything the external compiler hands back for one program.
#[derive(Debug, Clone)]
pub struct CompilerOutput {
    pub status: CompileStatus,
    pub artifact: Option<Vec<u8>>,
    /// Full diagnostic text, captured whether or not compilation succeeded.
    pub log: String,
}

impl CompilerOutput {
    pub fn success(artifact: Vec<u8>, log: impl Into<String>) -> Self {
        Self {
            status: CompileStatus::Success,
            artifact: Some(artifact),
            log: log.into(),
        }
    }

    pub fn failure(code: i32, description: impl Into<String>, log: impl Into<String>) -> Self {
        Self {
            status: CompileStatus::Failed {
                code,
                description: description.into(),
            },
            artifact: None,
            log: log.into(),
        }
    }
}

/// Source-to-image compiler such as NVRTC.
pub trait Compiler {
    fn compile(&self, name: &str, source: &str, flags: &[String]) -> CompilerOutput;
}

/// A compiled image, ready to be loaded by a driver.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    name: String,
    bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Program name the image was compiled under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Kernel names declared by `.entry` directives, for PTX images.
    pub fn entry_points(&self) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.bytes);
        text.lines()
            .filter_map(|line| {
                let mut tokens = line.split_whitespace();
                tokens.by_ref().find(|t| *t == ".entry")?;
                let name = tokens.next()?;
                let name = name.split('(').next().unwrap_or(name);
                (!name.is_empty()).then(|| name.to_string())
            })
            .collect()
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A warning from a compilation that otherwise succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationWarning {
    pub diagnostic: Diagnostic,
}

impl CompilationWarning {
    pub fn message(&self) -> &str {
        &self.diagnostic.message
    }
}

impl fmt::Display for CompilationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.diagnostic.raw_line)
    }
}

/// A successful compilation.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub artifact: Artifact,
    /// Flags exactly as handed to the compiler.
    pub flags: Vec<String>,
    pub warnings: Vec<CompilationWarning>,
}

/// Compile `source` and classify the result.
///
/// The compiler log is always parsed. The compilation fails if the compiler
/// reports failure or if any diagnostic is an error; warnings on a
/// successful compilation are logged and returned alongside the artifact.
pub fn compile(
    compiler: &dyn Compiler,
    name: &str,
    source: &str,
    options: &CompileOptions,
    default_arch: Option<&str>,
) -> Result<Compiled, CompilationFailure> {
    let flags = options.flatten(default_arch);
    let source = apply_linkage(source, options.no_extern);
    log::debug!("compiling {} with flags {:?}", name, flags);

    let output = compiler.compile(name, &source, &flags);
    let parsed = diagnostics::parse(&output.log);
    let has_errors = diagnostics::errors(&parsed).next().is_some();

    let status = match &output.status {
        CompileStatus::Success => None,
        CompileStatus::Failed { code, description } => {
            Some(format!("{} (code {})", description, code))
        }
    };

    let bytes = match output.artifact {
        Some(bytes) if status.is_none() && !has_errors => bytes,
        artifact => {
            let status = status.or_else(|| {
                artifact
                    .is_none()
                    .then(|| "compiler produced no artifact".to_string())
            });
            log::debug!("compilation of {} failed: {:?}", name, status);
            return Err(CompilationFailure {
                diagnostics: parsed,
                log: output.log,
                status,
            });
        }
    };

    let warnings: Vec<CompilationWarning> = diagnostics::warnings(&parsed)
        .cloned()
        .map(|diagnostic| CompilationWarning { diagnostic })
        .collect();
    for warning in &warnings {
        log::warn!(target: "cudaffi::compile", "{}", warning);
    }

    log::info!(
        "compiled {} ({} bytes, {} warning(s))",
        name,
        bytes.len(),
        warnings.len()
    );

    Ok(Compiled {
        artifact: Artifact::new(name, bytes),
        flags,
        warnings,
    })
}

/// Give entry points unmangled linkage so they can be looked up by name.
///
/// By default the whole source is wrapped in an `extern "C"` block; a
/// `#line` directive keeps diagnostics pointing at the caller's lines. With
/// `no_extern` the source is kept as written unless it has exactly one
/// `__global__` declaration and that one has C++ linkage, in which case
/// `extern "C"` is put in front of that declaration. Templates and `static`
/// kernels cannot take C linkage and are left alone.
pub fn apply_linkage(source: &str, no_extern: bool) -> Cow<'_, str> {
    if !no_extern {
        return Cow::Owned(format!("{} {{\n#line 1\n{}\n}}\n", EXTERN_C, source));
    }

    match entry_declarations(source).as_slice() {
        [EntryDecl {
            start,
            linkage: Linkage::Cxx,
        }] => {
            let mut patched = String::with_capacity(source.len() + EXTERN_C.len() + 1);
            patched.push_str(&source[..*start]);
            patched.push_str(EXTERN_C);
            patched.push(' ');
            patched.push_str(&source[*start..]);
            Cow::Owned(patched)
        }
        _ => Cow::Borrowed(source),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Linkage {
    C,
    Cxx,
    /// `template` or `static`: C linkage is not available.
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryDecl {
    /// Byte offset of the first token of the declaration.
    start: usize,
    linkage: Linkage,
}

#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    Ident(&'a str),
    Literal(&'a str),
    Punct(u8),
}

/// Progress through an `extern "C"` linkage specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExternState {
    None,
    Keyword,
    Linkage,
}

#[derive(Debug, Default)]
struct Decl {
    start: Option<usize>,
    extern_c: bool,
    fixed: bool,
}

/// Every `__global__` declaration in code, with where it starts and its linkage.
///
/// Comments, string and character literals and preprocessor lines are
/// skipped; `extern "C" { ... }` blocks are tracked by brace depth.
fn entry_declarations(source: &str) -> Vec<EntryDecl> {
    let bytes = source.as_bytes();
    let mut entries = Vec::new();
    // One flag per open brace: whether it opened an `extern "C"` block.
    let mut braces: Vec<bool> = Vec::new();
    let mut decl = Decl::default();
    let mut linkage_spec = ExternState::None;
    let mut line_start = true;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\n' {
            line_start = true;
            i += 1;
            continue;
        }
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if line_start && b == b'#' {
            i = directive_end(bytes, i);
            decl = Decl::default();
            continue;
        }
        line_start = false;

        if bytes[i..].starts_with(b"//") {
            i = find(bytes, i, b"\n").unwrap_or(bytes.len());
            continue;
        }
        if bytes[i..].starts_with(b"/*") {
            i = find(bytes, i + 2, b"*/").map_or(bytes.len(), |end| end + 2);
            continue;
        }

        let at = i;
        let token = if b == b'"' || b == b'\'' {
            i = quoted_end(bytes, i);
            Token::Literal(&source[at..i])
        } else if is_ident_byte(b) {
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            Token::Ident(&source[at..i])
        } else {
            i += 1;
            Token::Punct(b)
        };

        let opens_extern_block =
            linkage_spec == ExternState::Linkage && matches!(token, Token::Punct(b'{'));
        linkage_spec = match (linkage_spec, token) {
            (_, Token::Ident("extern")) => ExternState::Keyword,
            (ExternState::Keyword, Token::Literal("\"C\"")) => ExternState::Linkage,
            (ExternState::Linkage, Token::Punct(b'{')) => ExternState::None,
            (ExternState::Linkage, _) => {
                decl.extern_c = true;
                ExternState::None
            }
            _ => ExternState::None,
        };

        match token {
            Token::Punct(b'{') => {
                braces.push(opens_extern_block);
                decl = Decl::default();
            }
            Token::Punct(b'}') => {
                braces.pop();
                decl = Decl::default();
            }
            Token::Punct(b';') => decl = Decl::default(),
            _ => {
                let start = *decl.start.get_or_insert(at);
                match token {
                    Token::Ident("template") | Token::Ident("static") => decl.fixed = true,
                    Token::Ident(GLOBAL) => {
                        let linkage = if decl.fixed {
                            Linkage::Fixed
                        } else if decl.extern_c || braces.contains(&true) {
                            Linkage::C
                        } else {
                            Linkage::Cxx
                        };
                        entries.push(EntryDecl { start, linkage });
                    }
                    _ => {}
                }
            }
        }
    }

    entries
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || !b.is_ascii()
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| from + pos)
}

/// End of a preprocessor line, honouring backslash continuations. Points at
/// the terminating newline.
fn directive_end(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1) == Some(&b'\n') => i += 2,
            b'\n' => return i,
            _ => i += 1,
        }
    }
    i
}

/// One past the closing quote of the literal opening at `from`.
fn quoted_end(bytes: &[u8], from: usize) -> usize {
    let quote = bytes[from];
    let mut i = from + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            b'\n' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}
