use std::env;
use std::path::{Path, PathBuf};

/// Candidate toolkit roots, most specific first.
fn cuda_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for var in ["CUDA_PATH", "CUDA_HOME", "CUDA_ROOT"] {
        if let Ok(path) = env::var(var) {
            roots.push(PathBuf::from(path));
        }
    }
    if cfg!(windows) {
        roots.push(PathBuf::from(
            "C:/Program Files/NVIDIA GPU Computing Toolkit/CUDA/v12.9",
        ));
    } else {
        roots.push(PathBuf::from("/usr/local/cuda"));
        roots.push(PathBuf::from("/opt/cuda"));
    }
    roots
}

fn lib_dirs(root: &Path) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![root.join("lib/x64")]
    } else {
        vec![root.join("lib64"), root.join("lib64/stubs"), root.join("lib")]
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for var in ["CUDA_PATH", "CUDA_HOME", "CUDA_ROOT"] {
        println!("cargo:rerun-if-env-changed={}", var);
    }

    // Without the cuda feature nothing links against the toolkit.
    if env::var("CARGO_FEATURE_CUDA").is_err() {
        return;
    }

    let mut found = false;
    for root in cuda_roots() {
        for dir in lib_dirs(&root) {
            if dir.exists() {
                println!("cargo:rustc-link-search=native={}", dir.display());
                found = true;
            }
        }
        if found {
            break;
        }
    }

    if !found {
        println!("cargo:warning=CUDA toolkit not found; set CUDA_PATH to link nvrtc and cuda");
    }

    println!("cargo:rustc-link-lib=nvrtc");
    println!("cargo:rustc-link-lib=cuda");
}
