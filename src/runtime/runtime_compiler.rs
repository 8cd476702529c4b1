//! NVRTC and CUDA driver API backend.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::ptr;

use crate::error::DriverError;
use crate::runtime::compiler::{Artifact, Compiler, CompilerOutput};
use crate::runtime::data::{KernelParams, MarshaledValue};
use crate::runtime::driver::{Driver, LaunchConfig, ModuleHandle, SymbolHandle};
use crate::runtime::options::DEFAULT_ARCH;

type NvrtcProgram = *mut c_void;
type CuContext = *mut c_void;
type CuModule = *mut c_void;
type CuFunction = *mut c_void;
type CuDevice = c_int;

// NVRTC FFI bindings
#[link(name = "nvrtc")]
extern "C" {
    fn nvrtcCreateProgram(
        prog: *mut NvrtcProgram,
        src: *const c_char,
        name: *const c_char,
        num_headers: c_int,
        headers: *const *const c_char,
        include_names: *const *const c_char,
    ) -> c_int;

    fn nvrtcCompileProgram(
        prog: NvrtcProgram,
        num_options: c_int,
        options: *const *const c_char,
    ) -> c_int;

    fn nvrtcGetPTXSize(prog: NvrtcProgram, ptx_size: *mut usize) -> c_int;
    fn nvrtcGetPTX(prog: NvrtcProgram, ptx: *mut c_char) -> c_int;
    fn nvrtcDestroyProgram(prog: *mut NvrtcProgram) -> c_int;
    fn nvrtcGetErrorString(result: c_int) -> *const c_char;
    fn nvrtcGetProgramLog(prog: NvrtcProgram, log: *mut c_char) -> c_int;
    fn nvrtcGetProgramLogSize(prog: NvrtcProgram, log_size: *mut usize) -> c_int;
}

// CUDA Driver API bindings
#[link(name = "cuda")]
extern "C" {
    fn cuInit(flags: c_uint) -> c_int;
    fn cuDeviceGet(device: *mut CuDevice, ordinal: c_int) -> c_int;
    fn cuDeviceGetAttribute(value: *mut c_int, attrib: c_int, device: CuDevice) -> c_int;
    #[link_name = "cuCtxCreate_v2"]
    fn cuCtxCreate(ctx: *mut CuContext, flags: c_uint, device: CuDevice) -> c_int;
    #[link_name = "cuCtxDestroy_v2"]
    fn cuCtxDestroy(ctx: CuContext) -> c_int;
    fn cuCtxSetCurrent(ctx: CuContext) -> c_int;
    fn cuCtxSynchronize() -> c_int;
    fn cuModuleLoadData(module: *mut CuModule, image: *const c_void) -> c_int;
    fn cuModuleUnload(module: CuModule) -> c_int;
    fn cuModuleGetFunction(func: *mut CuFunction, module: CuModule, name: *const c_char) -> c_int;
    fn cuLaunchKernel(
        f: CuFunction,
        grid_dim_x: c_uint,
        grid_dim_y: c_uint,
        grid_dim_z: c_uint,
        block_dim_x: c_uint,
        block_dim_y: c_uint,
        block_dim_z: c_uint,
        shared_mem_bytes: c_uint,
        stream: *mut c_void,
        kernel_params: *mut *mut c_void,
        extra: *mut *mut c_void,
    ) -> c_int;
    fn cuGetErrorString(error: c_int, p_str: *mut *const c_char) -> c_int;
}

pub const NVRTC_SUCCESS: c_int = 0;
pub const CUDA_SUCCESS: c_int = 0;
pub const CUDA_ERROR_NOT_FOUND: c_int = 500;

const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: c_int = 75;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: c_int = 76;

fn nvrtc_error_string(result: c_int) -> String {
    unsafe {
        let msg = nvrtcGetErrorString(result);
        if msg.is_null() {
            return format!("NVRTC error {}", result);
        }
        CStr::from_ptr(msg).to_string_lossy().into_owned()
    }
}

fn cuda_error_string(result: c_int) -> String {
    unsafe {
        let mut msg = ptr::null();
        if cuGetErrorString(result, &mut msg) != CUDA_SUCCESS || msg.is_null() {
            return format!("CUDA error {}", result);
        }
        CStr::from_ptr(msg).to_string_lossy().into_owned()
    }
}

fn check(result: c_int, what: &str) -> Result<(), DriverError> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(DriverError::new(
            result,
            format!("{}: {}", what, cuda_error_string(result)),
        ))
    }
}

/// Runtime compiler backed by NVRTC. Produces PTX.
#[derive(Debug, Default)]
pub struct NvrtcCompiler;

impl NvrtcCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for NvrtcCompiler {
    fn compile(&self, name: &str, source: &str, flags: &[String]) -> CompilerOutput {
        let invalid = |what: &str| {
            CompilerOutput::failure(-1, format!("{} contains a nul byte", what), "")
        };
        let Ok(src_cstring) = CString::new(source) else {
            return invalid("source");
        };
        let Ok(name_cstring) = CString::new(name) else {
            return invalid("program name");
        };
        let Ok(options) = flags
            .iter()
            .map(|f| CString::new(f.as_str()))
            .collect::<Result<Vec<_>, _>>()
        else {
            return invalid("compile option");
        };
        let option_ptrs: Vec<*const c_char> = options.iter().map(|s| s.as_ptr()).collect();

        unsafe {
            let mut prog = ptr::null_mut();
            let result = nvrtcCreateProgram(
                &mut prog,
                src_cstring.as_ptr(),
                name_cstring.as_ptr(),
                0,
                ptr::null(),
                ptr::null(),
            );
            if result != NVRTC_SUCCESS {
                return CompilerOutput::failure(result, nvrtc_error_string(result), "");
            }

            let result =
                nvrtcCompileProgram(prog, option_ptrs.len() as c_int, option_ptrs.as_ptr());

            // The log is collected regardless of the outcome; it carries warnings too.
            let log = read_program_buffer(prog, nvrtcGetProgramLogSize, nvrtcGetProgramLog)
                .map(|log| String::from_utf8_lossy(&log).into_owned());

            if result != NVRTC_SUCCESS {
                nvrtcDestroyProgram(&mut prog);
                return CompilerOutput::failure(
                    result,
                    nvrtc_error_string(result),
                    log.unwrap_or_default(),
                );
            }

            let log = match log {
                Ok(log) => log,
                Err(code) => {
                    nvrtcDestroyProgram(&mut prog);
                    return CompilerOutput::failure(
                        code,
                        format!("failed to read compile log: {}", nvrtc_error_string(code)),
                        "",
                    );
                }
            };

            let ptx = read_program_buffer(prog, nvrtcGetPTXSize, nvrtcGetPTX);
            nvrtcDestroyProgram(&mut prog);

            match ptx {
                Ok(ptx) if !ptx.is_empty() => CompilerOutput::success(ptx, log),
                Ok(_) => CompilerOutput::failure(-1, "NVRTC returned an empty PTX image", log),
                Err(code) => CompilerOutput::failure(
                    code,
                    format!("failed to read PTX: {}", nvrtc_error_string(code)),
                    log,
                ),
            }
        }
    }
}

type SizeQuery = unsafe extern "C" fn(NvrtcProgram, *mut usize) -> c_int;
type BufferRead = unsafe extern "C" fn(NvrtcProgram, *mut c_char) -> c_int;

/// Copy one of a program's NVRTC buffers (log or PTX), without the trailing nul.
fn read_program_buffer(
    prog: NvrtcProgram,
    size_of: SizeQuery,
    read: BufferRead,
) -> Result<Vec<u8>, c_int> {
    let mut size = 0;
    let result = unsafe { size_of(prog, &mut size) };
    if result != NVRTC_SUCCESS {
        return Err(result);
    }

    let mut buffer = vec![0u8; size.max(1)];
    let result = unsafe { read(prog, buffer.as_mut_ptr() as *mut c_char) };
    if result != NVRTC_SUCCESS {
        return Err(result);
    }

    if let Some(end) = buffer.iter().position(|&b| b == 0) {
        buffer.truncate(end);
    }
    Ok(buffer)
}

/// CUDA driver API on one device, with a context owned by this value.
pub struct CudaDriver {
    context: CuContext,
    device: CuDevice,
}

impl CudaDriver {
    pub fn new(device_id: i32) -> Result<Self, DriverError> {
        unsafe {
            check(cuInit(0), "failed to initialize CUDA driver")?;

            let mut device = 0;
            check(
                cuDeviceGet(&mut device, device_id),
                &format!("failed to get device {}", device_id),
            )?;

            let mut context = ptr::null_mut();
            check(cuCtxCreate(&mut context, 0, device), "failed to create context")?;

            log::info!("created CUDA context on device {}", device_id);
            Ok(Self { context, device })
        }
    }

    pub fn compute_capability(&self) -> Result<(i32, i32), DriverError> {
        unsafe {
            let mut major = 0;
            let mut minor = 0;
            check(
                cuDeviceGetAttribute(
                    &mut major,
                    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
                    self.device,
                ),
                "failed to query compute capability",
            )?;
            check(
                cuDeviceGetAttribute(
                    &mut minor,
                    CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
                    self.device,
                ),
                "failed to query compute capability",
            )?;
            Ok((major, minor))
        }
    }

    fn make_current(&self) -> Result<(), DriverError> {
        unsafe { check(cuCtxSetCurrent(self.context), "failed to bind context") }
    }
}

impl Driver for CudaDriver {
    fn target_arch(&self) -> Option<String> {
        match self.compute_capability() {
            Ok((major, minor)) => Some(format!("compute_{}{}", major, minor)),
            Err(err) => {
                log::warn!("{}; compiling for {}", err, DEFAULT_ARCH);
                None
            }
        }
    }

    fn load(&self, artifact: &Artifact) -> Result<ModuleHandle, DriverError> {
        self.make_current()?;
        let bytes = artifact.as_bytes();
        let bytes = bytes.strip_suffix(&[0u8]).unwrap_or(bytes);
        let image = CString::new(bytes)
            .map_err(|_| DriverError::new(-1, "artifact contains an interior nul byte"))?;

        unsafe {
            let mut module = ptr::null_mut();
            check(
                cuModuleLoadData(&mut module, image.as_ptr() as *const c_void),
                "failed to load PTX module",
            )?;
            Ok(ModuleHandle::from_raw(module as usize))
        }
    }

    fn resolve_symbol(
        &self,
        module: ModuleHandle,
        name: &str,
    ) -> Result<Option<SymbolHandle>, DriverError> {
        let Ok(name_cstring) = CString::new(name) else {
            return Ok(None);
        };
        self.make_current()?;

        unsafe {
            let mut func = ptr::null_mut();
            let result =
                cuModuleGetFunction(&mut func, module.as_raw() as CuModule, name_cstring.as_ptr());
            if result == CUDA_ERROR_NOT_FOUND {
                return Ok(None);
            }
            check(result, &format!("failed to get function '{}'", name))?;
            Ok(Some(SymbolHandle::from_raw(func as usize)))
        }
    }

    fn launch(
        &self,
        symbol: SymbolHandle,
        config: &LaunchConfig,
        args: &[MarshaledValue],
    ) -> Result<(), DriverError> {
        self.make_current()?;
        let mut params = KernelParams::new(args);

        unsafe {
            check(
                cuLaunchKernel(
                    symbol.as_raw() as CuFunction,
                    config.grid_dim.0,
                    config.grid_dim.1,
                    config.grid_dim.2,
                    config.block_dim.0,
                    config.block_dim.1,
                    config.block_dim.2,
                    config.shared_mem_bytes,
                    ptr::null_mut(), // default stream
                    params.as_kernel_params(),
                    ptr::null_mut(),
                ),
                "failed to launch kernel",
            )
        }
    }

    fn synchronize(&self) -> Result<(), DriverError> {
        self.make_current()?;
        unsafe { check(cuCtxSynchronize(), "failed to synchronize") }
    }

    fn unload(&self, module: ModuleHandle) {
        if self.make_current().is_err() {
            return;
        }
        let result = unsafe { cuModuleUnload(module.as_raw() as CuModule) };
        if result != CUDA_SUCCESS {
            log::warn!("failed to unload module: {}", cuda_error_string(result));
        }
    }
}

impl Drop for CudaDriver {
    fn drop(&mut self) {
        unsafe {
            cuCtxDestroy(self.context);
        }
    }
}
