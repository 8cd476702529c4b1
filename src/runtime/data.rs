//! Host values and their device-call representation.
//!
//! `cuLaunchKernel` takes its arguments as an array of pointers, each
//! pointing at the bytes of one parameter. [`marshal`] turns a [`HostValue`]
//! into a [`MarshaledValue`] owning those bytes, and [`KernelParams`] builds
//! the pointer array over a slice of them for the duration of one launch.

use std::ffi::CString;
use std::fmt;
use std::marker::PhantomData;
use std::os::raw::c_void;

use crate::error::{CudaError, Result};

/// A value supplied by the caller for one kernel parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    List(Vec<HostValue>),
    None,
}

impl HostValue {
    /// Short name of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            HostValue::Int(_) => "int",
            HostValue::UInt(_) => "uint",
            HostValue::Float(_) => "float",
            HostValue::Double(_) => "double",
            HostValue::Bool(_) => "bool",
            HostValue::Str(_) => "str",
            HostValue::List(_) => "list",
            HostValue::None => "none",
        }
    }
}

macro_rules! impl_from_host {
    ($variant:ident, $target:ty, [$($ty:ty),*]) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    HostValue::$variant(value as $target)
                }
            }
        )*
    };
}

impl_from_host!(Int, i64, [i8, i16, i32, i64, isize]);
impl_from_host!(UInt, u64, [u8, u16, u32, u64, usize]);

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Double(value)
    }
}

impl From<f32> for HostValue {
    fn from(value: f32) -> Self {
        HostValue::Float(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::Str(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::Str(value)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(values: Vec<HostValue>) -> Self {
        HostValue::List(values)
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::None
    }
}

impl PartialEq<i64> for HostValue {
    fn eq(&self, other: &i64) -> bool {
        match *self {
            HostValue::Int(v) => v == *other,
            HostValue::UInt(v) => i64::try_from(v).map_or(false, |v| v == *other),
            _ => false,
        }
    }
}

impl PartialEq<&str> for HostValue {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, HostValue::Str(s) if s == other)
    }
}

/// Build a `Vec<HostValue>` from heterogeneous expressions.
///
/// ```
/// use cudaffi::{host_args, HostValue};
///
/// let args = host_args![1, "blah", 2.5f32];
/// assert_eq!(args[1], HostValue::Str("blah".into()));
/// ```
#[macro_export]
macro_rules! host_args {
    () => {
        ::std::vec::Vec::<$crate::HostValue>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::HostValue::from($arg)),+]
    };
}

/// Device-compatible type of a marshaled parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CType {
    UInt,
    Int,
    ULongLong,
    LongLong,
    Float,
    Double,
    Bool,
    CharPtr,
}

impl CType {
    /// Width of the parameter slot in bytes.
    pub fn size(self) -> usize {
        match self {
            CType::UInt | CType::Int | CType::Float => 4,
            CType::ULongLong | CType::LongLong | CType::Double => 8,
            CType::Bool => 1,
            CType::CharPtr => std::mem::size_of::<*const u8>(),
        }
    }

    /// C spelling of the type.
    pub fn name(self) -> &'static str {
        match self {
            CType::UInt => "unsigned int",
            CType::Int => "int",
            CType::ULongLong => "unsigned long long",
            CType::LongLong => "long long",
            CType::Float => "float",
            CType::Double => "double",
            CType::Bool => "bool",
            CType::CharPtr => "char *",
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameter bytes, aligned for any scalar the driver may read.
#[repr(C, align(8))]
#[derive(Clone, Copy, PartialEq, Eq)]
struct Slot([u8; 8]);

/// One argument ready to be handed to the driver.
pub struct MarshaledValue {
    ctype: CType,
    slot: Slot,
    /// Buffer a pointer-typed slot refers to. Kept alive with the value.
    pointee: Option<CString>,
}

impl MarshaledValue {
    fn scalar(ctype: CType, bytes: &[u8]) -> Self {
        let mut slot = [0u8; 8];
        slot[..bytes.len()].copy_from_slice(bytes);
        Self {
            ctype,
            slot: Slot(slot),
            pointee: None,
        }
    }

    fn string(text: CString) -> Self {
        let addr = text.as_ptr() as usize;
        let mut value = Self::scalar(CType::CharPtr, &addr.to_ne_bytes());
        value.pointee = Some(text);
        value
    }

    pub fn ctype(&self) -> CType {
        self.ctype
    }

    pub fn byte_size(&self) -> usize {
        self.ctype.size()
    }

    /// The bytes the kernel receives for this parameter.
    pub fn as_bytes(&self) -> &[u8] {
        &self.slot.0[..self.byte_size()]
    }

    /// The nul-terminated buffer behind a `char *` parameter.
    pub fn pointee(&self) -> Option<&[u8]> {
        self.pointee.as_ref().map(|s| s.as_bytes_with_nul())
    }

    /// Address of the parameter bytes, as `cuLaunchKernel` expects.
    pub fn as_param_ptr(&self) -> *mut c_void {
        self.slot.0.as_ptr() as *mut c_void
    }
}

impl fmt::Debug for MarshaledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarshaledValue")
            .field("ctype", &self.ctype)
            .field("bytes", &self.as_bytes())
            .field("pointee", &self.pointee)
            .finish()
    }
}

/// Convert the argument at `position` into its device representation.
pub fn marshal(position: usize, value: &HostValue) -> Result<MarshaledValue> {
    let unsupported = |kind: &str| CudaError::UnsupportedArgumentType {
        position,
        kind: kind.to_string(),
    };

    let marshaled = match *value {
        HostValue::Int(v) => {
            if let Ok(v) = u32::try_from(v) {
                MarshaledValue::scalar(CType::UInt, &v.to_ne_bytes())
            } else if v >= 0 {
                MarshaledValue::scalar(CType::ULongLong, &(v as u64).to_ne_bytes())
            } else if let Ok(v) = i32::try_from(v) {
                MarshaledValue::scalar(CType::Int, &v.to_ne_bytes())
            } else {
                MarshaledValue::scalar(CType::LongLong, &v.to_ne_bytes())
            }
        }
        HostValue::UInt(v) => match u32::try_from(v) {
            Ok(v) => MarshaledValue::scalar(CType::UInt, &v.to_ne_bytes()),
            Err(_) => MarshaledValue::scalar(CType::ULongLong, &v.to_ne_bytes()),
        },
        HostValue::Float(v) => MarshaledValue::scalar(CType::Float, &v.to_ne_bytes()),
        HostValue::Double(v) => MarshaledValue::scalar(CType::Double, &v.to_ne_bytes()),
        HostValue::Bool(v) => MarshaledValue::scalar(CType::Bool, &[v as u8]),
        HostValue::Str(ref s) => {
            let text = CString::new(s.as_bytes())
                .map_err(|_| unsupported("str with interior nul byte"))?;
            MarshaledValue::string(text)
        }
        HostValue::List(_) | HostValue::None => return Err(unsupported(value.kind())),
    };

    Ok(marshaled)
}

/// Marshal every argument in order, stopping at the first failure.
pub fn marshal_all(args: &[HostValue]) -> Result<Vec<MarshaledValue>> {
    args.iter()
        .enumerate()
        .map(|(position, value)| marshal(position, value))
        .collect()
}

/// A host value paired with the device type chosen for it.
#[derive(Debug)]
pub struct CudaData {
    data: HostValue,
    value: MarshaledValue,
}

impl CudaData {
    pub fn new(data: impl Into<HostValue>) -> Result<Self> {
        let data = data.into();
        let value = marshal(0, &data)?;
        Ok(Self { data, value })
    }

    /// The original host value.
    pub fn data(&self) -> &HostValue {
        &self.data
    }

    pub fn ctype(&self) -> CType {
        self.value.ctype()
    }

    pub fn marshaled(&self) -> &MarshaledValue {
        &self.value
    }
}

/// Kernel parameter block for `cuLaunchKernel`.
///
/// Holds one pointer per marshaled value, each pointing at that value's
/// slot. The borrow keeps the values alive and unmoved for as long as the
/// block exists, which must cover the whole launch.
pub struct KernelParams<'a> {
    param_ptrs: Vec<*mut c_void>,
    _values: PhantomData<&'a [MarshaledValue]>,
}

impl<'a> KernelParams<'a> {
    pub fn new(values: &'a [MarshaledValue]) -> Self {
        Self {
            param_ptrs: values.iter().map(MarshaledValue::as_param_ptr).collect(),
            _values: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.param_ptrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.param_ptrs.is_empty()
    }

    /// The `void**` array; null when there are no parameters.
    pub fn as_kernel_params(&mut self) -> *mut *mut c_void {
        if self.param_ptrs.is_empty() {
            std::ptr::null_mut()
        } else {
            self.param_ptrs.as_mut_ptr()
        }
    }
}
