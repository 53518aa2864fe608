//! Bowl - the runtime core of a small stack-oriented interpreter
//!
//! This library provides the bowl virtual machine: a uniform heap of tagged
//! values with a relocating collector, the frame-chain root protocol, the
//! persistent containers and the native module loader. For C/C++ modules,
//! use the FFI module functions.

pub mod config;
pub mod ffi;
pub mod vm;

// Re-export commonly used types
pub use config::Settings;
pub use ffi::{BowlFunction, BowlFunctionEntry, BowlModuleFunction, BowlResult};
pub use vm::{Thrown, ValueRef, ValueType, Vm, VmResult};
