mod frame;
mod gc;
mod heap;
mod map;
mod value;
#[allow(clippy::module_inception)]
mod vm;

pub use frame::REGISTER_COUNT;
pub use heap::{Heap, INITIAL_SPACE_WORDS};
pub use value::{ValueRef, ValueType};
pub use vm::{Thrown, Vm, VmResult};
