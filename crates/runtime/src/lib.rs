//! Ember Runtime: the virtual machine
//!
//! A stack-based bytecode interpreter with closures, classes, typed
//! arrays, builtin namespaces, module import caching, and a mark-and-sweep
//! garbage collector. `Vm::interpret` compiles and runs a source string;
//! `Vm::interpret_repl` additionally resets the stack afterwards.

pub mod debug;
pub mod format;
mod gc;
mod natives;
pub mod vm;

pub use vm::{FRAMES_MAX, InterpretResult, NativeArgs, NativeFn, STACK_MAX, Vm, VmOptions};
