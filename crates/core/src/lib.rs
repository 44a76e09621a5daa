//! Ember Core: value representation, heap, and bytecode
//!
//! The shared foundation for the Ember compiler and runtime:
//!
//! - `value`: NaN-boxed 8-byte [`Value`] and the language's equality and
//!   number-formatting rules
//! - `object`: the heap object model (static strings/functions, GC-managed
//!   closures, classes, instances, arrays, builders)
//! - `heap`: the slot-arena heap, interning pools, constants array, and GC
//!   byte accounting
//! - `table`: open-addressed tables keyed by interned strings
//! - `chunk`: bytecode chunks with the compressed line map

pub mod chunk;
pub mod heap;
pub mod object;
pub mod table;
pub mod value;

pub use chunk::{BUILTIN_MODULE_COUNT, BitOp, BuiltinModule, Chunk, LineArray, OpCode, UINT24_MAX};
pub use heap::Heap;
pub use object::{
    FunId, HeapId, HeapObj, INVALID_SYMBOL, NativeId, ObjArray, ObjBoundMethod, ObjClass,
    ObjClosure, ObjFunction, ObjInstance, ObjString, ObjStringBuilder, ObjTypedArray, ObjUpvalue,
    StrId, TypedKind, TypedPayload, UpvalueState,
};
pub use table::{NumberPool, StringPool, Table, TableKind, UNSET_INDEX};
pub use value::{ObjRef, Value, format_number, values_equal};
