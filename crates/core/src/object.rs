//! Heap Object Model
//!
//! Two families of objects exist:
//!
//! - **Static objects** — interned strings and compiled functions — are
//!   allocated once and live until the VM is torn down. They are never
//!   scanned or freed by the garbage collector, which makes every
//!   compile-time allocation trivially collection-safe. Native callables
//!   follow the same contract but are registered by the runtime.
//! - **GC-managed objects** — closures, upvalues, classes, instances, bound
//!   methods, arrays, typed arrays, and string builders — live in the slot
//!   arena owned by [`crate::heap::Heap`] and are reclaimed by mark-and-sweep.

use std::cell::Cell;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// Index of an interned string in the static string arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StrId(pub u32);

/// Index of a compiled function in the static function arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FunId(pub u32);

/// Index of a native callable in the runtime's registry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NativeId(pub u32);

/// Slot index in the GC-managed arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapId(pub u32);

/// Sentinel for an unset global-table inline cache slot.
pub const INVALID_SYMBOL: u32 = u32::MAX;

/// An interned, immutable string.
///
/// `symbol` caches the last globals-table slot this string resolved to; the
/// cache is verified against the entry key before every use, so a stale
/// value after a rehash only costs the fallback probe.
pub struct ObjString {
    pub bytes: Box<[u8]>,
    pub hash: u64,
    pub symbol: Cell<u32>,
}

impl ObjString {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lossy view for display; source strings are valid UTF-8, but interned
    /// builder contents may not be.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// A compiled function: bytecode plus call metadata.
///
/// `name` is `None` for the top-level script and the empty string for
/// lambdas; `id` is unique per compilation for diagnostics.
pub struct ObjFunction {
    pub arity: u16,
    pub upvalue_count: u16,
    pub id: u32,
    pub name: Option<StrId>,
    pub chunk: Chunk,
}

/// A function value together with its captured upvalues.
pub struct ObjClosure {
    pub function: FunId,
    pub upvalues: Vec<HeapId>,
}

/// Storage for a captured variable.
///
/// While the variable's stack slot is live the upvalue is *open* and points
/// at it; when the slot is popped the upvalue closes over the value and owns
/// it.
pub struct ObjUpvalue {
    pub state: UpvalueState,
}

#[derive(Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

impl ObjUpvalue {
    /// Stack slot of an open upvalue; `usize::MAX` once closed (sorts below
    /// every live slot).
    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }
}

pub struct ObjClass {
    pub name: Option<StrId>,
    pub methods: Table,
    /// Cached `init` method, nil when the class has none.
    pub initializer: Value,
}

pub struct ObjInstance {
    /// `None` for object literals and builtin namespaces.
    pub class: Option<HeapId>,
    pub fields: Table,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: HeapId,
}

/// A reference array: a growable payload of Values, scanned by the GC.
pub struct ObjArray {
    pub items: Vec<Value>,
}

/// Element type of a typed array.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypedKind {
    F64,
    F32,
    U32,
    I32,
    U16,
    I16,
    U8,
    I8,
}

impl TypedKind {
    pub fn element_size(self) -> usize {
        match self {
            TypedKind::F64 => 8,
            TypedKind::F32 | TypedKind::U32 | TypedKind::I32 => 4,
            TypedKind::U16 | TypedKind::I16 => 2,
            TypedKind::U8 | TypedKind::I8 => 1,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            TypedKind::F64 => "array-f64",
            TypedKind::F32 => "array-f32",
            TypedKind::U32 => "array-u32",
            TypedKind::I32 => "array-i32",
            TypedKind::U16 => "array-u16",
            TypedKind::I16 => "array-i16",
            TypedKind::U8 => "array-u8",
            TypedKind::I8 => "array-i8",
        }
    }
}

/// Packed numeric payload of a typed array. Reads materialize a number
/// Value; writes coerce by truncating cast, storing zero for non-numbers.
pub enum TypedPayload {
    F64(Vec<f64>),
    F32(Vec<f32>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U8(Vec<u8>),
    I8(Vec<i8>),
}

pub struct ObjTypedArray {
    pub data: TypedPayload,
}

/// Truncating numeric coercion: route through i64 so out-of-range values
/// wrap into the narrow type instead of saturating. NaN becomes 0.
#[inline]
fn coerce(value: Value) -> i64 {
    if value.is_number() { value.as_number() as i64 } else { 0 }
}

#[inline]
fn coerce_f64(value: Value) -> f64 {
    if value.is_number() { value.as_number() } else { 0.0 }
}

impl ObjTypedArray {
    pub fn new(kind: TypedKind, len: usize) -> ObjTypedArray {
        let data = match kind {
            TypedKind::F64 => TypedPayload::F64(vec![0.0; len]),
            TypedKind::F32 => TypedPayload::F32(vec![0.0; len]),
            TypedKind::U32 => TypedPayload::U32(vec![0; len]),
            TypedKind::I32 => TypedPayload::I32(vec![0; len]),
            TypedKind::U16 => TypedPayload::U16(vec![0; len]),
            TypedKind::I16 => TypedPayload::I16(vec![0; len]),
            TypedKind::U8 => TypedPayload::U8(vec![0; len]),
            TypedKind::I8 => TypedPayload::I8(vec![0; len]),
        };
        ObjTypedArray { data }
    }

    pub fn kind(&self) -> TypedKind {
        match self.data {
            TypedPayload::F64(_) => TypedKind::F64,
            TypedPayload::F32(_) => TypedKind::F32,
            TypedPayload::U32(_) => TypedKind::U32,
            TypedPayload::I32(_) => TypedKind::I32,
            TypedPayload::U16(_) => TypedKind::U16,
            TypedPayload::I16(_) => TypedKind::I16,
            TypedPayload::U8(_) => TypedKind::U8,
            TypedPayload::I8(_) => TypedKind::I8,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            TypedPayload::F64(v) => v.len(),
            TypedPayload::F32(v) => v.len(),
            TypedPayload::U32(v) => v.len(),
            TypedPayload::I32(v) => v.len(),
            TypedPayload::U16(v) => v.len(),
            TypedPayload::I16(v) => v.len(),
            TypedPayload::U8(v) => v.len(),
            TypedPayload::I8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Value {
        let n = match &self.data {
            TypedPayload::F64(v) => v[index],
            TypedPayload::F32(v) => f64::from(v[index]),
            TypedPayload::U32(v) => f64::from(v[index]),
            TypedPayload::I32(v) => f64::from(v[index]),
            TypedPayload::U16(v) => f64::from(v[index]),
            TypedPayload::I16(v) => f64::from(v[index]),
            TypedPayload::U8(v) => f64::from(v[index]),
            TypedPayload::I8(v) => f64::from(v[index]),
        };
        Value::number(n)
    }

    pub fn set(&mut self, index: usize, value: Value) {
        match &mut self.data {
            TypedPayload::F64(v) => v[index] = coerce_f64(value),
            TypedPayload::F32(v) => v[index] = coerce_f64(value) as f32,
            TypedPayload::U32(v) => v[index] = coerce(value) as u32,
            TypedPayload::I32(v) => v[index] = coerce(value) as i32,
            TypedPayload::U16(v) => v[index] = coerce(value) as u16,
            TypedPayload::I16(v) => v[index] = coerce(value) as i16,
            TypedPayload::U8(v) => v[index] = coerce(value) as u8,
            TypedPayload::I8(v) => v[index] = coerce(value) as i8,
        }
    }

    pub fn push(&mut self, value: Value) {
        match &mut self.data {
            TypedPayload::F64(v) => v.push(coerce_f64(value)),
            TypedPayload::F32(v) => v.push(coerce_f64(value) as f32),
            TypedPayload::U32(v) => v.push(coerce(value) as u32),
            TypedPayload::I32(v) => v.push(coerce(value) as i32),
            TypedPayload::U16(v) => v.push(coerce(value) as u16),
            TypedPayload::I16(v) => v.push(coerce(value) as i16),
            TypedPayload::U8(v) => v.push(coerce(value) as u8),
            TypedPayload::I8(v) => v.push(coerce(value) as i8),
        }
    }

    pub fn pop(&mut self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let last = self.get(self.len() - 1);
        self.truncate(self.len() - 1);
        Some(last)
    }

    pub fn truncate(&mut self, len: usize) {
        match &mut self.data {
            TypedPayload::F64(v) => v.truncate(len),
            TypedPayload::F32(v) => v.truncate(len),
            TypedPayload::U32(v) => v.truncate(len),
            TypedPayload::I32(v) => v.truncate(len),
            TypedPayload::U16(v) => v.truncate(len),
            TypedPayload::I16(v) => v.truncate(len),
            TypedPayload::U8(v) => v.truncate(len),
            TypedPayload::I8(v) => v.truncate(len),
        }
    }

    /// Grow to `len`, zero-filling; shrinking truncates.
    pub fn resize(&mut self, len: usize) {
        match &mut self.data {
            TypedPayload::F64(v) => v.resize(len, 0.0),
            TypedPayload::F32(v) => v.resize(len, 0.0),
            TypedPayload::U32(v) => v.resize(len, 0),
            TypedPayload::I32(v) => v.resize(len, 0),
            TypedPayload::U16(v) => v.resize(len, 0),
            TypedPayload::I16(v) => v.resize(len, 0),
            TypedPayload::U8(v) => v.resize(len, 0),
            TypedPayload::I8(v) => v.resize(len, 0),
        }
    }

    pub fn payload_bytes(&self) -> usize {
        let capacity = match &self.data {
            TypedPayload::F64(v) => v.capacity(),
            TypedPayload::F32(v) => v.capacity(),
            TypedPayload::U32(v) => v.capacity(),
            TypedPayload::I32(v) => v.capacity(),
            TypedPayload::U16(v) => v.capacity(),
            TypedPayload::I16(v) => v.capacity(),
            TypedPayload::U8(v) => v.capacity(),
            TypedPayload::I8(v) => v.capacity(),
        };
        capacity * self.kind().element_size()
    }
}

/// A mutable UTF-8 byte buffer, distinct from the immutable interned string.
pub struct ObjStringBuilder {
    pub bytes: Vec<u8>,
}

/// A GC-managed heap object. The variant is the type tag.
pub enum HeapObj {
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    Array(ObjArray),
    TypedArray(ObjTypedArray),
    StringBuilder(ObjStringBuilder),
}

impl HeapObj {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObj::Closure(_) => "closure",
            HeapObj::Upvalue(_) => "upvalue",
            HeapObj::Class(_) => "class",
            HeapObj::Instance(_) => "instance",
            HeapObj::BoundMethod(_) => "boundMethod",
            HeapObj::Array(_) => "array",
            HeapObj::TypedArray(a) => a.kind().type_name(),
            HeapObj::StringBuilder(_) => "stringBuilder",
        }
    }

    /// Approximate footprint for GC accounting: the node itself plus its
    /// owned payload capacity.
    pub fn shallow_size(&self) -> usize {
        let payload = match self {
            HeapObj::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<HeapId>(),
            HeapObj::Upvalue(_) => 0,
            HeapObj::Class(c) => c.methods.payload_bytes(),
            HeapObj::Instance(i) => i.fields.payload_bytes(),
            HeapObj::BoundMethod(_) => 0,
            HeapObj::Array(a) => a.items.capacity() * std::mem::size_of::<Value>(),
            HeapObj::TypedArray(a) => a.payload_bytes(),
            HeapObj::StringBuilder(b) => b.bytes.capacity(),
        };
        std::mem::size_of::<HeapObj>() + payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_array_wrapping_coercion() {
        let mut a = ObjTypedArray::new(TypedKind::I8, 3);
        a.set(0, Value::number(300.0));
        a.set(1, Value::number(-5.0));
        a.set(2, Value::string(StrId(0)));
        assert_eq!(a.get(0).as_number(), 44.0);
        assert_eq!(a.get(1).as_number(), -5.0);
        assert_eq!(a.get(2).as_number(), 0.0);
    }

    #[test]
    fn test_typed_array_nan_becomes_zero() {
        let mut a = ObjTypedArray::new(TypedKind::U32, 1);
        a.set(0, Value::number(f64::NAN));
        assert_eq!(a.get(0).as_number(), 0.0);
    }

    #[test]
    fn test_typed_array_resize_zero_fills() {
        let mut a = ObjTypedArray::new(TypedKind::U16, 0);
        a.push(Value::number(9.0));
        a.resize(3);
        assert_eq!(a.len(), 3);
        assert_eq!(a.get(1).as_number(), 0.0);
        a.resize(1);
        assert_eq!(a.len(), 1);
        assert_eq!(a.get(0).as_number(), 9.0);
    }

    #[test]
    fn test_typed_array_f32_narrows() {
        let mut a = ObjTypedArray::new(TypedKind::F32, 1);
        a.set(0, Value::number(1.0000000001));
        assert_eq!(a.get(0).as_number(), 1.0);
    }
}
