//! The Interpreter
//!
//! A single dispatch loop over the current frame's instruction stream. The
//! VM owns the heap, the value stack, the frame stack, the globals table,
//! the seven builtin namespaces, the open-upvalue list, and the script
//! cache for `import`.
//!
//! Stack discipline: operations that allocate read their operands before
//! allocating and pop them after, so everything feeding an allocation is
//! still reachable from the stack if a collection runs.
//!
//! Runtime errors print a message and a stack trace, reset the stack, and
//! unwind out of the dispatch loop; there is no user-level catch.

use std::io::Write;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use ember_compiler::{FunctionKind, compile};
use ember_core::{
    BUILTIN_MODULE_COUNT, BitOp, BuiltinModule, FunId, Heap, HeapId, HeapObj, NativeId, ObjArray,
    ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjRef, ObjUpvalue, OpCode, StrId, Table,
    TableKind, TypedKind, UpvalueState, Value, values_equal,
};

use crate::format::format_value;
use crate::natives;

/// Maximum call depth.
pub const FRAMES_MAX: usize = 1024;
/// Hard cap on value-stack slots.
pub const STACK_MAX: usize = 1 << 24;

const GC_TUNE_MIN: f64 = 1024.0;
const GC_TUNE_MAX: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// Why the dispatch loop unwound.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Fault {
    /// An imported module failed to compile.
    Compile,
    /// A runtime error was already reported and the stack reset.
    Runtime,
}

/// The argument window of a native call: `count` values starting at `base`
/// on the VM stack. Passing the position instead of a slice keeps the
/// arguments rooted while the native allocates through the VM.
#[derive(Clone, Copy)]
pub struct NativeArgs {
    pub base: usize,
    pub count: usize,
}

pub type NativeFn = fn(&mut Vm, NativeArgs) -> Result<Value, String>;

#[derive(Clone, Copy, Debug)]
pub struct VmOptions {
    pub gc_floor: usize,
    pub gc_grow_factor: usize,
    pub stack_max: usize,
    /// Collect before every allocation; for tests that shake out missing
    /// roots.
    pub gc_stress: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            gc_floor: ember_core::heap::GC_DEFAULT_FLOOR,
            gc_grow_factor: ember_core::heap::GC_DEFAULT_GROW_FACTOR,
            stack_max: STACK_MAX,
            gc_stress: false,
        }
    }
}

pub(crate) struct CallFrame {
    pub closure: HeapId,
    pub function: FunId,
    pub ip: usize,
    pub base: usize,
}

pub(crate) struct TypeStrings {
    pub boolean: StrId,
    pub nil: StrId,
    pub number: StrId,
    pub string: StrId,
    pub string_builder: StrId,
    pub function: StrId,
    pub native: StrId,
    pub class: StrId,
    pub object: StrId,
    pub array: StrId,
    pub typed: [StrId; 8],
}

/// What a subscript operand resolved to; extracted before mutation so the
/// heap borrow does not span the handler.
#[derive(Clone, Copy)]
enum SubscriptTarget {
    Indexable,
    Instance,
    Other,
}

fn typed_index(kind: TypedKind) -> usize {
    match kind {
        TypedKind::F64 => 0,
        TypedKind::F32 => 1,
        TypedKind::U32 => 2,
        TypedKind::I32 => 3,
        TypedKind::U16 => 4,
        TypedKind::I16 => 5,
        TypedKind::U8 => 6,
        TypedKind::I8 => 7,
    }
}

pub struct Vm {
    pub heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) globals: Table,
    pub(crate) builtins: [HeapId; BUILTIN_MODULE_COUNT],
    /// Open upvalues sorted by stack slot, deepest (largest) first.
    pub(crate) open_upvalues: Vec<HeapId>,
    pub(crate) natives: Vec<NativeFn>,
    /// Absolute path -> constants-array index of the compiled module.
    pub(crate) scripts: ember_core::StringPool,
    pub(crate) gray: Vec<HeapId>,
    pub(crate) rng: SmallRng,
    pub(crate) start: Instant,
    pub(crate) types: TypeStrings,
    pub(crate) init_string: StrId,
    stack_max: usize,
    pub(crate) gc_stress: bool,
    pub(crate) out: Box<dyn Write>,
    pub(crate) err: Box<dyn Write>,
}

impl Vm {
    pub fn new() -> Vm {
        Vm::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Vm {
        let mut heap = Heap::new();
        heap.gc_floor = options.gc_floor.max(1024);
        heap.next_gc = heap.gc_floor;
        heap.grow_factor = options.gc_grow_factor.max(1);

        let mut builtins = [HeapId(0); BUILTIN_MODULE_COUNT];
        for slot in &mut builtins {
            *slot = heap.alloc(HeapObj::Instance(ObjInstance {
                class: None,
                fields: Table::new(TableKind::Normal),
            }));
        }

        let types = TypeStrings {
            boolean: heap.intern_str("boolean"),
            nil: heap.intern_str("nil"),
            number: heap.intern_str("number"),
            string: heap.intern_str("string"),
            string_builder: heap.intern_str("stringBuilder"),
            function: heap.intern_str("function"),
            native: heap.intern_str("native"),
            class: heap.intern_str("class"),
            object: heap.intern_str("object"),
            array: heap.intern_str("array"),
            typed: [
                heap.intern_str("array-f64"),
                heap.intern_str("array-f32"),
                heap.intern_str("array-u32"),
                heap.intern_str("array-i32"),
                heap.intern_str("array-u16"),
                heap.intern_str("array-i16"),
                heap.intern_str("array-u8"),
                heap.intern_str("array-i8"),
            ],
        };
        let init_string = heap.intern_str("init");

        let mut vm = Vm {
            heap,
            stack: Vec::with_capacity(16 * FRAMES_MAX),
            frames: Vec::with_capacity(64),
            globals: Table::new(TableKind::Global),
            builtins,
            open_upvalues: Vec::new(),
            natives: Vec::new(),
            scripts: ember_core::StringPool::new(),
            gray: Vec::new(),
            rng: SmallRng::from_entropy(),
            start: Instant::now(),
            types,
            init_string,
            stack_max: options.stack_max.min(STACK_MAX),
            gc_stress: options.gc_stress,
            out: Box::new(std::io::stdout()),
            err: Box::new(std::io::stderr()),
        };
        natives::install_all(&mut vm);
        for module in BuiltinModule::ALL {
            vm.heap.freeze_instance(vm.builtins[module as usize]);
        }
        vm
    }

    /// Redirect `print` and `@system.log` output; used by tests.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Redirect error and stack-trace output; used by tests.
    pub fn set_error_output(&mut self, err: Box<dyn Write>) {
        self.err = err;
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let compile_start = Instant::now();
        let function = match compile(source, FunctionKind::Script, &mut self.heap) {
            Ok(function) => function,
            Err(_) => return InterpretResult::CompileError,
        };
        tracing::debug!(
            elapsed_ms = compile_start.elapsed().as_secs_f64() * 1e3,
            "finished compiling"
        );

        let closure = self.alloc(HeapObj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        if self.push(Value::heap(closure)).is_err() {
            return InterpretResult::RuntimeError;
        }
        if self.call_closure(closure, 0).is_err() {
            return InterpretResult::RuntimeError;
        }

        let run_start = Instant::now();
        let result = match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(Fault::Compile) => InterpretResult::CompileError,
            Err(Fault::Runtime) => InterpretResult::RuntimeError,
        };
        tracing::debug!(
            elapsed_ms = run_start.elapsed().as_secs_f64() * 1e3,
            "finished executing"
        );
        result
    }

    /// Interpret and clear the stack afterwards, so a REPL entry can fail
    /// without poisoning the next one.
    pub fn interpret_repl(&mut self, source: &str) -> InterpretResult {
        let result = self.interpret(source);
        self.reset_stack();
        result
    }

    // ------------------------------------------------------------------
    // Stack and frames
    // ------------------------------------------------------------------

    pub(crate) fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    #[inline]
    fn push(&mut self, value: Value) -> Result<(), Fault> {
        if self.stack.len() >= self.stack_max {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::NIL)
    }

    #[inline]
    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    #[inline]
    fn replace_top(&mut self, value: Value) {
        let top = self.stack.len() - 1;
        self.stack[top] = value;
    }

    #[inline]
    fn frame(&self) -> &CallFrame {
        match self.frames.last() {
            Some(frame) => frame,
            None => unreachable!("no active call frame"),
        }
    }

    #[inline]
    fn read_byte(&mut self) -> u8 {
        let frame = match self.frames.last_mut() {
            Some(frame) => frame,
            None => unreachable!("no active call frame"),
        };
        let byte = self.heap.function(frame.function).chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    #[inline]
    fn read_u16(&mut self) -> u16 {
        let lo = u16::from(self.read_byte());
        let hi = u16::from(self.read_byte());
        lo | (hi << 8)
    }

    #[inline]
    fn read_u24(&mut self) -> u32 {
        let b0 = u32::from(self.read_byte());
        let b1 = u32::from(self.read_byte());
        let b2 = u32::from(self.read_byte());
        b0 | (b1 << 8) | (b2 << 16)
    }

    #[inline]
    fn read_constant(&mut self) -> Value {
        let index = self.read_u24();
        self.heap.constant(index)
    }

    #[inline]
    fn read_string_constant(&mut self) -> StrId {
        match self.read_constant().as_string() {
            Some(id) => id,
            None => unreachable!("name operand is not a string constant"),
        }
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// All GC-managed allocation funnels through here: the collection check
    /// happens before the allocation, while the operands that feed the new
    /// object are still on the stack.
    pub(crate) fn alloc(&mut self, object: HeapObj) -> HeapId {
        if self.gc_stress || self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(object)
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    pub(crate) fn runtime_error(&mut self, message: impl AsRef<str>) -> Fault {
        {
            let Vm { err, .. } = self;
            let _ = writeln!(err, "[RuntimeError] {}", message.as_ref());
        }
        self.print_stack_trace();
        self.reset_stack();
        Fault::Runtime
    }

    fn throw_error(&mut self, value: Value) -> Fault {
        {
            let Vm { err, .. } = self;
            let _ = writeln!(err, "[RuntimeError] An exception was thrown.");
        }
        self.print_stack_trace();
        let text = format_value(&self.heap, value, false);
        {
            let Vm { err, .. } = self;
            let _ = writeln!(err, "[ErrorInfo] {text}");
        }
        self.reset_stack();
        Fault::Runtime
    }

    fn print_stack_trace(&mut self) {
        let Vm {
            frames, heap, err, ..
        } = self;
        for frame in frames.iter().rev() {
            let function = heap.function(frame.function);
            let line = function
                .chunk
                .lines
                .line_for(frame.ip.saturating_sub(1) as u32);
            let _ = match function.name {
                None => writeln!(err, "[line {line}] in <script> : ({})", function.id),
                Some(name) if heap.string(name).is_empty() => {
                    writeln!(err, "[line {line}] in <lambda>() : ({})", function.id)
                }
                Some(name) => writeln!(
                    err,
                    "[line {line}] in {}() : ({})",
                    heap.string(name).as_str(),
                    function.id
                ),
            };
        }
    }

    // ------------------------------------------------------------------
    // Natives
    // ------------------------------------------------------------------

    pub fn arg(&self, args: NativeArgs, index: usize) -> Value {
        if index < args.count {
            self.stack[args.base + index]
        } else {
            Value::NIL
        }
    }

    pub(crate) fn add_native(&mut self, function: NativeFn) -> NativeId {
        self.natives.push(function);
        NativeId((self.natives.len() - 1) as u32)
    }

    pub(crate) fn define_native(&mut self, module: BuiltinModule, name: &str, function: NativeFn) {
        let id = self.add_native(function);
        let name = self.heap.intern_str(name);
        let instance = self.builtins[module as usize];
        self.heap.field_set(instance, name, Value::native(id));
    }

    pub(crate) fn define_global_native(&mut self, name: &str, function: NativeFn) {
        let id = self.add_native(function);
        let name = self.heap.intern_str(name);
        self.globals.set(self.heap.strings(), name, Value::native(id));
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn call_closure(&mut self, closure: HeapId, arg_count: usize) -> Result<(), Fault> {
        let function = match self.heap.get(closure) {
            HeapObj::Closure(c) => c.function,
            _ => unreachable!("callee is not a closure"),
        };
        let arity = usize::from(self.heap.function(function).arity);
        if arg_count > arity {
            let message = format!("Expected {arity} arguments but got {arg_count}.");
            return Err(self.runtime_error(message));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        // Missing arguments default to nil.
        for _ in arg_count..arity {
            self.push(Value::NIL)?;
        }
        let base = self.stack.len() - arity - 1;
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            base,
        });
        Ok(())
    }

    fn call_native(&mut self, native: NativeId, arg_count: usize) -> Result<(), Fault> {
        let function = self.natives[native.0 as usize];
        let base = self.stack.len() - arg_count;
        match function(self, NativeArgs { base, count: arg_count }) {
            Ok(value) => {
                self.stack.truncate(base);
                self.replace_top(value);
                Ok(())
            }
            Err(message) => Err(self.runtime_error(message)),
        }
    }

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), Fault> {
        enum Callee {
            Closure(HeapId),
            Bound(Value, HeapId),
            Class(HeapId, Value),
            Native(NativeId),
            NotCallable,
        }

        let kind = if callee.is_obj() {
            match callee.as_obj() {
                ObjRef::Heap(id) => match self.heap.get(id) {
                    HeapObj::Closure(_) => Callee::Closure(id),
                    HeapObj::BoundMethod(bound) => Callee::Bound(bound.receiver, bound.method),
                    HeapObj::Class(class) => Callee::Class(id, class.initializer),
                    _ => Callee::NotCallable,
                },
                ObjRef::Native(id) => Callee::Native(id),
                _ => Callee::NotCallable,
            }
        } else {
            Callee::NotCallable
        };

        match kind {
            Callee::Closure(id) => self.call_closure(id, arg_count),
            Callee::Native(id) => self.call_native(id, arg_count),
            Callee::Bound(receiver, method) => {
                // Bind `this` to logical slot 0.
                let slot = self.stack.len() - arg_count - 1;
                self.stack[slot] = receiver;
                self.call_closure(method, arg_count)
            }
            Callee::Class(class, initializer) => {
                let instance = self.alloc(HeapObj::Instance(ObjInstance {
                    class: Some(class),
                    fields: Table::new(TableKind::Normal),
                }));
                let slot = self.stack.len() - arg_count - 1;
                self.stack[slot] = Value::heap(instance);

                if !initializer.is_nil() {
                    match initializer.as_heap() {
                        Some(init) => self.call_closure(init, arg_count),
                        None => Err(self.runtime_error("Class initializer is not callable.")),
                    }
                } else if arg_count != 0 {
                    let message =
                        format!("Expected 0 arguments for initializer but got {arg_count}.");
                    Err(self.runtime_error(message))
                } else {
                    Ok(())
                }
            }
            Callee::NotCallable => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn invoke_from_class(
        &mut self,
        class: HeapId,
        name: StrId,
        arg_count: usize,
    ) -> Result<(), Fault> {
        match self.heap.method_get(class, name) {
            Some(method) => match method.as_heap() {
                Some(closure) => self.call_closure(closure, arg_count),
                None => Err(self.runtime_error("Method is not callable.")),
            },
            None => {
                let message = format!(
                    "Undefined property '{}'.",
                    self.heap.string(name).as_str()
                );
                Err(self.runtime_error(message))
            }
        }
    }

    fn invoke(&mut self, name: StrId, arg_count: usize) -> Result<(), Fault> {
        let receiver = self.peek(arg_count);
        let instance = match receiver.as_heap() {
            Some(id) if matches!(self.heap.get(id), HeapObj::Instance(_)) => id,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        // A field shadows a method of the same name.
        if let Some(field) = self.heap.field_get(instance, name) {
            let slot = self.stack.len() - arg_count - 1;
            self.stack[slot] = field;
            return self.call_value(field, arg_count);
        }

        let class = self.heap.instance(instance).and_then(|i| i.class);
        match class {
            Some(class) => self.invoke_from_class(class, name, arg_count),
            None => {
                let message = format!(
                    "Undefined property '{}'.",
                    self.heap.string(name).as_str()
                );
                Err(self.runtime_error(message))
            }
        }
    }

    fn bind_method(&mut self, class: HeapId, name: StrId) -> Result<(), Fault> {
        match self.heap.method_get(class, name) {
            Some(method) => {
                let closure = match method.as_heap() {
                    Some(id) => id,
                    None => {
                        self.replace_top(Value::NIL);
                        return Ok(());
                    }
                };
                let receiver = self.peek(0);
                let bound = self.alloc(HeapObj::BoundMethod(ObjBoundMethod {
                    receiver,
                    method: closure,
                }));
                self.replace_top(Value::heap(bound));
            }
            None => self.replace_top(Value::NIL),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Upvalues
    // ------------------------------------------------------------------

    fn upvalue_slot(&self, id: HeapId) -> Option<usize> {
        match self.heap.get(id) {
            HeapObj::Upvalue(upvalue) => upvalue.open_slot(),
            _ => None,
        }
    }

    fn capture_upvalue(&mut self, slot: usize) -> HeapId {
        let mut insert_at = self.open_upvalues.len();
        for i in 0..self.open_upvalues.len() {
            let existing = self.open_upvalues[i];
            match self.upvalue_slot(existing) {
                Some(loc) if loc > slot => continue,
                Some(loc) if loc == slot => return existing,
                _ => {
                    insert_at = i;
                    break;
                }
            }
        }
        let created = self.alloc(HeapObj::Upvalue(ObjUpvalue {
            state: UpvalueState::Open(slot),
        }));
        self.open_upvalues.insert(insert_at, created);
        created
    }

    /// Closes every open upvalue at or above `last`, promoting each to a
    /// self-owning cell.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&first) = self.open_upvalues.first() {
            let slot = match self.upvalue_slot(first) {
                Some(slot) => slot,
                None => {
                    self.open_upvalues.remove(0);
                    continue;
                }
            };
            if slot < last {
                break;
            }
            let value = self.stack[slot];
            if let HeapObj::Upvalue(upvalue) = self.heap.get_mut(first) {
                upvalue.state = UpvalueState::Closed(value);
            }
            self.open_upvalues.remove(0);
        }
    }

    // ------------------------------------------------------------------
    // Operator helpers
    // ------------------------------------------------------------------

    fn binary_number_op(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), Fault> {
        let b = self.peek(0);
        let a = self.peek(1);
        if a.is_number() && b.is_number() {
            let result = op(a.as_number(), b.as_number());
            self.pop();
            self.replace_top(result);
            Ok(())
        } else {
            Err(self.runtime_error("Operands must be numbers."))
        }
    }

    fn bitwise(&mut self, op: BitOp) -> Result<(), Fault> {
        if op == BitOp::Not {
            let a = self.peek(0);
            if !a.is_number() {
                return Err(self.runtime_error("Operands must be numbers."));
            }
            self.replace_top(Value::number(f64::from(!(a.as_number() as i32))));
            return Ok(());
        }

        let b = self.peek(0);
        let a = self.peek(1);
        if !a.is_number() || !b.is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let lhs = a.as_number() as i32;
        let result = match op {
            BitOp::And => f64::from(lhs & b.as_number() as i32),
            BitOp::Or => f64::from(lhs | b.as_number() as i32),
            BitOp::Xor => f64::from(lhs ^ b.as_number() as i32),
            BitOp::Shl | BitOp::Sar | BitOp::Shr => {
                // Negative shift counts yield 0; the count is masked to 0..=31.
                let count = b.as_number() as i32;
                if count < 0 {
                    0.0
                } else {
                    let count = (count & 31) as u32;
                    match op {
                        BitOp::Shl => f64::from(lhs << count),
                        BitOp::Sar => f64::from(lhs >> count),
                        _ => f64::from((lhs as u32) >> count),
                    }
                }
            }
            BitOp::Not => 0.0,
        };
        self.pop();
        self.replace_top(Value::number(result));
        Ok(())
    }

    fn type_of(&mut self) {
        let value = self.peek(0);
        let name = if value.is_number() {
            self.types.number
        } else if value.is_bool() {
            self.types.boolean
        } else if value.is_nil() {
            self.types.nil
        } else {
            match value.as_obj() {
                ObjRef::Str(_) => self.types.string,
                ObjRef::Fun(_) => self.types.function,
                ObjRef::Native(_) => self.types.native,
                ObjRef::Heap(id) => match self.heap.get(id) {
                    HeapObj::Closure(_) | HeapObj::BoundMethod(_) => self.types.function,
                    HeapObj::Class(_) => self.types.class,
                    HeapObj::Instance(_) => self.types.object,
                    HeapObj::Array(_) => self.types.array,
                    HeapObj::TypedArray(t) => self.types.typed[typed_index(t.kind())],
                    HeapObj::StringBuilder(_) => self.types.string_builder,
                    HeapObj::Upvalue(_) => self.types.nil,
                },
            }
        };
        self.replace_top(Value::string(name));
    }

    fn indexable_len(&self, id: HeapId) -> usize {
        match self.heap.get(id) {
            HeapObj::Array(a) => a.items.len(),
            HeapObj::TypedArray(t) => t.len(),
            HeapObj::StringBuilder(b) => b.bytes.len(),
            _ => 0,
        }
    }

    fn indexable_get(&self, id: HeapId, index: f64) -> Value {
        if index < 0.0 || index >= self.indexable_len(id) as f64 {
            return Value::NIL;
        }
        let index = index as usize;
        match self.heap.get(id) {
            HeapObj::Array(a) => a.items[index],
            HeapObj::TypedArray(t) => t.get(index),
            HeapObj::StringBuilder(b) => Value::number(f64::from(b.bytes[index])),
            _ => Value::NIL,
        }
    }

    // ------------------------------------------------------------------
    // Dispatch loop
    // ------------------------------------------------------------------

    pub(crate) fn run(&mut self) -> Result<(), Fault> {
        loop {
            let byte = self.read_byte();
            let Ok(op) = OpCode::try_from(byte) else {
                return Err(self.runtime_error(format!("Unknown opcode {byte}.")));
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value)?;
                }
                OpCode::Nil => self.push(Value::NIL)?,
                OpCode::True => self.push(Value::TRUE)?,
                OpCode::False => self.push(Value::FALSE)?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::PopN => {
                    let count = self.read_u16() as usize;
                    let len = self.stack.len();
                    self.stack.truncate(len.saturating_sub(count));
                }

                OpCode::GetLocal => {
                    let slot = self.read_u16() as usize;
                    let base = self.frame().base;
                    let value = self.stack[base + slot];
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_u16() as usize;
                    let base = self.frame().base;
                    self.stack[base + slot] = self.peek(0);
                }

                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frame().closure;
                    let upvalue = match self.heap.get(closure) {
                        HeapObj::Closure(c) => c.upvalues[index],
                        _ => unreachable!("frame closure is not a closure"),
                    };
                    let value = match self.heap.get(upvalue) {
                        HeapObj::Upvalue(u) => match u.state {
                            UpvalueState::Open(slot) => self.stack[slot],
                            UpvalueState::Closed(value) => value,
                        },
                        _ => Value::NIL,
                    };
                    self.push(value)?;
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frame().closure;
                    let upvalue = match self.heap.get(closure) {
                        HeapObj::Closure(c) => c.upvalues[index],
                        _ => unreachable!("frame closure is not a closure"),
                    };
                    let value = self.peek(0);
                    let open_slot = match self.heap.get_mut(upvalue) {
                        HeapObj::Upvalue(u) => match u.state {
                            UpvalueState::Open(slot) => Some(slot),
                            UpvalueState::Closed(_) => {
                                u.state = UpvalueState::Closed(value);
                                None
                            }
                        },
                        _ => None,
                    };
                    if let Some(slot) = open_slot {
                        self.stack[slot] = value;
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                OpCode::DefineGlobal => {
                    let name = self.read_string_constant();
                    let value = self.peek(0);
                    self.globals.set(self.heap.strings(), name, value);
                    self.pop();
                }
                OpCode::GetGlobal => {
                    let name = self.read_string_constant();
                    match self.globals.get(self.heap.strings(), name) {
                        Some(value) => self.push(value)?,
                        None => {
                            let message = format!(
                                "Undefined variable '{}'.",
                                self.heap.string(name).as_str()
                            );
                            return Err(self.runtime_error(message));
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_string_constant();
                    let value = self.peek(0);
                    if self.globals.set(self.heap.strings(), name, value) {
                        // Assigning an undefined global is an error; undo.
                        self.globals.delete(self.heap.strings(), name);
                        let message = format!(
                            "Undefined variable '{}'.",
                            self.heap.string(name).as_str()
                        );
                        return Err(self.runtime_error(message));
                    }
                }

                OpCode::NewArray => {
                    let count = self.read_u16() as usize;
                    let start = self.stack.len() - count;
                    let items = self.stack[start..].to_vec();
                    let array = self.alloc(HeapObj::Array(ObjArray { items }));
                    self.stack.truncate(start);
                    self.push(Value::heap(array))?;
                }
                OpCode::NewObject => {
                    let instance = self.alloc(HeapObj::Instance(ObjInstance {
                        class: None,
                        fields: Table::new(TableKind::Normal),
                    }));
                    self.push(Value::heap(instance))?;
                }
                OpCode::NewProperty => {
                    let name = self.read_string_constant();
                    let value = self.peek(0);
                    let target = self.peek(1);
                    match target.as_heap() {
                        Some(id) if matches!(self.heap.get(id), HeapObj::Instance(_)) => {
                            self.heap.field_set(id, name, value);
                            self.pop();
                        }
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    }
                }

                OpCode::GetProperty => {
                    let name = self.read_string_constant();
                    let target = self.peek(0);
                    let instance = match target.as_heap() {
                        Some(id) if matches!(self.heap.get(id), HeapObj::Instance(_)) => id,
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    if let Some(value) = self.heap.field_get(instance, name) {
                        self.replace_top(value);
                    } else {
                        let class = self.heap.instance(instance).and_then(|i| i.class);
                        match class {
                            Some(class) => self.bind_method(class, name)?,
                            None => self.replace_top(Value::NIL),
                        }
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string_constant();
                    let target = self.peek(1);
                    let instance = match target.as_heap() {
                        Some(id) if matches!(self.heap.get(id), HeapObj::Instance(_)) => id,
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    let value = self.peek(0);
                    // Assigning nil removes the field.
                    if value.is_nil() {
                        self.heap.field_delete(instance, name);
                    } else {
                        self.heap.field_set(instance, name, value);
                    }
                    let value = self.pop();
                    self.replace_top(value);
                }

                OpCode::GetSubscript => {
                    let index = self.peek(0);
                    let target = self.peek(1);
                    if let Some(id) = target.as_heap() {
                        let kind = match self.heap.get(id) {
                            HeapObj::Array(_)
                            | HeapObj::TypedArray(_)
                            | HeapObj::StringBuilder(_) => SubscriptTarget::Indexable,
                            HeapObj::Instance(_) => SubscriptTarget::Instance,
                            _ => SubscriptTarget::Other,
                        };
                        match kind {
                            SubscriptTarget::Indexable => {
                                if !index.is_number() {
                                    return Err(
                                        self.runtime_error("Array subscript must be number.")
                                    );
                                }
                                let result = self.indexable_get(id, index.as_number());
                                self.pop();
                                self.replace_top(result);
                            }
                            SubscriptTarget::Instance => {
                                let Some(name) = index.as_string() else {
                                    return Err(
                                        self.runtime_error("Instance subscript must be string.")
                                    );
                                };
                                self.pop();
                                if let Some(value) = self.heap.field_get(id, name) {
                                    self.replace_top(value);
                                } else {
                                    let class = self.heap.instance(id).and_then(|i| i.class);
                                    match class {
                                        Some(class) => self.bind_method(class, name)?,
                                        None => self.replace_top(Value::NIL),
                                    }
                                }
                            }
                            SubscriptTarget::Other => {
                                return Err(self.runtime_error(
                                    "Only instances, arrays, stringBuilder and string can get subscript.",
                                ));
                            }
                        }
                    } else if let Some(string) = target.as_string() {
                        if !index.is_number() {
                            return Err(self.runtime_error("String subscript must be number."));
                        }
                        let i = index.as_number();
                        let bytes = &self.heap.string(string).bytes;
                        let result = if i >= 0.0 && i < bytes.len() as f64 {
                            Value::number(f64::from(bytes[i as usize]))
                        } else {
                            Value::NIL
                        };
                        self.pop();
                        self.replace_top(result);
                    } else {
                        return Err(self.runtime_error(
                            "Only instances, arrays, stringBuilder and string can get subscript.",
                        ));
                    }
                }
                OpCode::SetSubscript => {
                    let value = self.peek(0);
                    let index = self.peek(1);
                    let target = self.peek(2);
                    let id = match target.as_heap() {
                        Some(id) => id,
                        None => {
                            return Err(self
                                .runtime_error("Only instances and arrays can set subscript."));
                        }
                    };
                    let kind = match self.heap.get(id) {
                        HeapObj::Array(_) | HeapObj::TypedArray(_) => SubscriptTarget::Indexable,
                        HeapObj::Instance(_) => SubscriptTarget::Instance,
                        _ => SubscriptTarget::Other,
                    };
                    match kind {
                        SubscriptTarget::Indexable => {
                            if !index.is_number() {
                                return Err(self.runtime_error("Array subscript must be number."));
                            }
                            let i = index.as_number();
                            if i < 0.0 || i >= self.indexable_len(id) as f64 {
                                return Err(self.runtime_error("Array index out of range."));
                            }
                            match self.heap.get_mut(id) {
                                HeapObj::Array(a) => a.items[i as usize] = value,
                                HeapObj::TypedArray(t) => t.set(i as usize, value),
                                _ => {}
                            }
                            let slot = self.stack.len() - 3;
                            self.stack[slot] = value;
                            self.stack.truncate(slot + 1);
                        }
                        SubscriptTarget::Instance => {
                            let Some(name) = index.as_string() else {
                                return Err(
                                    self.runtime_error("Instance subscript must be string.")
                                );
                            };
                            if value.is_nil() {
                                self.heap.field_delete(id, name);
                            } else {
                                self.heap.field_set(id, name, value);
                            }
                            let slot = self.stack.len() - 3;
                            self.stack[slot] = value;
                            self.stack.truncate(slot + 1);
                        }
                        SubscriptTarget::Other => {
                            return Err(self
                                .runtime_error("Only instances and arrays can set subscript."));
                        }
                    }
                }

                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if a.is_number() && b.is_number() {
                        let result = Value::number(a.as_number() + b.as_number());
                        self.pop();
                        self.replace_top(result);
                    } else if let (Some(left), Some(right)) = (a.as_string(), b.as_string()) {
                        let result = self.heap.concat(left, right);
                        self.pop();
                        self.replace_top(Value::string(result));
                    } else {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                }
                OpCode::Subtract => self.binary_number_op(|a, b| Value::number(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::number(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::number(a / b))?,
                OpCode::Modulus => {
                    // IEEE remainder, not Euclidean: fmod(x, 0) is NaN.
                    self.binary_number_op(|a, b| Value::number(a % b))?;
                }
                OpCode::Negate => {
                    let a = self.peek(0);
                    if !a.is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    self.replace_top(Value::number(-a.as_number()));
                }
                OpCode::Not => {
                    let a = self.peek(0);
                    self.replace_top(Value::boolean(a.is_falsey()));
                }
                OpCode::Bitwise => {
                    let sub = self.read_byte();
                    let Ok(sub) = BitOp::try_from(sub) else {
                        return Err(self.runtime_error(format!("Unknown bitwise operation {sub}.")));
                    };
                    self.bitwise(sub)?;
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.peek(0);
                    self.replace_top(Value::boolean(values_equal(a, b)));
                }
                OpCode::NotEqual => {
                    let b = self.pop();
                    let a = self.peek(0);
                    self.replace_top(Value::boolean(!values_equal(a, b)));
                }
                OpCode::Less => self.binary_number_op(|a, b| Value::boolean(a < b))?,
                OpCode::LessEqual => self.binary_number_op(|a, b| Value::boolean(a <= b))?,
                OpCode::Greater => self.binary_number_op(|a, b| Value::boolean(a > b))?,
                OpCode::GreaterEqual => self.binary_number_op(|a, b| Value::boolean(a >= b))?,

                OpCode::InstanceOf => {
                    let class_value = self.peek(0);
                    let instance_value = self.peek(1);
                    let result = match (instance_value.as_heap(), class_value.as_heap()) {
                        (Some(instance), Some(class)) => {
                            matches!(self.heap.get(class), HeapObj::Class(_))
                                && self
                                    .heap
                                    .instance(instance)
                                    .is_some_and(|i| i.class == Some(class))
                        }
                        _ => false,
                    };
                    self.pop();
                    self.replace_top(Value::boolean(result));
                }
                OpCode::TypeOf => self.type_of(),

                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    if let Some(frame) = self.frames.last_mut() {
                        frame.ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    if let Some(frame) = self.frames.last_mut() {
                        frame.ip -= offset;
                    }
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        if let Some(frame) = self.frames.last_mut() {
                            frame.ip += offset;
                        }
                    }
                }
                OpCode::JumpIfFalsePop => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        if let Some(frame) = self.frames.last_mut() {
                            frame.ip += offset;
                        }
                    }
                    self.pop();
                }
                OpCode::JumpIfTrue => {
                    let offset = self.read_u16() as usize;
                    if !self.peek(0).is_falsey() {
                        if let Some(frame) = self.frames.last_mut() {
                            frame.ip += offset;
                        }
                    }
                }

                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string_constant();
                    let arg_count = self.read_byte() as usize;
                    self.invoke(name, arg_count)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string_constant();
                    let arg_count = self.read_byte() as usize;
                    let superclass = match self.pop().as_heap() {
                        Some(id) if matches!(self.heap.get(id), HeapObj::Class(_)) => id,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    self.invoke_from_class(superclass, name, arg_count)?;
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = match self.frames.pop() {
                        Some(frame) => frame,
                        None => return Ok(()),
                    };
                    self.close_upvalues(frame.base);
                    if self.frames.is_empty() {
                        // The script or module slot itself.
                        self.pop();
                        return Ok(());
                    }
                    self.stack[frame.base] = result;
                    self.stack.truncate(frame.base + 1);
                }

                OpCode::Closure => {
                    let function = match self.read_constant().as_function() {
                        Some(id) => id,
                        None => unreachable!("closure operand is not a function constant"),
                    };
                    let upvalue_count = usize::from(self.heap.function(function).upvalue_count);
                    let closure = self.alloc(HeapObj::Closure(ObjClosure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    self.push(Value::heap(closure))?;
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_u16() as usize;
                        let upvalue = if is_local {
                            let base = self.frame().base;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing = self.frame().closure;
                            match self.heap.get(enclosing) {
                                HeapObj::Closure(c) => c.upvalues[index],
                                _ => unreachable!("frame closure is not a closure"),
                            }
                        };
                        if let HeapObj::Closure(c) = self.heap.get_mut(closure) {
                            c.upvalues.push(upvalue);
                        }
                    }
                }

                OpCode::Class => {
                    let name = self.read_string_constant();
                    let class = self.alloc(HeapObj::Class(ObjClass {
                        name: Some(name),
                        methods: Table::new(TableKind::Normal),
                        initializer: Value::NIL,
                    }));
                    self.push(Value::heap(class))?;
                }
                OpCode::Inherit => {
                    let superclass = match self.peek(1).as_heap() {
                        Some(id) if matches!(self.heap.get(id), HeapObj::Class(_)) => id,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let subclass = match self.peek(0).as_heap() {
                        Some(id) => id,
                        None => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    self.heap.inherit(superclass, subclass);
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string_constant();
                    let method = self.peek(0);
                    let class = match self.peek(1).as_heap() {
                        Some(id) if matches!(self.heap.get(id), HeapObj::Class(_)) => id,
                        _ => return Err(self.runtime_error("Methods require a class.")),
                    };
                    self.heap.method_set(class, name, method);
                    if name == self.init_string {
                        if let HeapObj::Class(c) = self.heap.get_mut(class) {
                            c.initializer = method;
                        }
                    }
                    self.pop();
                }
                OpCode::GetSuper => {
                    let name = self.read_string_constant();
                    let superclass = match self.pop().as_heap() {
                        Some(id) if matches!(self.heap.get(id), HeapObj::Class(_)) => id,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    self.bind_method(superclass, name)?;
                }

                OpCode::ModuleBuiltin => {
                    let index = self.read_byte() as usize;
                    let instance = self.builtins[index % BUILTIN_MODULE_COUNT];
                    self.push(Value::heap(instance))?;
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = format_value(&self.heap, value, false);
                    let Vm { out, .. } = self;
                    let _ = writeln!(out, "{text}");
                }
                OpCode::Throw => {
                    let value = self.pop();
                    return Err(self.throw_error(value));
                }
                OpCode::Import => self.import()?,
            }
        }
    }

    /// `IMPORT`: normalize the path on top of the stack, fetch or compile
    /// the module, and call its top-level function with zero arguments. The
    /// module body runs at most once per VM; later imports reuse the cached
    /// function's result protocol (the call itself is what leaves the
    /// exports value for the importer).
    fn import(&mut self) -> Result<(), Fault> {
        let target = self.peek(0);
        let path_bytes: Vec<u8> = if let Some(string) = target.as_string() {
            self.heap.string(string).bytes.to_vec()
        } else if let Some(id) = target.as_heap() {
            match self.heap.get(id) {
                HeapObj::StringBuilder(builder) => builder.bytes.clone(),
                _ => {
                    return Err(
                        self.runtime_error("Path to import must be a string or stringBuilder.")
                    );
                }
            }
        } else {
            return Err(self.runtime_error("Path to import must be a string or stringBuilder."));
        };

        let path = String::from_utf8_lossy(&path_bytes).into_owned();
        let absolute = match std::fs::canonicalize(&path) {
            Ok(p) => p,
            Err(_) => return Err(self.runtime_error("Failed to get absolute file path.")),
        };
        let absolute_str = absolute.to_string_lossy().into_owned();
        let path_id = self.heap.intern(absolute_str.as_bytes());

        let function = match self.scripts.index_of(self.heap.strings(), path_id) {
            Some(index) => match self.heap.constant(index).as_function() {
                Some(function) => function,
                None => return Err(self.runtime_error("Corrupt script cache entry.")),
            },
            None => {
                let source = match std::fs::read_to_string(&absolute) {
                    Ok(source) => source,
                    Err(_) => {
                        let message = format!("Could not read file \"{absolute_str}\".");
                        return Err(self.runtime_error(message));
                    }
                };
                match compile(&source, FunctionKind::Module, &mut self.heap) {
                    Ok(function) => {
                        let index = self.heap.add_constant(Value::function(function));
                        self.scripts.set_index(self.heap.strings(), path_id, index);
                        function
                    }
                    Err(_) => return Err(Fault::Compile),
                }
            }
        };

        let closure = self.alloc(HeapObj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.replace_top(Value::heap(closure));
        self.call_closure(closure, 0)
    }

    // ------------------------------------------------------------------
    // Shared with natives
    // ------------------------------------------------------------------

    pub(crate) fn clamp_gc_tuning(value: f64) -> usize {
        value.clamp(GC_TUNE_MIN, GC_TUNE_MAX) as usize
    }

    /// Uptime of this VM in nanoseconds; the base of the @time natives.
    pub(crate) fn uptime_nanos(&self) -> f64 {
        self.start.elapsed().as_nanos() as f64
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}
