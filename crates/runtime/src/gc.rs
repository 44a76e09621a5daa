//! Garbage Collection
//!
//! Tri-color mark-and-sweep over the GC arena, with the parity-bit trick:
//! an object is live iff its mark equals the heap's live-parity bit, and
//! the parity flips after every sweep instead of clearing marks.
//!
//! Roots: every value on the stack, every frame's closure, every open
//! upvalue, every value in the globals table, and the builtin namespaces.
//! The constants array and the static arena (strings, functions) are not
//! roots and are never collected.

use ember_core::{HeapId, HeapObj, ObjRef, UpvalueState, Value};

use crate::vm::Vm;

impl Vm {
    pub fn collect_garbage(&mut self) {
        let before = self.heap.bytes_allocated;
        let started = std::time::Instant::now();

        self.mark_roots();
        self.trace_references();
        let (freed, freed_bytes) = self.heap.sweep();

        tracing::debug!(
            freed,
            freed_bytes,
            before,
            after = self.heap.bytes_allocated,
            next_gc = self.heap.next_gc,
            elapsed_us = started.elapsed().as_micros() as u64,
            "gc cycle"
        );
    }

    fn mark_roots(&mut self) {
        for i in 0..self.stack.len() {
            let value = self.stack[i];
            self.mark_value(value);
        }
        for i in 0..self.frames.len() {
            let closure = self.frames[i].closure;
            self.mark_heap(closure);
        }
        for i in 0..self.open_upvalues.len() {
            let upvalue = self.open_upvalues[i];
            self.mark_heap(upvalue);
        }
        for i in 0..self.globals.capacity() {
            if let Some((_, value)) = self.globals.entry_at(i) {
                self.mark_value(value);
            }
        }
        for builtin in self.builtins {
            self.mark_heap(builtin);
        }
    }

    fn trace_references(&mut self) {
        while let Some(id) = self.gray.pop() {
            self.blacken(id);
        }
    }

    #[inline]
    fn mark_value(&mut self, value: Value) {
        if value.is_obj() {
            if let ObjRef::Heap(id) = value.as_obj() {
                self.mark_heap(id);
            }
        }
    }

    #[inline]
    fn mark_heap(&mut self, id: HeapId) {
        if self.heap.mark(id) {
            self.gray.push(id);
        }
    }

    /// Mark everything one gray object points at. Strings and functions are
    /// static, so only heap handles and embedded values matter.
    fn blacken(&mut self, id: HeapId) {
        let mut values: Vec<Value> = Vec::new();
        let mut objects: Vec<HeapId> = Vec::new();

        match self.heap.get(id) {
            HeapObj::Closure(closure) => objects.extend(closure.upvalues.iter().copied()),
            HeapObj::Upvalue(upvalue) => {
                if let UpvalueState::Closed(value) = upvalue.state {
                    values.push(value);
                }
            }
            HeapObj::BoundMethod(bound) => {
                values.push(bound.receiver);
                objects.push(bound.method);
            }
            HeapObj::Class(class) => {
                values.push(class.initializer);
                for i in 0..class.methods.capacity() {
                    if let Some((_, value)) = class.methods.entry_at(i) {
                        values.push(value);
                    }
                }
            }
            HeapObj::Instance(instance) => {
                if let Some(class) = instance.class {
                    objects.push(class);
                }
                for i in 0..instance.fields.capacity() {
                    if let Some((_, value)) = instance.fields.entry_at(i) {
                        values.push(value);
                    }
                }
            }
            HeapObj::Array(array) => values.extend(array.items.iter().copied()),
            // No outgoing references.
            HeapObj::TypedArray(_) | HeapObj::StringBuilder(_) => {}
        }

        for value in values {
            self.mark_value(value);
        }
        for object in objects {
            self.mark_heap(object);
        }
    }
}
