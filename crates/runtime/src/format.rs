//! Value Formatting
//!
//! How values print: `print` and error reporting use the abbreviated form;
//! `@system.log` expands arrays one level deep.

use std::fmt::Write;

use ember_core::{Heap, HeapId, HeapObj, ObjFunction, ObjRef, Value, format_number};

pub fn format_value(heap: &Heap, value: Value, expand: bool) -> String {
    let mut out = String::new();
    write_value(&mut out, heap, value, expand);
    out
}

fn write_value(out: &mut String, heap: &Heap, value: Value, expand: bool) {
    if value.is_number() {
        let _ = out.write_str(&format_number(value.as_number()));
        return;
    }
    if value.is_nil() {
        let _ = out.write_str("nil");
        return;
    }
    if value.is_bool() {
        let _ = out.write_str(if value.as_bool() { "true" } else { "false" });
        return;
    }

    match value.as_obj() {
        ObjRef::Str(id) => {
            let _ = out.write_str(&heap.string(id).as_str());
        }
        ObjRef::Fun(id) => write_function(out, heap, heap.function(id)),
        ObjRef::Native(_) => {
            let _ = out.write_str("<native fn>");
        }
        ObjRef::Heap(id) => write_heap_object(out, heap, id, expand),
    }
}

fn write_function(out: &mut String, heap: &Heap, function: &ObjFunction) {
    let _ = match function.name {
        None => write!(out, "<script> ({})", function.id),
        Some(name) if heap.string(name).is_empty() => write!(out, "<lambda> ({})", function.id),
        Some(name) => write!(out, "<fn {}> ({})", heap.string(name).as_str(), function.id),
    };
}

fn write_heap_object(out: &mut String, heap: &Heap, id: HeapId, expand: bool) {
    match heap.get(id) {
        HeapObj::Closure(closure) => write_function(out, heap, heap.function(closure.function)),
        HeapObj::BoundMethod(bound) => {
            if let HeapObj::Closure(closure) = heap.get(bound.method) {
                write_function(out, heap, heap.function(closure.function));
            }
        }
        HeapObj::Upvalue(_) => {
            let _ = out.write_str("upvalue");
        }
        HeapObj::Class(class) => {
            let _ = match class.name {
                Some(name) => write!(out, "{} (class)", heap.string(name).as_str()),
                None => write!(out, "$anon (class)"),
            };
        }
        HeapObj::Instance(instance) => {
            let name = instance
                .class
                .and_then(|class| heap.class(class))
                .and_then(|class| class.name);
            let _ = match name {
                Some(name) => write!(out, "{} (instance)", heap.string(name).as_str()),
                None => write!(out, "$anon (instance)"),
            };
        }
        HeapObj::StringBuilder(builder) => {
            let _ = out.write_str(&String::from_utf8_lossy(&builder.bytes));
        }
        HeapObj::Array(array) => {
            if !expand {
                let _ = out.write_str("<array>");
            } else if array.items.is_empty() {
                let _ = out.write_str("[]");
            } else {
                let _ = out.write_str("[ ");
                for (i, item) in array.items.iter().enumerate() {
                    if i > 0 {
                        let _ = out.write_str(", ");
                    }
                    // Nested values print abbreviated.
                    write_value(out, heap, *item, false);
                }
                let _ = out.write_str(" ]");
            }
        }
        HeapObj::TypedArray(array) => {
            if !expand {
                let _ = write!(out, "<{}>", array.kind().type_name());
            } else if array.is_empty() {
                let _ = out.write_str("[]");
            } else {
                let _ = out.write_str("[ ");
                for i in 0..array.len() {
                    if i > 0 {
                        let _ = out.write_str(", ");
                    }
                    let _ = out.write_str(&format_number(array.get(i).as_number()));
                }
                let _ = out.write_str(" ]");
            }
        }
    }
}
