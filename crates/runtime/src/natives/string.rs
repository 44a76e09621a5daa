//! `@string` namespace: interned-string introspection, UTF-8 code-point
//! helpers, and the mutable builder.

use ember_core::{BuiltinModule, HeapObj, ObjStringBuilder, Value};

use crate::vm::{NativeArgs, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native(BuiltinModule::String, "length", length_native);
    vm.define_native(BuiltinModule::String, "charAt", char_at_native);
    vm.define_native(BuiltinModule::String, "utf8Len", utf8_len_native);
    vm.define_native(BuiltinModule::String, "utf8At", utf8_at_native);
    vm.define_native(BuiltinModule::String, "Builder", builder_native);
    vm.define_native(BuiltinModule::String, "append", append_native);
    vm.define_native(BuiltinModule::String, "intern", intern_native);
    vm.define_native(BuiltinModule::String, "equals", equals_native);
}

fn length_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 1 {
        if let Some(id) = vm.arg(args, 0).as_string() {
            return Ok(Value::number(vm.heap.string(id).len() as f64));
        }
    }
    Ok(Value::number(f64::NAN))
}

/// One byte of the string as a new one-byte string; nil out of range.
fn char_at_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 2 {
        if let (Some(id), index) = (vm.arg(args, 0).as_string(), vm.arg(args, 1)) {
            if index.is_number() {
                let i = index.as_number();
                let len = vm.heap.string(id).len();
                if i >= 0.0 && i < len as f64 {
                    let byte = vm.heap.string(id).bytes[i as usize];
                    let one = vm.heap.intern(&[byte]);
                    return Ok(Value::string(one));
                }
            }
        }
    }
    Ok(Value::NIL)
}

/// Width of the UTF-8 sequence starting with `byte`; None when `byte` is
/// not a valid leading byte.
fn utf8_width(byte: u8) -> Option<usize> {
    if byte & 0x80 == 0 {
        Some(1)
    } else if byte & 0xe0 == 0xc0 {
        Some(2)
    } else if byte & 0xf0 == 0xe0 {
        Some(3)
    } else if byte & 0xf8 == 0xf0 {
        Some(4)
    } else {
        None
    }
}

fn utf8_len_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 1 {
        if let Some(id) = vm.arg(args, 0).as_string() {
            let bytes = &vm.heap.string(id).bytes;
            let mut count = 0usize;
            let mut i = 0usize;
            while i < bytes.len() {
                match utf8_width(bytes[i]) {
                    Some(width) => i += width,
                    None => return Ok(Value::number(f64::NAN)),
                }
                count += 1;
            }
            return Ok(Value::number(count as f64));
        }
    }
    Ok(Value::number(f64::NAN))
}

fn utf8_at_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 2 {
        if let (Some(id), index) = (vm.arg(args, 0).as_string(), vm.arg(args, 1)) {
            if index.is_number() {
                let want = index.as_number();
                let len = vm.heap.string(id).len();
                if want < 0.0 || want >= len as f64 {
                    return Ok(Value::NIL);
                }
                let want = want as usize;

                let mut count = 0usize;
                let mut i = 0usize;
                while i < len {
                    let width = match utf8_width(vm.heap.string(id).bytes[i]) {
                        Some(width) => width,
                        None => return Ok(Value::number(f64::NAN)),
                    };
                    if count == want {
                        let bytes = vm.heap.string(id).bytes[i..(i + width).min(len)].to_vec();
                        let ch = vm.heap.intern(&bytes);
                        return Ok(Value::string(ch));
                    }
                    i += width;
                    count += 1;
                }
            }
        }
    }
    Ok(Value::NIL)
}

/// Bytes of a string or builder argument, if it is one.
fn text_bytes(vm: &Vm, value: Value) -> Option<Vec<u8>> {
    if let Some(id) = value.as_string() {
        return Some(vm.heap.string(id).bytes.to_vec());
    }
    if let Some(id) = value.as_heap() {
        if let HeapObj::StringBuilder(builder) = vm.heap.get(id) {
            return Some(builder.bytes.clone());
        }
    }
    None
}

fn builder_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let bytes = if args.count >= 1 {
        text_bytes(vm, vm.arg(args, 0)).unwrap_or_default()
    } else {
        Vec::new()
    };
    let builder = vm.alloc(HeapObj::StringBuilder(ObjStringBuilder { bytes }));
    Ok(Value::heap(builder))
}

/// Appends a string or builder to a builder and returns the builder.
fn append_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 1 {
        if let Some(id) = vm.arg(args, 0).as_heap() {
            if matches!(vm.heap.get(id), HeapObj::StringBuilder(_)) {
                if args.count >= 2 {
                    if let Some(suffix) = text_bytes(vm, vm.arg(args, 1)) {
                        let before;
                        let after;
                        if let HeapObj::StringBuilder(builder) = vm.heap.get_mut(id) {
                            before = builder.bytes.capacity();
                            builder.bytes.extend_from_slice(&suffix);
                            after = builder.bytes.capacity();
                        } else {
                            before = 0;
                            after = 0;
                        }
                        vm.heap.adjust_bytes(after as isize - before as isize);
                    }
                }
                return Ok(vm.arg(args, 0));
            }
        }
    }
    Ok(Value::NIL)
}

/// Canonicalizes builder contents to an interned string; interned strings
/// pass through unchanged.
fn intern_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 1 {
        let value = vm.arg(args, 0);
        if value.as_string().is_some() {
            return Ok(value);
        }
        if let Some(id) = value.as_heap() {
            if let HeapObj::StringBuilder(builder) = vm.heap.get(id) {
                let bytes = builder.bytes.clone();
                let interned = vm.heap.intern(&bytes);
                return Ok(Value::string(interned));
            }
        }
    }
    Ok(Value::NIL)
}

/// Content equality across string/builder mixes; two interned strings
/// compare by handle.
fn equals_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    if args.count >= 2 {
        let a = vm.arg(args, 0);
        let b = vm.arg(args, 1);
        if let (Some(sa), Some(sb)) = (a.as_string(), b.as_string()) {
            return Ok(Value::boolean(sa == sb));
        }
        if let (Some(ba), Some(bb)) = (text_bytes(vm, a), text_bytes(vm, b)) {
            return Ok(Value::boolean(ba == bb));
        }
    }
    Ok(Value::FALSE)
}
