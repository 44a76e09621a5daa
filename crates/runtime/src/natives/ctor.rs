//! `@ctor` namespace: constructors for bare objects, arrays, typed arrays,
//! and string builders.

use ember_core::{
    BuiltinModule, HeapObj, ObjArray, ObjInstance, ObjStringBuilder, ObjTypedArray, Table,
    TableKind, TypedKind, Value,
};

use crate::vm::{NativeArgs, Vm};

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native(BuiltinModule::Ctor, "Object", object_native);
    vm.define_native(BuiltinModule::Ctor, "Array", array_native);
    vm.define_native(BuiltinModule::Ctor, "F64Array", f64_array_native);
    vm.define_native(BuiltinModule::Ctor, "F32Array", f32_array_native);
    vm.define_native(BuiltinModule::Ctor, "U32Array", u32_array_native);
    vm.define_native(BuiltinModule::Ctor, "I32Array", i32_array_native);
    vm.define_native(BuiltinModule::Ctor, "U16Array", u16_array_native);
    vm.define_native(BuiltinModule::Ctor, "I16Array", i16_array_native);
    vm.define_native(BuiltinModule::Ctor, "U8Array", u8_array_native);
    vm.define_native(BuiltinModule::Ctor, "I8Array", i8_array_native);
    vm.define_native(BuiltinModule::Ctor, "StringBuilder", string_builder_native);
}

fn object_native(vm: &mut Vm, _args: NativeArgs) -> Result<Value, String> {
    let instance = vm.alloc(HeapObj::Instance(ObjInstance {
        class: None,
        fields: Table::new(TableKind::Normal),
    }));
    Ok(Value::heap(instance))
}

fn requested_length(vm: &Vm, args: NativeArgs) -> Result<usize, String> {
    if args.count >= 1 && vm.arg(args, 0).is_number() {
        let size = vm.arg(args, 0).as_number();
        if size < 0.0 || size > f64::from(u32::MAX) {
            return Err("Array size overflow".to_string());
        }
        return Ok(size as usize);
    }
    Ok(0)
}

fn array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let length = requested_length(vm, args)?;
    let array = vm.alloc(HeapObj::Array(ObjArray {
        items: vec![Value::NIL; length],
    }));
    Ok(Value::heap(array))
}

fn typed_array(vm: &mut Vm, args: NativeArgs, kind: TypedKind) -> Result<Value, String> {
    let length = requested_length(vm, args)?;
    let array = vm.alloc(HeapObj::TypedArray(ObjTypedArray::new(kind, length)));
    Ok(Value::heap(array))
}

fn f64_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    typed_array(vm, args, TypedKind::F64)
}

fn f32_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    typed_array(vm, args, TypedKind::F32)
}

fn u32_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    typed_array(vm, args, TypedKind::U32)
}

fn i32_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    typed_array(vm, args, TypedKind::I32)
}

fn u16_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    typed_array(vm, args, TypedKind::U16)
}

fn i16_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    typed_array(vm, args, TypedKind::I16)
}

fn u8_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    typed_array(vm, args, TypedKind::U8)
}

fn i8_array_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    typed_array(vm, args, TypedKind::I8)
}

fn string_builder_native(vm: &mut Vm, args: NativeArgs) -> Result<Value, String> {
    let bytes = if args.count >= 1 {
        let value = vm.arg(args, 0);
        if let Some(id) = value.as_string() {
            vm.heap.string(id).bytes.to_vec()
        } else if let Some(id) = value.as_heap() {
            match vm.heap.get(id) {
                HeapObj::StringBuilder(builder) => builder.bytes.clone(),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        }
    } else {
        Vec::new()
    };
    let builder = vm.alloc(HeapObj::StringBuilder(ObjStringBuilder { bytes }));
    Ok(Value::heap(builder))
}
