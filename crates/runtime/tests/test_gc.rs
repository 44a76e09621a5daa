//! Collector behavior tests
//!
//! Exercised through the language (`@system.gc`, allocation churn) and
//! through the VM surface directly. The stress configuration collects
//! before every allocation, which surfaces any missing root.

use std::io::Write;
use std::sync::{Arc, Mutex};

use ember_runtime::{InterpretResult, Vm, VmOptions};

#[derive(Clone)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn new() -> SharedBuf {
        SharedBuf(Arc::new(Mutex::new(Vec::new())))
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("buffer lock")).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_with(options: VmOptions, source: &str) -> (InterpretResult, String, String) {
    let mut vm = Vm::with_options(options);
    let out = SharedBuf::new();
    let err = SharedBuf::new();
    vm.set_output(Box::new(out.clone()));
    vm.set_error_output(Box::new(err.clone()));
    let result = vm.interpret(source);
    (result, out.contents(), err.contents())
}

fn run(source: &str) -> (InterpretResult, String, String) {
    run_with(VmOptions::default(), source)
}

#[test]
fn test_explicit_collection_keeps_reachable_values() {
    let (result, out, err) = run(
        "var keep = [1, 2, 3];\n\
         var o = { name: \"kept\" };\n\
         @system.gc();\n\
         print keep[2]; print o.name;",
    );
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "3\nkept\n");
}

#[test]
fn test_collection_frees_garbage() {
    let (result, out, err) = run(
        "for (var i = 0; i < 200; i = i + 1) { var junk = [i, { n: i }, @ctor.U8Array(64)]; }\n\
         @system.gc();\n\
         var after = @system.allocated();\n\
         for (var i = 0; i < 200; i = i + 1) { var junk = [i, { n: i }, @ctor.U8Array(64)]; }\n\
         @system.gc();\n\
         print @system.allocated() <= after + 1024;",
    );
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "true\n");
}

#[test]
fn test_cycles_are_collected() {
    // A class whose methods capture it and instances holding their class
    // form cycles; they must not keep the heap growing across collections.
    let (result, out, err) = run(
        "fun churn() {\n\
           class Node { init() { this.me = this; } }\n\
           var n = Node();\n\
           n.other = Node();\n\
         }\n\
         for (var i = 0; i < 100; i = i + 1) { churn(); }\n\
         @system.gc();\n\
         var low = @system.allocated();\n\
         for (var i = 0; i < 100; i = i + 1) { churn(); }\n\
         @system.gc();\n\
         print @system.allocated() <= low + 1024;",
    );
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "true\n");
}

#[test]
fn test_closed_upvalues_survive_collection() {
    let (result, out, err) = run_with(
        VmOptions {
            gc_stress: true,
            ..VmOptions::default()
        },
        "fun counter() { var n = 0; return lambda() { n = n + 1; return n; }; }\n\
         var tick = counter();\n\
         tick(); tick();\n\
         @system.gc();\n\
         print tick();",
    );
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "3\n");
}

#[test]
fn test_gc_tuning_natives() {
    let (result, out, err) = run(
        "print @system.gcNext(65536);\n\
         print @system.gcBegin(65536);\n\
         print @system.gcNext(\"x\");\n\
         print @system.allocated() >= 0;\n\
         print @system.static() > 0;",
    );
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "true\ntrue\nfalse\ntrue\ntrue\n");
}

#[test]
fn test_interned_strings_survive_collection() {
    let (result, out, err) = run(
        "var a = \"left\" + \"right\";\n\
         @system.gc();\n\
         print a == \"leftright\";",
    );
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "true\n");
}

#[test]
fn test_collect_on_empty_vm_is_safe() {
    let mut vm = Vm::new();
    vm.collect_garbage();
    vm.collect_garbage();
    let out = SharedBuf::new();
    vm.set_output(Box::new(out.clone()));
    assert_eq!(vm.interpret("print 1;"), InterpretResult::Ok);
    assert_eq!(out.contents(), "1\n");
}
