//! Module import tests
//!
//! Modules live in real files under a per-test temp directory; the driver
//! imports them by absolute or relative path. A module's top level runs at
//! most once per VM, and repeated imports reuse the cached exports
//! protocol.

use std::io::Write;
use std::sync::{Arc, Mutex};

use ember_runtime::{InterpretResult, Vm};

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

fn run(source: &str) -> (InterpretResult, String, String) {
    let mut vm = Vm::new();
    let out = SharedBuf::new();
    let err = SharedBuf::new();
    vm.set_output(Box::new(out.clone()));
    vm.set_error_output(Box::new(err.clone()));
    let result = vm.interpret(source);
    (result, out.contents(), err.contents())
}

fn write_module(dir: &tempfile::TempDir, name: &str, source: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, source).expect("write module");
    path.to_string_lossy().into_owned()
}

#[test]
fn test_import_returns_exports_value() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_module(&dir, "m.em", "exports 42;");
    let (result, out, err) = run(&format!("print import(\"{path}\");"));
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "42\n");
}

#[test]
fn test_module_body_runs_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_module(&dir, "m.em", "print \"hi\";\nexports 42;");
    let source = format!(
        "var a = import(\"{path}\");\nvar b = import(\"{path}\");\nprint a; print b;"
    );
    let (result, out, err) = run(&source);
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "hi\n42\n42\n");
}

#[test]
fn test_import_path_from_builder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_module(&dir, "m.em", "exports 7;");
    let source = format!(
        "var b = @string.Builder(\"{path}\");\nprint import(b);"
    );
    let (result, out, err) = run(&source);
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "7\n");
}

#[test]
fn test_module_exports_object() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_module(
        &dir,
        "math_ext.em",
        "fun double(x) { return x * 2; }\nexports { double: double, tag: \"ext\" };",
    );
    let source = format!(
        "var m = import(\"{path}\");\nprint m.tag;\nprint m.double(21);"
    );
    let (result, out, err) = run(&source);
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "ext\n42\n");
}

#[test]
fn test_module_without_exports_yields_nil() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_module(&dir, "side.em", "var x = 1;");
    let (result, out, err) = run(&format!("print import(\"{path}\");"));
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "nil\n");
}

#[test]
fn test_missing_module_is_runtime_error() {
    let (result, _, err) = run("import(\"/definitely/not/there.em\");");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(err.contains("Failed to get absolute file path."), "stderr: {err}");
}

#[test]
fn test_bad_path_type_is_runtime_error() {
    let (result, _, err) = run("import(42);");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(
        err.contains("Path to import must be a string or stringBuilder."),
        "stderr: {err}"
    );
}

#[test]
fn test_module_compile_error_propagates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_module(&dir, "broken.em", "var = ;");
    let (result, _, _) = run(&format!("import(\"{path}\");"));
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_module_return_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_module(&dir, "ret.em", "return 1;");
    let (result, _, _) = run(&format!("import(\"{path}\");"));
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_exports_is_script_error() {
    let (result, _, _) = run("exports 1;");
    assert_eq!(result, InterpretResult::CompileError);
}
