//! End-to-end interpreter tests
//!
//! Each case compiles and runs a source snippet against a fresh VM with
//! captured output, then asserts on the exact text printed and the
//! interpreter status.

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

fn run_vm(vm: &mut Vm, source: &str) -> (InterpretResult, String, String) {
    let out = SharedBuf::new();
    let err = SharedBuf::new();
    vm.set_output(Box::new(out.clone()));
    vm.set_error_output(Box::new(err.clone()));
    let result = vm.interpret(source);
    (result, out.contents(), err.contents())
}

fn run(source: &str) -> (InterpretResult, String, String) {
    let mut vm = Vm::new();
    run_vm(&mut vm, source)
}

fn expect_output(source: &str, expected: &str) {
    let (result, out, err) = run(source);
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, expected);
}

fn expect_runtime_error(source: &str, fragment: &str) {
    let (result, _, err) = run(source);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(err.contains("[RuntimeError]"), "stderr: {err}");
    assert!(err.contains(fragment), "stderr: {err}");
}

#[test]
fn test_arithmetic_and_print() {
    expect_output("print 1 + 2 * 3;", "6\n");
    expect_output("print (1 + 2) * 3;", "9\n");
    expect_output("print 10 / 4;", "2.5\n");
    expect_output("print -3 - -4;", "1\n");
    expect_output("print 5.5 % 2;", "1.5\n");
}

#[test]
fn test_number_formatting() {
    expect_output("print 1 / 0;", "Infinity\n");
    expect_output("print -1 / 0;", "-Infinity\n");
    expect_output("print 5 % 0;", "NaN\n");
    expect_output("print 0.000025;", "2.5e-5\n");
    expect_output("print 1e21;", "1000000000000000000000\n");
    expect_output("print 0b101 + 0x0a;", "15\n");
}

#[test]
fn test_comparisons_and_logic() {
    expect_output("print 1 < 2;", "true\n");
    expect_output("print 2 <= 1;", "false\n");
    expect_output("print 1 == 1.0;", "true\n");
    expect_output("print \"a\" == \"a\";", "true\n");
    expect_output("print \"a\" == \"b\";", "false\n");
    expect_output("print nil == false;", "false\n");
    expect_output("print !nil;", "true\n");
    // Short-circuit: the undefined global on the right is never evaluated.
    expect_output("print false and missing;", "false\n");
    expect_output("print true or missing;", "true\n");
}

#[test]
fn test_bitwise_semantics() {
    expect_output("print 5 & 3;", "1\n");
    expect_output("print 1 | 6;", "7\n");
    expect_output("print (1 | 6) ^ 3;", "4\n");
    expect_output("print ~0;", "-1\n");
    expect_output("print 1 << 3;", "8\n");
    // Shift counts are masked to 0..=31; negative counts give 0.
    expect_output("print 1 << 33;", "2\n");
    expect_output("print 8 << -1;", "0\n");
    expect_output("print -8 >> 1;", "-4\n");
    expect_output("print -16 >>> 28;", "15\n");
}

#[test]
fn test_type_errors() {
    expect_runtime_error("print 1 + nil;", "Operands must be two numbers or two strings.");
    expect_runtime_error("print 1 < \"a\";", "Operands must be numbers.");
    expect_runtime_error("print -\"a\";", "Operand must be a number.");
    expect_runtime_error("print 1 & true;", "Operands must be numbers.");
    expect_runtime_error("print missing;", "Undefined variable 'missing'.");
    expect_runtime_error("missing = 1;", "Undefined variable 'missing'.");
    expect_runtime_error("var f = 1; f();", "Can only call functions and classes.");
}

#[test]
fn test_string_concatenation_interns() {
    expect_output("print \"foo\" + \"bar\";", "foobar\n");
    expect_output("print \"foo\" + \"bar\" == \"foobar\";", "true\n");
    expect_output(r#"print "say \"hi\"";"#, "say \"hi\"\n");
}

#[test]
fn test_control_flow() {
    expect_output(
        "var s = 0; for (var i = 0; i < 5; i = i + 1) { s = s + i; } print s;",
        "10\n",
    );
    expect_output("var i = 0; while (i < 3) { i = i + 1; } print i;", "3\n");
    expect_output("var i = 10; do { i = i + 1; } while (false); print i;", "11\n");
    expect_output(
        "var s = 0; for (var i = 0; i < 10; i = i + 1) { if (i == 5) break; s = s + i; } print s;",
        "10\n",
    );
    expect_output(
        "var s = 0; for (var i = 0; i < 5; i = i + 1) { if (i == 2) continue; s = s + i; } print s;",
        "8\n",
    );
    expect_output(
        "var x = 2; branch { x == 1: print \"one\"; x == 2: print \"two\"; none: print \"other\"; }",
        "two\n",
    );
    expect_output(
        "var x = 9; branch { x == 1: print \"one\"; none: print \"other\"; }",
        "other\n",
    );
}

#[test]
fn test_functions_and_recursion() {
    expect_output(
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);",
        "55\n",
    );
    expect_output("var f = lambda(x) { return x * 2; }; print f(21);", "42\n");
    // Missing arguments arrive as nil.
    expect_output("fun f(a, b) { print b; } f(1);", "nil\n");
    expect_runtime_error("fun f(a) {} f(1, 2);", "Expected 1 arguments but got 2.");
}

#[test]
fn test_closure_capture() {
    expect_output(
        "fun mk() { var x = 10; fun inc() { x = x + 1; return x; } return inc; }\n\
         var f = mk(); print f(); print f();",
        "11\n12\n",
    );
    // Two closures over the same variable share one cell.
    expect_output(
        "fun mk() { var x = 0; fun bump() { x = x + 1; } fun get() { return x; }\n\
         return [bump, get]; }\n\
         var pair = mk(); var bump = pair[0]; var get = pair[1];\n\
         bump(); bump(); print get();",
        "2\n",
    );
}

#[test]
fn test_classes_init_and_super() {
    expect_output(
        "class A { init(n) { this.n = n; } hi() { return this.n; } }\n\
         class B < A { hi() { return super.hi() + 1; } }\n\
         print B(5).hi();",
        "6\n",
    );
    expect_output(
        "class A { init() { this.tag = \"a\"; } }\n\
         class B < A {}\n\
         print B().tag;",
        "a\n",
    );
    expect_output(
        "class C { init() { this.f = lambda() { return 9; } ; } f() { return 1; } }\n\
         print C().f();",
        "9\n",
    );
    expect_runtime_error("class A { init(n) {} } A(1, 2);", "Expected 1 arguments but got 2.");
    expect_runtime_error("class A {} A(1);", "Expected 0 arguments for initializer but got 1.");
}

#[test]
fn test_instance_of_and_typeof() {
    expect_output(
        "class A {} var a = A(); print a instanceOf A;",
        "true\n",
    );
    expect_output("class A {} print 1 instanceOf A;", "false\n");
    // Direct class only, no inheritance walk.
    expect_output(
        "class A {} class B < A {} print B() instanceOf A;",
        "false\n",
    );
    expect_output("print typeof 1;", "number\n");
    expect_output("print typeof \"s\";", "string\n");
    expect_output("print typeof nil;", "nil\n");
    expect_output("print typeof true;", "boolean\n");
    expect_output("print typeof lambda() {};", "function\n");
    expect_output("class A {} print typeof A;", "class\n");
    expect_output("class A {} print typeof A();", "object\n");
    expect_output("print typeof [1];", "array\n");
    expect_output("print typeof @ctor.U8Array(1);", "array-u8\n");
    expect_output("print typeof @math.abs;", "native\n");
}

#[test]
fn test_properties_and_object_literals() {
    expect_output("var o = { a: 1, b: 2 }; print o.a + o.b;", "3\n");
    expect_output("var o = { a: 1 }; o.b = 5; print o.b;", "5\n");
    expect_output("var o = { a: 1 }; print o.missing;", "nil\n");
    // Assigning nil deletes the field.
    expect_output(
        "var o = { a: 1, b: 2 }; o.a = nil; print @array.length(@object.keys(o));",
        "1\n",
    );
    expect_output("var o = { a: 7 }; print o[\"a\"];", "7\n");
    expect_output("var o = {}; o[\"k\"] = 3; print o.k;", "3\n");
    expect_runtime_error("var x = 1; print x.field;", "Only instances have properties.");
}

#[test]
fn test_arrays_and_subscripts() {
    expect_output("var a = [1, 2, 3]; print a[0] + a[2];", "4\n");
    expect_output("var a = [1, 2, 3]; a[1] = 9; print a[1];", "9\n");
    // Out-of-range reads yield nil, writes raise.
    expect_output("var a = [1]; print a[5];", "nil\n");
    expect_output("var a = [1]; print a[-1];", "nil\n");
    expect_runtime_error("var a = [1]; a[5] = 0;", "Array index out of range.");
    expect_output("print @array.length([1, 2, 3]);", "3\n");
    expect_output("var a = [1]; @array.push(a, 2, 3); print @array.length(a);", "3\n");
    expect_output("var a = [1, 2]; print @array.pop(a);", "2\n");
    expect_output("var a = [1, 2]; @array.resize(a, 4); print a[3];", "nil\n");
    // Byte reads from interned strings.
    expect_output("print \"A\"[0];", "65\n");
    expect_output("print \"A\"[3];", "nil\n");
}

#[test]
fn test_typed_array_coercion() {
    expect_output(
        "var a = @ctor.I8Array(3); a[0] = 300; a[1] = -5; a[2] = \"x\";\n\
         print a[0]; print a[1]; print a[2];",
        "44\n-5\n0\n",
    );
    expect_output(
        "var a = @ctor.U16Array(1); a[0] = 65537.9; print a[0];",
        "1\n",
    );
    expect_output("var a = @ctor.F32Array(1); a[0] = 1.5; print a[0];", "1.5\n");
    expect_output("print @array.length(@ctor.F64Array(8));", "8\n");
    expect_output("var a = @ctor.U8Array(2); print typeof a;", "array-u8\n");
}

#[test]
fn test_string_natives() {
    expect_output("print @string.length(\"hello\");", "5\n");
    expect_output("print @string.charAt(\"abc\", 1);", "b\n");
    expect_output("print @string.charAt(\"abc\", 9);", "nil\n");
    expect_output("print @string.utf8Len(\"a\u{00e9}b\");", "3\n");
    expect_output("print @string.utf8At(\"a\u{00e9}b\", 1);", "\u{00e9}\n");
    expect_output(
        "var b = @string.Builder(\"ab\"); @string.append(b, \"cd\"); print b;",
        "abcd\n",
    );
    expect_output(
        "var b = @string.Builder(\"xy\"); print @string.intern(b) == \"xy\";",
        "true\n",
    );
    expect_output(
        "var b = @string.Builder(\"k\"); print @string.equals(b, \"k\");",
        "true\n",
    );
    expect_output("print @string.equals(\"a\", \"b\");", "false\n");
}

#[test]
fn test_math_natives() {
    expect_output("print @math.max(1, 7, 3);", "7\n");
    expect_output("print @math.min(4, 2, 8);", "2\n");
    expect_output("print @math.abs(-3.5);", "3.5\n");
    expect_output("print @math.floor(2.9);", "2\n");
    expect_output("print @math.ceil(2.1);", "3\n");
    expect_output("print @math.pow(2, 10);", "1024\n");
    expect_output("print @math.sqrt(81);", "9\n");
    expect_output("print @math.isNaN(0 / 0);", "true\n");
    expect_output("print @math.isFinite(1 / 0);", "false\n");
    // Lenient on bad arguments.
    expect_output("print @math.abs(\"x\");", "NaN\n");
    expect_output(
        "@math.seed(42); var a = @math.random(); @math.seed(42); print a == @math.random();",
        "true\n",
    );
    expect_output(
        "var r = @math.random(); print r >= 0 and r < 1;",
        "true\n",
    );
}

#[test]
fn test_global_natives() {
    expect_output("print max(1, 9, 4);", "9\n");
    expect_output("print min(3, -2);", "-2\n");
    expect_runtime_error("print max(1);", "Expected at least 2 arguments");
    expect_output("print clock() >= 0;", "true\n");
}

#[test]
fn test_object_natives() {
    expect_output("print @object.isNumber(1);", "true\n");
    expect_output("print @object.isString(\"s\");", "true\n");
    expect_output("print @object.isArray([1]);", "true\n");
    expect_output("print @object.isTypedArray(@ctor.I32Array(1));", "true\n");
    expect_output("print @object.isArrayLike(@ctor.StringBuilder());", "true\n");
    expect_output("print @object.isInstance({});", "true\n");
    expect_output("class A {} print @object.isClass(A);", "true\n");
    expect_output("fun f() {} print @object.isFunction(f);", "true\n");
    expect_output("print @object.isFunction(@math.abs);", "true\n");
    expect_output("print @object.isBoolean(false);", "true\n");
    expect_output(
        "@object.setGlobal(\"gx\", 5); print @object.getGlobal(\"gx\");",
        "5\n",
    );
    expect_output("@object.setGlobal(\"gy\", 6); print gy;", "6\n");
}

#[test]
fn test_builtin_namespaces_are_frozen() {
    expect_output("@math.floor = 5; print typeof @math.floor;", "native\n");
    expect_output("print typeof @time.nano();", "number\n");
}

#[test]
fn test_throw_unwinds_with_trace() {
    let (result, _, err) = run("fun f() { throw \"boom\"; } fun g() { f(); } g();");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert!(err.contains("[RuntimeError]"), "stderr: {err}");
    assert!(err.contains("An exception was thrown."), "stderr: {err}");
    assert!(err.contains("boom"), "stderr: {err}");
    assert!(err.contains("f()"), "stderr: {err}");
    assert!(err.contains("g()"), "stderr: {err}");
    assert!(err.contains("<script>"), "stderr: {err}");
}

#[test]
fn test_frame_overflow() {
    expect_runtime_error("fun f() { f(); } f();", "Stack overflow.");
}

#[test]
fn test_repl_resets_stack_between_entries() {
    let mut vm = Vm::new();
    let (first, _, _) = {
        let out = SharedBuf::new();
        let err = SharedBuf::new();
        vm.set_output(Box::new(out.clone()));
        vm.set_error_output(Box::new(err.clone()));
        let r = vm.interpret_repl("throw \"bad\";");
        (r, out.contents(), err.contents())
    };
    assert_eq!(first, InterpretResult::RuntimeError);
    let (second, out, _) = run_vm(&mut vm, "print 1 + 1;");
    assert_eq!(second, InterpretResult::Ok);
    assert_eq!(out, "2\n");
}

#[test]
fn test_globals_persist_across_entries() {
    let mut vm = Vm::new();
    let (r1, _, _) = run_vm(&mut vm, "var counter = 41;");
    assert_eq!(r1, InterpretResult::Ok);
    let (r2, out, _) = run_vm(&mut vm, "print counter + 1;");
    assert_eq!(r2, InterpretResult::Ok);
    assert_eq!(out, "42\n");
}

#[test]
fn test_function_formatting() {
    let (result, out, _) = run("fun handle() {} print handle;");
    assert_eq!(result, InterpretResult::Ok);
    assert!(out.starts_with("<fn handle> ("), "stdout: {out}");

    let (result, out, _) = run("print lambda() {};");
    assert_eq!(result, InterpretResult::Ok);
    assert!(out.starts_with("<lambda> ("), "stdout: {out}");

    let (result, out, _) = run("class Point {} print Point; print Point();");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(out, "Point (class)\nPoint (instance)\n");
}

#[test]
fn test_anonymous_instance_formatting() {
    expect_output("var o = { a: 1 }; print o;", "$anon (instance)\n");
    expect_output("print [1, 2];", "<array>\n");
    expect_output("print @ctor.F64Array(2);", "<array-f64>\n");
}

#[test]
fn test_system_log_expands() {
    expect_output("@system.log([1, 2], \"x\", 3);", "[ 1, 2 ] x 3\n");
    expect_output("@system.log(@ctor.U8Array(2));", "[ 0, 0 ]\n");
}

#[test]
fn test_gc_stress_preserves_semantics() {
    let mut vm = Vm::with_options(VmOptions {
        gc_stress: true,
        ..VmOptions::default()
    });
    let (result, out, err) = run_vm(
        &mut vm,
        "fun mk() { var x = 10; fun inc() { x = x + 1; return x; } return inc; }\n\
         var f = mk();\n\
         var junk = 0;\n\
         for (var i = 0; i < 50; i = i + 1) { var a = [i, \"tmp\" + \"x\", { n: i }]; junk = junk + a[0]; }\n\
         print f(); print f(); print junk;",
    );
    assert_eq!(result, InterpretResult::Ok, "stderr: {err}");
    assert_eq!(out, "11\n12\n1225\n");
}
