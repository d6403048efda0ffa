//! Whole programs run through the public api.

mod common;

use common::{output_of, run, runtime_error_of, Error, InterpretResult, Vm};

#[test]
fn counter_closures_are_independent() {
    let src = r#"
        fun makeCounter() {
          var count = 0;
          fun inc() { count = count + 1; return count; }
          return inc;
        }
        var a = makeCounter();
        var b = makeCounter();
        a(); a();
        print a();
        print b();
    "#;
    assert_eq!(output_of(src), "3\n1\n");
}

#[test]
fn closures_share_a_captured_variable() {
    let src = r#"
        var get;
        var set;
        fun make() {
          var v = "initial";
          fun g() { return v; }
          fun s(x) { v = x; }
          get = g;
          set = s;
        }
        make();
        print get();
        set("changed");
        print get();
    "#;
    assert_eq!(output_of(src), "initial\nchanged\n");
}

#[test]
fn recursion_and_iteration_agree() {
    let src = r#"
        fun fibRec(n) {
          if (n < 2) return n;
          return fibRec(n - 1) + fibRec(n - 2);
        }
        fun fibIter(n) {
          var a = 0;
          var b = 1;
          for (var i = 0; i < n; i = i + 1) {
            var t = a + b;
            a = b;
            b = t;
          }
          return a;
        }
        for (var i = 0; i < 15; i = i + 1) {
          if (fibRec(i) != fibIter(i)) print i;
        }
        print fibIter(30);
    "#;
    assert_eq!(output_of(src), "832040\n");
}

#[test]
fn arrays_hold_any_value() {
    let src = r#"
        fun id(x) { return x; }
        var xs = [1, "two", nil, true, id, [3]];
        print xs;
        print xs[4](5);
        xs[5][0] = "nested";
        print xs[5];
    "#;
    assert_eq!(
        output_of(src),
        "[1, two, nil, true, <fn id>, [3]]\n5\n[nested]\n"
    );
}

#[test]
fn dynamically_built_strings_are_interned() {
    let src = r#"
        var a = "con" + "cat";
        var b = "c" + "oncat";
        print a == b;
        print a == "concat";
    "#;
    assert_eq!(output_of(src), "true\ntrue\n");
}

#[test]
fn globals_persist_between_runs() {
    let mut vm = Vm::with_output(Vec::new());
    vm.interpret("var x = 40;").unwrap();
    vm.interpret("fun add(n) { return x + n; }").unwrap();
    vm.interpret("print add(2);").unwrap();
    assert_eq!(vm.output().as_slice(), b"42\n");
}

#[test]
fn the_vm_recovers_after_a_runtime_error() {
    let mut vm = Vm::with_output(Vec::new());
    assert_eq!(
        vm.interpret_result("fun f() { return -\"x\"; } f();"),
        InterpretResult::RuntimeError
    );
    assert!(vm.stack().is_empty());
    assert!(vm.frames().is_empty());
    assert_eq!(vm.interpret_result("print 1;"), InterpretResult::Ok);
    assert_eq!(vm.output().as_slice(), b"1\n");
}

#[test]
fn compile_errors_prevent_execution() {
    let (out, res) = run("print \"side effect\";\nprint 1 +;");
    assert_eq!(out, "");
    match res {
        Err(Error::Compile(errors)) => {
            assert_eq!(errors.0.len(), 1);
            assert_eq!(
                errors.to_string(),
                "[line 2] Error at ';': Expect expression."
            );
        }
        other => panic!("expected a compile error, got {:?}", other),
    }
}

#[test]
fn unterminated_string_is_reported_by_line() {
    let (_, res) = run("print 1;\nprint \"never closed;");
    let err = res.unwrap_err();
    assert_eq!(err.kind(), InterpretResult::CompileError);
    assert_eq!(err.to_string(), "[line 2] Error: Unterminated string.");
}

#[test]
fn runtime_errors_carry_a_stack_trace() {
    let src = "fun a() { b(); }\nfun b() { c(); }\nfun c() { nope(); }\na();";
    match run(src).1 {
        Err(Error::Runtime(e)) => {
            assert_eq!(
                e.to_string(),
                "Undefined variable 'nope'.\n\
                 [line 3] in c()\n\
                 [line 2] in b()\n\
                 [line 1] in a()\n\
                 [line 4] in script"
            );
        }
        other => panic!("expected a runtime error, got {:?}", other),
    }
}

#[test]
fn runtime_error_messages() {
    assert_eq!(runtime_error_of("print 1 < \"a\";"), "Operands must be numbers.");
    assert_eq!(runtime_error_of("print -nil;"), "Operand must be a number.");
    assert_eq!(
        runtime_error_of("print nil + 1;"),
        "Operands must be two numbers or two strings."
    );
    assert_eq!(runtime_error_of("var x = 1; x();"), "Can only call functions.");
    assert_eq!(
        runtime_error_of("fun f(a, b) {} f(1);"),
        "Expected 2 arguments but got 1."
    );
    assert_eq!(runtime_error_of("fun f() { f(); } f();"), "Stack overflow.");
    assert_eq!(runtime_error_of("print 3[0];"), "Only arrays can be indexed.");
}

#[test]
fn native_argument_errors_are_runtime_errors() {
    assert_eq!(
        runtime_error_of("print len(3);"),
        "len: expected an array but got number."
    );
    assert_eq!(
        runtime_error_of("print clock(1);"),
        "Expected 0 arguments but got 1."
    );
}

#[test]
fn heap_grows_with_allocations() {
    let mut vm = Vm::with_output(Vec::new());
    let before = vm.heap().object_count();
    vm.interpret("var s = \"a\" + \"b\"; var xs = [s, s];").unwrap();
    assert!(vm.heap().object_count() > before);
    assert!(vm.heap().bytes_allocated() > 0);
}

#[test]
fn factor_binds_tighter_than_term() {
    assert_eq!(output_of("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn returned_closure_keeps_its_argument() {
    let src = "fun make(a) { fun inner() { return a; } return inner; } var f = make(5); print f();";
    assert_eq!(output_of(src), "5\n");
}

#[test]
fn block_locals_do_not_leak() {
    assert_eq!(output_of("var x; { var x = 1; } print x;"), "nil\n");
}

#[test]
fn calling_an_undeclared_global_fails() {
    assert_eq!(runtime_error_of("nope();"), "Undefined variable 'nope'.");
}

#[test]
fn captured_locals_are_closed_when_a_run_fails() {
    let mut vm = Vm::with_output(Vec::new());
    let failing = r#"
        var get;
        var set;
        fun make() {
          var v = "kept";
          fun g() { return v; }
          fun s(x) { v = x; }
          get = g;
          set = s;
          return -v;
        }
        make();
    "#;
    assert_eq!(vm.interpret_result(failing), InterpretResult::RuntimeError);
    vm.interpret("{ var a = 1; var b = 2; print get(); }").unwrap();
    vm.interpret("set(\"changed\"); { var c = 3; print get(); }").unwrap();
    assert_eq!(vm.output().as_slice(), b"kept\nchanged\n");
}
