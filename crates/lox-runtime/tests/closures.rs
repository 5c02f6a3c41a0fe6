//! Closure semantics: upvalue capture, sharing, and closing

mod common;

use common::{eval, eval_vm};
use lox_runtime::object::Obj;
use lox_runtime::VmOptions;
use pretty_assertions::assert_eq;

#[test]
fn counter_closures_capture_independently() {
    let source = "\
fun makeCounter() {
  var c = 0;
  fun inc() {
    c = c + 1;
    return c;
  }
  return inc;
}
var a = makeCounter();
var b = makeCounter();
print a();
print a();
print b();
print a();
";
    assert_eq!(eval(source), "1\n2\n1\n3\n");
}

#[test]
fn closure_reads_enclosing_parameter() {
    let source = "\
fun adder(x) {
  fun add(y) { return x + y; }
  return add;
}
print adder(3)(4);
";
    assert_eq!(eval(source), "7\n");
}

#[test]
fn two_closures_share_one_upvalue() {
    let source = "\
var get;
var set;
fun pair() {
  var shared = \"initial\";
  fun g() { return shared; }
  fun s(v) { shared = v; }
  get = g;
  set = s;
}
pair();
set(\"updated\");
print get();
";
    assert_eq!(eval(source), "updated\n");
}

#[test]
fn upvalue_closes_over_the_right_iteration() {
    // Each loop body iteration gets a fresh local, so each closure sees its
    // own value.
    let source = "\
var first;
var second;
for (var i = 0; i < 2; i = i + 1) {
  var captured = i;
  fun show() { print captured; }
  if (first == nil) first = show; else second = show;
}
first();
second();
";
    assert_eq!(eval(source), "0\n1\n");
}

#[test]
fn block_exit_closes_captured_locals() {
    let source = "\
var f;
{
  var value = \"kept alive\";
  fun read() { return value; }
  f = read;
}
print f();
";
    assert_eq!(eval(source), "kept alive\n");
}

#[test]
fn capture_chain_through_two_levels() {
    let source = "\
fun outer() {
  var x = \"x\";
  fun middle() {
    fun inner() { print x; }
    return inner;
  }
  return middle();
}
outer()();
";
    assert_eq!(eval(source), "x\n");
}

#[test]
fn assignment_through_an_upvalue_chain() {
    let source = "\
fun outer() {
  var x = 1;
  fun middle() {
    fun bump() { x = x + 10; }
    bump();
  }
  middle();
  return x;
}
print outer();
";
    assert_eq!(eval(source), "11\n");
}

#[test]
fn closures_print_like_functions() {
    let source = "\
fun outer() {
  var x = 1;
  fun inner() { return x; }
  return inner;
}
print outer();
";
    assert_eq!(eval(source), "<fn inner>\n");
}

#[test]
fn every_closure_has_its_declared_upvalue_count() {
    let source = "\
fun outer() {
  var a = 1;
  var b = 2;
  fun both() { return a + b; }
  fun one() { return a; }
  fun none() { return 3; }
  print both() + one() + none();
}
outer();
";
    let (output, vm) = eval_vm(source, VmOptions::default());
    assert_eq!(output, "7\n");

    let heap = vm.heap();
    let mut closures = 0;
    for (_, obj) in heap.objects() {
        if let Obj::Closure(closure) = obj {
            let function = heap.function(closure.function);
            assert_eq!(closure.upvalues.len(), function.upvalue_count);
            closures += 1;
        }
    }
    assert!(closures > 0, "expected live closures to inspect");
}

#[test]
fn no_open_upvalues_survive_termination() {
    let source = "\
fun make() {
  var v = 0;
  fun get() { return v; }
  return get;
}
var g = make();
print g();
";
    let (output, vm) = eval_vm(source, VmOptions::default());
    assert_eq!(output, "0\n");
    assert_eq!(vm.open_upvalue_count(), 0);
    assert_eq!(vm.stack_size(), 0);
}
