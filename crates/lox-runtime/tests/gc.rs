//! Garbage collector behavior under stress and normal pacing

mod common;

use common::{eval, eval_stress, eval_vm};
use lox_runtime::object::{Obj, ObjKind};
use lox_runtime::VmOptions;
use pretty_assertions::assert_eq;

const COUNTER_PROGRAM: &str = "\
fun makeCounter() {
  var c = 0;
  fun inc() {
    c = c + 1;
    return c;
  }
  return inc;
}
var counter = makeCounter();
var i = 0;
while (i < 1000) {
  print counter();
  i = i + 1;
}
";

#[test]
fn stress_mode_matches_normal_execution() {
    let expected: String = (1..=1000).map(|n| format!("{}\n", n)).collect();
    let normal = eval(COUNTER_PROGRAM);
    assert_eq!(normal, expected);
    let stressed = eval_stress(COUNTER_PROGRAM);
    assert_eq!(stressed, expected);
}

#[test]
fn concatenation_garbage_is_collected_under_stress() {
    let source = "\
var s = \"\";
var i = 0;
while (i < 100) {
  s = s + \"x\";
  i = i + 1;
}
print s;
";
    let expected = format!("{}\n", "x".repeat(100));
    assert_eq!(eval_stress(source), expected);
}

#[test]
fn stress_collection_prunes_intermediate_strings() {
    let source = "\
var s = \"seed\";
var i = 0;
while (i < 50) {
  s = s + \"!\";
  i = i + 1;
}
print s;
s = \"done\";
print \"x\" + \"y\";
";
    let (output, vm) = eval_vm(
        source,
        VmOptions {
            gc_stress: true,
            ..VmOptions::default()
        },
    );
    assert_eq!(output, format!("seed{}\nxy\n", "!".repeat(50)));

    // Once `s` is rebound, the last concatenation (which also collects, in
    // stress mode) prunes every accumulated string from the intern table
    // and sweeps it. Only the bare "seed" literal in the constant pool
    // survives.
    let intermediates = vm
        .heap()
        .objects()
        .filter(|(_, obj)| match obj {
            Obj::String(s) => s.chars.starts_with("seed") && s.chars.len() > 4,
            _ => false,
        })
        .count();
    assert_eq!(intermediates, 0);
}

#[test]
fn reachable_objects_survive_collection() {
    let source = "\
class Node {
  init(label) { this.label = label; }
}
var keep = Node(\"kept\");
var i = 0;
while (i < 100) {
  var garbage = Node(\"temp\");
  i = i + 1;
}
print keep.label;
";
    assert_eq!(eval_stress(source), "kept\n");
}

#[test]
fn cyclic_graphs_do_not_hang_the_collector() {
    // instance -> class -> method closure -> upvalue chain -> instance again
    let source = "\
var cell;
fun hold(v) { cell = v; }
class Cycle {
  init() { this.me = this; }
}
var i = 0;
while (i < 20) {
  hold(Cycle());
  i = i + 1;
}
print \"survived\";
";
    assert_eq!(eval_stress(source), "survived\n");
}

#[test]
fn marks_are_cleared_after_collection() {
    let (_, vm) = eval_vm(
        "var s = \"stay\"; print s;",
        VmOptions {
            gc_stress: true,
            ..VmOptions::default()
        },
    );
    // After the last collection every survivor is unmarked: interning the
    // same content again must find the existing object, which it reaches by
    // content, independent of mark state.
    let strings = vm
        .heap()
        .objects()
        .filter(|(_, obj)| obj.kind() == ObjKind::String)
        .count();
    assert!(strings > 0);
}

#[test]
fn bytes_allocated_drops_when_garbage_is_swept() {
    let source = "\
var i = 0;
while (i < 200) {
  var waste = \"aaaa\" + \"bbbb\";
  i = i + 1;
}
print \"done\";
";
    let (output, vm) = eval_vm(
        source,
        VmOptions {
            gc_stress: true,
            ..VmOptions::default()
        },
    );
    assert_eq!(output, "done\n");
    // The concat garbage is gone; what remains is bounded by the program's
    // literals, functions, and natives, far below 200 concat results.
    assert!(vm.heap().live_objects() < 50, "live: {}", vm.heap().live_objects());
}
