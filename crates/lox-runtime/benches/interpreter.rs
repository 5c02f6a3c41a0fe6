//! End-to-end interpreter benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lox_runtime::Vm;

const FIB: &str = "\
fun fib(n) {
  if (n < 2) return n;
  return fib(n - 2) + fib(n - 1);
}
fib(15);
";

const COUNTER: &str = "\
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
while (i < 5000) {
  counter();
  i = i + 1;
}
";

const METHODS: &str = "\
class Point {
  init(x, y) {
    this.x = x;
    this.y = y;
  }
  manhattan() { return this.x + this.y; }
}
var total = 0;
var i = 0;
while (i < 2000) {
  total = total + Point(i, i).manhattan();
  i = i + 1;
}
";

fn interpreter_benchmark(c: &mut Criterion) {
    c.bench_function("fib 15", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            vm.interpret(black_box(FIB)).unwrap();
        })
    });

    c.bench_function("closure counter", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            vm.interpret(black_box(COUNTER)).unwrap();
        })
    });

    c.bench_function("method dispatch", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            vm.interpret(black_box(METHODS)).unwrap();
        })
    });
}

criterion_group!(benches, interpreter_benchmark);
criterion_main!(benches);
