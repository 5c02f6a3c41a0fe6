//! Collection driver: root marking
//!
//! The heap owns the mark/trace/sweep machinery; the VM owns the roots. A
//! collection marks everything the running program can still reach — the
//! value stack, each frame's closure, the open upvalues, the globals table,
//! and the cached `init` name — then traces, prunes the weak intern table,
//! and sweeps. Compilation finishes before execution starts, so the
//! compiler holds no roots of its own by the time a collection can run: the
//! script function is rooted through the stack like any other value.

use super::Vm;

impl Vm {
    pub(super) fn collect_garbage(&mut self) {
        let before = self.heap.bytes_allocated();
        if self.options.gc_log {
            eprintln!("-- gc begin");
        }

        for value in &self.stack {
            self.heap.mark_value(*value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &upvalue in &self.open_upvalues {
            self.heap.mark_object(upvalue);
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_object(self.init_string);

        self.heap.trace_references();
        self.heap.remove_unmarked_strings();
        self.heap.sweep();

        if self.options.gc_log {
            let after = self.heap.bytes_allocated();
            eprintln!(
                "-- gc end: collected {} bytes ({} -> {})",
                before - after,
                before,
                after
            );
        }
    }
}
