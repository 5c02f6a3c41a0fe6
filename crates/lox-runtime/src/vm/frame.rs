//! Call frames

use crate::heap::ObjRef;

/// Per-invocation record
///
/// `function` is the closure's function, cached at call time so the dispatch
/// loop does one handle hop per instruction instead of two. `slot_base` is
/// the index of the frame's slot 0 on the value stack (the callee, or `this`
/// for method calls).
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub closure: ObjRef,
    pub function: ObjRef,
    /// Byte cursor into the function's chunk
    pub ip: usize,
    pub slot_base: usize,
}
