use ahash::AHashMap;

use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::SymbolId;
use crate::special::SpecialForm;
use crate::value::Value;

/// One environment frame: a mapping from symbol to value plus a pointer to
/// the enclosing frame. The top-level frame has no parent.
///
/// Frames live on the heap and are reference counted: every closure that
/// captured a frame and every active continuation holds a counted reference,
/// so a frame can outlive the call that created it.
#[derive(Debug)]
pub(crate) struct EnvFrame {
    pub bindings: AHashMap<SymbolId, Value>,
    pub parent: Option<HeapId>,
}

impl EnvFrame {
    pub fn new(parent: Option<HeapId>) -> Self {
        Self {
            bindings: AHashMap::new(),
            parent,
        }
    }
}

fn frame(heap: &Heap, env: HeapId) -> &EnvFrame {
    match heap.get(env) {
        HeapData::Env(f) => f,
        _ => panic!("env: id does not refer to an environment frame"),
    }
}

fn frame_mut(heap: &mut Heap, env: HeapId) -> &mut EnvFrame {
    match heap.get_mut(env) {
        HeapData::Env(f) => f,
        _ => panic!("env: id does not refer to an environment frame"),
    }
}

/// Unconditionally binds `name` in this frame, consuming `value`.
/// A previous binding's reference is released.
pub(crate) fn define(heap: &mut Heap, env: HeapId, name: SymbolId, value: Value) {
    let old = frame_mut(heap, env).bindings.insert(name, value);
    if let Some(old) = old {
        old.drop_with_heap(heap);
    }
}

/// Assignment (`set!`): rebinds `name` in the nearest enclosing frame that
/// already binds it, consuming `value`. Returns false (and leaves `value`
/// released) when no frame binds the name; the caller raises the
/// unbound-variable error.
pub(crate) fn assign(heap: &mut Heap, env: HeapId, name: SymbolId, value: Value) -> bool {
    let mut cur = env;
    loop {
        let (bound_here, parent) = {
            let f = frame(heap, cur);
            (f.bindings.contains_key(&name), f.parent)
        };
        if bound_here {
            define(heap, cur, name, value);
            return true;
        }
        match parent {
            Some(p) => cur = p,
            None => {
                value.drop_with_heap(heap);
                return false;
            }
        }
    }
}

/// Looks `name` up from this frame outward, returning a counted copy of the
/// nearest binding, or `None` for an unbound symbol.
pub(crate) fn lookup(heap: &Heap, env: HeapId, name: SymbolId) -> Option<Value> {
    let mut cur = env;
    loop {
        let f = frame(heap, cur);
        if let Some(v) = f.bindings.get(&name) {
            return Some(v.clone_with_heap(heap));
        }
        cur = f.parent?;
    }
}

/// Non-counting peek used while descending into a combination: reports
/// whether the head symbol currently denotes a special form, and which.
pub(crate) fn peek_special(heap: &Heap, env: HeapId, name: SymbolId) -> Option<SpecialForm> {
    let mut cur = env;
    loop {
        let f = frame(heap, cur);
        if let Some(v) = f.bindings.get(&name) {
            return match v {
                Value::Special(form) => Some(*form),
                _ => None,
            };
        }
        cur = f.parent?;
    }
}
