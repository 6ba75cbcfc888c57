//! External textual representation.
//!
//! Printing is iterative: an explicit stack of repr cursors walks pairs and
//! vectors, and a visited set keyed by heap id detects re-entry into a
//! container that is still being printed. At such a point the cursor
//! substitutes the finite marker `#inf#` and moves on, so the algorithm
//! terminates on every input, including self-referential structures.

use ahash::AHashSet;

use crate::error::{RunError, RunResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::Interner;
use crate::value::Value;

/// `Write` quotes strings and spells characters `#\x`; `Display` prints
/// their raw content. Everything else renders identically in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReprMode {
    Write,
    Display,
}

/// One pending unit of printing work.
enum Cursor<'a> {
    /// Render a value; containers push further cursors.
    Datum(&'a Value),
    /// Continue a pair chain after its car has been rendered.
    ListTail(HeapId),
    /// Continue a vector at the given element index.
    VectorTail { id: HeapId, idx: usize },
    /// Emit a literal fragment.
    Text(&'static str),
    /// Leave a container: remove it from the visited set.
    Exit(HeapId),
}

/// Renders the external representation of `value`.
///
/// `max_stack` bounds the cursor stack; exhaustion is an internal error.
pub(crate) fn external_repr(
    heap: &Heap,
    interner: &Interner,
    value: &Value,
    mode: ReprMode,
    max_stack: usize,
) -> RunResult<String> {
    let mut out = String::new();
    let mut visited: AHashSet<HeapId> = AHashSet::new();
    let mut stack: Vec<Cursor<'_>> = vec![Cursor::Datum(value)];

    while let Some(cursor) = stack.pop() {
        if stack.len() + 4 > max_stack {
            return Err(RunError::internal("repr stack overflow"));
        }
        match cursor {
            Cursor::Text(s) => out.push_str(s),
            Cursor::Exit(id) => {
                visited.remove(&id);
            }
            Cursor::Datum(v) => match v {
                Value::Ref(id) => match heap.get(*id) {
                    HeapData::Pair(p) => {
                        if visited.contains(id) {
                            out.push_str("#inf#");
                        } else {
                            visited.insert(*id);
                            out.push('(');
                            stack.push(Cursor::Exit(*id));
                            stack.push(Cursor::ListTail(*id));
                            stack.push(Cursor::Datum(&p.car));
                        }
                    }
                    HeapData::Vector(_) => {
                        if visited.contains(id) {
                            out.push_str("#inf#");
                        } else {
                            visited.insert(*id);
                            out.push_str("#(");
                            stack.push(Cursor::Exit(*id));
                            stack.push(Cursor::VectorTail { id: *id, idx: 0 });
                        }
                    }
                    _ => write_simple(&mut out, heap, interner, v, mode),
                },
                _ => write_simple(&mut out, heap, interner, v, mode),
            },
            Cursor::ListTail(id) => {
                let HeapData::Pair(p) = heap.get(id) else {
                    unreachable!("list tail cursor over a non-pair");
                };
                match &p.cdr {
                    Value::EmptyList => out.push(')'),
                    Value::Ref(next) if matches!(heap.get(*next), HeapData::Pair(_)) => {
                        if visited.contains(next) {
                            out.push_str(" . #inf#)");
                        } else {
                            visited.insert(*next);
                            out.push(' ');
                            let HeapData::Pair(np) = heap.get(*next) else {
                                unreachable!()
                            };
                            stack.push(Cursor::Exit(*next));
                            stack.push(Cursor::ListTail(*next));
                            stack.push(Cursor::Datum(&np.car));
                        }
                    }
                    other => {
                        out.push_str(" . ");
                        stack.push(Cursor::Text(")"));
                        stack.push(Cursor::Datum(other));
                    }
                }
            }
            Cursor::VectorTail { id, idx } => {
                let HeapData::Vector(items) = heap.get(id) else {
                    unreachable!("vector tail cursor over a non-vector");
                };
                if idx == items.len() {
                    out.push(')');
                } else {
                    if idx > 0 {
                        out.push(' ');
                    }
                    stack.push(Cursor::VectorTail { id, idx: idx + 1 });
                    stack.push(Cursor::Datum(&items[idx]));
                }
            }
        }
    }
    Ok(out)
}

/// Renders every non-container value directly.
fn write_simple(out: &mut String, heap: &Heap, interner: &Interner, v: &Value, mode: ReprMode) {
    match v {
        Value::EmptyList => out.push_str("()"),
        Value::Unspecified => out.push_str("#<Unspecified>"),
        Value::Bool(true) => out.push_str("#t"),
        Value::Bool(false) => out.push_str("#f"),
        Value::Char(c) => match mode {
            ReprMode::Display => out.push(*c),
            ReprMode::Write => {
                out.push_str("#\\");
                match c {
                    ' ' => out.push_str("space"),
                    '\n' => out.push_str("newline"),
                    '\t' => out.push_str("tab"),
                    other => out.push(*other),
                }
            }
        },
        Value::Symbol(s) => out.push_str(interner.get(*s)),
        Value::Special(f) => {
            out.push_str("#<Special Form: ");
            out.push_str(f.name());
            out.push('>');
        }
        Value::Builtin(b) => {
            out.push_str("#<Builtin Procedure: ");
            out.push_str(b.name());
            out.push('>');
        }
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Number(n) => n.write_repr(out),
            HeapData::Str(s) => match mode {
                ReprMode::Display => out.push_str(s),
                ReprMode::Write => {
                    out.push('"');
                    for c in s.chars() {
                        match c {
                            '"' => out.push_str("\\\""),
                            '\\' => out.push_str("\\\\"),
                            other => out.push(other),
                        }
                    }
                    out.push('"');
                }
            },
            HeapData::Closure(_) => out.push_str("#<Procedure>"),
            HeapData::Promise(_) => out.push_str("#<Promise>"),
            HeapData::Env(_) => out.push_str("#<Environment>"),
            HeapData::Pair(_) | HeapData::Vector(_) => {
                unreachable!("containers are handled by the cursor stack")
            }
        },
    }
}
