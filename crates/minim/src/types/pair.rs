use crate::value::Value;

/// The pair cell: the universal list and syntax-tree structure.
///
/// Beyond `car`/`cdr`, a pair carries two evaluator control flags that only
/// matter when the pair is a syntax-tree node:
///
/// - `skip`: special forms mark operand nodes so the default left-to-right
///   argument sweep steps over them instead of evaluating them.
/// - `standalone`: sequence expressions (closure and `let` bodies, chosen
///   `if`/`cond` branches) are detached so the program counter stops after
///   each of them and the pending call applies once per expression.
#[derive(Debug)]
pub(crate) struct Pair {
    pub car: Value,
    pub cdr: Value,
    pub skip: bool,
    pub standalone: bool,
}

impl Pair {
    pub fn new(car: Value, cdr: Value) -> Self {
        Self {
            car,
            cdr,
            skip: false,
            standalone: false,
        }
    }

    /// A detached node: the program counter will not advance past it.
    pub fn standalone(car: Value, cdr: Value) -> Self {
        Self {
            car,
            cdr,
            skip: false,
            standalone: true,
        }
    }
}
