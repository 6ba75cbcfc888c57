use smallvec::SmallVec;

use crate::heap::HeapId;
use crate::intern::SymbolId;

/// Parameter descriptor for a closure. Three shapes:
///
/// - `Fixed`: a proper list of symbols, fixed arity.
/// - `Variadic`: a single symbol, the entire argument list is bound to it.
/// - `Rest`: a dotted list, fixed required parameters followed by a
///   rest-list parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Params {
    Fixed(SmallVec<[SymbolId; 4]>),
    Variadic(SymbolId),
    Rest(SmallVec<[SymbolId; 4]>, SymbolId),
}

impl Params {
    /// Checks the supplied argument count against this descriptor.
    pub fn accepts(&self, argc: usize) -> bool {
        match self {
            Self::Fixed(names) => argc == names.len(),
            Self::Variadic(_) => true,
            Self::Rest(names, _) => argc >= names.len(),
        }
    }

    /// Human-readable arity for error messages.
    pub fn arity_description(&self) -> String {
        match self {
            Self::Fixed(names) => names.len().to_string(),
            Self::Variadic(_) => "any number of".to_string(),
            Self::Rest(names, _) => format!("at least {}", names.len()),
        }
    }
}

/// A user-defined procedure: a body, a parameter descriptor, and the
/// environment captured at the point of construction.
///
/// `body` is the first node of a non-empty expression list; every body node
/// is detached (`standalone`) so the evaluator applies the pending call once
/// per body expression.
#[derive(Debug)]
pub(crate) struct Closure {
    pub params: Params,
    pub body: HeapId,
    pub env: HeapId,
}
