//! Tokenizer and datum reader.
//!
//! The reader turns source text into syntax trees built from the same pair
//! and vector values the evaluator consumes. Like the evaluator it works
//! with an explicit stack rather than host recursion, so deeply nested
//! input cannot overflow the host stack.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::{RunError, RunResult};
use crate::heap::{Heap, HeapData};
use crate::intern::Interner;
use crate::types::{Number, Pair};
use crate::value::{Value, drop_values};

#[derive(Debug, PartialEq)]
enum Token {
    Open,
    Close,
    VecOpen,
    Quote,
    Dot,
    Str(String),
    Char(char),
    Atom(String),
}

struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\'')
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
        }
    }

    fn next_token(&mut self) -> RunResult<Option<Token>> {
        loop {
            let Some(&c) = self.chars.peek() else {
                return Ok(None);
            };
            match c {
                _ if c.is_whitespace() => {
                    self.chars.next();
                }
                ';' => {
                    // Comment to end of line.
                    for c in self.chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                '(' => {
                    self.chars.next();
                    return Ok(Some(Token::Open));
                }
                ')' => {
                    self.chars.next();
                    return Ok(Some(Token::Close));
                }
                '\'' => {
                    self.chars.next();
                    return Ok(Some(Token::Quote));
                }
                '"' => {
                    self.chars.next();
                    return self.string_token().map(Some);
                }
                '#' => return self.hash_token().map(Some),
                _ => return self.atom_token().map(Some),
            }
        }
    }

    fn string_token(&mut self) -> RunResult<Token> {
        let mut s = String::new();
        loop {
            match self.chars.next() {
                None => return Err(RunError::syntax("unterminated string literal")),
                Some('"') => return Ok(Token::Str(s)),
                Some('\\') => match self.chars.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some(other) => {
                        return Err(RunError::syntax(format!("unknown string escape: \\{other}")));
                    }
                    None => return Err(RunError::syntax("unterminated string literal")),
                },
                Some(c) => s.push(c),
            }
        }
    }

    /// `#(` vector open, `#\x` character, or a `#...` atom (`#t`, `#f`).
    fn hash_token(&mut self) -> RunResult<Token> {
        self.chars.next();
        match self.chars.peek() {
            Some('(') => {
                self.chars.next();
                Ok(Token::VecOpen)
            }
            Some('\\') => {
                self.chars.next();
                let Some(first) = self.chars.next() else {
                    return Err(RunError::syntax("lone #\\ at end of input"));
                };
                let mut name = String::from(first);
                if first.is_alphabetic() {
                    while let Some(&c) = self.chars.peek() {
                        if is_delimiter(c) {
                            break;
                        }
                        name.push(c);
                        self.chars.next();
                    }
                }
                let ch = match name.as_str() {
                    "space" => ' ',
                    "newline" => '\n',
                    "tab" => '\t',
                    single if single.chars().count() == 1 => single.chars().next().expect("one char"),
                    other => return Err(RunError::syntax(format!("unknown character name: #\\{other}"))),
                };
                Ok(Token::Char(ch))
            }
            _ => {
                let mut atom = String::from('#');
                while let Some(&c) = self.chars.peek() {
                    if is_delimiter(c) {
                        break;
                    }
                    atom.push(c);
                    self.chars.next();
                }
                Ok(Token::Atom(atom))
            }
        }
    }

    fn atom_token(&mut self) -> RunResult<Token> {
        let mut atom = String::new();
        while let Some(&c) = self.chars.peek() {
            if is_delimiter(c) {
                break;
            }
            atom.push(c);
            self.chars.next();
        }
        if atom == "." {
            Ok(Token::Dot)
        } else {
            Ok(Token::Atom(atom))
        }
    }
}

/// A partially-built container on the reader stack.
enum Partial {
    List {
        items: Vec<Value>,
        tail: Option<Value>,
        seen_dot: bool,
    },
    Vector(Vec<Value>),
    /// A `'datum` abbreviation waiting for its datum.
    Quote,
}

/// Reads every datum in `src`, returning the values in order. Each returned
/// value carries one owned reference; release it with the interpreter once
/// it has been evaluated or is no longer needed.
pub(crate) fn read_datums(src: &str, heap: &mut Heap, interner: &mut Interner) -> RunResult<Vec<Value>> {
    let mut tokenizer = Tokenizer::new(src);
    let mut stack: Vec<Partial> = Vec::new();
    let mut out: Vec<Value> = Vec::new();

    let result = (|| -> RunResult<()> {
        while let Some(token) = tokenizer.next_token()? {
            match token {
                Token::Open => stack.push(Partial::List {
                    items: Vec::new(),
                    tail: None,
                    seen_dot: false,
                }),
                Token::VecOpen => stack.push(Partial::Vector(Vec::new())),
                Token::Quote => stack.push(Partial::Quote),
                Token::Dot => match stack.last_mut() {
                    Some(Partial::List { items, seen_dot, .. }) if !items.is_empty() && !*seen_dot => {
                        *seen_dot = true;
                    }
                    _ => return Err(RunError::syntax("misplaced dot")),
                },
                Token::Close => {
                    let value = match stack.pop() {
                        Some(Partial::List { items, tail, seen_dot }) => {
                            if seen_dot && tail.is_none() {
                                return Err(RunError::syntax("datum expected after dot"));
                            }
                            build_list(heap, items, tail)
                        }
                        Some(Partial::Vector(items)) => Value::Ref(heap.allocate(HeapData::Vector(items))),
                        Some(Partial::Quote) | None => {
                            return Err(RunError::syntax("unexpected )"));
                        }
                    };
                    deliver(heap, interner, &mut stack, &mut out, value)?;
                }
                Token::Str(s) => {
                    let value = Value::Ref(heap.allocate(HeapData::Str(s)));
                    deliver(heap, interner, &mut stack, &mut out, value)?;
                }
                Token::Char(c) => deliver(heap, interner, &mut stack, &mut out, Value::Char(c))?,
                Token::Atom(atom) => {
                    let value = classify_atom(&atom, heap, interner)?;
                    deliver(heap, interner, &mut stack, &mut out, value)?;
                }
            }
        }
        if stack.is_empty() {
            Ok(())
        } else {
            Err(RunError::syntax("unexpected end of input"))
        }
    })();

    match result {
        Ok(()) => Ok(out),
        Err(e) => {
            // Release everything built so far.
            for partial in stack {
                match partial {
                    Partial::List { items, tail, .. } => {
                        drop_values(heap, items);
                        if let Some(t) = tail {
                            t.drop_with_heap(heap);
                        }
                    }
                    Partial::Vector(items) => drop_values(heap, items),
                    Partial::Quote => {}
                }
            }
            drop_values(heap, out);
            Err(e)
        }
    }
}

/// Folds collected items (and an optional dotted tail) into a pair chain.
fn build_list(heap: &mut Heap, items: Vec<Value>, tail: Option<Value>) -> Value {
    let mut acc = tail.unwrap_or(Value::EmptyList);
    for item in items.into_iter().rev() {
        acc = Value::Ref(heap.allocate(HeapData::Pair(Pair::new(item, acc))));
    }
    acc
}

/// Hands a finished datum to the innermost container, expanding `'x` to
/// `(quote x)` as it unwinds.
fn deliver(
    heap: &mut Heap,
    interner: &mut Interner,
    stack: &mut Vec<Partial>,
    out: &mut Vec<Value>,
    value: Value,
) -> RunResult<()> {
    let mut value = value;
    loop {
        match stack.last_mut() {
            None => {
                out.push(value);
                return Ok(());
            }
            Some(Partial::List { items, tail, seen_dot }) => {
                if *seen_dot {
                    if tail.is_some() {
                        value.drop_with_heap(heap);
                        return Err(RunError::syntax("multiple datums after dot"));
                    }
                    *tail = Some(value);
                } else {
                    items.push(value);
                }
                return Ok(());
            }
            Some(Partial::Vector(items)) => {
                items.push(value);
                return Ok(());
            }
            Some(Partial::Quote) => {
                stack.pop();
                let quote = Value::Symbol(interner.intern("quote"));
                let inner = heap.allocate(HeapData::Pair(Pair::new(value, Value::EmptyList)));
                let outer = heap.allocate(HeapData::Pair(Pair::new(quote, Value::Ref(inner))));
                value = Value::Ref(outer);
            }
        }
    }
}

/// Classifies an atom: boolean, then the numeric ladder from the most
/// specific variant down, then symbol.
fn classify_atom(atom: &str, heap: &mut Heap, interner: &mut Interner) -> RunResult<Value> {
    match atom {
        "#t" => return Ok(Value::Bool(true)),
        "#f" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if atom.starts_with('#') {
        return Err(RunError::syntax(format!("unknown # syntax: {atom}")));
    }
    if let Some(n) = Number::parse(atom) {
        return Ok(Value::Ref(heap.allocate(HeapData::Number(n))));
    }
    Ok(Value::Symbol(interner.intern(atom)))
}

/// Quick balance check for interactive input: true when every list,
/// vector, and string opened in `src` has been closed.
#[must_use]
pub fn source_is_complete(src: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;
    for c in src.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ';' => in_comment = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    depth <= 0 && !in_string
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::limits::Limits;
    use crate::repr::{ReprMode, external_repr};

    fn read_one(src: &str) -> (Heap, Interner, Value) {
        let limits = Limits::default();
        let mut heap = Heap::new(limits.gc_queue, limits.cycle_threshold);
        let mut interner = Interner::new();
        let mut values = read_datums(src, &mut heap, &mut interner).unwrap();
        assert_eq!(values.len(), 1, "expected exactly one datum in {src:?}");
        let v = values.pop().unwrap();
        (heap, interner, v)
    }

    fn roundtrip(src: &str) -> String {
        let (heap, interner, v) = read_one(src);
        external_repr(&heap, &interner, &v, ReprMode::Write, 1 << 16).unwrap()
    }

    #[test]
    fn atoms_roundtrip() {
        assert_eq!(roundtrip("42"), "42");
        assert_eq!(roundtrip("-7"), "-7");
        assert_eq!(roundtrip("2/6"), "1/3");
        assert_eq!(roundtrip("0.5"), "0.5");
        assert_eq!(roundtrip("#t"), "#t");
        assert_eq!(roundtrip("#f"), "#f");
        assert_eq!(roundtrip("#\\a"), "#\\a");
        assert_eq!(roundtrip("#\\space"), "#\\space");
        assert_eq!(roundtrip("foo"), "foo");
        assert_eq!(roundtrip("\"hi\\\\there\""), "\"hi\\\\there\"");
    }

    #[test]
    fn lists_and_dots_roundtrip() {
        assert_eq!(roundtrip("(1 2 3)"), "(1 2 3)");
        assert_eq!(roundtrip("()"), "()");
        assert_eq!(roundtrip("(1 . 2)"), "(1 . 2)");
        assert_eq!(roundtrip("(1 2 . 3)"), "(1 2 . 3)");
        assert_eq!(roundtrip("(a (b c) d)"), "(a (b c) d)");
        assert_eq!(roundtrip("#(1 #\\x (2 3))"), "#(1 #\\x (2 3))");
    }

    #[test]
    fn quote_expands() {
        assert_eq!(roundtrip("'x"), "(quote x)");
        assert_eq!(roundtrip("''x"), "(quote (quote x))");
        assert_eq!(roundtrip("'(1 2)"), "(quote (1 2))");
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        let limits = Limits::default();
        let mut heap = Heap::new(limits.gc_queue, limits.cycle_threshold);
        let mut interner = Interner::new();
        let values = read_datums("; leading\n  1 ; trailing\n 2", &mut heap, &mut interner).unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn malformed_input_is_a_syntax_error() {
        let limits = Limits::default();
        let mut heap = Heap::new(limits.gc_queue, limits.cycle_threshold);
        let mut interner = Interner::new();
        for bad in ["(1 2", ")", "(1 . )", "(. 2)", "(1 . 2 3)", "\"open", "#\\", "#q"] {
            let err = read_datums(bad, &mut heap, &mut interner).unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::SyntaxError, "input: {bad:?}");
        }
        // Reader errors release everything they allocated.
        heap.sweep().unwrap();
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn source_completeness() {
        assert!(source_is_complete("(+ 1 2)"));
        assert!(!source_is_complete("(+ 1"));
        assert!(!source_is_complete("\"abc"));
        assert!(source_is_complete("(; comment )\n)"));
    }
}
