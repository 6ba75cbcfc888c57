//! Builtin procedures.
//!
//! Builtins are interned at construction time: the environment binds each
//! surface name to a copyable [`Builtin`] handle, and application dispatches
//! on the handle without any name lookup. Each implementation receives the
//! evaluated argument list, executes natively, and returns the result value.
//!
//! Ownership contract: `call` consumes the argument vector. Implementations
//! move out the values they return or store; everything left behind is
//! released when `call` finishes, on success and on error alike.

use std::cmp::Ordering;
use std::mem;

use ahash::AHashSet;
use strum::{Display, EnumIter, IntoStaticStr};

use crate::error::{RunError, RunResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::Interner;
use crate::io::PrintWriter;
use crate::limits::Limits;
use crate::repr::{ReprMode, external_repr};
use crate::types::{Number, Pair};
use crate::value::{Value, drop_values};

/// Enumerates every builtin procedure.
///
/// The strum derives give each handle its surface name for environment
/// registration, external representation, and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum Builtin {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "=")]
    NumEq,
    #[strum(serialize = "exact?")]
    IsExact,
    #[strum(serialize = "inexact?")]
    IsInexact,
    #[strum(serialize = "number?")]
    IsNumber,
    #[strum(serialize = "complex?")]
    IsComplex,
    #[strum(serialize = "real?")]
    IsReal,
    #[strum(serialize = "rational?")]
    IsRational,
    #[strum(serialize = "integer?")]
    IsInteger,
    #[strum(serialize = "abs")]
    Abs,
    #[strum(serialize = "modulo")]
    Modulo,
    #[strum(serialize = "remainder")]
    Remainder,
    #[strum(serialize = "quotient")]
    Quotient,
    #[strum(serialize = "gcd")]
    Gcd,
    #[strum(serialize = "lcm")]
    Lcm,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "boolean?")]
    IsBoolean,
    #[strum(serialize = "pair?")]
    IsPair,
    #[strum(serialize = "cons")]
    Cons,
    #[strum(serialize = "car")]
    Car,
    #[strum(serialize = "cdr")]
    Cdr,
    #[strum(serialize = "set-car!")]
    SetCar,
    #[strum(serialize = "set-cdr!")]
    SetCdr,
    #[strum(serialize = "null?")]
    IsNull,
    #[strum(serialize = "list?")]
    IsList,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "length")]
    Length,
    #[strum(serialize = "append")]
    Append,
    #[strum(serialize = "reverse")]
    Reverse,
    #[strum(serialize = "list-tail")]
    ListTail,
    #[strum(serialize = "eq?")]
    IsEq,
    #[strum(serialize = "eqv?")]
    IsEqv,
    #[strum(serialize = "equal?")]
    IsEqual,
    #[strum(serialize = "display")]
    DisplayValue,
    #[strum(serialize = "newline")]
    Newline,
    #[strum(serialize = "string?")]
    IsString,
    #[strum(serialize = "string=?")]
    StringEq,
    #[strum(serialize = "string<?")]
    StringLt,
    #[strum(serialize = "string>?")]
    StringGt,
    #[strum(serialize = "string<=?")]
    StringLe,
    #[strum(serialize = "string>=?")]
    StringGe,
    #[strum(serialize = "string-length")]
    StringLength,
    #[strum(serialize = "char?")]
    IsChar,
    #[strum(serialize = "symbol?")]
    IsSymbol,
    #[strum(serialize = "procedure?")]
    IsProcedure,
    #[strum(serialize = "vector")]
    VectorOf,
    #[strum(serialize = "make-vector")]
    MakeVector,
    #[strum(serialize = "vector?")]
    IsVector,
    #[strum(serialize = "vector-ref")]
    VectorRef,
    #[strum(serialize = "vector-set!")]
    VectorSet,
    #[strum(serialize = "vector-length")]
    VectorLength,
}

impl Builtin {
    /// The surface name this builtin is bound to in the top-level frame.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Applies this builtin to the evaluated arguments.
    ///
    /// The argument vector is consumed: values the implementation did not
    /// move out are released here, so error paths cannot leak references.
    pub(crate) fn call(
        self,
        heap: &mut Heap,
        interner: &Interner,
        mut args: Vec<Value>,
        out: &mut dyn PrintWriter,
        limits: &Limits,
    ) -> RunResult<Value> {
        let result = self.call_inner(heap, interner, &mut args, out, limits);
        drop_values(heap, args);
        result
    }

    fn call_inner(
        self,
        heap: &mut Heap,
        interner: &Interner,
        args: &mut Vec<Value>,
        out: &mut dyn PrintWriter,
        limits: &Limits,
    ) -> RunResult<Value> {
        let name = self.name();
        match self {
            Self::Add => {
                let mut acc = Number::from_i64(0);
                for a in args.iter() {
                    acc = acc.add(number_ref(heap, name, a)?);
                }
                Ok(alloc_number(heap, acc))
            }
            Self::Mul => {
                let mut acc = Number::from_i64(1);
                for a in args.iter() {
                    acc = acc.mul(number_ref(heap, name, a)?);
                }
                Ok(alloc_number(heap, acc))
            }
            Self::Sub => {
                expect_min_argc(name, args, 1)?;
                let first = number_ref(heap, name, &args[0])?.clone();
                if args.len() == 1 {
                    return Ok(alloc_number(heap, first.neg()));
                }
                let mut acc = first;
                for a in &args[1..] {
                    acc = acc.sub(number_ref(heap, name, a)?);
                }
                Ok(alloc_number(heap, acc))
            }
            Self::Div => {
                expect_min_argc(name, args, 1)?;
                let first = number_ref(heap, name, &args[0])?.clone();
                if args.len() == 1 {
                    let acc = Number::from_i64(1).div(&first)?;
                    return Ok(alloc_number(heap, acc));
                }
                let mut acc = first;
                for a in &args[1..] {
                    let rhs = number_ref(heap, name, a)?.clone();
                    acc = acc.div(&rhs)?;
                }
                Ok(alloc_number(heap, acc))
            }
            Self::Lt => chained_comparison(heap, name, args, &[Ordering::Less]),
            Self::Le => chained_comparison(heap, name, args, &[Ordering::Less, Ordering::Equal]),
            Self::Gt => chained_comparison(heap, name, args, &[Ordering::Greater]),
            Self::Ge => chained_comparison(heap, name, args, &[Ordering::Greater, Ordering::Equal]),
            Self::NumEq => {
                expect_min_argc(name, args, 2)?;
                for pair in args.windows(2) {
                    let a = number_ref(heap, name, &pair[0])?;
                    let b = number_ref(heap, name, &pair[1])?;
                    if !a.num_eq(b) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Self::IsExact => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(number_ref(heap, name, &args[0])?.is_exact()))
            }
            Self::IsInexact => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(!number_ref(heap, name, &args[0])?.is_exact()))
            }
            Self::IsNumber | Self::IsComplex => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(args[0].is_number(heap)))
            }
            Self::IsReal => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(matches!(
                    args[0].number(heap),
                    Some(Number::Int(_) | Number::Rational(_) | Number::Real(_))
                )))
            }
            Self::IsRational => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(matches!(
                    args[0].number(heap),
                    Some(Number::Int(_) | Number::Rational(_))
                )))
            }
            Self::IsInteger => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(
                    args[0].number(heap).is_some_and(Number::is_integer_valued),
                ))
            }
            Self::Abs => {
                expect_argc(name, args, 1)?;
                let n = number_ref(heap, name, &args[0])?.abs();
                Ok(alloc_number(heap, n))
            }
            Self::Modulo => {
                expect_argc(name, args, 2)?;
                let n = number_ref(heap, name, &args[0])?.modulo(number_ref(heap, name, &args[1])?)?;
                Ok(alloc_number(heap, n))
            }
            Self::Remainder => {
                expect_argc(name, args, 2)?;
                let n = number_ref(heap, name, &args[0])?.remainder(number_ref(heap, name, &args[1])?)?;
                Ok(alloc_number(heap, n))
            }
            Self::Quotient => {
                expect_argc(name, args, 2)?;
                let n = number_ref(heap, name, &args[0])?.quotient(number_ref(heap, name, &args[1])?)?;
                Ok(alloc_number(heap, n))
            }
            Self::Gcd => {
                let mut acc = Number::from_i64(0);
                for a in args.iter() {
                    acc = acc.gcd(number_ref(heap, name, a)?)?;
                }
                Ok(alloc_number(heap, acc))
            }
            Self::Lcm => {
                let mut acc = Number::from_i64(1);
                for a in args.iter() {
                    acc = acc.lcm(number_ref(heap, name, a)?)?;
                }
                Ok(alloc_number(heap, acc))
            }
            Self::Not => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(!args[0].is_true()))
            }
            Self::IsBoolean => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
            }
            Self::IsPair => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(args[0].is_pair(heap)))
            }
            Self::Cons => {
                expect_argc(name, args, 2)?;
                let cdr = take(args, 1);
                let car = take(args, 0);
                Ok(Value::Ref(heap.allocate(HeapData::Pair(Pair::new(car, cdr)))))
            }
            Self::Car => {
                expect_argc(name, args, 1)?;
                let pid = pair_arg(heap, name, &args[0])?;
                let HeapData::Pair(p) = heap.get(pid) else { unreachable!() };
                Ok(p.car.clone_with_heap(heap))
            }
            Self::Cdr => {
                expect_argc(name, args, 1)?;
                let pid = pair_arg(heap, name, &args[0])?;
                let HeapData::Pair(p) = heap.get(pid) else { unreachable!() };
                Ok(p.cdr.clone_with_heap(heap))
            }
            Self::SetCar => {
                expect_argc(name, args, 2)?;
                let pid = pair_arg(heap, name, &args[0])?;
                let new = take(args, 1);
                let old = match heap.get_mut(pid) {
                    HeapData::Pair(p) => mem::replace(&mut p.car, new),
                    _ => unreachable!(),
                };
                old.drop_with_heap(heap);
                Ok(Value::Unspecified)
            }
            Self::SetCdr => {
                expect_argc(name, args, 2)?;
                let pid = pair_arg(heap, name, &args[0])?;
                let new = take(args, 1);
                let old = match heap.get_mut(pid) {
                    HeapData::Pair(p) => mem::replace(&mut p.cdr, new),
                    _ => unreachable!(),
                };
                old.drop_with_heap(heap);
                Ok(Value::Unspecified)
            }
            Self::IsNull => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(matches!(args[0], Value::EmptyList)))
            }
            Self::IsList => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(is_proper_list(heap, &args[0])))
            }
            Self::List => {
                let mut acc = Value::EmptyList;
                while let Some(item) = args.pop() {
                    acc = Value::Ref(heap.allocate(HeapData::Pair(Pair::new(item, acc))));
                }
                Ok(acc)
            }
            Self::Length => {
                expect_argc(name, args, 1)?;
                let elems = list_elements(heap, name, &args[0])?;
                let len = elems.len();
                drop_values(heap, elems);
                Ok(alloc_number(heap, Number::from_i64(len as i64)))
            }
            Self::Append => {
                if args.is_empty() {
                    return Ok(Value::EmptyList);
                }
                let mut elems: Vec<Value> = Vec::new();
                for a in &args[..args.len() - 1] {
                    match list_elements(heap, name, a) {
                        Ok(es) => elems.extend(es),
                        Err(e) => {
                            drop_values(heap, elems);
                            return Err(e);
                        }
                    }
                }
                let last = args.len() - 1;
                let mut acc = take(args, last);
                for item in elems.into_iter().rev() {
                    acc = Value::Ref(heap.allocate(HeapData::Pair(Pair::new(item, acc))));
                }
                Ok(acc)
            }
            Self::Reverse => {
                expect_argc(name, args, 1)?;
                let elems = list_elements(heap, name, &args[0])?;
                let mut acc = Value::EmptyList;
                for item in elems {
                    acc = Value::Ref(heap.allocate(HeapData::Pair(Pair::new(item, acc))));
                }
                Ok(acc)
            }
            Self::ListTail => {
                expect_argc(name, args, 2)?;
                let k = index_arg(heap, name, &args[1])?;
                let heap_ref: &Heap = heap;
                let mut cur: &Value = &args[0];
                for _ in 0..k {
                    let pid = cur
                        .as_pair_id(heap_ref)
                        .ok_or_else(|| RunError::arg_type(name, "a list at least as long as the index"))?;
                    let HeapData::Pair(p) = heap_ref.get(pid) else { unreachable!() };
                    cur = &p.cdr;
                }
                Ok(cur.clone_with_heap(heap_ref))
            }
            Self::IsEq | Self::IsEqv => {
                expect_argc(name, args, 2)?;
                Ok(Value::Bool(args[0].eqv(&args[1], heap)))
            }
            Self::IsEqual => {
                expect_argc(name, args, 2)?;
                Ok(Value::Bool(args[0].equal(&args[1], heap)))
            }
            Self::DisplayValue => {
                expect_argc(name, args, 1)?;
                let text = external_repr(heap, interner, &args[0], ReprMode::Display, limits.repr_stack)?;
                out.write_str(&text)?;
                Ok(Value::Unspecified)
            }
            Self::Newline => {
                expect_argc(name, args, 0)?;
                out.write_str("\n")?;
                Ok(Value::Unspecified)
            }
            Self::IsString => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(string_ref(heap, &args[0]).is_some()))
            }
            Self::StringEq => string_comparison(heap, name, args, &[Ordering::Equal]),
            Self::StringLt => string_comparison(heap, name, args, &[Ordering::Less]),
            Self::StringGt => string_comparison(heap, name, args, &[Ordering::Greater]),
            Self::StringLe => string_comparison(heap, name, args, &[Ordering::Less, Ordering::Equal]),
            Self::StringGe => string_comparison(heap, name, args, &[Ordering::Greater, Ordering::Equal]),
            Self::StringLength => {
                expect_argc(name, args, 1)?;
                let s = string_arg(heap, name, &args[0])?;
                let len = s.chars().count();
                Ok(alloc_number(heap, Number::from_i64(len as i64)))
            }
            Self::IsChar => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(matches!(args[0], Value::Char(_))))
            }
            Self::IsSymbol => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(args[0].is_symbol()))
            }
            Self::IsProcedure => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(args[0].is_procedure(heap)))
            }
            Self::VectorOf => {
                let items: Vec<Value> = args.drain(..).collect();
                Ok(Value::Ref(heap.allocate(HeapData::Vector(items))))
            }
            Self::MakeVector => {
                if args.is_empty() || args.len() > 2 {
                    return Err(RunError::arg_count(name, "1 or 2", args.len()));
                }
                let k = index_arg(heap, name, &args[0])?;
                let fill = if args.len() == 2 { &args[1] } else { &Value::Unspecified };
                let mut items = Vec::with_capacity(k);
                for _ in 0..k {
                    items.push(fill.clone_with_heap(heap));
                }
                Ok(Value::Ref(heap.allocate(HeapData::Vector(items))))
            }
            Self::IsVector => {
                expect_argc(name, args, 1)?;
                Ok(Value::Bool(matches!(
                    &args[0],
                    Value::Ref(id) if matches!(heap.get(*id), HeapData::Vector(_))
                )))
            }
            Self::VectorRef => {
                expect_argc(name, args, 2)?;
                let vid = vector_arg(heap, name, &args[0])?;
                let k = index_arg(heap, name, &args[1])?;
                let HeapData::Vector(items) = heap.get(vid) else { unreachable!() };
                let item = items
                    .get(k)
                    .ok_or_else(|| RunError::numeric(format!("{name}: index {k} out of range")))?;
                Ok(item.clone_with_heap(heap))
            }
            Self::VectorSet => {
                expect_argc(name, args, 3)?;
                let vid = vector_arg(heap, name, &args[0])?;
                let k = index_arg(heap, name, &args[1])?;
                let len = match heap.get(vid) {
                    HeapData::Vector(items) => items.len(),
                    _ => unreachable!(),
                };
                if k >= len {
                    return Err(RunError::numeric(format!("{name}: index {k} out of range")));
                }
                let new = take(args, 2);
                let old = match heap.get_mut(vid) {
                    HeapData::Vector(items) => mem::replace(&mut items[k], new),
                    _ => unreachable!(),
                };
                old.drop_with_heap(heap);
                Ok(Value::Unspecified)
            }
            Self::VectorLength => {
                expect_argc(name, args, 1)?;
                let vid = vector_arg(heap, name, &args[0])?;
                let HeapData::Vector(items) = heap.get(vid) else { unreachable!() };
                let len = items.len();
                Ok(alloc_number(heap, Number::from_i64(len as i64)))
            }
        }
    }
}

/// Moves one argument out, leaving an inert placeholder behind.
fn take(args: &mut [Value], i: usize) -> Value {
    mem::replace(&mut args[i], Value::Unspecified)
}

fn expect_argc(name: &str, args: &[Value], n: usize) -> RunResult<()> {
    if args.len() == n {
        Ok(())
    } else {
        Err(RunError::arg_count(name, &n.to_string(), args.len()))
    }
}

fn expect_min_argc(name: &str, args: &[Value], n: usize) -> RunResult<()> {
    if args.len() >= n {
        Ok(())
    } else {
        Err(RunError::arg_count(name, &format!("at least {n}"), args.len()))
    }
}

fn alloc_number(heap: &mut Heap, n: Number) -> Value {
    Value::Ref(heap.allocate(HeapData::Number(n)))
}

fn number_ref<'a>(heap: &'a Heap, name: &str, v: &Value) -> RunResult<&'a Number> {
    v.number(heap).ok_or_else(|| RunError::arg_type(name, "a number"))
}

fn pair_arg(heap: &Heap, name: &str, v: &Value) -> RunResult<HeapId> {
    v.as_pair_id(heap).ok_or_else(|| RunError::arg_type(name, "a pair"))
}

fn vector_arg(heap: &Heap, name: &str, v: &Value) -> RunResult<HeapId> {
    match v {
        Value::Ref(id) if matches!(heap.get(*id), HeapData::Vector(_)) => Ok(*id),
        _ => Err(RunError::arg_type(name, "a vector")),
    }
}

fn string_ref<'a>(heap: &'a Heap, v: &Value) -> Option<&'a String> {
    match v {
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

fn string_arg<'a>(heap: &'a Heap, name: &str, v: &Value) -> RunResult<&'a String> {
    string_ref(heap, v).ok_or_else(|| RunError::arg_type(name, "a string"))
}

/// Extracts a non-negative exact integer index.
fn index_arg(heap: &Heap, name: &str, v: &Value) -> RunResult<usize> {
    number_ref(heap, name, v)?
        .to_index()
        .ok_or_else(|| RunError::numeric(format!("{name}: exact non-negative integer required")))
}

fn chained_comparison(heap: &Heap, name: &str, args: &[Value], accept: &[Ordering]) -> RunResult<Value> {
    expect_min_argc(name, args, 2)?;
    for pair in args.windows(2) {
        let a = number_ref(heap, name, &pair[0])?;
        let b = number_ref(heap, name, &pair[1])?;
        if !accept.contains(&a.cmp_value(b)?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn string_comparison(heap: &Heap, name: &str, args: &[Value], accept: &[Ordering]) -> RunResult<Value> {
    expect_min_argc(name, args, 2)?;
    for pair in args.windows(2) {
        let a = string_arg(heap, name, &pair[0])?;
        let b = string_arg(heap, name, &pair[1])?;
        if !accept.contains(&a.cmp(b)) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

/// True for a finite chain of pairs terminated by the empty list.
fn is_proper_list(heap: &Heap, v: &Value) -> bool {
    let mut visited: AHashSet<HeapId> = AHashSet::new();
    let mut cur = v;
    loop {
        match cur {
            Value::EmptyList => return true,
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Pair(p) => {
                    if !visited.insert(*id) {
                        return false;
                    }
                    cur = &p.cdr;
                }
                _ => return false,
            },
            _ => return false,
        }
    }
}

/// Clones out the elements of a proper list; improper and cyclic chains are
/// a type error. Partial clones are released before the error is reported.
fn list_elements(heap: &mut Heap, name: &str, v: &Value) -> RunResult<Vec<Value>> {
    let mut cur: HeapId = match v {
        Value::EmptyList => return Ok(Vec::new()),
        Value::Ref(id) if matches!(heap.get(*id), HeapData::Pair(_)) => *id,
        _ => return Err(RunError::arg_type(name, "a proper list")),
    };
    let mut visited: AHashSet<HeapId> = AHashSet::new();
    let mut elems: Vec<Value> = Vec::new();
    loop {
        if !visited.insert(cur) {
            drop_values(heap, elems);
            return Err(RunError::arg_type(name, "a proper list"));
        }
        let (car, next) = {
            let HeapData::Pair(p) = heap.get(cur) else { unreachable!() };
            let next = match &p.cdr {
                Value::EmptyList => Ok(None),
                Value::Ref(id) if matches!(heap.get(*id), HeapData::Pair(_)) => Ok(Some(*id)),
                _ => Err(()),
            };
            (p.car.clone_with_heap(heap), next)
        };
        elems.push(car);
        match next {
            Ok(Some(id)) => cur = id,
            Ok(None) => return Ok(elems),
            Err(()) => {
                drop_values(heap, elems);
                return Err(RunError::arg_type(name, "a proper list"));
            }
        }
    }
}
