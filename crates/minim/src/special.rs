//! Special forms: the named evaluator hooks whose sub-expressions are not
//! necessarily evaluated by the default rule.
//!
//! Each form participates twice. `prepare` runs while the evaluator is
//! about to descend into a combination headed by the form and marks the
//! operand nodes the default argument sweep must skip. The call-time
//! dispatcher then runs when the sweep finishes, with whatever the sweep
//! did evaluate.
//!
//! Forms that need several evaluation phases (`if` branches, `and`/`or`
//! operands, `cond` clauses, `let` bindings, `eval`, `force`) record their
//! progress in the [`Resume`] slot of the return-address frame entry. The
//! state is per-activation, so a recursive call that re-enters the same
//! syntax node mid-evaluation cannot corrupt it.

use std::mem;

use ahash::AHashSet;
use strum::{Display, EnumIter, IntoStaticStr};

use crate::env::{self, EnvFrame};
use crate::error::{RunError, RunResult};
use crate::eval::{Continuation, FrameEntry, Machine, RetAddr, raw_next};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::SymbolId;
use crate::types::{Pair, Params, Promise};
use crate::value::{Value, drop_values};

/// Enumerates every special form, registered under its surface name in the
/// top-level frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum SpecialForm {
    #[strum(serialize = "if")]
    If,
    #[strum(serialize = "lambda")]
    Lambda,
    #[strum(serialize = "define")]
    Define,
    #[strum(serialize = "set!")]
    Set,
    #[strum(serialize = "quote")]
    Quote,
    #[strum(serialize = "eval")]
    Eval,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "let")]
    Let,
    #[strum(serialize = "let*")]
    LetStar,
    #[strum(serialize = "letrec")]
    Letrec,
    #[strum(serialize = "cond")]
    Cond,
    #[strum(serialize = "begin")]
    Begin,
    #[strum(serialize = "delay")]
    Delay,
    #[strum(serialize = "force")]
    Force,
}

/// Per-activation state for a multi-phase special form, stored in the
/// return-address frame entry. Both ids, when present, hold counted
/// references.
pub(crate) struct Resume {
    pub form: SpecialForm,
    /// The node whose value the next apply step receives: an operand node
    /// (`and`/`or`), a clause node (`cond`), a binding node (`let`), a
    /// synthesized entry node (`eval`), or the promise itself (`force`).
    pub node: Option<HeapId>,
    /// An environment the form still needs: the frame under construction
    /// (`let`) or the environment to restore around the body
    /// (`let*`/`letrec`).
    pub env: Option<HeapId>,
}

impl Resume {
    pub fn release(self, heap: &mut Heap) {
        if let Some(n) = self.node {
            heap.dec_ref(n);
        }
        if let Some(e) = self.env {
            heap.dec_ref(e);
        }
    }
}

impl SpecialForm {
    /// The surface name this form is bound to in the top-level frame.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Call-time dispatch: the argument sweep over the combination at
    /// `addr` finished with `args` (operator first).
    pub(crate) fn call(
        self,
        m: &mut Machine<'_>,
        addr: HeapId,
        args: Vec<Value>,
        pc: &mut Option<HeapId>,
    ) -> RunResult<()> {
        match self {
            Self::If => call_if(m, addr, args, pc),
            Self::Lambda => call_lambda(m, addr, args, pc),
            Self::Define => call_define(m, addr, args, pc),
            Self::Set => call_set(m, addr, args, pc),
            Self::Quote => call_quote(m, addr, args, pc),
            Self::Eval => call_eval(m, addr, args, pc),
            Self::And | Self::Or => call_and_or(m, self, addr, args, pc),
            Self::Let | Self::LetStar | Self::Letrec => call_let(m, self, addr, args, pc),
            Self::Cond => call_cond(m, addr, args, pc),
            Self::Begin => call_begin(m, addr, args, pc),
            Self::Delay => call_delay(m, addr, args, pc),
            Self::Force => call_force(m, addr, args, pc),
        }
    }

    /// Resume dispatch: a value for the node recorded in `resume` arrived.
    pub(crate) fn resume(
        self,
        m: &mut Machine<'_>,
        addr: HeapId,
        resume: Resume,
        args: Vec<Value>,
        pc: &mut Option<HeapId>,
    ) -> RunResult<()> {
        match self {
            Self::And | Self::Or => resume_and_or(m, self, addr, resume, args, pc),
            Self::Cond => resume_cond(m, addr, resume, args, pc),
            Self::Let | Self::LetStar | Self::Letrec => resume_let(m, self, addr, resume, args, pc),
            Self::Eval => resume_eval(m, addr, resume, args, pc),
            Self::Force => resume_force(m, addr, resume, args, pc),
            _ => {
                resume.release(m.heap);
                drop_values(m.heap, args);
                Err(RunError::internal("unexpected resume state"))
            }
        }
    }
}

impl Machine<'_> {
    /// Marks the operand nodes the default argument sweep must not
    /// evaluate. Called on every descent into a combination headed by a
    /// special form; marking is idempotent, so re-entry is harmless.
    pub(crate) fn prepare(&mut self, form: SpecialForm, comb: HeapId) -> RunResult<()> {
        match form {
            SpecialForm::If => {
                self.mark_nth(comb, 2);
                self.mark_nth(comb, 3);
                Ok(())
            }
            SpecialForm::Lambda
            | SpecialForm::And
            | SpecialForm::Or
            | SpecialForm::Cond
            | SpecialForm::Let
            | SpecialForm::LetStar
            | SpecialForm::Letrec => self.mark_from(comb, 1),
            SpecialForm::Define => {
                let sugar = nth_node(self.heap, comb, 1).is_some_and(|n| car_pair_id(self.heap, n).is_some());
                if sugar {
                    self.mark_from(comb, 1)
                } else {
                    self.mark_nth(comb, 1);
                    Ok(())
                }
            }
            SpecialForm::Set | SpecialForm::Quote | SpecialForm::Delay => {
                self.mark_nth(comb, 1);
                Ok(())
            }
            SpecialForm::Begin | SpecialForm::Eval | SpecialForm::Force => Ok(()),
        }
    }

    fn mark_nth(&mut self, comb: HeapId, k: usize) {
        if let Some(n) = nth_node(self.heap, comb, k) {
            set_skip(self.heap, n);
        }
    }

    fn mark_from(&mut self, comb: HeapId, start: usize) -> RunResult<()> {
        let mut cur = nth_node(self.heap, comb, start);
        let mut steps = 0usize;
        while let Some(n) = cur {
            steps += 1;
            if steps > self.limits.eval_stack {
                return Err(RunError::syntax("cyclic combination"));
            }
            set_skip(self.heap, n);
            cur = raw_next(self.heap, n);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared syntax accessors
// ---------------------------------------------------------------------------

/// The combination list a return address denotes: the car of the call-site
/// node.
fn comb_of(heap: &Heap, addr: HeapId) -> RunResult<HeapId> {
    let HeapData::Pair(p) = heap.get(addr) else {
        return Err(RunError::internal("call site left the syntax tree"));
    };
    match &p.car {
        Value::Ref(id) if matches!(heap.get(*id), HeapData::Pair(_)) => Ok(*id),
        _ => Err(RunError::internal("call site without a combination")),
    }
}

/// The k-th node of a list, by raw cdr links.
fn nth_node(heap: &Heap, head: HeapId, k: usize) -> Option<HeapId> {
    let mut cur = head;
    for _ in 0..k {
        cur = raw_next(heap, cur)?;
    }
    Some(cur)
}

fn car_clone(heap: &Heap, node: HeapId) -> Value {
    let HeapData::Pair(p) = heap.get(node) else {
        unreachable!("syntax node is a pair")
    };
    p.car.clone_with_heap(heap)
}

fn car_pair_id(heap: &Heap, node: HeapId) -> Option<HeapId> {
    let HeapData::Pair(p) = heap.get(node) else {
        return None;
    };
    p.car.as_pair_id(heap)
}

fn car_symbol(heap: &Heap, node: HeapId) -> Option<SymbolId> {
    let HeapData::Pair(p) = heap.get(node) else {
        return None;
    };
    match &p.car {
        Value::Symbol(s) => Some(*s),
        _ => None,
    }
}

fn set_skip(heap: &mut Heap, node: HeapId) {
    if let HeapData::Pair(p) = heap.get_mut(node) {
        p.skip = true;
    }
}

fn set_standalone(heap: &mut Heap, node: HeapId) {
    if let HeapData::Pair(p) = heap.get_mut(node) {
        p.standalone = true;
    }
}

/// Detaches every node of a body chain so the program counter stops after
/// each expression and the pending call applies once per expression.
fn sever_chain(heap: &mut Heap, start: HeapId, limit: usize) -> RunResult<()> {
    let mut cur = Some(start);
    let mut steps = 0usize;
    while let Some(n) = cur {
        steps += 1;
        if steps > limit {
            return Err(RunError::syntax("cyclic combination"));
        }
        set_standalone(heap, n);
        cur = raw_next(heap, n);
    }
    Ok(())
}

fn take(args: &mut [Value], i: usize) -> Value {
    mem::replace(&mut args[i], Value::Unspecified)
}

/// Pushes a continuation returning to `addr` and jumps into `body`.
///
/// `restore_env` is the environment to restore when the body completes;
/// ownership of its reference transfers to the continuation. When
/// `body_owned` is set the caller hands over an existing reference to the
/// body node; otherwise a new one is counted here.
fn enter_body(
    m: &mut Machine<'_>,
    addr: HeapId,
    body: HeapId,
    restore_env: HeapId,
    body_owned: bool,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    m.heap.inc_ref(addr);
    if !body_owned {
        m.heap.inc_ref(body);
    }
    m.conts.push(Continuation {
        env: restore_env,
        ret: addr,
        body,
    });
    m.push_entry(FrameEntry::Ret(RetAddr {
        addr: None,
        resume: None,
    }))?;
    *pc = Some(body);
    Ok(())
}

// ---------------------------------------------------------------------------
// if
// ---------------------------------------------------------------------------

fn call_if(m: &mut Machine<'_>, addr: HeapId, mut args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    if args.len() < 2 {
        drop_values(m.heap, args);
        return Err(RunError::syntax("if: missing test"));
    }
    let test = take(&mut args, 1);
    let truth = test.is_true();
    test.drop_with_heap(m.heap);
    drop_values(m.heap, args);

    let comb = comb_of(m.heap, addr)?;
    let Some(conseq) = nth_node(m.heap, comb, 2) else {
        return Err(RunError::syntax("if: missing branch"));
    };
    let chosen = if truth { Some(conseq) } else { nth_node(m.heap, comb, 3) };
    match chosen {
        None => {
            m.push_entry(FrameEntry::Value(Value::Unspecified))?;
            *pc = m.next_node(addr)?;
            Ok(())
        }
        Some(node) => {
            // The branch runs as a one-expression body through a detached
            // wrapper node, so its value lands where the whole `if`
            // combination's value belongs.
            let expr = car_clone(m.heap, node);
            let body = m.heap.allocate(HeapData::Pair(Pair::standalone(expr, Value::EmptyList)));
            m.heap.inc_ref(m.envt);
            let restore = m.envt;
            enter_body(m, addr, body, restore, true, pc)
        }
    }
}

// ---------------------------------------------------------------------------
// lambda / define / set! / quote / begin
// ---------------------------------------------------------------------------

/// Builds the unified parameter descriptor from a parameter-list datum.
/// Anything but symbols in list position is a syntax error.
fn parse_params(heap: &Heap, first: &Value) -> RunResult<Params> {
    match first {
        Value::Symbol(s) => Ok(Params::Variadic(*s)),
        Value::EmptyList => Ok(Params::Fixed(smallvec::SmallVec::new())),
        Value::Ref(id) if matches!(heap.get(*id), HeapData::Pair(_)) => {
            let mut names = smallvec::SmallVec::new();
            let mut visited: AHashSet<HeapId> = AHashSet::new();
            let mut cur = *id;
            loop {
                if !visited.insert(cur) {
                    return Err(RunError::syntax("parameter list must be a proper list"));
                }
                let HeapData::Pair(p) = heap.get(cur) else { unreachable!() };
                let Value::Symbol(s) = &p.car else {
                    return Err(RunError::syntax("parameters must be symbols"));
                };
                names.push(*s);
                match &p.cdr {
                    Value::EmptyList => return Ok(Params::Fixed(names)),
                    Value::Symbol(rest) => return Ok(Params::Rest(names, *rest)),
                    Value::Ref(id2) if matches!(heap.get(*id2), HeapData::Pair(_)) => cur = *id2,
                    _ => return Err(RunError::syntax("parameters must be symbols")),
                }
            }
        }
        _ => Err(RunError::syntax("malformed parameter list")),
    }
}

/// Creates a closure over the current environment from a parameter
/// descriptor and a body chain starting at `body_start`.
fn make_closure(m: &mut Machine<'_>, params: Params, body_start: HeapId) -> RunResult<Value> {
    sever_chain(m.heap, body_start, m.limits.eval_stack)?;
    m.heap.inc_ref(body_start);
    m.heap.inc_ref(m.envt);
    let closure = crate::types::Closure {
        params,
        body: body_start,
        env: m.envt,
    };
    Ok(Value::Ref(m.heap.allocate(HeapData::Closure(closure))))
}

fn call_lambda(m: &mut Machine<'_>, addr: HeapId, args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    drop_values(m.heap, args);
    let comb = comb_of(m.heap, addr)?;
    let Some(params_node) = nth_node(m.heap, comb, 1) else {
        return Err(RunError::syntax("lambda: missing parameter list"));
    };
    let params = {
        let HeapData::Pair(p) = m.heap.get(params_node) else { unreachable!() };
        parse_params(m.heap, &p.car)?
    };
    let Some(body_start) = nth_node(m.heap, comb, 2) else {
        return Err(RunError::syntax("lambda: empty body"));
    };
    let closure = make_closure(m, params, body_start)?;
    m.push_entry(FrameEntry::Value(closure))?;
    *pc = m.next_node(addr)?;
    Ok(())
}

fn call_define(m: &mut Machine<'_>, addr: HeapId, mut args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    let comb = comb_of(m.heap, addr)?;
    let Some(target_node) = nth_node(m.heap, comb, 1) else {
        drop_values(m.heap, args);
        return Err(RunError::syntax("define: missing name"));
    };
    if let Some(name) = car_symbol(m.heap, target_node) {
        // Plain (define name value): the value was evaluated by the sweep.
        if args.len() != 2 {
            drop_values(m.heap, args);
            return Err(RunError::syntax("define: expected a single value"));
        }
        let v = take(&mut args, 1);
        drop_values(m.heap, args);
        env::define(m.heap, m.envt, name, v);
    } else if let Some(signature) = car_pair_id(m.heap, target_node) {
        // Sugar (define (name params...) body...).
        drop_values(m.heap, args);
        let Some(name) = car_symbol(m.heap, signature) else {
            return Err(RunError::syntax("define: procedure name must be a symbol"));
        };
        let params = {
            let HeapData::Pair(p) = m.heap.get(signature) else { unreachable!() };
            parse_params(m.heap, &p.cdr)?
        };
        let Some(body_start) = nth_node(m.heap, comb, 2) else {
            return Err(RunError::syntax("define: empty body"));
        };
        let closure = make_closure(m, params, body_start)?;
        env::define(m.heap, m.envt, name, closure);
    } else {
        drop_values(m.heap, args);
        return Err(RunError::syntax("define: name must be a symbol"));
    }
    m.push_entry(FrameEntry::Value(Value::Unspecified))?;
    *pc = m.next_node(addr)?;
    Ok(())
}

fn call_set(m: &mut Machine<'_>, addr: HeapId, mut args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    let comb = comb_of(m.heap, addr)?;
    let name = nth_node(m.heap, comb, 1).and_then(|n| car_symbol(m.heap, n));
    let Some(name) = name else {
        drop_values(m.heap, args);
        return Err(RunError::syntax("set!: name must be a symbol"));
    };
    if args.len() != 2 {
        drop_values(m.heap, args);
        return Err(RunError::syntax("set!: expected a single value"));
    }
    let v = take(&mut args, 1);
    drop_values(m.heap, args);
    if env::assign(m.heap, m.envt, name, v) {
        m.push_entry(FrameEntry::Value(Value::Unspecified))?;
        *pc = m.next_node(addr)?;
        Ok(())
    } else {
        Err(RunError::unbound(m.interner.get(name)))
    }
}

fn call_quote(m: &mut Machine<'_>, addr: HeapId, args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    drop_values(m.heap, args);
    let comb = comb_of(m.heap, addr)?;
    let Some(datum_node) = nth_node(m.heap, comb, 1) else {
        return Err(RunError::syntax("quote: missing datum"));
    };
    let datum = car_clone(m.heap, datum_node);
    m.push_entry(FrameEntry::Value(datum))?;
    *pc = m.next_node(addr)?;
    Ok(())
}

fn call_begin(m: &mut Machine<'_>, addr: HeapId, mut args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    // All sub-expressions were evaluated left to right; the last one is the
    // result. (begin) is the unspecified value.
    let result = if args.len() >= 2 {
        let last = args.len() - 1;
        take(&mut args, last)
    } else {
        Value::Unspecified
    };
    drop_values(m.heap, args);
    m.push_entry(FrameEntry::Value(result))?;
    *pc = m.next_node(addr)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// and / or
// ---------------------------------------------------------------------------

fn call_and_or(
    m: &mut Machine<'_>,
    form: SpecialForm,
    addr: HeapId,
    args: Vec<Value>,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    drop_values(m.heap, args);
    let comb = comb_of(m.heap, addr)?;
    match nth_node(m.heap, comb, 1) {
        None => {
            let empty = Value::Bool(matches!(form, SpecialForm::And));
            m.push_entry(FrameEntry::Value(empty))?;
            *pc = m.next_node(addr)?;
            Ok(())
        }
        Some(first) => {
            m.heap.inc_ref(first);
            m.push_entry(FrameEntry::Ret(RetAddr {
                addr: Some(addr),
                resume: Some(Resume {
                    form,
                    node: Some(first),
                    env: None,
                }),
            }))?;
            *pc = Some(first);
            Ok(())
        }
    }
}

fn resume_and_or(
    m: &mut Machine<'_>,
    form: SpecialForm,
    addr: HeapId,
    resume: Resume,
    mut args: Vec<Value>,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    let node = resume.node.expect("operand node recorded");
    let v = args.pop().unwrap_or(Value::Unspecified);
    drop_values(m.heap, args);
    let next_operand = raw_next(m.heap, node);
    let conclusive = match form {
        SpecialForm::And => !v.is_true(),
        SpecialForm::Or => v.is_true(),
        _ => unreachable!(),
    };
    if conclusive || next_operand.is_none() {
        m.heap.dec_ref(node);
        m.push_entry(FrameEntry::Value(v))?;
        *pc = m.next_node(addr)?;
        Ok(())
    } else {
        v.drop_with_heap(m.heap);
        let next = next_operand.expect("checked above");
        m.heap.inc_ref(next);
        m.heap.dec_ref(node);
        m.push_entry(FrameEntry::Ret(RetAddr {
            addr: Some(addr),
            resume: Some(Resume {
                form,
                node: Some(next),
                env: None,
            }),
        }))?;
        *pc = Some(next);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// cond
// ---------------------------------------------------------------------------

/// Sets up evaluation of a clause's test, or finishes with the unspecified
/// value when the clauses are exhausted.
fn cond_enter_clause(
    m: &mut Machine<'_>,
    addr: HeapId,
    clause: Option<HeapId>,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    let Some(cnode) = clause else {
        m.push_entry(FrameEntry::Value(Value::Unspecified))?;
        *pc = m.next_node(addr)?;
        return Ok(());
    };
    let Some(clause_list) = car_pair_id(m.heap, cnode) else {
        return Err(RunError::syntax("cond: clause must be a list"));
    };
    if car_symbol(m.heap, clause_list) == Some(m.else_sym) {
        if raw_next(m.heap, cnode).is_some() {
            return Err(RunError::syntax("cond: else clause must be last"));
        }
        let Some(body) = raw_next(m.heap, clause_list) else {
            return Err(RunError::syntax("cond: else clause requires a body"));
        };
        sever_chain(m.heap, body, m.limits.eval_stack)?;
        m.heap.inc_ref(m.envt);
        let restore = m.envt;
        return enter_body(m, addr, body, restore, false, pc);
    }
    // Detach the test node so the clause body does not evaluate with it.
    set_standalone(m.heap, clause_list);
    m.heap.inc_ref(cnode);
    m.push_entry(FrameEntry::Ret(RetAddr {
        addr: Some(addr),
        resume: Some(Resume {
            form: SpecialForm::Cond,
            node: Some(cnode),
            env: None,
        }),
    }))?;
    *pc = Some(clause_list);
    Ok(())
}

fn call_cond(m: &mut Machine<'_>, addr: HeapId, args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    drop_values(m.heap, args);
    let comb = comb_of(m.heap, addr)?;
    let first_clause = nth_node(m.heap, comb, 1);
    cond_enter_clause(m, addr, first_clause, pc)
}

fn resume_cond(
    m: &mut Machine<'_>,
    addr: HeapId,
    resume: Resume,
    mut args: Vec<Value>,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    let cnode = resume.node.expect("clause node recorded");
    let tval = args.pop().unwrap_or(Value::Unspecified);
    drop_values(m.heap, args);
    if tval.is_true() {
        let clause_list = car_pair_id(m.heap, cnode).expect("clause validated");
        let body = raw_next(m.heap, clause_list);
        m.heap.dec_ref(cnode);
        match body {
            None => {
                // (cond (test)) yields the test value itself.
                m.push_entry(FrameEntry::Value(tval))?;
                *pc = m.next_node(addr)?;
                Ok(())
            }
            Some(body) => {
                tval.drop_with_heap(m.heap);
                sever_chain(m.heap, body, m.limits.eval_stack)?;
                m.heap.inc_ref(m.envt);
                let restore = m.envt;
                enter_body(m, addr, body, restore, false, pc)
            }
        }
    } else {
        tval.drop_with_heap(m.heap);
        let next_clause = raw_next(m.heap, cnode);
        m.heap.dec_ref(cnode);
        cond_enter_clause(m, addr, next_clause, pc)
    }
}

// ---------------------------------------------------------------------------
// let / let* / letrec
// ---------------------------------------------------------------------------

fn binding_name(heap: &Heap, binding_node: HeapId) -> RunResult<SymbolId> {
    let blist = car_pair_id(heap, binding_node)
        .ok_or_else(|| RunError::syntax("let: binding must be (name value)"))?;
    car_symbol(heap, blist).ok_or_else(|| RunError::syntax("let: binding name must be a symbol"))
}

/// Queues the next binding's value expression for evaluation, carrying the
/// form's environment state forward in the resume slot.
fn let_start_binding(
    m: &mut Machine<'_>,
    form: SpecialForm,
    addr: HeapId,
    binding_node: HeapId,
    carried_env: HeapId,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    let shape = (|| {
        let blist = car_pair_id(m.heap, binding_node)
            .ok_or_else(|| RunError::syntax("let: binding must be (name value)"))?;
        let expr_node =
            raw_next(m.heap, blist).ok_or_else(|| RunError::syntax("let: binding missing value"))?;
        if raw_next(m.heap, expr_node).is_some() {
            return Err(RunError::syntax("let: binding must have a single value"));
        }
        Ok(expr_node)
    })();
    let expr_node = match shape {
        Ok(n) => n,
        Err(e) => {
            m.heap.dec_ref(carried_env);
            return Err(e);
        }
    };
    m.heap.inc_ref(binding_node);
    m.push_entry(FrameEntry::Ret(RetAddr {
        addr: Some(addr),
        resume: Some(Resume {
            form,
            node: Some(binding_node),
            env: Some(carried_env),
        }),
    }))?;
    *pc = Some(expr_node);
    Ok(())
}

/// Enters the body of a `let` form.
///
/// `frame_env`, when present, is an owned reference that becomes the
/// environment register (the register's previous reference is released).
/// `restore_env` is an independently owned reference that the continuation
/// restores afterwards. Both are released here on the error paths.
fn let_enter_body(
    m: &mut Machine<'_>,
    addr: HeapId,
    frame_env: Option<HeapId>,
    restore_env: HeapId,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    let body = (|| {
        let comb = comb_of(m.heap, addr)?;
        let body = nth_node(m.heap, comb, 2).ok_or_else(|| RunError::syntax("let: empty body"))?;
        sever_chain(m.heap, body, m.limits.eval_stack)?;
        Ok(body)
    })();
    let body = match body {
        Ok(b) => b,
        Err(e) => {
            if let Some(f) = frame_env {
                m.heap.dec_ref(f);
            }
            m.heap.dec_ref(restore_env);
            return Err(e);
        }
    };
    if let Some(f) = frame_env {
        let old = mem::replace(&mut m.envt, f);
        m.heap.dec_ref(old);
    }
    enter_body(m, addr, body, restore_env, false, pc)
}

fn call_let(
    m: &mut Machine<'_>,
    form: SpecialForm,
    addr: HeapId,
    args: Vec<Value>,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    drop_values(m.heap, args);
    let comb = comb_of(m.heap, addr)?;
    let Some(bindings_node) = nth_node(m.heap, comb, 1) else {
        return Err(RunError::syntax("let: missing bindings"));
    };
    let first_binding = {
        let HeapData::Pair(p) = m.heap.get(bindings_node) else { unreachable!() };
        match &p.car {
            Value::EmptyList => None,
            Value::Ref(id) if matches!(m.heap.get(*id), HeapData::Pair(_)) => Some(*id),
            _ => return Err(RunError::syntax("let: bindings must be a list")),
        }
    };

    m.heap.inc_ref(m.envt);
    let frame = m.heap.allocate(HeapData::Env(EnvFrame::new(Some(m.envt))));

    if form == SpecialForm::Letrec {
        // All names exist, unassigned, while the init expressions run.
        let mut cur = first_binding;
        let mut steps = 0usize;
        while let Some(b) = cur {
            steps += 1;
            if steps > m.limits.eval_stack {
                m.heap.dec_ref(frame);
                return Err(RunError::syntax("cyclic combination"));
            }
            match binding_name(m.heap, b) {
                Ok(name) => env::define(m.heap, frame, name, Value::Unspecified),
                Err(e) => {
                    m.heap.dec_ref(frame);
                    return Err(e);
                }
            }
            cur = raw_next(m.heap, b);
        }
    }

    match first_binding {
        None => {
            // No bindings: straight into the body inside the fresh frame.
            m.heap.inc_ref(m.envt);
            let restore = m.envt;
            let_enter_body(m, addr, Some(frame), restore, pc)
        }
        Some(b) => match form {
            SpecialForm::Let => {
                // Init expressions see the outer environment; the frame
                // under construction travels in the resume slot.
                let_start_binding(m, form, addr, b, frame, pc)
            }
            SpecialForm::LetStar | SpecialForm::Letrec => {
                // Init expressions see the new frame; the outer
                // environment travels in the resume slot for the restore.
                let original = mem::replace(&mut m.envt, frame);
                let_start_binding(m, form, addr, b, original, pc)
            }
            _ => unreachable!(),
        },
    }
}

fn resume_let(
    m: &mut Machine<'_>,
    form: SpecialForm,
    addr: HeapId,
    resume: Resume,
    mut args: Vec<Value>,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    let binding_node = resume.node.expect("binding node recorded");
    let carried_env = resume.env.expect("environment recorded");
    let v = args.pop().unwrap_or(Value::Unspecified);
    drop_values(m.heap, args);

    let name = match binding_name(m.heap, binding_node) {
        Ok(s) => s,
        Err(e) => {
            v.drop_with_heap(m.heap);
            m.heap.dec_ref(binding_node);
            m.heap.dec_ref(carried_env);
            return Err(e);
        }
    };
    let target_frame = match form {
        SpecialForm::Let => carried_env,
        _ => m.envt,
    };
    env::define(m.heap, target_frame, name, v);

    let next_binding = raw_next(m.heap, binding_node);
    m.heap.dec_ref(binding_node);
    match next_binding {
        Some(nb) => let_start_binding(m, form, addr, nb, carried_env, pc),
        None => match form {
            SpecialForm::Let => {
                // The frame is complete; it becomes the body environment
                // and the current register is saved for the restore.
                m.heap.inc_ref(m.envt);
                let restore = m.envt;
                let_enter_body(m, addr, Some(carried_env), restore, pc)
            }
            SpecialForm::LetStar | SpecialForm::Letrec => {
                // The register already holds the frame; the carried outer
                // environment is what the continuation restores.
                let_enter_body(m, addr, None, carried_env, pc)
            }
            _ => unreachable!(),
        },
    }
}

// ---------------------------------------------------------------------------
// eval / delay / force
// ---------------------------------------------------------------------------

fn call_eval(m: &mut Machine<'_>, addr: HeapId, mut args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    if args.len() != 2 {
        let got = args.len().saturating_sub(1);
        drop_values(m.heap, args);
        return Err(RunError::arg_count("eval", "1", got));
    }
    let datum = take(&mut args, 1);
    drop_values(m.heap, args);
    // Re-enter the evaluator on the datum through a detached wrapper node,
    // in the current environment.
    let wrapper = m.heap.allocate(HeapData::Pair(Pair::standalone(datum, Value::EmptyList)));
    m.push_entry(FrameEntry::Ret(RetAddr {
        addr: Some(addr),
        resume: Some(Resume {
            form: SpecialForm::Eval,
            node: Some(wrapper),
            env: None,
        }),
    }))?;
    *pc = Some(wrapper);
    Ok(())
}

fn resume_eval(
    m: &mut Machine<'_>,
    addr: HeapId,
    resume: Resume,
    mut args: Vec<Value>,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    let wrapper = resume.node.expect("wrapper node recorded");
    let v = args.pop().unwrap_or(Value::Unspecified);
    drop_values(m.heap, args);
    m.heap.dec_ref(wrapper);
    m.push_entry(FrameEntry::Value(v))?;
    *pc = m.next_node(addr)?;
    Ok(())
}

fn call_delay(m: &mut Machine<'_>, addr: HeapId, args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    drop_values(m.heap, args);
    let comb = comb_of(m.heap, addr)?;
    let Some(entry) = nth_node(m.heap, comb, 1) else {
        return Err(RunError::syntax("delay: missing expression"));
    };
    if raw_next(m.heap, entry).is_some() {
        return Err(RunError::syntax("delay: expected a single expression"));
    }
    set_standalone(m.heap, entry);
    m.heap.inc_ref(entry);
    let promise = Value::Ref(m.heap.allocate(HeapData::Promise(Promise::new(entry))));
    m.push_entry(FrameEntry::Value(promise))?;
    *pc = m.next_node(addr)?;
    Ok(())
}

fn call_force(m: &mut Machine<'_>, addr: HeapId, mut args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
    if args.len() != 2 {
        let got = args.len().saturating_sub(1);
        drop_values(m.heap, args);
        return Err(RunError::arg_count("force", "1", got));
    }
    let v = take(&mut args, 1);
    drop_values(m.heap, args);
    let promise_id = match &v {
        Value::Ref(id) if matches!(m.heap.get(*id), HeapData::Promise(_)) => Some(*id),
        _ => None,
    };
    let Some(pid) = promise_id else {
        // Forcing a non-promise yields the value itself.
        m.push_entry(FrameEntry::Value(v))?;
        *pc = m.next_node(addr)?;
        return Ok(());
    };
    let memo = {
        let HeapData::Promise(p) = m.heap.get(pid) else { unreachable!() };
        p.value.as_ref().map(|mv| mv.clone_with_heap(m.heap))
    };
    if let Some(memo) = memo {
        v.drop_with_heap(m.heap);
        m.push_entry(FrameEntry::Value(memo))?;
        *pc = m.next_node(addr)?;
        return Ok(());
    }
    let entry = {
        let HeapData::Promise(p) = m.heap.get(pid) else { unreachable!() };
        p.entry
    };
    // `v`'s reference transfers into the resume slot; the promise stays
    // alive while its entry point evaluates.
    m.push_entry(FrameEntry::Ret(RetAddr {
        addr: Some(addr),
        resume: Some(Resume {
            form: SpecialForm::Force,
            node: Some(pid),
            env: None,
        }),
    }))?;
    *pc = Some(entry);
    Ok(())
}

fn resume_force(
    m: &mut Machine<'_>,
    addr: HeapId,
    resume: Resume,
    mut args: Vec<Value>,
    pc: &mut Option<HeapId>,
) -> RunResult<()> {
    let pid = resume.node.expect("promise recorded");
    let v = args.pop().unwrap_or(Value::Unspecified);
    drop_values(m.heap, args);
    let memo = v.clone_with_heap(m.heap);
    let old = match m.heap.get_mut(pid) {
        HeapData::Promise(p) => p.value.replace(memo),
        _ => unreachable!(),
    };
    if let Some(old) = old {
        old.drop_with_heap(m.heap);
    }
    m.heap.dec_ref(pid);
    m.push_entry(FrameEntry::Value(v))?;
    *pc = m.next_node(addr)?;
    Ok(())
}
