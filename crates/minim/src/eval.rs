//! The iterative evaluator.
//!
//! Evaluation never recurses on the host stack. Pending calls live on an
//! explicit evaluation stack of frame entries (values and return
//! addresses), and call/return uses an explicit chain of continuations.
//! One step either *pushes* (examines the node under the program counter)
//! or *applies* (the current sub-list is exhausted: collect the evaluated
//! entries and dispatch on the operator).

use strum::IntoEnumIterator;

use crate::builtins::Builtin;
use crate::env::{self, EnvFrame};
use crate::error::{RunError, RunResult};
use crate::heap::{Heap, HeapData, HeapId, HeapStats};
use crate::intern::{Interner, SymbolId};
use crate::io::PrintWriter;
use crate::limits::Limits;
use crate::reader;
use crate::repr::{ReprMode, external_repr};
use crate::special::{Resume, SpecialForm};
use crate::types::{Pair, Params};
use crate::value::{Value, drop_values};

/// A saved snapshot of one pending call: the caller's environment, the
/// call-site node to resume after, and the body node currently being
/// evaluated. When the body is exhausted the registers are restored from
/// here and the continuation is popped.
///
/// All three fields hold counted references.
pub(crate) struct Continuation {
    pub env: HeapId,
    pub ret: HeapId,
    pub body: HeapId,
}

/// A return address on the evaluation stack.
///
/// `addr` is the call-site node; `None` marks the entrance of a procedure
/// body. `resume` carries per-activation state for multi-phase special
/// forms; keeping it here rather than on shared syntax nodes keeps
/// recursive re-entry of the same node correct.
pub(crate) struct RetAddr {
    pub addr: Option<HeapId>,
    pub resume: Option<Resume>,
}

/// One entry on the evaluation stack: an evaluated value or a return
/// address.
pub(crate) enum FrameEntry {
    Value(Value),
    Ret(RetAddr),
}

/// Releases the references a return address may hold.
fn release_ret(heap: &mut Heap, ra: RetAddr) {
    if let Some(resume) = ra.resume {
        resume.release(heap);
    }
}

/// Register state for one `run_expr` activation.
pub(crate) struct Machine<'a> {
    pub heap: &'a mut Heap,
    pub interner: &'a Interner,
    pub limits: &'a Limits,
    pub out: &'a mut dyn PrintWriter,
    pub stack: Vec<FrameEntry>,
    pub conts: Vec<Continuation>,
    /// Current environment register; holds one counted reference.
    pub envt: HeapId,
    pub else_sym: SymbolId,
}

/// Raw structural successor: the cdr when it is a pair, ignoring the
/// control flags. Used for body sequencing and for walking special-form
/// sub-lists.
pub(crate) fn raw_next(heap: &Heap, node: HeapId) -> Option<HeapId> {
    let HeapData::Pair(p) = heap.get(node) else {
        return None;
    };
    match &p.cdr {
        Value::Ref(id) if matches!(heap.get(*id), HeapData::Pair(_)) => Some(*id),
        _ => None,
    }
}

impl Machine<'_> {
    /// Runs one top-level expression to completion. `wrapper` is a detached
    /// node whose car is the expression.
    pub fn run(&mut self, wrapper: HeapId) -> RunResult<Value> {
        match self.run_inner(wrapper) {
            Ok(v) => {
                self.heap.dec_ref(self.envt);
                Ok(v)
            }
            Err(e) => {
                self.unwind();
                Err(e)
            }
        }
    }

    fn run_inner(&mut self, wrapper: HeapId) -> RunResult<Value> {
        let mut pc: Option<HeapId> = Some(wrapper);
        self.step_push(&mut pc)?;
        while matches!(self.stack.first(), Some(FrameEntry::Ret(_))) {
            if pc.is_some() {
                self.step_push(&mut pc)?;
            } else {
                self.step_apply(&mut pc)?;
            }
        }
        match self.stack.pop() {
            Some(FrameEntry::Value(v)) if self.stack.is_empty() => Ok(v),
            _ => Err(RunError::internal("evaluation ended in an inconsistent state")),
        }
    }

    /// Releases everything the machine still holds. Called when an error
    /// unwinds the evaluation; invalidated frames release their value
    /// references here.
    fn unwind(&mut self) {
        while let Some(entry) = self.stack.pop() {
            match entry {
                FrameEntry::Value(v) => v.drop_with_heap(self.heap),
                FrameEntry::Ret(ra) => release_ret(self.heap, ra),
            }
        }
        while let Some(c) = self.conts.pop() {
            self.heap.dec_ref(c.env);
            self.heap.dec_ref(c.ret);
            self.heap.dec_ref(c.body);
        }
        self.heap.dec_ref(self.envt);
    }

    /// Pushes one frame entry, enforcing the stack bound. On overflow the
    /// entry's references are released before the error is reported.
    pub(crate) fn push_entry(&mut self, entry: FrameEntry) -> RunResult<()> {
        if self.stack.len() >= self.limits.eval_stack {
            match entry {
                FrameEntry::Value(v) => v.drop_with_heap(self.heap),
                FrameEntry::Ret(ra) => release_ret(self.heap, ra),
            }
            return Err(RunError::internal("evaluation stack overflow"));
        }
        self.stack.push(entry);
        Ok(())
    }

    /// Program-counter successor: follows cdr links, stepping over nodes
    /// special forms marked for skipping, and stopping at detached nodes.
    pub(crate) fn next_node(&self, node: HeapId) -> RunResult<Option<HeapId>> {
        let mut cur = node;
        let mut steps = 0usize;
        loop {
            steps += 1;
            if steps > self.limits.eval_stack {
                return Err(RunError::syntax("cyclic combination"));
            }
            let next = {
                let HeapData::Pair(p) = self.heap.get(cur) else {
                    return Err(RunError::internal("program counter left the syntax tree"));
                };
                if p.standalone {
                    return Ok(None);
                }
                match &p.cdr {
                    Value::EmptyList => return Ok(None),
                    Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Pair(_)) => *id,
                    _ => return Err(RunError::syntax("combination must be a proper list")),
                }
            };
            let skip = matches!(self.heap.get(next), HeapData::Pair(p) if p.skip);
            if skip {
                cur = next;
            } else {
                return Ok(Some(next));
            }
        }
    }

    /// The push step. A simple head is evaluated in place (symbols through
    /// the environment) and the program counter advances; a combination
    /// head pushes a return address, descends, and gives the operator's
    /// `prepare` a chance to override the default argument sweep.
    fn step_push(&mut self, pc: &mut Option<HeapId>) -> RunResult<()> {
        let node = pc.expect("step_push without a program counter");
        enum Head {
            Empty,
            Symbol(SymbolId),
            Simple,
            Comb(HeapId),
        }
        let head = {
            let HeapData::Pair(p) = self.heap.get(node) else {
                return Err(RunError::internal("program counter left the syntax tree"));
            };
            match &p.car {
                Value::EmptyList => Head::Empty,
                Value::Symbol(s) => Head::Symbol(*s),
                v if v.is_simple(self.heap) => Head::Simple,
                Value::Ref(id) => Head::Comb(*id),
                _ => unreachable!("non-simple values are heap pairs"),
            }
        };
        match head {
            Head::Empty => Err(RunError::syntax("empty combination: ()")),
            Head::Symbol(s) => {
                let v = env::lookup(self.heap, self.envt, s)
                    .ok_or_else(|| RunError::unbound(self.interner.get(s)))?;
                self.push_entry(FrameEntry::Value(v))?;
                *pc = self.next_node(node)?;
                Ok(())
            }
            Head::Simple => {
                let v = {
                    let HeapData::Pair(p) = self.heap.get(node) else { unreachable!() };
                    p.car.clone_with_heap(self.heap)
                };
                self.push_entry(FrameEntry::Value(v))?;
                *pc = self.next_node(node)?;
                Ok(())
            }
            Head::Comb(sub) => {
                self.push_entry(FrameEntry::Ret(RetAddr {
                    addr: Some(node),
                    resume: None,
                }))?;
                *pc = Some(sub);
                let head_special = {
                    let HeapData::Pair(p) = self.heap.get(sub) else { unreachable!() };
                    match &p.car {
                        Value::Symbol(s) => env::peek_special(self.heap, self.envt, *s),
                        Value::Special(f) => Some(*f),
                        _ => None,
                    }
                };
                if let Some(form) = head_special {
                    self.prepare(form, sub)?;
                }
                Ok(())
            }
        }
    }

    /// The apply step: collect evaluated entries down to the nearest return
    /// address (threading them back into evaluation order) and dispatch.
    fn step_apply(&mut self, pc: &mut Option<HeapId>) -> RunResult<()> {
        let mut args: Vec<Value> = Vec::new();
        while matches!(self.stack.last(), Some(FrameEntry::Value(_))) {
            let Some(FrameEntry::Value(v)) = self.stack.pop() else {
                unreachable!()
            };
            args.push(v);
        }
        args.reverse();
        let Some(FrameEntry::Ret(ra)) = self.stack.pop() else {
            drop_values(self.heap, args);
            return Err(RunError::internal("apply without a return address"));
        };
        match (ra.addr, ra.resume) {
            (None, None) => self.apply_sentinel(args, pc),
            (Some(addr), Some(resume)) => self.apply_resume(addr, resume, args, pc),
            (Some(addr), None) => self.apply_operator(addr, args, pc),
            (None, Some(resume)) => {
                resume.release(self.heap);
                drop_values(self.heap, args);
                Err(RunError::internal("resume state without a call site"))
            }
        }
    }

    /// Entrance-of-body sentinel: advance the continuation's body pointer.
    /// When the body is exhausted the final value stays on the stack and
    /// the caller's registers are restored.
    fn apply_sentinel(&mut self, mut args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
        let Some(cont) = self.conts.last() else {
            drop_values(self.heap, args);
            return Err(RunError::internal("body sentinel without a continuation"));
        };
        let next_body = raw_next(self.heap, cont.body);
        match next_body {
            None => {
                let result = args.pop().unwrap_or(Value::Unspecified);
                drop_values(self.heap, args);
                let cont = self.conts.pop().expect("continuation vanished");
                let next = self.next_node(cont.ret);
                let old_env = std::mem::replace(&mut self.envt, cont.env);
                self.heap.dec_ref(old_env);
                self.heap.dec_ref(cont.ret);
                self.heap.dec_ref(cont.body);
                match next {
                    Ok(n) => {
                        self.push_entry(FrameEntry::Value(result))?;
                        *pc = n;
                        Ok(())
                    }
                    Err(e) => {
                        result.drop_with_heap(self.heap);
                        Err(e)
                    }
                }
            }
            Some(nb) => {
                drop_values(self.heap, args);
                self.heap.inc_ref(nb);
                let cont = self.conts.last_mut().expect("continuation vanished");
                let old = std::mem::replace(&mut cont.body, nb);
                self.heap.dec_ref(old);
                self.push_entry(FrameEntry::Ret(RetAddr {
                    addr: None,
                    resume: None,
                }))?;
                *pc = Some(nb);
                Ok(())
            }
        }
    }

    /// Ordinary operator dispatch: the first collected value decides.
    fn apply_operator(&mut self, addr: HeapId, mut args: Vec<Value>, pc: &mut Option<HeapId>) -> RunResult<()> {
        enum Op {
            Special(SpecialForm),
            Builtin(Builtin),
            Closure(HeapId),
            Other,
        }
        let op = match args.first() {
            None => {
                return Err(RunError::internal("apply with an empty argument list"));
            }
            Some(Value::Special(f)) => Op::Special(*f),
            Some(Value::Builtin(b)) => Op::Builtin(*b),
            Some(Value::Ref(id)) if matches!(self.heap.get(*id), HeapData::Closure(_)) => Op::Closure(*id),
            Some(other) => {
                debug_assert!(!other.is_operator(self.heap));
                Op::Other
            }
        };
        match op {
            Op::Special(form) => form.call(self, addr, args, pc),
            Op::Builtin(builtin) => {
                args.remove(0);
                let result = builtin.call(self.heap, self.interner, args, self.out, self.limits)?;
                self.push_entry(FrameEntry::Value(result))?;
                *pc = self.next_node(addr)?;
                Ok(())
            }
            Op::Closure(cid) => self.closure_call(cid, args, addr, pc),
            Op::Other => {
                let shown = external_repr(self.heap, self.interner, &args[0], ReprMode::Write, self.limits.repr_stack)
                    .unwrap_or_else(|_| "#<value>".to_owned());
                drop_values(self.heap, args);
                Err(RunError::not_applicable(format!("not applicable: {shown}")))
            }
        }
    }

    fn apply_resume(
        &mut self,
        addr: HeapId,
        resume: Resume,
        args: Vec<Value>,
        pc: &mut Option<HeapId>,
    ) -> RunResult<()> {
        let form = resume.form;
        form.resume(self, addr, resume, args, pc)
    }

    /// Closure application: verify arity, bind parameters into a fresh
    /// frame over the captured environment, push a continuation and the
    /// entrance sentinel, and jump to the body.
    fn closure_call(&mut self, cid: HeapId, args: Vec<Value>, addr: HeapId, pc: &mut Option<HeapId>) -> RunResult<()> {
        let (params, body, captured) = {
            let HeapData::Closure(c) = self.heap.get(cid) else {
                unreachable!()
            };
            (c.params.clone(), c.body, c.env)
        };
        let argc = args.len() - 1;
        if !params.accepts(argc) {
            let err = RunError::arg_count("procedure", &params.arity_description(), argc);
            drop_values(self.heap, args);
            return Err(err);
        }
        self.heap.inc_ref(captured);
        let frame = self.heap.allocate(HeapData::Env(EnvFrame::new(Some(captured))));
        let mut rest = args.into_iter();
        let operator = rest.next().expect("operator vanished");
        operator.drop_with_heap(self.heap);
        match params {
            Params::Fixed(names) => {
                for name in names {
                    let v = rest.next().expect("arity checked");
                    env::define(self.heap, frame, name, v);
                }
            }
            Params::Variadic(name) => {
                let list = collect_into_list(self.heap, rest);
                env::define(self.heap, frame, name, list);
            }
            Params::Rest(names, rest_name) => {
                for name in &names {
                    let v = rest.next().expect("arity checked");
                    env::define(self.heap, frame, *name, v);
                }
                let list = collect_into_list(self.heap, rest);
                env::define(self.heap, frame, rest_name, list);
            }
        }
        self.heap.inc_ref(addr);
        self.heap.inc_ref(body);
        let caller_env = std::mem::replace(&mut self.envt, frame);
        self.conts.push(Continuation {
            env: caller_env,
            ret: addr,
            body,
        });
        self.push_entry(FrameEntry::Ret(RetAddr {
            addr: None,
            resume: None,
        }))?;
        *pc = Some(body);
        Ok(())
    }
}

/// Builds a fresh proper list from the remaining arguments.
fn collect_into_list(heap: &mut Heap, rest: impl Iterator<Item = Value>) -> Value {
    let items: Vec<Value> = rest.collect();
    let mut acc = Value::EmptyList;
    for item in items.into_iter().rev() {
        acc = Value::Ref(heap.allocate(HeapData::Pair(Pair::new(item, acc))));
    }
    acc
}

/// One interpreter instance: the value store, the symbol interner, and the
/// top-level environment, pre-populated with every special form and builtin
/// procedure. Running two interpreters concurrently means two instances;
/// nothing here is global.
pub struct Interp {
    heap: Heap,
    interner: Interner,
    limits: Limits,
    /// Top-level frame; holds one counted reference for the lifetime of the
    /// interpreter.
    env: HeapId,
    else_sym: SymbolId,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        let mut heap = Heap::new(limits.gc_queue, limits.cycle_threshold);
        let mut interner = Interner::new();
        let env = heap.allocate(HeapData::Env(EnvFrame::new(None)));
        for form in SpecialForm::iter() {
            let sym = interner.intern(form.name());
            env::define(&mut heap, env, sym, Value::Special(form));
        }
        for builtin in Builtin::iter() {
            let sym = interner.intern(builtin.name());
            env::define(&mut heap, env, sym, Value::Builtin(builtin));
        }
        let else_sym = interner.intern("else");
        Self {
            heap,
            interner,
            limits,
            env,
            else_sym,
        }
    }

    /// Reads every datum in `src` into syntax trees. Each returned value
    /// carries one owned reference; pass it to [`Interp::run_expr`] or
    /// release it with [`Interp::drop_value`].
    pub fn read(&mut self, src: &str) -> RunResult<Vec<Value>> {
        reader::read_datums(src, &mut self.heap, &mut self.interner)
    }

    /// Evaluates one top-level expression, consuming it.
    ///
    /// After the expression completes (or fails), non-cyclic garbage is
    /// reclaimed immediately and the cycle pass runs when the heap has
    /// grown past its threshold, so garbage from one expression never
    /// lingers into the next.
    pub fn run_expr(&mut self, form: Value, out: &mut dyn PrintWriter) -> RunResult<Value> {
        let wrapper = self.heap.allocate(HeapData::Pair(Pair::standalone(form, Value::EmptyList)));
        self.heap.inc_ref(self.env);
        let mut machine = Machine {
            heap: &mut self.heap,
            interner: &self.interner,
            limits: &self.limits,
            out,
            stack: Vec::new(),
            conts: Vec::new(),
            envt: self.env,
            else_sym: self.else_sym,
        };
        let result = machine.run(wrapper);
        self.heap.dec_ref(wrapper);
        let collected = self.heap.collect();
        match (result, collected) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(v), Err(e)) => {
                v.drop_with_heap(&mut self.heap);
                Err(e)
            }
            (Err(e), _) => Err(e),
        }
    }

    /// Reads and evaluates every form in `src`, returning the last form's
    /// value (`None` for empty input). Intermediate values are released.
    pub fn run_source(&mut self, src: &str, out: &mut dyn PrintWriter) -> RunResult<Option<Value>> {
        let mut forms = self.read(src)?.into_iter();
        let mut last: Option<Value> = None;
        while let Some(form) = forms.next() {
            match self.run_expr(form, out) {
                Ok(v) => {
                    if let Some(prev) = last.replace(v) {
                        prev.drop_with_heap(&mut self.heap);
                    }
                }
                Err(e) => {
                    if let Some(prev) = last.take() {
                        prev.drop_with_heap(&mut self.heap);
                    }
                    drop_values(&mut self.heap, forms);
                    return Err(e);
                }
            }
        }
        Ok(last)
    }

    /// External representation (`write` form: strings quoted).
    pub fn repr(&self, value: &Value) -> RunResult<String> {
        external_repr(&self.heap, &self.interner, value, ReprMode::Write, self.limits.repr_stack)
    }

    /// Display form: string and character content printed raw.
    pub fn display_string(&self, value: &Value) -> RunResult<String> {
        external_repr(&self.heap, &self.interner, value, ReprMode::Display, self.limits.repr_stack)
    }

    /// Releases a value obtained from [`Interp::read`] or
    /// [`Interp::run_expr`].
    pub fn drop_value(&mut self, value: Value) {
        value.drop_with_heap(&mut self.heap);
    }

    /// Structural equality between two held values.
    #[must_use]
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        a.equal(b, &self.heap)
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Number of distinct interned symbol names.
    #[must_use]
    pub fn interned_symbols(&self) -> usize {
        self.interner.len()
    }

    /// Threshold-gated collection: a reference-count sweep, plus the cycle
    /// pass when the heap is large enough.
    pub fn collect(&mut self) -> RunResult<()> {
        self.heap.collect()
    }

    /// Unconditional full collection including the cycle pass.
    pub fn collect_full(&mut self) -> RunResult<()> {
        self.heap.collect_full()
    }
}
