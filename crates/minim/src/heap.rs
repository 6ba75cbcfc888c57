use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::env::EnvFrame;
use crate::error::{RunError, RunResult};
use crate::types::{Closure, Number, Pair, Promise};
use crate::value::Value;

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Everything that lives in the arena. Immediate values (booleans,
/// characters, symbols, the empty list, the unspecified value, operator
/// handles) stay inline in [`Value`]; the rest is heap data.
#[derive(Debug)]
pub(crate) enum HeapData {
    Pair(Pair),
    Vector(Vec<Value>),
    Str(String),
    Number(Number),
    Closure(Closure),
    Promise(Promise),
    Env(EnvFrame),
}

impl HeapData {
    /// Returns the variant name as a static string slice, for [`HeapStats`].
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Pair(_) => "Pair",
            Self::Vector(_) => "Vector",
            Self::Str(_) => "Str",
            Self::Number(_) => "Number",
            Self::Closure(_) => "Closure",
            Self::Promise(_) => "Promise",
            Self::Env(_) => "Env",
        }
    }

    /// Containers are the value kinds whose fields can reference other
    /// values through mutation and therefore create reference cycles.
    /// Only pairs and vectors qualify; the cycle pass ignores everything
    /// else.
    #[inline]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Pair(_) | Self::Vector(_))
    }
}

/// Collects the outbound heap references held by one value.
fn collect_child_ids(data: &HeapData, out: &mut Vec<HeapId>) {
    fn push(v: &Value, out: &mut Vec<HeapId>) {
        if let Value::Ref(id) = v {
            out.push(*id);
        }
    }
    match data {
        HeapData::Pair(p) => {
            push(&p.car, out);
            push(&p.cdr, out);
        }
        HeapData::Vector(items) => {
            for item in items {
                push(item, out);
            }
        }
        HeapData::Str(_) | HeapData::Number(_) => {}
        HeapData::Closure(c) => {
            out.push(c.body);
            out.push(c.env);
        }
        HeapData::Promise(p) => {
            out.push(p.entry);
            if let Some(v) = &p.value {
                push(v, out);
            }
        }
        HeapData::Env(frame) => {
            for v in frame.bindings.values() {
                push(v, out);
            }
            if let Some(parent) = frame.parent {
                out.push(parent);
            }
        }
    }
}

/// One arena slot: the payload plus its reference count.
///
/// The count is atomic so `inc_ref` only needs shared access to the heap,
/// which keeps borrows simple when cloning values out of heap data.
#[derive(Debug)]
struct HeapValue {
    refcount: AtomicUsize,
    data: Option<HeapData>,
}

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration
/// order, making snapshots suitable for display and comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live values on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live values by variant name (e.g. "Pair", "Number").
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// Reference-counted arena that backs all heap-resident runtime values.
///
/// Every constructor allocates through [`Heap::allocate`]; every stored
/// reference is counted with `inc_ref`/`dec_ref`. Reclamation is deferred:
/// a value whose count reaches zero joins a pending list and is destroyed
/// by the next [`Heap::sweep`], so nothing is freed while a top-level
/// expression is still running. Cycles built through pair and vector
/// mutation are broken by [`Heap::resolve_cycles`].
///
/// Freed slots go on a free list and are reused by later allocations,
/// keeping memory usage flat for long-running loops.
#[derive(Debug)]
pub(crate) struct Heap {
    entries: Vec<Option<HeapValue>>,
    /// Slots available for reuse. Populated by `sweep`, consumed by `allocate`.
    free_list: Vec<HeapId>,
    /// Values whose count dropped to zero, awaiting the next sweep.
    pending: Vec<HeapId>,
    /// Number of live values.
    live: usize,
    /// Bound on the sweep work queue.
    gc_queue: usize,
    /// Live-value count at which `collect` runs the cycle pass.
    cycle_threshold: usize,
}

impl Heap {
    pub fn new(gc_queue: usize, cycle_threshold: usize) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            pending: Vec::new(),
            live: 0,
            gc_queue,
            cycle_threshold,
        }
    }

    /// Allocates a new heap entry with a reference count of one, owned by
    /// the caller.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let entry = HeapValue {
            refcount: AtomicUsize::new(1),
            data: Some(data),
        };
        self.live += 1;
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(entry));
            id
        }
    }

    /// Records one additional owning reference.
    ///
    /// # Panics
    /// Panics if the id is invalid or the value has already been freed.
    pub fn inc_ref(&self, id: HeapId) {
        let value = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: value already freed");
        value.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one released reference. When the count reaches zero the value
    /// joins the pending list; actual destruction happens in [`Heap::sweep`].
    pub fn dec_ref(&mut self, id: HeapId) {
        let value = self
            .entries
            .get(id.index())
            .expect("Heap::dec_ref: slot missing")
            .as_ref()
            .expect("Heap::dec_ref: value already freed");
        let count = value.refcount.load(Ordering::Relaxed);
        debug_assert!(count > 0, "Heap::dec_ref: count underflow");
        value.refcount.store(count.saturating_sub(1), Ordering::Relaxed);
        if count <= 1 {
            self.pending.push(id);
        }
    }

    /// True when the slot is still occupied and its count is zero.
    fn is_dead(&self, id: HeapId) -> bool {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .is_some_and(|v| v.refcount.load(Ordering::Relaxed) == 0)
    }

    /// Returns the heap data stored at the given id.
    ///
    /// # Panics
    /// Panics if the id is invalid or the value has already been freed.
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: value already freed")
            .data
            .as_ref()
            .expect("Heap::get: data missing")
    }

    /// Mutable access to the heap data stored at the given id.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: value already freed")
            .data
            .as_mut()
            .expect("Heap::get_mut: data missing")
    }

    /// Current reference count; zero when the slot is free. Test hook.
    #[cfg(test)]
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map_or(0, |v| v.refcount.load(Ordering::Relaxed))
    }

    /// True when the slot still holds a live value. Test hook.
    #[cfg(test)]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .is_some()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Drives the reference-count sweep to a fixpoint.
    ///
    /// Moves the pending list into a bounded work queue, filtering out
    /// entries whose count has recovered or whose slot was already freed.
    /// Destroying a value releases its outbound references, which may add
    /// more pending entries; those are drained into the same queue until
    /// nothing is left. Queue exhaustion is an internal error.
    pub fn sweep(&mut self) -> RunResult<()> {
        let mut queue: Vec<HeapId> = Vec::new();
        let mut cursor = 0;
        let mut children: Vec<HeapId> = Vec::new();
        loop {
            for id in std::mem::take(&mut self.pending) {
                if self.is_dead(id) {
                    if queue.len() >= self.gc_queue {
                        return Err(RunError::internal("collector queue overflow"));
                    }
                    queue.push(id);
                }
            }
            if cursor == queue.len() {
                return Ok(());
            }
            let id = queue[cursor];
            cursor += 1;
            if !self.is_dead(id) {
                continue;
            }
            let value = self.entries[id.index()].take().expect("sweep: slot vanished");
            self.free_list.push(id);
            self.live -= 1;
            if let Some(data) = value.data {
                children.clear();
                collect_child_ids(&data, &mut children);
                drop(data);
                for &child in &children {
                    self.dec_ref(child);
                }
            }
        }
    }

    /// Breaks reference cycles among containers (pairs and vectors).
    ///
    /// For each container, a scratch count starts at the reference count
    /// and is decremented once for every reference held by another
    /// container. Containers whose scratch count stays positive are
    /// externally reachable roots; everything they reach transitively is
    /// kept. The rest is garbage held alive only by internal cycles and is
    /// freed, releasing its non-container children onto the pending list
    /// for the follow-up sweep.
    pub fn resolve_cycles(&mut self) {
        const NOT_CONTAINER: usize = usize::MAX;
        let n = self.entries.len();
        let mut gc_refs: Vec<usize> = vec![NOT_CONTAINER; n];
        for (i, slot) in self.entries.iter().enumerate() {
            if let Some(hv) = slot
                && let Some(data) = &hv.data
                && data.is_container()
            {
                gc_refs[i] = hv.refcount.load(Ordering::Relaxed);
            }
        }

        // Subtract every container-to-container edge.
        let mut children: Vec<HeapId> = Vec::new();
        for i in 0..n {
            if gc_refs[i] == NOT_CONTAINER {
                continue;
            }
            children.clear();
            if let Some(hv) = &self.entries[i]
                && let Some(data) = &hv.data
            {
                collect_child_ids(data, &mut children);
            }
            for child in &children {
                let ci = child.index();
                if gc_refs[ci] != NOT_CONTAINER {
                    gc_refs[ci] = gc_refs[ci].saturating_sub(1);
                }
            }
        }

        // Containers with a positive residual count are reachable from
        // outside the container graph; mark them and everything they reach.
        let mut keep = vec![false; n];
        let mut work: Vec<usize> = (0..n)
            .filter(|&i| gc_refs[i] != NOT_CONTAINER && gc_refs[i] > 0)
            .collect();
        while let Some(i) = work.pop() {
            if keep[i] {
                continue;
            }
            keep[i] = true;
            children.clear();
            if let Some(hv) = &self.entries[i]
                && let Some(data) = &hv.data
            {
                collect_child_ids(data, &mut children);
            }
            for child in &children {
                let ci = child.index();
                if gc_refs[ci] != NOT_CONTAINER && !keep[ci] {
                    work.push(ci);
                }
            }
        }

        // Free the unmarked containers. References between two dying
        // containers vanish with them; references out of the dying set are
        // released normally.
        let dying: Vec<usize> = (0..n)
            .filter(|&i| gc_refs[i] != NOT_CONTAINER && !keep[i])
            .collect();
        let mut is_dying = vec![false; n];
        for &i in &dying {
            is_dying[i] = true;
        }
        for &i in &dying {
            let Some(hv) = self.entries[i].take() else { continue };
            self.free_list.push(HeapId(i));
            self.live -= 1;
            if let Some(data) = hv.data {
                children.clear();
                collect_child_ids(&data, &mut children);
                drop(data);
                for &child in &children {
                    if !is_dying[child.index()] {
                        self.dec_ref(child);
                    }
                }
            }
        }
    }

    /// Runs immediate reclamation, then the cycle pass when the live count
    /// has crossed the threshold, then reclamation again for whatever the
    /// cycle pass released.
    pub fn collect(&mut self) -> RunResult<()> {
        self.sweep()?;
        if self.live_count() >= self.cycle_threshold {
            self.resolve_cycles();
            self.sweep()?;
        }
        Ok(())
    }

    /// Runs reclamation with an unconditional cycle pass.
    pub fn collect_full(&mut self) -> RunResult<()> {
        self.sweep()?;
        self.resolve_cycles();
        self.sweep()
    }

    /// Snapshot of live objects by count and variant.
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        for slot in &self.entries {
            if let Some(hv) = slot
                && let Some(data) = &hv.data
            {
                *objects_by_type.entry(data.variant_name()).or_insert(0) += 1;
            }
        }
        HeapStats {
            live_objects: self.live,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> Heap {
        Heap::new(1 << 16, usize::MAX)
    }

    #[test]
    fn sweep_reclaims_unreferenced_values() {
        let mut heap = test_heap();
        let id = heap.allocate(HeapData::Number(Number::from_i64(7)));
        assert_eq!(heap.live_count(), 1);
        heap.dec_ref(id);
        heap.sweep().unwrap();
        assert_eq!(heap.live_count(), 0);
        assert!(!heap.is_live(id));
    }

    #[test]
    fn recovered_count_survives_sweep() {
        let mut heap = test_heap();
        let id = heap.allocate(HeapData::Number(Number::from_i64(7)));
        heap.dec_ref(id);
        // Resurrected before the sweep runs.
        heap.inc_ref(id);
        heap.sweep().unwrap();
        assert!(heap.is_live(id));
        assert_eq!(heap.refcount(id), 1);
    }

    #[test]
    fn sweep_cascades_through_children() {
        let mut heap = test_heap();
        let n = heap.allocate(HeapData::Number(Number::from_i64(1)));
        let inner = heap.allocate(HeapData::Pair(Pair::new(Value::Ref(n), Value::EmptyList)));
        let outer = heap.allocate(HeapData::Pair(Pair::new(Value::Ref(inner), Value::EmptyList)));
        assert_eq!(heap.live_count(), 3);
        heap.dec_ref(outer);
        heap.sweep().unwrap();
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn self_referential_pair_needs_the_cycle_pass() {
        let mut heap = test_heap();
        let p = heap.allocate(HeapData::Pair(Pair::new(Value::EmptyList, Value::EmptyList)));
        // p.car = p, counting the new reference.
        heap.inc_ref(p);
        match heap.get_mut(p) {
            HeapData::Pair(pair) => pair.car = Value::Ref(p),
            _ => unreachable!(),
        }
        // Drop the external reference; the self-reference keeps the count at 1.
        heap.dec_ref(p);
        heap.sweep().unwrap();
        assert!(heap.is_live(p), "refcounting alone cannot reclaim a cycle");
        heap.resolve_cycles();
        heap.sweep().unwrap();
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn cycle_pass_keeps_externally_rooted_cycles() {
        let mut heap = test_heap();
        let a = heap.allocate(HeapData::Pair(Pair::new(Value::EmptyList, Value::EmptyList)));
        let b = heap.allocate(HeapData::Pair(Pair::new(Value::EmptyList, Value::EmptyList)));
        heap.inc_ref(b);
        match heap.get_mut(a) {
            HeapData::Pair(pair) => pair.cdr = Value::Ref(b),
            _ => unreachable!(),
        }
        heap.inc_ref(a);
        match heap.get_mut(b) {
            HeapData::Pair(pair) => pair.cdr = Value::Ref(a),
            _ => unreachable!(),
        }
        // `a` keeps its external root.
        heap.dec_ref(b);
        heap.collect_full().unwrap();
        assert!(heap.is_live(a));
        assert!(heap.is_live(b));

        heap.dec_ref(a);
        heap.collect_full().unwrap();
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn mutual_cycle_with_interior_values_is_reclaimed() {
        let mut heap = test_heap();
        let n = heap.allocate(HeapData::Number(Number::from_i64(42)));
        let a = heap.allocate(HeapData::Pair(Pair::new(Value::Ref(n), Value::EmptyList)));
        let b = heap.allocate(HeapData::Pair(Pair::new(Value::EmptyList, Value::Ref(a))));
        heap.inc_ref(a);
        heap.inc_ref(b);
        match heap.get_mut(a) {
            HeapData::Pair(pair) => pair.cdr = Value::Ref(b),
            _ => unreachable!(),
        }
        // Release both external roots; only the a<->b cycle remains, and it
        // holds the number alive.
        heap.dec_ref(a);
        heap.dec_ref(b);
        heap.sweep().unwrap();
        assert_eq!(heap.live_count(), 3);
        heap.resolve_cycles();
        heap.sweep().unwrap();
        assert_eq!(heap.live_count(), 0, "cycle and its interior number both freed");
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = test_heap();
        let a = heap.allocate(HeapData::Number(Number::from_i64(1)));
        heap.dec_ref(a);
        heap.sweep().unwrap();
        let b = heap.allocate(HeapData::Number(Number::from_i64(2)));
        assert_eq!(a.index(), b.index());
        assert_eq!(heap.stats().total_slots, 1);
    }

    #[test]
    fn queue_overflow_is_an_internal_error() {
        let mut heap = Heap::new(4, usize::MAX);
        let ids: Vec<_> = (0..8)
            .map(|i| heap.allocate(HeapData::Number(Number::from_i64(i))))
            .collect();
        for id in ids {
            heap.dec_ref(id);
        }
        let err = heap.sweep().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InternalError);
    }
}
