/// Capacity bounds for one interpreter instance.
///
/// Every bound has a generous default; lowering them is mainly useful for
/// tests that want to hit an overflow or force the cycle collector to run
/// on a small heap. Exceeding a bound surfaces as
/// [`ErrorKind::InternalError`](crate::ErrorKind::InternalError) rather than
/// a host-level crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of entries on the evaluation stack.
    pub eval_stack: usize,
    /// Maximum number of cursors on the external-representation stack.
    pub repr_stack: usize,
    /// Maximum number of entries in the collector's reclamation queue.
    pub gc_queue: usize,
    /// Live-object count at which `collect` runs the cycle-resolution pass.
    pub cycle_threshold: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            eval_stack: 1 << 18,
            repr_stack: 1 << 18,
            gc_queue: 1 << 22,
            cycle_threshold: 1 << 12,
        }
    }
}

impl Limits {
    /// Returns limits with the given cycle-collection threshold.
    #[must_use]
    pub fn with_cycle_threshold(mut self, threshold: usize) -> Self {
        self.cycle_threshold = threshold;
        self
    }

    /// Returns limits with the given evaluation-stack bound.
    #[must_use]
    pub fn with_eval_stack(mut self, slots: usize) -> Self {
        self.eval_stack = slots;
        self
    }

    /// Returns limits with the given repr-stack bound.
    #[must_use]
    pub fn with_repr_stack(mut self, slots: usize) -> Self {
        self.repr_stack = slots;
        self
    }
}
