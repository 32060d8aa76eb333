use parking_lot::Mutex;

/// Per-lane buffer of not-yet-incorporated textual inputs.
///
/// A producer pushes every new input, snapshots the whole queue when it
/// starts an operation, and reconciles with that same snapshot once the
/// operation completes. Entries pushed while the operation was in flight
/// survive reconciliation and ride along on the next trigger.
#[derive(Debug, Default)]
pub struct SubmissionQueue {
    entries: Mutex<Vec<String>>,
}

impl SubmissionQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one input to the tail. The queue is unbounded.
    pub fn push(&self, text: impl Into<String>) {
        self.entries.lock().push(text.into());
    }

    /// Copies the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Removes every entry whose value appears in `consumed`.
    ///
    /// Matching is by value, so equal-valued duplicates are all removed
    /// even when only one of them was conceptually consumed.
    pub fn reconcile(&self, consumed: &[String]) {
        self.entries
            .lock()
            .retain(|entry| !consumed.iter().any(|c| c == entry));
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_keeps_inputs_pushed_after_snapshot() {
        let queue = SubmissionQueue::new();
        queue.push("x");
        queue.push("y");
        let snapshot = queue.snapshot();
        queue.push("z");
        queue.reconcile(&snapshot);
        assert_eq!(queue.snapshot(), ["z"]);
    }

    #[test]
    fn reconcile_removes_all_equal_valued_duplicates() {
        let queue = SubmissionQueue::new();
        queue.push("again");
        queue.push("again");
        queue.reconcile(&["again".to_string()]);
        assert!(queue.is_empty());
    }

    #[test]
    fn reconcile_with_empty_consumed_is_a_noop() {
        let queue = SubmissionQueue::new();
        queue.push("keep");
        queue.reconcile(&[]);
        assert_eq!(queue.len(), 1);
    }
}
