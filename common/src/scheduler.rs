//! Cooperative, time-ordered task queue.
//!
//! Tasks are one-shot: a recurring task re-schedules itself as the last thing
//! it does, and stops recurring simply by not doing so. Nothing here blocks;
//! a task waiting on an external condition re-schedules itself with a short
//! delay and checks again.

type TaskFn<C> = Box<dyn FnMut(&mut C, &mut Scheduler<C>) + Send>;

pub struct ScheduledTask<C> {
    pub due_ms: u64,
    label: &'static str,
    callback: TaskFn<C>,
}

impl<C> std::fmt::Debug for ScheduledTask<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("due_ms", &self.due_ms)
            .field("label", &self.label)
            .finish()
    }
}

/// Queue of deferred callbacks sorted ascending by due time. Callbacks get
/// mutable access to the shared context `C` and to the scheduler itself.
pub struct Scheduler<C> {
    tasks: Vec<ScheduledTask<C>>,
    now_ms: u64,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<C> Scheduler<C> {
    pub fn new(now_ms: u64) -> Self {
        Self {
            tasks: Vec::new(),
            now_ms,
        }
    }

    /// Time observed by the most recent `poll`; `schedule` delays are
    /// relative to it.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn next_due_ms(&self) -> Option<u64> {
        self.tasks.first().map(|task| task.due_ms)
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.iter().map(|task| task.label)
    }

    pub fn schedule<F>(&mut self, label: &'static str, delay_ms: u64, callback: F)
    where
        F: FnMut(&mut C, &mut Scheduler<C>) + Send + 'static,
    {
        let due_ms = self.now_ms.saturating_add(delay_ms);
        self.schedule_at(label, due_ms, callback);
    }

    pub fn schedule_at<F>(&mut self, label: &'static str, due_ms: u64, callback: F)
    where
        F: FnMut(&mut C, &mut Scheduler<C>) + Send + 'static,
    {
        // Insert after every task due at the same time so ties keep
        // insertion order.
        let index = self
            .tasks
            .iter()
            .position(|task| task.due_ms > due_ms)
            .unwrap_or(self.tasks.len());

        self.tasks.insert(
            index,
            ScheduledTask {
                due_ms,
                label,
                callback: Box::new(callback),
            },
        );
    }

    /// Runs the head task if it is due. At most one task runs per call.
    /// Returns the label of the task that ran.
    pub fn poll(&mut self, ctx: &mut C, now_ms: u64) -> Option<&'static str> {
        self.now_ms = self.now_ms.max(now_ms);

        let head_due = self.tasks.first()?.due_ms;
        if self.now_ms < head_due {
            return None;
        }

        let mut task = self.tasks.remove(0);
        (task.callback)(ctx, self);
        Some(task.label)
    }
}
