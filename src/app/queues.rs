use crate::app::action::{Action, RepeatMode, Schedule, ScheduledAction};
use crate::utils::time::MonotonicClock;
use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The two action queues of the dispatch engine, guarded by one mutex.
///
/// `actions` is a plain FIFO of unscheduled work; `scheduled` is a min-heap
/// keyed by execution time. `total_action_count` counts every unscheduled
/// enqueue and is captured into each scheduled instance to enforce the
/// ordering guarantee between the two queues.
struct QueueState {
    actions: VecDeque<Action>,
    scheduled: BinaryHeap<ScheduledAction>,
    total_action_count: u64,
}

pub(crate) struct ActionQueues {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl ActionQueues {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                actions: VecDeque::new(),
                scheduled: BinaryHeap::new(),
                total_action_count: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an unscheduled action. Callable from any thread.
    pub(crate) fn push(&self, action: Action) {
        let mut state = self.state.lock();
        state.actions.push_back(action);
        state.total_action_count += 1;
        self.available.notify_all();
    }

    /// Enqueues the first instance of a scheduled action at
    /// `now + initial_delay`. Callable from any thread.
    pub(crate) fn push_scheduled(&self, action: Action, schedule: Arc<Schedule>, now: u64) {
        let execution_time = now + schedule.initial_delay_nanos();
        let mut state = self.state.lock();
        let preceding = state.total_action_count;
        state.scheduled.push(ScheduledAction {
            execution_time,
            action,
            schedule,
            preceding_action_count: preceding,
        });
        self.available.notify_all();
    }

    /// Removes every pending instance sharing the given schedule. O(n) over
    /// the scheduled queue, which is acceptable at its typical size.
    pub(crate) fn cancel_schedule(&self, schedule: &Arc<Schedule>) {
        let mut state = self.state.lock();
        let kept: Vec<ScheduledAction> = state
            .scheduled
            .drain()
            .filter(|entry| !Arc::ptr_eq(&entry.schedule, schedule))
            .collect();
        state.scheduled = BinaryHeap::from(kept);
    }

    /// Wakes the dispatch thread, e.g. after an exit request.
    pub(crate) fn notify(&self) {
        self.available.notify_all();
    }

    /// Retrieves the next action to execute; dispatch-thread only.
    ///
    /// A due scheduled action wins over queued unscheduled ones, but only
    /// once all unscheduled actions enqueued before its (re-)scheduling
    /// have been processed. Repeating schedules are re-enqueued here, at
    /// pop time. Blocks until work arrives or `exit` is set; returns `None`
    /// on exit.
    pub(crate) fn poll(
        &self,
        clock: &MonotonicClock,
        processed_action_count: &mut u64,
        exit: &AtomicBool,
    ) -> Option<Action> {
        let mut state = self.state.lock();
        loop {
            if exit.load(Ordering::Relaxed) {
                return None;
            }

            let now = clock.now_nanos();

            let head_due = state.scheduled.peek().is_some_and(|head| {
                now > head.execution_time
                    && head.preceding_action_count <= *processed_action_count
            });
            if head_due {
                let Some(due) = state.scheduled.pop() else {
                    continue;
                };
                if due.schedule.is_cancelled() {
                    continue;
                }

                let preceding = state.total_action_count;
                match due.schedule.mode() {
                    RepeatMode::Once => {}
                    RepeatMode::FixedDelay => state.scheduled.push(ScheduledAction {
                        execution_time: now + due.schedule.period_nanos(),
                        action: due.action.clone(),
                        schedule: due.schedule.clone(),
                        preceding_action_count: preceding,
                    }),
                    RepeatMode::FixedRate => {
                        let mut next = due.execution_time + due.schedule.period_nanos();
                        if next <= now {
                            next = now + due.schedule.period_nanos();
                        }
                        state.scheduled.push(ScheduledAction {
                            execution_time: next,
                            action: due.action.clone(),
                            schedule: due.schedule.clone(),
                            preceding_action_count: preceding,
                        });
                    }
                }
                return Some(due.action);
            }

            if let Some(action) = state.actions.pop_front() {
                *processed_action_count += 1;
                return Some(action);
            }

            match state.scheduled.peek() {
                None => {
                    self.available.wait(&mut state);
                }
                Some(head) => {
                    let delay = head.execution_time.saturating_sub(now);
                    if delay > 0 {
                        let _ = self
                            .available
                            .wait_for(&mut state, Duration::from_nanos(delay));
                    }
                    // delay == 0: the head is due on the next iteration, or
                    // it is gated behind unscheduled actions that the next
                    // iteration will pop instead
                }
            }
        }
    }
}
