use crate::app::{AppShared, Application};
use crate::item::AnyDataItem;
use crate::message::Message;
use std::any::Any;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Callback executed on the dispatch thread.
pub(crate) type Callback = Arc<dyn Fn(&Application) + Send + Sync>;

/// A unit of work executed on the dispatch thread. Everything that mutates
/// application state travels through this type; external callers only ever
/// enqueue actions.
#[derive(Clone)]
pub(crate) enum Action {
    /// Hand a localized message to the target gateway's `on_publish`.
    Publish { gateway: usize, message: Message },
    /// Route a message received on a gateway to matching subscribers.
    Received { gateway: usize, message: Message },
    /// Tell a gateway that a localized topic filter appeared or vanished.
    SubscriptionChange {
        gateway: usize,
        filter: Arc<str>,
        subscribe: bool,
    },
    /// Recompute the value of a data item.
    Synchronize { item: Arc<dyn AnyDataItem> },
    /// Apply a queued value-change request to a data item.
    RequestChange {
        item: Arc<dyn AnyDataItem>,
        value: Arc<dyn Any + Send + Sync>,
    },
    /// Run a user callback.
    Run { callback: Callback },
}

/// Repetition policy of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RepeatMode {
    /// Execute once and forget.
    Once,
    /// Re-enqueue relative to the planned execution time.
    FixedRate,
    /// Re-enqueue relative to the actual execution time.
    FixedDelay,
}

/// Shared schedule state referenced by every pending instance of a
/// repeating (or one-shot) scheduled action.
pub(crate) struct Schedule {
    initial_delay: Duration,
    period: Duration,
    mode: RepeatMode,
    cancelled: AtomicBool,
}

impl Schedule {
    pub(crate) fn once(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            initial_delay: delay,
            period: Duration::ZERO,
            mode: RepeatMode::Once,
            cancelled: AtomicBool::new(false),
        })
    }

    pub(crate) fn fixed_rate(initial_delay: Duration, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            initial_delay,
            period,
            mode: RepeatMode::FixedRate,
            cancelled: AtomicBool::new(false),
        })
    }

    pub(crate) fn fixed_delay(initial_delay: Duration, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            initial_delay,
            period,
            mode: RepeatMode::FixedDelay,
            cancelled: AtomicBool::new(false),
        })
    }

    pub(crate) fn initial_delay_nanos(&self) -> u64 {
        self.initial_delay.as_nanos() as u64
    }

    pub(crate) fn period_nanos(&self) -> u64 {
        self.period.as_nanos() as u64
    }

    pub(crate) fn mode(&self) -> RepeatMode {
        self.mode
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Relaxed)
    }

    /// Marks the schedule cancelled. Returns `true` on the first call.
    pub(crate) fn cancel(&self) -> bool {
        !self.cancelled.swap(true, AtomicOrdering::Relaxed)
    }
}

/// An action bound to an execution time on the monotonic clock.
///
/// `preceding_action_count` gates execution: the instance may only run once
/// at least that many unscheduled actions have been processed, so a
/// scheduled action can never jump ahead of work that was enqueued before
/// its (re-)scheduling.
pub(crate) struct ScheduledAction {
    pub(crate) execution_time: u64,
    pub(crate) action: Action,
    pub(crate) schedule: Arc<Schedule>,
    pub(crate) preceding_action_count: u64,
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.execution_time == other.execution_time
    }
}

impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    // reversed: BinaryHeap is a max-heap, the earliest execution time must
    // surface first
    fn cmp(&self, other: &Self) -> Ordering {
        other.execution_time.cmp(&self.execution_time)
    }
}

/// Cancellable handle to a scheduled (possibly repeating) action.
///
/// Cancellation removes every not-yet-fired instance from the scheduled
/// queue and prevents further executions; it is idempotent.
pub struct ScheduleHandle {
    pub(crate) schedule: Arc<Schedule>,
    pub(crate) app: Weak<AppShared>,
}

impl ScheduleHandle {
    pub fn cancel(&self) {
        if self.schedule.cancel()
            && let Some(shared) = self.app.upgrade()
        {
            shared.queues.cancel_schedule(&self.schedule);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.schedule.is_cancelled()
    }
}
