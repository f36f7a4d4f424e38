//! Background schedulers that enact time-based operations on the store.
//!
//! Each manager combines the rounded network time offset with a head view of
//! the store, keeps exactly one wait armed for the soonest-due entry and runs
//! one transaction when it fires. The enactment removes the entry, which moves
//! the head and re-arms the manager.

pub mod autoexpire_stories;
pub mod autoremove;
mod handle;
mod helper;
pub mod time_offset;

use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::config::CoreConfig;
use crate::constants::{MAX_WAIT_SLICE, TIME_OFFSET_POLL_INTERVAL};
use crate::models::{StoryExpirationEntry, TimestampBasedMessageAttributesEntry};
use crate::store::{Postbox, PostboxView, ViewKey};

pub use autoexpire_stories::{expire_stories, managed_autoexpire_story_operations};
pub use autoremove::{
    managed_autoremove_message_operations, perform_autoremove, AutoremoveMode, AutoremoveOutcome,
};
pub use handle::ManagerHandle;
pub(crate) use handle::ArmedSlot;
pub use helper::OperationsHelper;
pub use time_offset::{
    corrected_now, time_offset_stream, Clock, FixedTimeOffset, NetworkTimeSource, SystemClock,
};

/// Collaborators shared by every manager.
#[derive(Clone)]
pub struct ManagerContext {
    pub postbox: Postbox,
    pub time_source: Arc<dyn NetworkTimeSource>,
    pub clock: Arc<dyn Clock>,
    pub poll_interval: Duration,
    pub max_wait_slice: Duration,
    /// Parent span of every event the manager emits
    pub span: tracing::Span,
}

impl ManagerContext {
    pub fn new(postbox: Postbox, time_source: Arc<dyn NetworkTimeSource>) -> Self {
        Self {
            postbox,
            time_source,
            clock: Arc::new(SystemClock),
            poll_interval: TIME_OFFSET_POLL_INTERVAL,
            max_wait_slice: MAX_WAIT_SLICE,
            span: tracing::Span::current(),
        }
    }

    pub fn from_config(
        postbox: Postbox,
        time_source: Arc<dyn NetworkTimeSource>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            poll_interval: config.time_offset_poll_interval,
            max_wait_slice: config.max_wait_slice,
            ..Self::new(postbox, time_source)
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn corrected_now(&self, offset: i32) -> f64 {
        corrected_now(self.clock.as_ref(), offset)
    }
}

/// Entry at the head of a schedule.
pub(crate) trait ScheduledEntry: Clone + PartialEq + Send + 'static {
    fn due_timestamp(&self) -> i32;
}

impl ScheduledEntry for TimestampBasedMessageAttributesEntry {
    fn due_timestamp(&self) -> i32 {
        self.timestamp
    }
}

impl ScheduledEntry for StoryExpirationEntry {
    fn due_timestamp(&self) -> i32 {
        self.expiration_timestamp
    }
}

/// Sleep until the corrected clock reaches `deadline`. Sleeps in slices of at
/// most `max_slice` and re-reads the clock after each, so time spent
/// suspended counts toward the wait.
pub async fn suspend_aware_delay(clock: &dyn Clock, offset: i32, deadline: f64, max_slice: Duration) {
    loop {
        let remaining = deadline - corrected_now(clock, offset);
        if remaining.is_nan() || remaining <= 0.0 {
            return;
        }
        let slice = Duration::from_secs_f64(remaining).min(max_slice);
        tokio::time::sleep(slice).await;
    }
}

/// Shared manager loop: follow the offset stream and the head view, keep one
/// wait armed for the head, run `fire` when it is due. Every armed wait is
/// also published to `armed` so disposal can cancel it directly.
pub(crate) async fn drive_schedule<K, H, F, Fut>(
    context: ManagerContext,
    subsystem: &'static str,
    armed: Arc<ArmedSlot>,
    view_key: ViewKey,
    head_of: H,
    fire: F,
) where
    K: ScheduledEntry,
    H: Fn(PostboxView) -> Option<Option<K>> + Send,
    F: Fn(ManagerContext, K, i32) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut offsets = Box::pin(time_offset_stream(
        context.time_source.clone(),
        context.poll_interval,
    ));
    let mut view = context.postbox.subscribe(view_key);
    let mut helper = OperationsHelper::<K>::new();
    let mut offset: Option<i32> = None;
    let mut head: Option<Option<K>> = None;

    loop {
        tokio::select! {
            next = offsets.next() => match next {
                Some(value) => {
                    if offset.is_some() {
                        tracing::debug!(subsystem, offset = value, "Time offset changed");
                        helper.bump_generation();
                    }
                    offset = Some(value);
                }
                None => break,
            },
            update = view.recv() => match update {
                Some(update) => {
                    if let Some(new_head) = head_of(update.view) {
                        head = Some(new_head);
                    }
                }
                None => {
                    tracing::warn!(subsystem, "Schedule view closed, stopping");
                    break;
                }
            },
        }

        let (Some(current_offset), Some(current_head)) = (offset, head.clone()) else {
            continue;
        };
        helper.update(current_head, |entry| {
            let due = entry.due_timestamp();
            let deadline = f64::from(due);
            let delay = (deadline - context.corrected_now(current_offset)).max(0.0);
            tracing::debug!(subsystem, due, delay, "Scheduling operation");

            let context = context.clone();
            let entry = entry.clone();
            let fire = fire.clone();
            let span = context.span.clone();
            let slot = armed.clone();
            let task = tokio::spawn(
                async move {
                    suspend_aware_delay(
                        context.clock.as_ref(),
                        current_offset,
                        deadline,
                        context.max_wait_slice,
                    )
                    .await;
                    if slot.is_disposed() {
                        return;
                    }
                    fire(context, entry, current_offset).await;
                }
                .instrument(span),
            );
            armed.arm(task.abort_handle());
            task
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_delay_waits_until_deadline() {
        let clock = SystemClock;
        let deadline = clock.now() + 0.2;
        let started = Instant::now();

        suspend_aware_delay(&clock, 0, deadline, Duration::from_millis(50)).await;
        assert!(clock.now() >= deadline);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_past_deadline_returns_immediately() {
        let clock = SystemClock;
        let started = Instant::now();
        suspend_aware_delay(&clock, 0, clock.now() - 10.0, MAX_WAIT_SLICE).await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_offset_moves_deadline() {
        let clock = SystemClock;
        let started = Instant::now();
        // A server clock ten seconds ahead makes a deadline five seconds out already due.
        suspend_aware_delay(&clock, 10, clock.now() + 5.0, MAX_WAIT_SLICE).await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
