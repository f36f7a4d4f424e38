//! Network time correction shared by the schedulers.

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the difference between server time and the local clock, in
/// seconds.
pub trait NetworkTimeSource: Send + Sync + 'static {
    fn global_time_difference(&self) -> f64;
}

/// Offset set by hand; used by the CLI and tests.
#[derive(Debug, Default)]
pub struct FixedTimeOffset {
    offset: Mutex<f64>,
}

impl FixedTimeOffset {
    pub fn new(offset: f64) -> Self {
        Self {
            offset: Mutex::new(offset),
        }
    }

    pub fn set(&self, offset: f64) {
        *self.offset.lock() = offset;
    }
}

impl NetworkTimeSource for FixedTimeOffset {
    fn global_time_difference(&self) -> f64 {
        *self.offset.lock()
    }
}

/// Wall clock in fractional seconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Local time corrected by the network offset.
pub fn corrected_now(clock: &dyn Clock, offset: i32) -> f64 {
    clock.now() + f64::from(offset)
}

/// Rounded network offset, read immediately and then every `interval`.
/// Only changes are emitted.
pub fn time_offset_stream(
    source: Arc<dyn NetworkTimeSource>,
    interval: Duration,
) -> impl Stream<Item = i32> + Send + 'static {
    stream::unfold(
        (source, None::<i32>, true),
        move |(source, last, first)| async move {
            let mut first = first;
            loop {
                if !first {
                    tokio::time::sleep(interval).await;
                }
                first = false;

                let offset = source.global_time_difference().round() as i32;
                if last != Some(offset) {
                    return Some((offset, (source, Some(offset), false)));
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_emits_rounded_distinct_values() {
        let source = Arc::new(FixedTimeOffset::new(2.4));
        let stream = time_offset_stream(source.clone(), Duration::from_millis(5));
        futures::pin_mut!(stream);

        assert_eq!(stream.next().await, Some(2));

        // Rounds to the same value: nothing new is emitted.
        source.set(1.6);
        let idle = tokio::time::timeout(Duration::from_millis(40), stream.next()).await;
        assert!(idle.is_err());

        source.set(-3.2);
        assert_eq!(stream.next().await, Some(-3));
    }

    #[test]
    fn test_corrected_now_adds_offset() {
        struct Frozen;
        impl Clock for Frozen {
            fn now(&self) -> f64 {
                1000.5
            }
        }
        assert_eq!(corrected_now(&Frozen, 30), 1030.5);
        assert_eq!(corrected_now(&Frozen, -1), 999.5);
    }
}
