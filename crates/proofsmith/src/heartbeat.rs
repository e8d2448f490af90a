//! Heartbeat decorator for slow stage calls.
//!
//! While a model call is in flight, a side task emits a `heartbeat` event
//! every 1.2 seconds so a streaming UI stays alive. The ticker has no
//! effect on pipeline correctness; what matters is that it is torn down
//! deterministically when the call settles, whether by success, failure, or
//! panic, so many concurrent requests cannot leak periodic timers. The
//! task handle is wrapped in [`AbortOnDropHandle`], which aborts the
//! ticker when the guard leaves scope for any reason.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant};
use tokio_util::task::AbortOnDropHandle;

use crate::events::{EventSink, StreamEvent};

/// Interval between heartbeat events. First tick fires after one full
/// interval, not immediately.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1200);

/// Run `work`, emitting periodic heartbeats for `stage` until it settles.
///
/// Skipped entirely when no sink is attached (background variants run
/// without one).
pub async fn with_heartbeat<T, F>(
    stage: &str,
    sink: Option<&Arc<dyn EventSink>>,
    work: F,
) -> T
where
    F: Future<Output = T>,
{
    let Some(sink) = sink else {
        return work.await;
    };

    let _guard = spawn_ticker(stage, Arc::clone(sink));
    work.await
}

fn spawn_ticker(stage: &str, sink: Arc<dyn EventSink>) -> AbortOnDropHandle<()> {
    let stage = stage.to_string();
    let started_at = Instant::now();
    AbortOnDropHandle::new(tokio::spawn(async move {
        let mut ticker = interval_at(started_at + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            sink.emit(StreamEvent::Heartbeat {
                stage: stage.clone(),
                elapsed_ms: started_at.elapsed().as_millis() as u64,
                message: format!("{stage} is still running..."),
            });
        }
    }))
}
