use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use crate::model::ReportId;
use crate::sync_controller::{PollOutcome, SyncController};

/// Owns a background status poll. Dropping the handle cancels the poll.
#[derive(Debug)]
pub struct PollHandle {
    report_id: ReportId,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn report_id(&self) -> ReportId {
        self.report_id
    }

    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the poll to end. Returns `false` if it was cancelled.
    pub async fn join(mut self) -> bool {
        match self.task.take() {
            Some(task) => task.await.is_ok(),
            None => false,
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Polls `id` immediately, then every `interval` plus jitter, until the
/// report leaves the in-progress statuses.
pub fn spawn_status_poll(controller: Arc<SyncController>, id: ReportId, interval: Duration) -> PollHandle {
    let max_jitter_ms = controller.config().poll_jitter_ms;
    let span = tracing::info_span!("status_poll", report_id = %id);

    let task = tokio::spawn(
        async move {
            let mut ticks: u32 = 0;
            loop {
                ticks = ticks.saturating_add(1);
                if controller.poll_tick(id).await == PollOutcome::Finished {
                    break;
                }
                let delay = interval + jitter(max_jitter_ms);
                tokio::time::sleep(delay).await;
            }
            debug!(ticks, "status polling finished");
        }
        .instrument(span),
    );

    PollHandle {
        report_id: id,
        task: Some(task),
    }
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
