//! Countdown for the break / delay / emergency banners.
//!
//! Each armed banner gets one task that ticks immediately and then once per
//! second, publishing the remaining seconds. When the countdown hits zero the
//! task clears the slot and its storage key, then exits. That is the only way
//! a banner expires; nothing re-checks with the server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::config::COUNTDOWN_TICK;
use crate::core_state::{BannerKind, CoreState, UiEvent};
use crate::storage::LocalStore;
use crate::task::BackgroundTask;

/// `max(0, floor((end - now) / 1s))`.
pub fn remaining_seconds(end: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (end - now).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms / 1000) as u64
    }
}

/// Share of the window still remaining, 0..=100.
pub fn progress_percent(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> u8 {
    let total = (end - start).num_milliseconds();
    if total <= 0 {
        return 0;
    }
    let remaining = (end - now).num_milliseconds().clamp(0, total);
    (remaining * 100 / total) as u8
}

/// `MM:SS`, minutes uncapped.
pub fn format_countdown(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Handle for one banner's countdown task.
///
/// Dropping the handle cancels the task.
pub struct CountdownTask {
    end_time: DateTime<Utc>,
    task: BackgroundTask,
}

impl CountdownTask {
    /// Start counting down `kind` towards `end_time`.
    pub fn spawn(
        kind: BannerKind,
        end_time: DateTime<Utc>,
        state: Arc<CoreState>,
        store: LocalStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let task = BackgroundTask::spawn("countdown", move |shutdown| {
            run_countdown(kind, end_time, state, store, clock, shutdown)
        });
        Self { end_time, task }
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run_countdown(
    kind: BannerKind,
    end_time: DateTime<Utc>,
    state: Arc<CoreState>,
    store: LocalStore,
    clock: Arc<dyn Clock>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(COUNTDOWN_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                // Slot cleared or re-armed elsewhere: this countdown is moot.
                match state.banner_end(kind) {
                    Ok(Some(end)) if end == end_time => {}
                    _ => break,
                }

                let remaining = remaining_seconds(end_time, clock.now());
                state.emit(UiEvent::Countdown { kind, remaining_seconds: remaining });

                if remaining == 0 {
                    match state.clear_banner_if(kind, end_time) {
                        Ok(true) => {
                            store.clear(kind.storage_key());
                            tracing::info!(%kind, "Banner expired");
                        }
                        Ok(false) => {}
                        Err(e) => tracing::debug!(%kind, error = %e, "Banner expiry skipped"),
                    }
                    break;
                }
            }
        }
    }
}
