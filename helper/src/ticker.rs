//! Background ticker modelling internal events.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::ClockState;

/// Apply the tick rule every `period` until `cancel` fires.
///
/// The first tick happens immediately. Cancellation only stops future ticks;
/// a tick already inside its critical section always completes.
pub async fn run_ticker(clock: Arc<ClockState>, period: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(period_ms = period.as_millis() as u64, "ticker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                clock.apply_tick();
            }
        }
    }

    debug!(clock = clock.snapshot(), "ticker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Observer;

    fn clock() -> Arc<ClockState> {
        Arc::new(ClockState::new(Observer::new("ticker", 16)))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let c = clock();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_ticker(Arc::clone(&c), Duration::from_secs(1), cancel.clone()));

        // ticks at t = 0, 1, 2, 3
        time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(c.snapshot(), 4);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_after_cancel() {
        let c = clock();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_ticker(Arc::clone(&c), Duration::from_secs(1), cancel.clone()));

        time::sleep(Duration::from_millis(1_500)).await;
        cancel.cancel();
        handle.await.unwrap();
        let stopped_at = c.snapshot();

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(c.snapshot(), stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_never_ticks() {
        let c = clock();
        let cancel = CancellationToken::new();
        cancel.cancel();
        run_ticker(Arc::clone(&c), Duration::from_secs(1), cancel).await;
        assert_eq!(c.snapshot(), 0);
    }
}
