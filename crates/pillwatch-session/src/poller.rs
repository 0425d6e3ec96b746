use std::{future::Future, ops::ControlFlow};

use tokio::{
    task::JoinHandle,
    time::{interval_at, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to the single fixed-period polling task of a session.
pub(crate) struct Poller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    /// The first tick fires one full `period` after spawning.
    pub(crate) fn spawn<F, Fut>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if on_tick(loop_token.clone()).await.is_break() {
                            break;
                        }
                    }
                }
            }
            debug!("polling loop exited");
        });
        Self { token, handle }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Takes effect immediately: a cycle already in flight checks the token before
    /// applying anything.
    pub(crate) fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let poller = Poller::spawn(Duration::from_millis(5), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });
        assert!(poller.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        poller.stop();
        assert!(!poller.is_running());
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn break_ends_the_loop() {
        let poller = Poller::spawn(Duration::from_millis(1), |_| async { ControlFlow::Break(()) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!poller.is_running());
    }
}
