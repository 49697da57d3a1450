//! Turns bursts of change notifications into single pipeline passes.
//!
//! One pending timer, restarted by every notification. When it fires the
//! pass starts unless one is already running, in which case the firing is
//! dropped. A started pass always runs to completion.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(300);

#[async_trait]
pub trait Pass: Send + Sync + 'static {
    async fn run(&self);
}

pub type FeedbackHook = Arc<dyn Fn() + Send + Sync>;

pub struct Debouncer {
    delay: Duration,
    pass: Arc<dyn Pass>,
    feedback: Option<FeedbackHook>,
    pending: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Debouncer {
    pub fn new(delay: Duration, pass: Arc<dyn Pass>) -> Self {
        Self {
            delay,
            pass,
            feedback: None,
            pending: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_feedback(mut self, hook: FeedbackHook) -> Self {
        self.feedback = Some(hook);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Handle one raw notification. Must be called within a tokio runtime.
    pub fn notify(&self) {
        if let Some(hook) = &self.feedback {
            hook();
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = pending.take() {
            timer.abort();
        }
        let delay = self.delay;
        let pass = self.pass.clone();
        let running = self.running.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("capture pass still running; dropping clipboard change");
                return;
            }
            // Detached so that restarting the timer cannot cancel the pass.
            tokio::spawn(async move {
                let _guard = RunningGuard(running);
                pass.run().await;
            });
        }));
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(timer) = self.pending.get_mut().ok().and_then(|p| p.take()) {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        busy_for: Duration,
    }

    #[async_trait]
    impl Pass for Counting {
        async fn run(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            if !self.busy_for.is_zero() {
                tokio::time::sleep(self.busy_for).await;
            }
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_runs_once() {
        let pass = Arc::new(Counting::default());
        let hooks = Arc::new(AtomicUsize::new(0));
        let h = hooks.clone();
        let d = Debouncer::new(DEFAULT_DELAY, pass.clone()).with_feedback(Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        for _ in 0..5 {
            d.notify();
            tokio::time::sleep(ms(50)).await;
        }
        assert_eq!(hooks.load(Ordering::SeqCst), 5);
        assert_eq!(pass.started.load(Ordering::SeqCst), 0);
        tokio::time::sleep(ms(1000)).await;
        assert_eq!(pass.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_notifications_each_run() {
        let pass = Arc::new(Counting::default());
        let d = Debouncer::new(DEFAULT_DELAY, pass.clone());
        for _ in 0..3 {
            d.notify();
            tokio::time::sleep(ms(400)).await;
        }
        assert_eq!(pass.started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn firing_during_pass_is_dropped() {
        let pass = Arc::new(Counting {
            busy_for: ms(2000),
            ..Default::default()
        });
        let d = Debouncer::new(DEFAULT_DELAY, pass.clone());
        d.notify();
        tokio::time::sleep(ms(400)).await;
        assert!(d.is_running());
        d.notify();
        tokio::time::sleep(ms(400)).await;
        tokio::time::sleep(ms(3000)).await;
        assert_eq!(pass.started.load(Ordering::SeqCst), 1);
        assert!(!d.is_running());

        d.notify();
        tokio::time::sleep(ms(400)).await;
        assert_eq!(pass.started.load(Ordering::SeqCst), 2);
    }
}
