//! Cooperative shutdown coordinator. The driver loop polls `should_stop`
//! once per iteration; the first Ctrl-C/SIGTERM fires an emergency-save
//! callback and flips the flag, a second one is ignored (the save is
//! already in flight and re-entering it would corrupt the artifact store).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    should_stop: Arc<AtomicBool>,
    saving: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            should_stop: Arc::new(AtomicBool::new(false)),
            saving: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    /// Spawn a background task that waits for Ctrl-C (and SIGTERM on unix),
    /// running `on_signal` exactly once no matter how many signals arrive.
    pub fn install<F, Fut>(&self, on_signal: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let should_stop = self.should_stop.clone();
        let saving = self.saving.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            if saving.swap(true, Ordering::SeqCst) {
                warn!("second shutdown signal received while saving; ignoring");
                return;
            }
            should_stop.store(true, Ordering::SeqCst);
            info!("shutdown signal received, running emergency save");
            on_signal().await;
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn should_stop_is_false_until_signaled() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.should_stop());
    }

    #[tokio::test]
    async fn reentrancy_guard_only_fires_once() {
        let saving = Arc::new(AtomicBool::new(false));
        assert!(!saving.swap(true, Ordering::SeqCst));
        assert!(saving.swap(true, Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
</content>
