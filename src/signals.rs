// Process interruption for long-running jobs

use crate::error::{LaunchpadError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Shared flag raised once SIGINT or SIGTERM arrives
///
/// Work loops poll it between units of work; nothing is cancelled mid-call.
#[derive(Clone, Default, Debug)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a watcher thread that raises this flag on SIGINT/SIGTERM
    pub fn watch_signals(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LaunchpadError::Io {
                source: e,
                context: "Failed to build signal runtime".to_string(),
            })?;

        #[cfg(unix)]
        let (mut sigterm, mut sigint) = {
            let _guard = runtime.enter();
            let sigterm = signal(SignalKind::terminate()).map_err(|e| LaunchpadError::Io {
                source: e,
                context: "Failed to setup SIGTERM handler".to_string(),
            })?;
            let sigint = signal(SignalKind::interrupt()).map_err(|e| LaunchpadError::Io {
                source: e,
                context: "Failed to setup SIGINT handler".to_string(),
            })?;
            (sigterm, sigint)
        };

        let raised = self.clone();
        thread::Builder::new()
            .name("launchpad-signals".to_string())
            .spawn(move || {
                #[cfg(unix)]
                runtime.block_on(async {
                    tokio::select! {
                        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                        _ = sigint.recv() => tracing::info!("Received SIGINT"),
                    }
                });
                #[cfg(not(unix))]
                runtime.block_on(async {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Received Ctrl-C");
                    }
                });
                tracing::warn!("Interrupt requested; finishing current step");
                raised.set();
            })
            .map_err(|e| LaunchpadError::Io {
                source: e,
                context: "Failed to spawn signal thread".to_string(),
            })?;

        Ok(())
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless interrupted first; true when interrupted
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = InterruptFlag::new();
        let other = flag.clone();
        assert!(!other.is_set());
        flag.set();
        assert!(other.is_set());
    }

    #[test]
    fn test_sleep_returns_early_when_interrupted() {
        let flag = InterruptFlag::new();
        flag.set();
        let started = Instant::now();
        assert!(flag.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_runs_to_deadline() {
        let flag = InterruptFlag::new();
        assert!(!flag.sleep(Duration::from_millis(10)));
    }
}
