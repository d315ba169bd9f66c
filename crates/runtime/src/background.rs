//! Periodic background recovery
//!
//! A single thread invoking the recoverer at a fixed interval. The
//! recoverer's own reentrancy guard makes overlap with manually triggered
//! runs harmless.

use dtx_core::{Error, Result};
use dtx_recovery::Recoverer;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

/// Handle of the background recovery thread
pub struct BackgroundRecoverer {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundRecoverer {
    /// Spawn the recovery thread
    ///
    /// The first pass runs one interval after the start, not immediately;
    /// startup recovery is the embedding manager's explicit call.
    pub fn start(recoverer: Arc<Recoverer>, interval: Duration) -> Result<BackgroundRecoverer> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_stop = stop.clone();

        let handle = std::thread::Builder::new()
            .name("dtx-background-recovery".to_string())
            .spawn(move || {
                let (lock, condvar) = &*thread_stop;
                let mut stopped = lock.lock();
                loop {
                    if *stopped {
                        break;
                    }
                    let timeout = condvar.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    if timeout.timed_out() {
                        // run without holding the stop lock so stop() does
                        // not block behind a recovery pass
                        MutexGuard::unlocked(&mut stopped, || recoverer.run());
                    }
                }
                debug!("background recovery thread stopped");
            })
            .map_err(Error::from)?;

        Ok(BackgroundRecoverer {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread, waiting for an in-progress pass to finish
    pub fn stop(&mut self) {
        let (lock, condvar) = &*self.stop;
        *lock.lock() = true;
        condvar.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("background recovery thread panicked");
            }
        }
    }
}

impl Drop for BackgroundRecoverer {
    fn drop(&mut self) {
        self.stop();
    }
}
