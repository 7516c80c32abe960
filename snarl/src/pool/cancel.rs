use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};

use snarl_api::errors::PoolError;

/// Cooperative cancellation signal shared by a pool and its running tasks.
///
/// Firing the token drops the only sender of an internal channel, which wakes
/// every receiver blocked in [`CancellationToken::sleep`] at once. That is
/// what turns a deliberate hold into an interruptible one.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (trigger, signal) = flume::bounded(0);
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Fire the token. Returns `true` only for the call that fired it.
    pub fn cancel(&self) -> bool {
        let already = self.inner.cancelled.swap(true, Ordering::SeqCst);
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        !already
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(TaskCancelled)` once the token has fired.
    pub fn checkpoint(&self) -> Result<(), PoolError> {
        if self.is_cancelled() {
            Err(PoolError::TaskCancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `TaskCancelled` if the token
    /// fires in the meantime.
    pub fn sleep(&self, duration: Duration) -> Result<(), PoolError> {
        self.checkpoint()?;
        match self.inner.signal.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => Ok(()),
            // Nothing is ever sent; any wake-up is the sender going away.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Err(PoolError::TaskCancelled),
        }
    }
}
