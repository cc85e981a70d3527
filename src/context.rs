use std::{
    fmt,
    future::{self, Future},
    pin::Pin,
    task::Poll,
    time::Duration,
};

use tokio::{
    sync::watch,
    time::{sleep_until, Instant},
};

/// Why a [`Context`] is done.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// [`CancelHandle::cancel`] was called.
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("context canceled"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

/// Cancellation scope for a request and all of its retries.
///
/// A context ends either when its deadline passes or when the paired
/// [`CancelHandle`] fires. The default context never ends.
///
/// ```
/// use std::time::Duration;
/// use resilient_http::Context;
///
/// let (ctx, cancel) = Context::with_timeout(Duration::from_secs(5)).with_cancel();
/// cancel.cancel();
/// assert!(ctx.err().is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    /// Cancel signals of this context and every context it was derived from.
    cancelled: Vec<watch::Receiver<bool>>,
}

/// Cancels the [`Context`] it was created with, and every clone of it.
///
/// Dropping the handle does not cancel.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Context {
    /// A context that never ends.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that ends `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// A context that ends at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().deadline(deadline)
    }

    /// Derives a context ending `timeout` from now, or earlier if `self` does.
    pub fn timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.deadline(deadline)
    }

    /// Derives a context ending at `deadline`, or earlier if `self` does.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derives a cancellable context.
    ///
    /// The derived context keeps the deadline and cancel signals of `self`,
    /// so cancelling a parent also cancels it.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancelled.push(rx);
        (self, CancelHandle(tx))
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<CancelReason> {
        if self.cancelled.iter().any(|rx| *rx.borrow()) {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Completes once the context is done. Never completes for a background
    /// context.
    pub async fn done(&self) -> CancelReason {
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };

        let mut signals: Vec<CancelSignal> = self
            .cancelled
            .iter()
            .map(|rx| -> CancelSignal { Box::pin(wait_cancelled(rx.clone())) })
            .collect();
        let cancelled = future::poll_fn(move |cx| {
            for signal in signals.iter_mut() {
                if signal.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(());
                }
            }
            Poll::Pending
        });

        tokio::select! {
            biased;
            () = cancelled => CancelReason::Cancelled,
            () = deadline => CancelReason::DeadlineExceeded,
        }
    }
}

type CancelSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    let sender_dropped = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if sender_dropped {
        future::pending::<()>().await;
    }
}

fn far_future() -> Instant {
    // Roughly 30 years, same horizon tokio uses for unbounded sleeps.
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}
