use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Outcome of racing a future against a timer.
///
/// Running out of time is not an error, it's a sentinel. Callers decide what
/// "no value yet" means for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raced<O> {
    /// The future resolved before the timer fired.
    Completed(O),
    /// The timer fired first.
    TimedOut,
}
impl<O> Raced<O> {
    pub fn completed(self) -> Option<O> {
        match self {
            Self::Completed(value) => Some(value),
            Self::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

pin_project! {
    /// Future returned by [`deadline`].
    #[must_use = "futures do nothing unless polled"]
    pub struct Deadline<F, T> {
        #[pin]
        future: F,
        #[pin]
        timer: T,
    }
}

/// Race `future` against `timer`.
///
/// The future is polled first, so a future and timer that become ready
/// during the same wake-up resolve as [`Raced::Completed`].
///
/// Pass the future by `&mut` (it must be [`Unpin`], e.g. a
/// `tokio::task::JoinHandle`) to keep it alive after losing the race:
///
/// ```
/// use stowaway_asyncutils::{Raced, deadline};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut slow = Box::pin(async {
///     tokio::time::sleep(Duration::from_millis(50)).await;
///     "late"
/// });
/// let raced = deadline(&mut slow, tokio::time::sleep(Duration::from_millis(1))).await;
/// assert_eq!(raced, Raced::TimedOut);
/// // Still usable.
/// assert_eq!(slow.await, "late");
/// # }
/// ```
pub fn deadline<F, T>(future: F, timer: T) -> Deadline<F, T>
where
    F: Future,
    T: Future,
{
    Deadline { future, timer }
}

impl<F, T> Future for Deadline<F, T>
where
    F: Future,
    T: Future,
{
    type Output = Raced<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(value) = this.future.poll(cx) {
            return Poll::Ready(Raced::Completed(value));
        }
        match this.timer.poll(cx) {
            Poll::Ready(_) => Poll::Ready(Raced::TimedOut),
            Poll::Pending => Poll::Pending,
        }
    }
}
