use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{Error, Result};

/// Buffer allocated for the completion channel of [`Client::go`](crate::Client::go)
pub const DEFAULT_DONE_CAPACITY: usize = 10;

/// One invocation and, once delivered through its completion channel, its
/// outcome
#[derive(Debug)]
pub struct Call<A, R> {
    /// Format: "Service.Method"
    pub service_method: String,
    pub args: Arc<A>,
    /// Set when the call succeeded
    pub reply: Option<R>,
    /// Set when the call failed
    pub error: Option<Error>,
    seq: Option<u64>,
}

impl<A, R> Call<A, R> {
    pub(crate) fn new(service_method: String, args: A) -> Self {
        Self {
            service_method,
            args: Arc::new(args),
            reply: None,
            error: None,
            seq: None,
        }
    }

    /// Sequence number the call went out with
    ///
    /// `None` if the client was already shut down and nothing was sent.
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub(crate) fn assign_seq(&mut self, seq: u64) {
        debug_assert!(self.seq.is_none(), "seq assigned twice");
        self.seq = Some(seq);
    }

    /// Collapse the outcome into the reply or the error
    pub fn into_result(self) -> Result<R> {
        match (self.error, self.reply) {
            (Some(error), _) => Err(error),
            (None, Some(reply)) => Ok(reply),
            (None, None) => Err(Error::Shutdown),
        }
    }
}

/// Sending side of a completion channel
///
/// Clone it to share one channel between many calls. The channel must have
/// room for every call that can complete before the owner gets around to
/// receiving; completions that find it full are dropped.
pub struct Done<A, R> {
    tx: mpsc::Sender<Call<A, R>>,
}

impl<A, R> Clone for Done<A, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A, R> Done<A, R> {
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Hand a finished call to its owner without ever waiting
    pub(crate) fn signal(&self, call: Call<A, R>) {
        match self.tx.try_send(call) {
            Ok(()) => {}
            Err(TrySendError::Full(call)) => {
                tracing::debug!(
                    seq = ?call.seq,
                    service_method = %call.service_method,
                    "completion channel full, dropping call"
                );
            }
            // Nobody is listening any more
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Receiving side of a completion channel
pub struct Completions<A, R> {
    rx: mpsc::Receiver<Call<A, R>>,
}

impl<A, R> Completions<A, R> {
    /// Wait for the next finished call
    ///
    /// Returns `None` once every [`Done`] handle, including the ones held by
    /// outstanding calls, is gone and the buffer is empty.
    pub async fn recv(&mut self) -> Option<Call<A, R>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Call<A, R>> {
        self.rx.try_recv().ok()
    }
}

/// Create a completion channel buffering up to `capacity` finished calls
///
/// An unbuffered channel would make every completion a race with the
/// receiver, so a capacity of zero is rejected.
pub fn completion<A, R>(capacity: usize) -> Result<(Done<A, R>, Completions<A, R>)> {
    if capacity == 0 {
        return Err(Error::UnbufferedDone);
    }
    Ok(channel(capacity))
}

pub(crate) fn channel<A, R>(capacity: usize) -> (Done<A, R>, Completions<A, R>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Done { tx }, Completions { rx })
}

/// A call registered with the client, waiting for its response
pub(crate) struct Pending<A, R> {
    pub(crate) call: Call<A, R>,
    pub(crate) done: Done<A, R>,
}

impl<A, R> Pending<A, R> {
    pub(crate) fn new(call: Call<A, R>, done: Done<A, R>) -> Self {
        Self { call, done }
    }

    pub(crate) fn succeed(mut self, reply: R) {
        self.call.reply = Some(reply);
        self.finish();
    }

    pub(crate) fn fail(mut self, error: Error) {
        self.call.error = Some(error);
        self.finish();
    }

    fn finish(self) {
        let Self { call, done } = self;
        done.signal(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        let result = completion::<u32, u32>(0);
        assert!(matches!(result, Err(Error::UnbufferedDone)));
    }

    #[tokio::test]
    async fn full_channel_drops_completion() {
        let (done, mut completions) = completion::<u32, u32>(1).unwrap();

        Pending::new(Call::new("A.B".into(), 1), done.clone()).succeed(10);
        Pending::new(Call::new("A.B".into(), 2), done.clone()).succeed(20);
        drop(done);

        let first = completions.recv().await.unwrap();
        assert_eq!(*first.args, 1);
        assert_eq!(first.into_result().unwrap(), 10);
        assert!(completions.recv().await.is_none());
    }

    #[test]
    fn error_wins_over_reply() {
        let mut call: Call<(), u32> = Call::new("A.B".into(), ());
        call.reply = Some(1);
        call.error = Some(Error::Server("boom".into()));
        assert!(matches!(call.into_result(), Err(Error::Server(msg)) if msg == "boom"));
    }
}
