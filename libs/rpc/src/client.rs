use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::call::{self, Call, Completions, Done, Pending, DEFAULT_DONE_CAPACITY};
use crate::codec::{ClientCodec, FramedCodec, Request, RequestWriter, ResponseReader};
use crate::error::{Error, Result};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A registered call with its argument and reply types erased
trait Waiter<Rd>: Send {
    /// Read the reply body into the call, then complete it
    ///
    /// Failing to decode the body only fails this call.
    fn receive<'a>(self: Box<Self>, reader: &'a mut Rd) -> BoxFuture<'a, ()>;

    fn fail(self: Box<Self>, error: Error);
}

impl<A, R, Rd> Waiter<Rd> for Pending<A, R>
where
    A: Send + Sync + 'static,
    R: DeserializeOwned + Send + 'static,
    Rd: ResponseReader,
{
    fn receive<'a>(self: Box<Self>, reader: &'a mut Rd) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match reader.read_response_body::<R>().await {
                Ok(reply) => Pending::succeed(*self, reply),
                Err(e) => Pending::fail(*self, Error::ReadingBody(Box::new(e))),
            }
        })
    }

    fn fail(self: Box<Self>, error: Error) {
        Pending::fail(*self, error)
    }
}

struct State<Rd> {
    pending: HashMap<u64, Box<dyn Waiter<Rd>>>,
    next_seq: u64,
    /// Set by the receiver once the connection is dead
    shutdown: bool,
    /// Set by `close`; an end of stream after this is expected
    closing: bool,
}

struct Inner<C: ClientCodec> {
    state: Mutex<State<C::Reader>>,
    /// Serializes requests on the connection; never taken while `state` is held
    writer: tokio::sync::Mutex<C::Writer>,
    /// Cancelled by `close`; interrupts the receiver and any in-flight write
    closed: CancellationToken,
    /// Runtime the client was created on; writer tasks are spawned here
    runtime: Handle,
}

/// RPC client multiplexing many concurrent calls over one connection
///
/// Cloning is cheap and every clone drives the same connection. Each call
/// gets its own sequence number and responses are matched back to calls by
/// it, in whatever order they arrive.
pub struct Client<C: ClientCodec = FramedCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: ClientCodec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ClientCodec> Client<C> {
    /// Create a client speaking `codec` and start its receiver task
    ///
    /// Must be called from within a Tokio runtime. The client can then be
    /// used from any thread; its background tasks stay on that runtime.
    pub fn with_codec(codec: C) -> Self {
        let runtime = Handle::current();
        let (reader, writer) = codec.split();
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                pending: HashMap::new(),
                next_seq: 0,
                shutdown: false,
                closing: false,
            }),
            writer: tokio::sync::Mutex::new(writer),
            closed: CancellationToken::new(),
            runtime,
        });

        inner.runtime.spawn(receive_loop(Arc::clone(&inner), reader));

        Self { inner }
    }

    /// Start a call and return the channel its outcome will arrive on
    ///
    /// Never waits on the network; the request is written by a background
    /// task.
    pub fn go<A, R>(&self, service_method: impl Into<String>, args: A) -> Completions<A, R>
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let (done, completions) = call::channel(DEFAULT_DONE_CAPACITY);
        self.send(Call::new(service_method.into(), args), done);
        completions
    }

    /// Start a call that reports to a caller-owned completion channel
    pub fn go_with<A, R>(&self, service_method: impl Into<String>, args: A, done: &Done<A, R>)
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        self.send(Call::new(service_method.into(), args), done.clone());
    }

    /// Invoke a method and wait for its reply
    pub async fn call<A, R>(&self, service_method: impl Into<String>, args: A) -> Result<R>
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        if self.is_shut_down_or_closing() {
            return Err(Error::Shutdown);
        }

        let (done, mut completions) = call::channel(1);
        self.send(Call::new(service_method.into(), args), done);

        match completions.recv().await {
            Some(call) => call.into_result(),
            None => Err(Error::Shutdown),
        }
    }

    /// Close the connection
    ///
    /// Every call still waiting is failed with [`Error::Shutdown`], including
    /// one whose request is stuck behind a peer that stopped reading. Returns
    /// [`Error::Shutdown`] if the client was already closed or the
    /// connection already failed.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.shutdown || state.closing {
                return Err(Error::Shutdown);
            }
            state.closing = true;
        }

        // Writers holding the lock give it up once they see the cancellation
        self.inner.closed.cancel();
        self.inner.writer.lock().await.close().await
    }

    /// Whether the receiver has stopped and no more calls will succeed
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    fn is_shut_down_or_closing(&self) -> bool {
        let state = self.inner.state.lock();
        state.shutdown || state.closing
    }

    /// Register the call and hand its request to a writer task
    fn send<A, R>(&self, mut call: Call<A, R>, done: Done<A, R>)
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let request = {
            let mut state = self.inner.state.lock();
            if state.shutdown || state.closing {
                drop(state);
                Pending::new(call, done).fail(Error::Shutdown);
                return;
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            call.assign_seq(seq);

            let request = (
                Request {
                    service_method: call.service_method.clone(),
                    seq,
                },
                Arc::clone(&call.args),
            );
            state.pending.insert(seq, Box::new(Pending::new(call, done)));
            request
        };

        let (request, args) = request;
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(inner.write_request(request, args));
    }
}

impl<C: ClientCodec> Inner<C> {
    async fn write_request<A>(self: Arc<Self>, request: Request, args: Arc<A>)
    where
        A: Serialize + Send + Sync + 'static,
    {
        let written = {
            let mut writer = self.writer.lock().await;
            let closed = {
                let state = self.state.lock();
                state.closing || state.shutdown
            };
            if closed {
                // Registered before `close`; the connection is not written to again
                Err(Error::Shutdown)
            } else {
                tokio::select! {
                    biased;
                    _ = self.closed.cancelled() => Err(Error::Shutdown),
                    written = writer.write_request(&request, &*args) => written,
                }
            }
        };

        if let Err(error) = written {
            // Gone already if the receiver matched a response or drained the table
            let waiter = self.state.lock().pending.remove(&request.seq);
            if let Some(waiter) = waiter {
                waiter.fail(error);
            }
        }
    }
}

async fn receive_loop<C: ClientCodec>(inner: Arc<Inner<C>>, mut reader: C::Reader) {
    let error = loop {
        let header = tokio::select! {
            biased;
            _ = inner.closed.cancelled() => Err(Error::Eof),
            header = reader.read_response_header() => header,
        };
        let response = match header {
            Ok(response) => response,
            Err(e) => break e,
        };

        let waiter = inner.state.lock().pending.remove(&response.seq);
        let Some(waiter) = waiter else {
            tracing::debug!(seq = response.seq, "response for unknown call");
            if let Err(e) = reader.discard_response_body().await {
                break e;
            }
            continue;
        };

        match response.remote_error() {
            None => waiter.receive(&mut reader).await,
            Some(message) => {
                // The body still has to be consumed to keep the stream aligned
                let discarded = reader.discard_response_body().await;
                waiter.fail(Error::Server(message.to_string()));
                if let Err(e) = discarded {
                    break Error::ReadingErrorBody(Box::new(e));
                }
            }
        }
    };

    let (error, expected, pending) = {
        let mut state = inner.state.lock();
        let (error, expected) = match error {
            Error::Eof if state.closing => (Error::Shutdown, true),
            Error::Eof => (Error::UnexpectedEof, false),
            error => (error, false),
        };
        state.shutdown = true;
        (error, expected, std::mem::take(&mut state.pending))
    };

    // `shutdown` is set, so nothing can be registered behind the drain
    for waiter in pending.into_values() {
        waiter.fail(error.clone());
    }

    if !expected {
        tracing::warn!(error = %error, "rpc client protocol error");
    }
}
