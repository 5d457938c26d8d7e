//! The single-worker executor: thread-safe submission, batched handoff,
//! cancellation and response polling around one bottlenecked worker thread.
//!
//! Many producer threads call [`SingleThreadExecutor::queue_request`] and get
//! back opaque [`Token`]s. A single dedicated worker thread drains the
//! producer-facing queue in batches, hands the items to a user-supplied
//! [`RequestHandler`], and publishes the responses back where producers can
//! pick them up with [`SingleThreadExecutor::poll_response`] or discard them
//! through TTL cleanup.
//!
//! State is split across three locks:
//!
//! - the **external** lock guards everything producers touch (queue, request
//!   data, responses, cancellation marks, token lifecycle);
//! - the **internal** lock guards the worker-local mirror of queue, request
//!   data and responses; it is only taken by the worker thread and the
//!   transfer paths it runs;
//! - the **status** lock owns the worker thread handle; the `running` flag
//!   beside it is atomic so the worker loop and `is_running` never contend
//!   with a blocking `stop`.
//!
//! No code path holds both the external and the internal lock at once, and
//! user code only ever runs under the internal lock. Handler implementations
//! must not call back into `queue_request` or `poll_response` of their own
//! executor from inside [`RequestHandler::handle_requests`].
//!
//! # Example
//!
//! ```no_run
//! use turnstile_core::{
//!     ExecutorConfig, Request, RequestBatch, RequestHandler, Response, SingleThreadExecutor,
//! };
//!
//! /// Drives some resource that tolerates only one concurrent user.
//! struct Uppercaser;
//!
//! impl RequestHandler for Uppercaser {
//!     type Payload = String;
//!     type Output = String;
//!     type State = u64;
//!
//!     fn handle_requests(&mut self, batch: &mut RequestBatch<'_, String, String, u64>) {
//!         for token in batch.tokens() {
//!             let upper = batch.request(&token).map(|req| req.payload().to_uppercase());
//!             if let Some(upper) = upper {
//!                 let _ = batch.accept(&token, Response::success(upper));
//!             }
//!         }
//!     }
//! }
//!
//! let executor = SingleThreadExecutor::new(Uppercaser);
//! executor.start(true);
//!
//! let token = executor
//!     .queue_request(Request::with_state("hello".to_string(), 42))
//!     .expect("pool has capacity");
//!
//! let response = loop {
//!     if let Some(response) = executor.poll_response(&token) {
//!         break response;
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! };
//! assert_eq!(response.result(), Some(&"HELLO".to_string()));
//! assert_eq!(response.static_state(), Some(&42));
//!
//! executor.stop(true);
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;

use crate::error::ExecutorError;
use crate::logging::{PerfSpan, targets};
use crate::request::{Request, Response};
use crate::token::{Token, TokenGenerator};

/// How often (in worker iterations) the periodic TTL cleanup runs.
const CLEANUP_EVERY_ITERS: u64 = 10;

/// Configuration for a [`SingleThreadExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Time the worker sleeps between iterations, minus the time the
    /// iteration itself took.
    pub loop_sleep: Duration,
    /// How long an unpolled response may idle before TTL cleanup discards it.
    pub old_cleanup_time: Duration,
    /// Cap on the combined population of pending requests and unpolled
    /// responses. Submissions beyond it fail with
    /// [`ExecutorError::PoolFull`].
    pub max_handle_requests_and_responses: usize,
    /// Name for the worker thread.
    pub thread_name: String,
    /// Stack size for the worker thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            loop_sleep: Duration::from_millis(100),
            old_cleanup_time: Duration::from_secs(300),
            max_handle_requests_and_responses: 1000,
            thread_name: "turnstile-worker".to_string(),
            stack_size: None,
        }
    }
}

impl ExecutorConfig {
    /// Create a configuration with the given worker thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            thread_name: name.into(),
            ..Default::default()
        }
    }
}

/// The user-supplied side of an executor.
///
/// The four operations all run on the worker thread, never concurrently with
/// each other. `handle_requests` and `handle_cancel` run under the internal
/// lock; implementations must not call back into the owning executor's
/// `queue_request`/`poll_response` from there.
///
/// `handle_requests` must not panic: report per-item failures through
/// [`RequestBatch::reject`] instead. A panic escaping it is treated as fatal
/// and stops the executor.
pub trait RequestHandler: Send {
    /// The domain payload carried by requests.
    type Payload: Send + 'static;
    /// The domain result carried by successful responses.
    type Output: Send + 'static;
    /// The static state carried from each request to its response.
    type State: Send + 'static;

    /// Set up resources when the worker thread starts.
    ///
    /// Returning `false` aborts the run; the executor shuts itself down.
    fn initialize(&mut self) -> bool {
        true
    }

    /// Release resources when the worker thread exits. Always called, even
    /// after a fatal handler error.
    fn shutdown(&mut self) {}

    /// Process the currently queued requests.
    ///
    /// Invoked once per worker iteration with a [`RequestBatch`] exposing a
    /// snapshot of the queue. The implementation may resolve zero or more
    /// items per call; unresolved items stay queued and reappear in the next
    /// batch.
    fn handle_requests(
        &mut self,
        batch: &mut RequestBatch<'_, Self::Payload, Self::Output, Self::State>,
    );

    /// A queued request is being cancelled; release anything held for it.
    ///
    /// Only called for requests that already reached the worker. The
    /// cancelled response is produced by the executor after this returns.
    fn handle_cancel(&mut self, token: &Token, request: &Request<Self::Payload, Self::State>) {
        let _ = (token, request);
    }
}

type BoxedHandler<P, R, S> = Box<dyn RequestHandler<Payload = P, Output = R, State = S>>;

/// Producer-facing state, guarded by the external lock.
struct ExternalState<P, R, S> {
    queue: Vec<Token>,
    request_data: HashMap<Token, Request<P, S>>,
    responses: HashMap<Token, Response<R, S>>,
    cancel_requests: Vec<Token>,
    /// Timestamp of the last lifecycle action per token. The key set is the
    /// authoritative set of tokens the executor knows about, pending and
    /// responded alike.
    lifecycle: HashMap<Token, Instant>,
    token_gen: TokenGenerator,
}

impl<P, R, S> ExternalState<P, R, S> {
    fn new() -> Self {
        Self {
            queue: Vec::new(),
            request_data: HashMap::new(),
            responses: HashMap::new(),
            cancel_requests: Vec::new(),
            lifecycle: HashMap::new(),
            token_gen: TokenGenerator::new(),
        }
    }
}

/// Worker-local state, guarded by the internal lock.
struct InternalState<P, R, S> {
    queue: Vec<Token>,
    request_data: HashMap<Token, Request<P, S>>,
    responses: HashMap<Token, Response<R, S>>,
}

impl<P, R, S> Default for InternalState<P, R, S> {
    fn default() -> Self {
        Self {
            queue: Vec::new(),
            request_data: HashMap::new(),
            responses: HashMap::new(),
        }
    }
}

/// The batch of queued requests handed to [`RequestHandler::handle_requests`].
///
/// `tokens()` is a snapshot taken at the start of the call; `accept` and
/// `reject` resolve items against the live queue, so iterating the snapshot
/// stays valid while items are resolved. A token resolved earlier in the
/// same call is simply gone: `request` returns `None` for it and a second
/// `accept`/`reject` reports [`ExecutorError::AlreadyResolved`].
///
/// Request references obtained from `request` must not be retained past the
/// `handle_requests` call.
pub struct RequestBatch<'a, P, R, S> {
    tokens: Vec<Token>,
    state: &'a mut InternalState<P, R, S>,
}

impl<P, R, S> RequestBatch<'_, P, R, S> {
    /// The queued tokens in submission order, snapshotted at batch start.
    pub fn tokens(&self) -> Vec<Token> {
        self.tokens.clone()
    }

    /// Number of tokens in the snapshot.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Borrow the request data for a still-unresolved token.
    pub fn request(&self, token: &Token) -> Option<&Request<P, S>> {
        self.state.request_data.get(token)
    }

    /// Resolve a request with the given response.
    ///
    /// This must be the last thing done for the token: the request is
    /// removed and its static state moves onto the response.
    pub fn accept(&mut self, token: &Token, mut response: Response<R, S>) -> crate::Result<()> {
        let pos = self
            .state
            .queue
            .iter()
            .position(|queued| queued == token)
            .ok_or(ExecutorError::AlreadyResolved)?;
        self.state.queue.remove(pos);
        let mut request = self
            .state
            .request_data
            .remove(token)
            .ok_or(ExecutorError::AlreadyResolved)?;
        response.set_static_state(request.take_static_state());
        self.state.responses.insert(token.clone(), response);
        Ok(())
    }

    /// Resolve a request with an error response carrying `reason`.
    pub fn reject(&mut self, token: &Token, reason: impl Into<String>) -> crate::Result<()> {
        self.accept(token, Response::error(reason))
    }
}

/// State shared between the producer-facing handle and the worker thread.
struct ExecutorInner<P, R, S>
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    config: ExecutorConfig,
    handler: Mutex<BoxedHandler<P, R, S>>,
    external: Mutex<ExternalState<P, R, S>>,
    internal: Mutex<InternalState<P, R, S>>,
    status: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    iter_count: AtomicU64,
}

/// An executor that funnels concurrent requests through one worker thread.
///
/// Producers submit from any thread; the worker processes batches
/// sequentially on its own dedicated thread. See the [module
/// docs](self) for the full lifecycle.
pub struct SingleThreadExecutor<P, R, S>
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    inner: Arc<ExecutorInner<P, R, S>>,
}

static_assertions::assert_impl_all!(SingleThreadExecutor<(), (), ()>: Send, Sync);

impl<P, R, S> SingleThreadExecutor<P, R, S>
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    /// Create an executor with default configuration.
    ///
    /// The worker thread does not start until [`start`](Self::start).
    pub fn new<H>(handler: H) -> Self
    where
        H: RequestHandler<Payload = P, Output = R, State = S> + 'static,
    {
        Self::with_config(handler, ExecutorConfig::default())
    }

    /// Create an executor with custom configuration.
    pub fn with_config<H>(handler: H, config: ExecutorConfig) -> Self
    where
        H: RequestHandler<Payload = P, Output = R, State = S> + 'static,
    {
        Self {
            inner: Arc::new(ExecutorInner {
                config,
                handler: Mutex::new(Box::new(handler)),
                external: Mutex::new(ExternalState::new()),
                internal: Mutex::new(InternalState::default()),
                status: Mutex::new(None),
                running: AtomicBool::new(false),
                iter_count: AtomicU64::new(0),
            }),
        }
    }

    /// The executor's configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Start the worker thread.
    ///
    /// Idempotent: starting a running executor is a no-op returning `None`.
    /// With `wait_for_init` the call blocks until
    /// [`RequestHandler::initialize`] has returned and yields its success.
    pub fn start(&self, wait_for_init: bool) -> Option<bool> {
        let init_rx = {
            let mut status = self.inner.status.lock();
            if self.inner.running.load(Ordering::Acquire) {
                return None;
            }
            // A handle left behind by a previous run is finished or about to
            // finish; reap it so the new worker can take the handler lock.
            if let Some(stale) = status.take() {
                let _ = stale.join();
            }

            self.inner.running.store(true, Ordering::Release);
            let (init_tx, init_rx) = bounded::<bool>(1);
            let inner = Arc::clone(&self.inner);
            let mut builder = thread::Builder::new().name(self.inner.config.thread_name.clone());
            if let Some(stack_size) = self.inner.config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let handle = builder
                .spawn(move || run_worker(inner, init_tx))
                .expect("Failed to spawn executor worker thread");
            *status = Some(handle);
            tracing::info!(target: targets::EXECUTOR, "executor thread started");
            init_rx
        };

        if wait_for_init {
            match init_rx.recv() {
                Ok(success) => Some(success),
                Err(_) => Some(false),
            }
        } else {
            None
        }
    }

    /// Stop the worker thread gracefully.
    ///
    /// Idempotent, and safe from any thread including the worker itself
    /// (self-join is skipped). With `await_thread_stop` the call blocks
    /// until the worker has run [`RequestHandler::shutdown`] and exited.
    pub fn stop(&self, await_thread_stop: bool) {
        self.inner.stop(await_thread_stop);
    }

    /// Whether the worker loop is (still) scheduled to run.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Queue a request for execution, returning its token.
    ///
    /// Fails with [`ExecutorError::PoolFull`] when the combined pending and
    /// unpolled-response population has reached the configured cap. Safe
    /// from any thread.
    pub fn queue_request(&self, request: Request<P, S>) -> crate::Result<Token> {
        let mut ext = self.inner.external.lock();
        if ext.lifecycle.len() >= self.inner.config.max_handle_requests_and_responses {
            return Err(ExecutorError::PoolFull);
        }

        let token = ext.token_gen.current().clone();
        ext.queue.push(token.clone());
        ext.request_data.insert(token.clone(), request);
        ext.lifecycle.insert(token.clone(), Instant::now());
        let ExternalState {
            token_gen,
            lifecycle,
            ..
        } = &mut *ext;
        token_gen.advance(lifecycle);
        tracing::debug!(target: targets::EXECUTOR, token = %token, "queued request");
        Ok(token)
    }

    /// Retrieve the response for a token, if available.
    ///
    /// Unknown tokens yield an invalid-token error response. A pending token
    /// yields `None`. A successful retrieval removes the response and the
    /// token's lifecycle entry: the token is unknown afterwards. Safe from
    /// any thread.
    pub fn poll_response(&self, token: &Token) -> Option<Response<R, S>> {
        let mut ext = self.inner.external.lock();
        if !ext.lifecycle.contains_key(token) {
            return Some(Response::error(
                "Invalid token! Tokens must be obtained via queue_request!",
            ));
        }
        let response = ext.responses.remove(token);
        if response.is_some() {
            ext.lifecycle.remove(token);
        }
        response
    }

    /// Mark a request for cancellation.
    ///
    /// Never fails; unknown or already-completed tokens are silently ignored
    /// by the worker's cancellation pass. Safe from any thread.
    pub fn cancel_request(&self, token: Token) {
        self.inner.external.lock().cancel_requests.push(token);
    }

    /// Discard unpolled responses older than `old_cleanup_time` (or the
    /// override). Safe from any thread; the worker also runs this
    /// periodically.
    pub fn cleanup_old_responses(&self, time_override: Option<Duration>) {
        self.inner.cleanup_old_responses(time_override);
    }

    /// Number of tokens currently tracked: pending plus responded but not
    /// yet polled.
    pub fn pending_and_unpolled(&self) -> usize {
        self.inner.external.lock().lifecycle.len()
    }
}

impl<P, R, S> Drop for SingleThreadExecutor<P, R, S>
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    fn drop(&mut self) {
        // Don't block in drop - just request shutdown
        self.inner.stop(false);
    }
}

impl<P, R, S> ExecutorInner<P, R, S>
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    fn stop(&self, await_thread_stop: bool) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!(target: targets::EXECUTOR, "stopping executor thread");
        if await_thread_stop {
            let handle = self.status.lock().take();
            if let Some(handle) = handle {
                if handle.thread().id() == thread::current().id() {
                    // The worker asked for its own shutdown; the loop exits
                    // on the next `running` check.
                    return;
                }
                let _ = handle.join();
                tracing::info!(target: targets::EXECUTOR, "executor thread stopped");
            }
        }
    }

    /// One pass of the worker loop.
    fn process_iteration(&self, handler: &mut dyn RequestHandler<Payload = P, Output = R, State = S>) {
        let iter = self.iter_count.fetch_add(1, Ordering::Relaxed) + 1;

        self.transfer_external_to_internal();
        self.transfer_internal_to_external();

        if iter % CLEANUP_EVERY_ITERS == 0 {
            self.cleanup_old_responses(None);
        }

        self.process_cancellations(handler);
        self.process_requests(handler);
    }

    /// Drain the external queue into the worker-local queue.
    ///
    /// The lifecycle entries stay external: they track timestamps for the
    /// whole life of a token, not its location.
    fn transfer_external_to_internal(&self) {
        let (tokens, mut data) = {
            let mut ext = self.external.lock();
            let tokens = std::mem::take(&mut ext.queue);
            let mut data = HashMap::with_capacity(tokens.len());
            for token in &tokens {
                if let Some(request) = ext.request_data.remove(token) {
                    data.insert(token.clone(), request);
                }
            }
            (tokens, data)
        };
        if tokens.is_empty() {
            return;
        }

        let mut int = self.internal.lock();
        for token in tokens {
            if let Some(request) = data.remove(&token) {
                int.queue.push(token.clone());
                int.request_data.insert(token, request);
            }
        }
    }

    /// Publish worker-local responses to the producer-facing store.
    fn transfer_internal_to_external(&self) {
        let responses = {
            let mut int = self.internal.lock();
            std::mem::take(&mut int.responses)
        };
        if responses.is_empty() {
            return;
        }

        let mut ext = self.external.lock();
        let now = Instant::now();
        for (token, response) in responses {
            ext.lifecycle.insert(token.clone(), now);
            ext.responses.insert(token, response);
        }
    }

    /// Act on cancellation marks accumulated since the last pass.
    ///
    /// Tokens still queued (internally or externally) turn into cancelled
    /// responses keyed by the request's token; anything else - already
    /// responded, unknown, or raced past cancellability - is ignored.
    fn process_cancellations(
        &self,
        handler: &mut dyn RequestHandler<Payload = P, Output = R, State = S>,
    ) {
        let to_cancel = {
            let mut ext = self.external.lock();
            std::mem::take(&mut ext.cancel_requests)
        };
        if to_cancel.is_empty() {
            return;
        }

        {
            let mut int = self.internal.lock();
            for token in &to_cancel {
                let Some(pos) = int.queue.iter().position(|queued| queued == token) else {
                    continue;
                };
                int.queue.remove(pos);
                let Some(mut request) = int.request_data.remove(token) else {
                    continue;
                };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.handle_cancel(token, &request);
                }));
                if outcome.is_err() {
                    tracing::error!(
                        target: targets::WORKER,
                        token = %token,
                        "handle_cancel panicked, continuing"
                    );
                }
                let mut response = Response::cancelled();
                response.set_static_state(request.take_static_state());
                int.responses.insert(token.clone(), response);
                tracing::debug!(
                    target: targets::WORKER,
                    token = %token,
                    "cancelled queued request"
                );
            }
        }

        {
            let mut ext = self.external.lock();
            let now = Instant::now();
            for token in &to_cancel {
                let Some(pos) = ext.queue.iter().position(|queued| queued == token) else {
                    continue;
                };
                ext.queue.remove(pos);
                let Some(mut request) = ext.request_data.remove(token) else {
                    continue;
                };
                let mut response = Response::cancelled();
                response.set_static_state(request.take_static_state());
                ext.responses.insert(token.clone(), response);
                ext.lifecycle.insert(token.clone(), now);
                tracing::debug!(
                    target: targets::WORKER,
                    token = %token,
                    "cancelled request before handoff"
                );
            }
        }
    }

    /// Hand the queued requests to the handler under the internal lock.
    fn process_requests(
        &self,
        handler: &mut dyn RequestHandler<Payload = P, Output = R, State = S>,
    ) {
        let outcome = {
            let mut int = self.internal.lock();
            let snapshot = int.queue.clone();
            let mut batch = RequestBatch {
                tokens: snapshot,
                state: &mut *int,
            };
            panic::catch_unwind(AssertUnwindSafe(|| handler.handle_requests(&mut batch)))
        };
        if outcome.is_err() {
            tracing::error!(
                target: targets::WORKER,
                "request handler panicked, this may be irrecoverable, stopping the executor"
            );
            self.stop(false);
        }
    }

    fn cleanup_old_responses(&self, time_override: Option<Duration>) {
        let cleanup_after = time_override.unwrap_or(self.config.old_cleanup_time);
        let mut ext = self.external.lock();
        let ExternalState {
            responses,
            lifecycle,
            ..
        } = &mut *ext;
        let now = Instant::now();
        let expired: Vec<Token> = responses
            .keys()
            .filter(|token| {
                lifecycle
                    .get(*token)
                    .is_some_and(|prev| now.saturating_duration_since(*prev) > cleanup_after)
            })
            .cloned()
            .collect();
        for token in &expired {
            lifecycle.remove(token);
            responses.remove(token);
            tracing::debug!(
                target: targets::EXECUTOR,
                token = %token,
                "cleaned up expired response"
            );
        }
    }
}

/// The worker thread's main loop.
///
/// Runs `initialize`, reports its result over the ready-channel so a
/// blocking [`SingleThreadExecutor::start`] can return it, then iterates
/// until `running` clears. `shutdown` always runs on the way out, even after
/// a fatal handler error.
fn run_worker<P, R, S>(inner: Arc<ExecutorInner<P, R, S>>, init_tx: Sender<bool>)
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    // Held for the whole worker lifetime: this is what guarantees that
    // handle_requests and handle_cancel never run concurrently.
    let mut handler = inner.handler.lock();

    let success =
        panic::catch_unwind(AssertUnwindSafe(|| handler.initialize())).unwrap_or(false);
    if !success {
        tracing::error!(
            target: targets::WORKER,
            "initialization failed, executor will not run"
        );
        inner.running.store(false, Ordering::Release);
    }
    let _ = init_tx.send(success);

    while inner.running.load(Ordering::Acquire) {
        let started = Instant::now();
        {
            let _span = PerfSpan::new("worker_iteration");
            inner.process_iteration(&mut **handler);
        }
        if let Some(remaining) = inner.config.loop_sleep.checked_sub(started.elapsed()) {
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }
    }

    if panic::catch_unwind(AssertUnwindSafe(|| handler.shutdown())).is_err() {
        tracing::error!(target: targets::WORKER, "handler shutdown panicked");
    }
    tracing::debug!(target: targets::WORKER, "executor thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type TestExecutor = SingleThreadExecutor<i32, i32, i32>;

    /// Shared counters observed by tests while the handler lives inside the
    /// executor.
    #[derive(Clone, Default)]
    struct Probe {
        init_calls: Arc<AtomicUsize>,
        shutdown_calls: Arc<AtomicUsize>,
        cancel_calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<Token>>>,
    }

    /// Accepts every request with double its payload.
    struct Doubling {
        probe: Probe,
        init_ok: bool,
    }

    impl Doubling {
        fn new(probe: Probe) -> Self {
            Self {
                probe,
                init_ok: true,
            }
        }
    }

    impl RequestHandler for Doubling {
        type Payload = i32;
        type Output = i32;
        type State = i32;

        fn initialize(&mut self) -> bool {
            self.probe.init_calls.fetch_add(1, Ordering::SeqCst);
            self.init_ok
        }

        fn shutdown(&mut self) {
            self.probe.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_requests(&mut self, batch: &mut RequestBatch<'_, i32, i32, i32>) {
            for token in batch.tokens() {
                self.probe.seen.lock().push(token.clone());
                let doubled = batch.request(&token).map(|req| req.payload() * 2);
                if let Some(doubled) = doubled {
                    let _ = batch.accept(&token, Response::success(doubled));
                }
            }
        }

        fn handle_cancel(&mut self, _token: &Token, _request: &Request<i32, i32>) {
            self.probe.cancel_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Sees requests but never resolves them.
    struct Ignoring {
        probe: Probe,
    }

    impl RequestHandler for Ignoring {
        type Payload = i32;
        type Output = i32;
        type State = i32;

        fn handle_requests(&mut self, batch: &mut RequestBatch<'_, i32, i32, i32>) {
            for token in batch.tokens() {
                self.probe.seen.lock().push(token);
            }
        }

        fn handle_cancel(&mut self, _token: &Token, _request: &Request<i32, i32>) {
            self.probe.cancel_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Panics as soon as it sees a request.
    struct Panicking {
        probe: Probe,
    }

    impl RequestHandler for Panicking {
        type Payload = i32;
        type Output = i32;
        type State = i32;

        fn shutdown(&mut self) {
            self.probe.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_requests(&mut self, batch: &mut RequestBatch<'_, i32, i32, i32>) {
            if !batch.is_empty() {
                panic!("handler exploded");
            }
        }
    }

    /// Rejects everything with a fixed reason.
    struct Rejecting;

    impl RequestHandler for Rejecting {
        type Payload = i32;
        type Output = i32;
        type State = i32;

        fn handle_requests(&mut self, batch: &mut RequestBatch<'_, i32, i32, i32>) {
            for token in batch.tokens() {
                let _ = batch.reject(&token, "no capacity");
            }
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            loop_sleep: Duration::from_millis(10),
            ..ExecutorConfig::default()
        }
    }

    fn poll_until(executor: &TestExecutor, token: &Token) -> Response<i32, i32> {
        for _ in 0..300 {
            if let Some(response) = executor.poll_response(token) {
                return response;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("no response for token {token} within timeout");
    }

    #[test]
    fn test_start_is_idempotent() {
        let executor = TestExecutor::with_config(Doubling::new(Probe::default()), fast_config());
        assert_eq!(executor.start(true), Some(true));
        assert!(executor.is_running());
        assert_eq!(executor.start(true), None);
        executor.stop(true);
        assert!(!executor.is_running());
    }

    #[test]
    fn test_failed_initialization_shuts_down() {
        let probe = Probe::default();
        let handler = Doubling {
            probe: probe.clone(),
            init_ok: false,
        };
        let executor = TestExecutor::with_config(handler, fast_config());
        assert_eq!(executor.start(true), Some(false));

        // The worker clears the running flag itself and still shuts down.
        for _ in 0..100 {
            if !executor.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!executor.is_running());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(probe.shutdown_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_submit_accept_poll_roundtrip() {
        let executor = TestExecutor::with_config(Doubling::new(Probe::default()), fast_config());
        executor.start(true);

        let token = executor
            .queue_request(Request::with_state(21, 42))
            .unwrap();
        let response = poll_until(&executor, &token);
        assert!(response.is_successful());
        assert_eq!(response.result(), Some(&42));
        assert_eq!(response.static_state(), Some(&42));

        // The token is unknown after a successful poll.
        let again = executor.poll_response(&token).unwrap();
        assert!(again.has_error());
        assert!(again.error_msg().unwrap().contains("Invalid token"));

        executor.stop(true);
    }

    #[test]
    fn test_poll_unknown_token() {
        let executor = TestExecutor::with_config(Doubling::new(Probe::default()), fast_config());
        let response = executor.poll_response(&Token::from("bogus")).unwrap();
        assert!(response.has_error());
        assert!(!response.is_cancelled());
    }

    #[test]
    fn test_cancel_while_queued_never_reaches_handler() {
        let probe = Probe::default();
        let executor = TestExecutor::with_config(Doubling::new(probe.clone()), fast_config());

        // Queue and cancel before the worker ever runs.
        let token = executor.queue_request(Request::with_state(1, 7)).unwrap();
        executor.cancel_request(token.clone());
        executor.start(true);

        let response = poll_until(&executor, &token);
        assert!(response.is_cancelled());
        assert_eq!(response.error_msg(), Some(crate::CANCELLED_MESSAGE));
        assert_eq!(response.static_state(), Some(&7));
        assert!(probe.seen.lock().is_empty());

        executor.stop(true);
    }

    #[test]
    fn test_cancel_in_external_queue_without_handoff() {
        let probe = Probe::default();
        let executor = TestExecutor::with_config(Doubling::new(probe.clone()), fast_config());

        // Never started: the request stays in the external queue. Driving
        // the cancellation pass directly exercises the pre-handoff branch.
        let token = executor.queue_request(Request::with_state(1, 9)).unwrap();
        executor.cancel_request(token.clone());
        {
            let mut handler = executor.inner.handler.lock();
            executor.inner.process_cancellations(&mut **handler);
        }

        let response = executor.poll_response(&token).unwrap();
        assert!(response.is_cancelled());
        assert_eq!(response.static_state(), Some(&9));
        // The pre-handoff branch never notifies the handler.
        assert_eq!(probe.cancel_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_after_handoff_notifies_handler_once() {
        let probe = Probe::default();
        let executor = TestExecutor::with_config(
            Ignoring {
                probe: probe.clone(),
            },
            fast_config(),
        );
        executor.start(true);

        let token = executor.queue_request(Request::with_state(5, 11)).unwrap();
        // Wait until the worker has picked the request up.
        for _ in 0..100 {
            if !probe.seen.lock().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!probe.seen.lock().is_empty());

        executor.cancel_request(token.clone());
        let response = poll_until(&executor, &token);
        assert!(response.is_cancelled());
        assert_eq!(response.static_state(), Some(&11));
        assert_eq!(probe.cancel_calls.load(Ordering::SeqCst), 1);

        executor.stop(true);
    }

    #[test]
    fn test_cancel_after_completion_returns_original_response() {
        let executor = TestExecutor::with_config(Doubling::new(Probe::default()), fast_config());
        executor.start(true);

        let token = executor.queue_request(Request::with_state(3, 1)).unwrap();
        // Let the request complete without polling it away.
        thread::sleep(Duration::from_millis(150));
        executor.cancel_request(token.clone());
        thread::sleep(Duration::from_millis(100));

        let response = poll_until(&executor, &token);
        assert!(response.is_successful());
        assert_eq!(response.result(), Some(&6));

        executor.stop(true);
    }

    #[test]
    fn test_pool_full() {
        let config = ExecutorConfig {
            max_handle_requests_and_responses: 2,
            ..fast_config()
        };
        let executor = TestExecutor::with_config(Doubling::new(Probe::default()), config);

        executor.queue_request(Request::new(1)).unwrap();
        executor.queue_request(Request::new(2)).unwrap();
        let third = executor.queue_request(Request::new(3));
        assert_eq!(third, Err(ExecutorError::PoolFull));
        assert_eq!(executor.pending_and_unpolled(), 2);
    }

    #[test]
    fn test_manual_ttl_cleanup() {
        let executor = TestExecutor::with_config(Doubling::new(Probe::default()), fast_config());
        executor.start(true);

        let token = executor.queue_request(Request::new(4)).unwrap();
        // Let the response land, then idle past the override.
        thread::sleep(Duration::from_millis(200));
        executor.cleanup_old_responses(Some(Duration::from_millis(100)));

        let response = executor.poll_response(&token).unwrap();
        assert!(response.has_error());
        assert!(response.error_msg().unwrap().contains("Invalid token"));

        executor.stop(true);
    }

    #[test]
    fn test_periodic_ttl_cleanup() {
        let config = ExecutorConfig {
            old_cleanup_time: Duration::from_millis(50),
            ..fast_config()
        };
        let executor = TestExecutor::with_config(Doubling::new(Probe::default()), config);
        executor.start(true);

        let token = executor.queue_request(Request::new(4)).unwrap();
        // 10 ms loop => the every-10th-iteration cleanup fires around every
        // 100 ms; after half a second the response must be gone.
        thread::sleep(Duration::from_millis(500));

        let response = executor.poll_response(&token).unwrap();
        assert!(response.has_error());

        executor.stop(true);
    }

    #[test]
    fn test_fifo_order_preserved() {
        let probe = Probe::default();
        let executor = TestExecutor::with_config(Doubling::new(probe.clone()), fast_config());

        let tokens: Vec<Token> = (0..10)
            .map(|i| executor.queue_request(Request::new(i)).unwrap())
            .collect();
        executor.start(true);

        for token in &tokens {
            let response = poll_until(&executor, token);
            assert!(response.is_successful());
        }
        assert_eq!(*probe.seen.lock(), tokens);

        executor.stop(true);
    }

    #[test]
    fn test_tokens_unique() {
        let executor = TestExecutor::with_config(Doubling::new(Probe::default()), fast_config());
        let mut tokens = Vec::new();
        for i in 0..50 {
            tokens.push(executor.queue_request(Request::new(i)).unwrap());
        }
        let mut deduped = tokens.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), tokens.len());
    }

    #[test]
    fn test_reject_produces_error_response_with_state() {
        let executor =
            SingleThreadExecutor::<i32, i32, i32>::with_config(Rejecting, fast_config());
        executor.start(true);

        let token = executor.queue_request(Request::with_state(1, 33)).unwrap();
        let response = poll_until(&executor, &token);
        assert!(response.has_error());
        assert!(!response.is_cancelled());
        assert_eq!(response.error_msg(), Some("no capacity"));
        assert_eq!(response.static_state(), Some(&33));

        executor.stop(true);
    }

    #[test]
    fn test_fatal_handler_stops_executor() {
        let probe = Probe::default();
        let executor = TestExecutor::with_config(
            Panicking {
                probe: probe.clone(),
            },
            fast_config(),
        );
        assert_eq!(executor.start(true), Some(true));

        executor.queue_request(Request::new(1)).unwrap();
        for _ in 0..200 {
            if !executor.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!executor.is_running());

        // The worker still runs shutdown exactly once on its way out.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(probe.shutdown_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_idempotent_and_restartable() {
        let probe = Probe::default();
        let executor = TestExecutor::with_config(Doubling::new(probe.clone()), fast_config());

        assert_eq!(executor.start(true), Some(true));
        executor.stop(true);
        executor.stop(true);
        assert_eq!(probe.shutdown_calls.load(Ordering::SeqCst), 1);

        assert_eq!(executor.start(true), Some(true));
        assert_eq!(probe.init_calls.load(Ordering::SeqCst), 2);

        let token = executor.queue_request(Request::new(8)).unwrap();
        let response = poll_until(&executor, &token);
        assert_eq!(response.result(), Some(&16));

        executor.stop(true);
    }

    #[test]
    fn test_drop_stops_worker() {
        let probe = Probe::default();
        let executor = TestExecutor::with_config(Doubling::new(probe.clone()), fast_config());
        executor.start(true);
        drop(executor);

        for _ in 0..100 {
            if probe.shutdown_calls.load(Ordering::SeqCst) == 1 {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("worker did not shut down after drop");
    }

    #[test]
    fn test_concurrent_producers() {
        let executor = Arc::new(TestExecutor::with_config(
            Doubling::new(Probe::default()),
            fast_config(),
        ));
        executor.start(true);

        let mut handles = vec![];
        for producer in 0..4 {
            let executor = Arc::clone(&executor);
            handles.push(thread::spawn(move || {
                for i in 0..10 {
                    let payload = producer * 100 + i;
                    let token = executor
                        .queue_request(Request::new(payload))
                        .expect("pool has capacity");
                    let response = poll_until(&executor, &token);
                    assert_eq!(response.result(), Some(&(payload * 2)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        executor.stop(true);
    }
}
