//! Routing of logical calls onto executors.
//!
//! A [`Router`] maps a dispatch [`ValueTuple`] to a preprocessor/
//! postprocessor pair and - in pool mode - to one of several executors
//! distinguished by string tags. The preprocessor turns the caller's
//! arguments into a request payload plus static state; the postprocessor
//! runs when the matching response is polled and may amend it (for example
//! via `errorify`).
//!
//! Pool-mode tokens are the concatenation of the chosen tag's SHA-256 hex
//! digest and the underlying executor's token, so a token alone determines
//! which executor answers a later poll or cancel. Cross-routing a token to
//! the wrong executor is impossible through this API.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnstile_core::{Request, RequestBatch, RequestHandler, Response, SingleThreadExecutor};
//! use turnstile_router::{RouteState, Router};
//!
//! struct Echo;
//!
//! impl RequestHandler for Echo {
//!     type Payload = String;
//!     type Output = String;
//!     type State = RouteState<u64>;
//!
//!     fn handle_requests(
//!         &mut self,
//!         batch: &mut RequestBatch<'_, String, String, RouteState<u64>>,
//!     ) {
//!         for token in batch.tokens() {
//!             let text = batch.request(&token).map(|req| req.payload().clone());
//!             if let Some(text) = text {
//!                 let _ = batch.accept(&token, Response::success(text));
//!             }
//!         }
//!     }
//! }
//!
//! let executor = Arc::new(SingleThreadExecutor::new(Echo));
//! executor.start(true);
//!
//! let mut router = Router::single(executor);
//! router
//!     .register_processor_pair(
//!         ("/echo",),
//!         |args: String| Ok((args, 0)),
//!         |_response, _state| {},
//!         None,
//!     )
//!     .unwrap();
//!
//! let token = router.queue_request(("/echo",), "hello".to_string()).unwrap();
//! // ... router.poll_response(&token) from any thread ...
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use turnstile_core::{ExecutorError, Request, Response, SingleThreadExecutor, Token};

use crate::error::{Result, RouterError};
use crate::value::ValueTuple;

/// The static-state envelope the router attaches to every request it
/// submits: the caller's own state plus the dispatch value used to find the
/// postprocessor at poll time.
#[derive(Debug, Clone)]
pub struct RouteState<S> {
    state: S,
    value: ValueTuple,
}

impl<S> RouteState<S> {
    /// The caller's static state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The dispatch value the request was routed by.
    pub fn value(&self) -> &ValueTuple {
        &self.value
    }
}

/// An executor usable under a [`Router`]: its static state is the router's
/// [`RouteState`] envelope.
pub type RoutedExecutor<P, R, S> = SingleThreadExecutor<P, R, RouteState<S>>;

type Preprocessor<A, P, S> =
    Box<dyn Fn(A) -> std::result::Result<(P, S), String> + Send + Sync>;
type Postprocessor<R, S> = Box<dyn Fn(&mut Response<R, S>, &S) + Send + Sync>;

struct RouteEntry<A, P, R, S> {
    preprocess: Preprocessor<A, P, S>,
    postprocess: Postprocessor<R, S>,
    executor_tag: Option<String>,
}

enum ExecutorPool<P, R, S>
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    Single(Arc<RoutedExecutor<P, R, S>>),
    Pool {
        executors: HashMap<String, Arc<RoutedExecutor<P, R, S>>>,
        hash_to_tag: HashMap<String, String>,
        tag_to_hash: HashMap<String, String>,
        hash_len: usize,
    },
}

/// Dispatches logical calls to processor pairs and executors.
///
/// `A` is the argument type every registered preprocessor consumes; `P`, `R`
/// and `S` are the payload, output and caller-visible static-state types
/// shared by the routed executors.
///
/// Registration happens during setup through `&mut self`; the serving
/// operations (`queue_request`, `poll_response`, `cancel_request`) take
/// `&self` and are safe to share across threads behind an `Arc`.
pub struct Router<A, P, R, S>
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    pool: ExecutorPool<P, R, S>,
    routes: HashMap<ValueTuple, RouteEntry<A, P, R, S>>,
    arity: Option<usize>,
}

static_assertions::assert_impl_all!(Router<(), (), (), ()>: Send, Sync);

impl<A, P, R, S> Router<A, P, R, S>
where
    P: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    /// Create a router that submits every request to one executor.
    ///
    /// Tokens pass through unchanged.
    pub fn single(executor: Arc<RoutedExecutor<P, R, S>>) -> Self {
        Self {
            pool: ExecutorPool::Single(executor),
            routes: HashMap::new(),
            arity: None,
        }
    }

    /// Create a router over a pool of tagged executors.
    ///
    /// Each tag is hashed once; the hash becomes the fixed-width token
    /// prefix identifying the executor. All tags hash to the same width by
    /// construction.
    pub fn pool(executors: HashMap<String, Arc<RoutedExecutor<P, R, S>>>) -> Result<Self> {
        let mut hash_to_tag = HashMap::with_capacity(executors.len());
        let mut tag_to_hash = HashMap::with_capacity(executors.len());
        let mut hash_len = 0usize;
        for tag in executors.keys() {
            let hash = tag_hash(tag);
            debug_assert!(hash_len == 0 || hash.len() == hash_len);
            hash_len = hash.len();
            if hash_to_tag.contains_key(&hash) {
                return Err(RouterError::TagHashCollision(tag.clone()));
            }
            hash_to_tag.insert(hash.clone(), tag.clone());
            tag_to_hash.insert(tag.clone(), hash);
        }
        Ok(Self {
            pool: ExecutorPool::Pool {
                executors,
                hash_to_tag,
                tag_to_hash,
                hash_len,
            },
            routes: HashMap::new(),
            arity: None,
        })
    }

    /// Whether this router drives a single executor rather than a pool.
    pub fn is_single_executor(&self) -> bool {
        matches!(self.pool, ExecutorPool::Single(_))
    }

    /// Whether a dispatch value has a registered processor pair.
    pub fn has_value(&self, value: impl Into<ValueTuple>) -> bool {
        self.routes.contains_key(&value.into())
    }

    /// Register a preprocessor/postprocessor pair for a dispatch value.
    ///
    /// The preprocessor turns the call arguments into `(payload, state)`;
    /// returning `Err` aborts the submission. The postprocessor runs at poll
    /// time on non-error responses and must not panic - it should `errorify`
    /// the response instead.
    ///
    /// The first registration fixes the tuple arity. In pool mode
    /// `executor_tag` must name a pool key; in single mode it is ignored.
    pub fn register_processor_pair<F, G>(
        &mut self,
        value: impl Into<ValueTuple>,
        preprocess: F,
        postprocess: G,
        executor_tag: Option<&str>,
    ) -> Result<()>
    where
        F: Fn(A) -> std::result::Result<(P, S), String> + Send + Sync + 'static,
        G: Fn(&mut Response<R, S>, &S) + Send + Sync + 'static,
    {
        let value = self.checked_value(value.into())?;
        if self.routes.contains_key(&value) {
            return Err(RouterError::DuplicateValue(value));
        }
        let executor_tag = match &self.pool {
            ExecutorPool::Single(_) => None,
            ExecutorPool::Pool { executors, .. } => {
                let tag = executor_tag.ok_or(RouterError::MissingExecutorTag)?;
                if !executors.contains_key(tag) {
                    return Err(RouterError::UnknownExecutorTag(tag.to_string()));
                }
                Some(tag.to_string())
            }
        };

        self.arity = Some(value.len());
        tracing::debug!(
            target: "turnstile_router",
            value = %value,
            tag = executor_tag.as_deref().unwrap_or("<single>"),
            "registered processor pair"
        );
        self.routes.insert(
            value,
            RouteEntry {
                preprocess: Box::new(preprocess),
                postprocess: Box::new(postprocess),
                executor_tag,
            },
        );
        Ok(())
    }

    /// Queue a logical call, returning the (possibly prefix-composed) token.
    ///
    /// Fails on malformed or unregistered values, preprocessor failure, and
    /// a full executor pool.
    pub fn queue_request(&self, value: impl Into<ValueTuple>, args: A) -> Result<Token> {
        let value = self.checked_value(value.into())?;
        let entry = self
            .routes
            .get(&value)
            .ok_or_else(|| RouterError::UnregisteredValue(value.clone()))?;

        let (payload, state) = (entry.preprocess)(args).map_err(RouterError::Preprocess)?;
        let request = Request::with_state(
            payload,
            RouteState {
                state,
                value: value.clone(),
            },
        );

        match &self.pool {
            ExecutorPool::Single(executor) => Ok(executor.queue_request(request)?),
            ExecutorPool::Pool {
                executors,
                tag_to_hash,
                ..
            } => {
                let tag = entry
                    .executor_tag
                    .as_deref()
                    .ok_or(RouterError::MissingExecutorTag)?;
                let executor = executors
                    .get(tag)
                    .ok_or_else(|| RouterError::UnknownExecutorTag(tag.to_string()))?;
                let inner = executor.queue_request(request)?;
                let hash = &tag_to_hash[tag];
                Ok(Token::from(format!("{hash}{inner}")))
            }
        }
    }

    /// Queue a logical call, flattening the expected failures into a plain
    /// message: unregistered values, preprocessor failures, and a full pool
    /// come back as `Err(message)` instead of a [`RouterError`].
    pub fn queue_request_suppressed(
        &self,
        value: impl Into<ValueTuple>,
        args: A,
    ) -> std::result::Result<Token, String> {
        match self.queue_request(value, args) {
            Ok(token) => Ok(token),
            Err(RouterError::UnregisteredValue(_)) => Err("Not implemented yet.".to_string()),
            Err(RouterError::Preprocess(_)) => {
                Err("Internal error when preprocessing the request.".to_string())
            }
            Err(RouterError::Executor(ExecutorError::PoolFull)) => {
                Err("The execution pool is full. Please wait.".to_string())
            }
            Err(err) => Err(err.to_string()),
        }
    }

    /// Retrieve and postprocess the response for a token, if available.
    ///
    /// Pool-mode tokens are split into tag-hash prefix and executor-local
    /// suffix; malformed or unknown prefixes yield an error response.
    /// Returns `None` while the request is still pending. Error responses
    /// come back unprocessed; successful ones pass through the postprocessor
    /// registered for the dispatch value stashed in the response.
    pub fn poll_response(&self, token: &Token) -> Option<Response<R, S>> {
        let Some((executor, inner_token)) = self.resolve(token) else {
            return Some(Response::error("Invalid token format."));
        };

        let mut inner_response = executor.poll_response(&inner_token)?;
        let envelope = inner_response.take_static_state();
        let mut response: Response<R, S> = inner_response.map_static_state(|_| None);

        let Some(RouteState { state, value }) = envelope else {
            return Some(response);
        };
        if !response.has_error() {
            if let Some(entry) = self.routes.get(&value) {
                (entry.postprocess)(&mut response, &state);
            }
        }
        Some(response.with_static_state(state))
    }

    /// Cancel the request behind a token.
    ///
    /// Malformed or unknown tokens are silently ignored, as is cancelling
    /// work that already completed.
    pub fn cancel_request(&self, token: &Token) {
        if let Some((executor, inner_token)) = self.resolve(token) {
            executor.cancel_request(inner_token);
        }
    }

    /// Validate tuple shape against the router's fixed arity.
    fn checked_value(&self, value: ValueTuple) -> Result<ValueTuple> {
        if value.is_empty() {
            return Err(RouterError::EmptyValue);
        }
        if let Some(expected) = self.arity {
            if value.len() != expected {
                return Err(RouterError::ArityMismatch {
                    expected,
                    got: value.len(),
                });
            }
        }
        Ok(value)
    }

    /// Split a token into its owning executor and executor-local form.
    fn resolve(&self, token: &Token) -> Option<(&RoutedExecutor<P, R, S>, Token)> {
        match &self.pool {
            ExecutorPool::Single(executor) => Some((executor.as_ref(), token.clone())),
            ExecutorPool::Pool {
                executors,
                hash_to_tag,
                hash_len,
                ..
            } => {
                let raw = token.as_str();
                if raw.len() < *hash_len {
                    return None;
                }
                let (prefix, rest) = raw.split_at(*hash_len);
                let tag = hash_to_tag.get(prefix)?;
                let executor = executors.get(tag)?;
                Some((executor.as_ref(), Token::from(rest)))
            }
        }
    }
}

fn tag_hash(tag: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
