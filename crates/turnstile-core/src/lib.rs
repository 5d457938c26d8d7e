//! Core systems for Turnstile.
//!
//! Turnstile serves concurrent requests whose useful work must be funneled
//! through a *single bottlenecked worker* - typically because the resource
//! being driven (a GPU, an external device session, a model, a licensed
//! library) admits only one concurrent user. This crate provides the
//! concurrency engine:
//!
//! - **Request/Response model**: value types carrying an opaque domain
//!   payload, lifecycle flags and a static-state slot propagated from
//!   request to response
//! - **Tokens**: unique, unpredictable handles minted per submission from a
//!   seeded SHA-256 hash chain
//! - **SingleThreadExecutor**: thread-safe producer-facing queue, one
//!   dedicated worker thread, batched handoff between producer-visible and
//!   worker-local state, cancellation across queue states, response polling
//!   and TTL cleanup
//!
//! Producers submit from any thread and later poll (or cancel) by token;
//! the worker drains batches and hands them to a user-supplied
//! [`RequestHandler`]. See [`executor`](SingleThreadExecutor) for the
//! lifecycle and an end-to-end example.
//!
//! # Quick start
//!
//! ```no_run
//! use turnstile_core::{Request, RequestBatch, RequestHandler, Response, SingleThreadExecutor};
//!
//! struct Sum;
//!
//! impl RequestHandler for Sum {
//!     type Payload = Vec<i64>;
//!     type Output = i64;
//!     type State = ();
//!
//!     fn handle_requests(&mut self, batch: &mut RequestBatch<'_, Vec<i64>, i64, ()>) {
//!         for token in batch.tokens() {
//!             let total = batch.request(&token).map(|req| req.payload().iter().sum());
//!             if let Some(total) = total {
//!                 let _ = batch.accept(&token, Response::success(total));
//!             }
//!         }
//!     }
//! }
//!
//! let executor = SingleThreadExecutor::new(Sum);
//! executor.start(true);
//! let token = executor.queue_request(Request::new(vec![1, 2, 3])).unwrap();
//! // ... poll_response(&token) from any thread ...
//! ```

#![warn(missing_docs)]

mod error;
mod executor;
pub mod logging;
mod request;
mod token;

pub use error::{ExecutorError, Result};
pub use executor::{ExecutorConfig, RequestBatch, RequestHandler, SingleThreadExecutor};
pub use logging::PerfSpan;
pub use request::{CANCELLED_MESSAGE, Request, Response};
pub use token::Token;
