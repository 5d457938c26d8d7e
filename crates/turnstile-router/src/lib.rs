//! Request routing for Turnstile.
//!
//! This crate layers dispatch on top of [`turnstile_core`]'s single-worker
//! executor. A [`Router`] maps each logical call - identified by a
//! [`ValueTuple`] such as `("/embed", "POST")` - to a preprocessor that
//! builds the request, a postprocessor that amends the polled response, and
//! (in pool mode) to one of several tagged executors. Pool-mode tokens are
//! prefixed with the tag's SHA-256 digest so that polling and cancellation
//! find their way back to the right executor from the token alone.
//!
//! The typical shape of an application:
//!
//! 1. build one executor per bottlenecked resource, each with its own
//!    [`RequestHandler`](turnstile_core::RequestHandler);
//! 2. collect them in a `Router` (single or pool mode) and register a
//!    processor pair per exposed operation;
//! 3. from the serving layer (an HTTP listener, an RPC endpoint), call
//!    `queue_request` / `poll_response` / `cancel_request` with the dispatch
//!    value taken from the wire.

#![warn(missing_docs)]

mod error;
mod router;
mod value;

pub use error::{Result, RouterError};
pub use router::{RoutedExecutor, RouteState, Router};
pub use value::{ValueAtom, ValueTuple};
