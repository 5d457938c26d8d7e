//! Request and response value types.
//!
//! A [`Request`] wraps the caller's domain payload together with an optional
//! *static state* value. The executor carries the static state across the
//! whole lifecycle and attaches it to the matching [`Response`] when the
//! request is accepted, rejected or cancelled, so callers can correlate a
//! polled response with whatever context they stashed at submission time.
//!
//! A [`Response`] wraps an optional domain result plus the lifecycle flags
//! (`cancelled`, `error_msg`). Exactly one of *successful*, *error* or
//! *cancelled* holds for any response handed back by the executor.

/// The error message carried by every cancelled response.
pub const CANCELLED_MESSAGE: &str = "Response is cancelled!";

/// A unit of work submitted to an executor.
///
/// `P` is the domain payload; `S` is the static state carried through to the
/// response.
#[derive(Debug, Clone)]
pub struct Request<P, S> {
    payload: P,
    static_state: Option<S>,
}

impl<P, S> Request<P, S> {
    /// Create a request with no static state.
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            static_state: None,
        }
    }

    /// Create a request carrying a static state value.
    ///
    /// The state travels with the request and reappears on the response the
    /// executor produces for it.
    pub fn with_state(payload: P, state: S) -> Self {
        Self {
            payload,
            static_state: Some(state),
        }
    }

    /// Borrow the domain payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Mutably borrow the domain payload.
    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    /// Consume the request, returning the payload.
    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Borrow the static state, if any.
    pub fn static_state(&self) -> Option<&S> {
        self.static_state.as_ref()
    }

    /// Detach the static state. Used during request-to-response transfer.
    pub(crate) fn take_static_state(&mut self) -> Option<S> {
        self.static_state.take()
    }
}

/// The executor's answer to a [`Request`].
///
/// `R` is the domain result produced by the handler; `S` is the static state
/// copied over from the originating request.
#[derive(Debug, Clone)]
pub struct Response<R, S> {
    result: Option<R>,
    cancelled: bool,
    error_msg: Option<String>,
    static_state: Option<S>,
}

impl<R, S> Response<R, S> {
    /// Create a response with explicit lifecycle flags and no result.
    pub fn new(cancelled: bool, error_msg: Option<String>) -> Self {
        Self {
            result: None,
            cancelled,
            error_msg,
            static_state: None,
        }
    }

    /// Create a successful response carrying a domain result.
    pub fn success(result: R) -> Self {
        Self {
            result: Some(result),
            cancelled: false,
            error_msg: None,
            static_state: None,
        }
    }

    /// Create an error response with the given message.
    pub fn error(error_msg: impl Into<String>) -> Self {
        Self::new(false, Some(error_msg.into()))
    }

    /// Create a cancelled response.
    pub fn cancelled() -> Self {
        Self::new(true, Some(CANCELLED_MESSAGE.to_string()))
    }

    /// Whether an error message is present.
    pub fn has_error(&self) -> bool {
        self.error_msg.is_some()
    }

    /// The error message, if any.
    pub fn error_msg(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }

    /// Whether the request was cancelled before completion.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether the response is successful (no error and not cancelled).
    pub fn is_successful(&self) -> bool {
        !(self.has_error() || self.is_cancelled())
    }

    /// Mark an otherwise successful response as failed.
    ///
    /// Intended for postprocessing stages that discover a failure after the
    /// worker already produced the response.
    pub fn errorify(&mut self, error_msg: impl Into<String>) {
        self.error_msg = Some(error_msg.into());
    }

    /// Borrow the domain result, if any.
    pub fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }

    /// Consume the response, returning the domain result.
    pub fn into_result(self) -> Option<R> {
        self.result
    }

    /// Borrow the static state carried over from the request.
    pub fn static_state(&self) -> Option<&S> {
        self.static_state.as_ref()
    }

    /// Detach the static state from the response.
    pub fn take_static_state(&mut self) -> Option<S> {
        self.static_state.take()
    }

    /// Attach a static state value, returning the modified response.
    ///
    /// The executor overwrites the static state with the originating
    /// request's when it transfers a response, so there is normally no need
    /// to call this; it exists for layers that rebuild responses (such as
    /// routers unwrapping an envelope).
    pub fn with_static_state(mut self, state: S) -> Self {
        self.static_state = Some(state);
        self
    }

    /// Overwrite the static state during request-to-response transfer.
    pub(crate) fn set_static_state(&mut self, state: Option<S>) {
        self.static_state = state;
    }

    /// Re-type the static-state slot, keeping the result and lifecycle flags.
    ///
    /// Used by layers that wrap the caller's static state in an envelope and
    /// need to unwrap it when handing the response back.
    pub fn map_static_state<T, F>(self, f: F) -> Response<R, T>
    where
        F: FnOnce(Option<S>) -> Option<T>,
    {
        Response {
            result: self.result,
            cancelled: self.cancelled,
            error_msg: self.error_msg,
            static_state: f(self.static_state),
        }
    }
}
