//! Request handles returned by `Session::begin_*`.

use std::sync::Arc;

use hostlink_core::{
    HostError, HostInput, SessionEvent,
    events::{RequestContext, RequestEventArgs},
};
use tokio_util::sync::CancellationToken;

use crate::session::SessionInner;

/// What a request was started with.
pub(crate) struct RequestInfo {
    pub(crate) id: u64,
    pub(crate) args: RequestEventArgs,
    pub(crate) token: CancellationToken,
}

impl RequestInfo {
    pub(crate) fn new(args: RequestEventArgs, token: CancellationToken) -> Self {
        Self {
            id: args.request_id,
            args,
            token,
        }
    }
}

/// Shared body of both handle kinds.
struct RequestHandle {
    session: Arc<SessionInner>,
    info: Arc<RequestInfo>,
    finished: bool,
}

impl RequestHandle {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.session.finish(self.info.id);
        }
    }

    fn send(&self, input: HostInput) -> Result<(), HostError> {
        if self.info.token.is_cancelled() {
            return Err(HostError::OperationCanceled("request was canceled".to_string()));
        }
        self.session.send_for(self.info.id, input)
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

macro_rules! request_accessors {
    ($handle:ty) => {
        impl $handle {
            #[must_use]
            pub fn id(&self) -> u64 {
                self.0.info.id
            }

            /// Call-stack-like contexts for nested prompt display, outermost first.
            #[must_use]
            pub fn contexts(&self) -> &[RequestContext] {
                &self.0.info.args.contexts
            }

            #[must_use]
            pub fn prompt(&self) -> &str {
                &self.0.info.args.prompt
            }

            #[must_use]
            pub fn max_input_length(&self) -> usize {
                self.0.info.args.max_input_length
            }

            #[must_use]
            pub fn add_to_history(&self) -> bool {
                self.0.info.args.add_to_history
            }

            #[must_use]
            pub fn is_cancelled(&self) -> bool {
                self.0.info.token.is_cancelled()
            }

            /// Resolves once `cancel_all` or a host stop cancels this request.
            pub async fn cancelled(&self) {
                self.0.info.token.cancelled().await;
            }

            /// End the request and emit after-request.
            ///
            /// Dropping the handle does the same. Nothing is emitted if the
            /// request was already canceled.
            pub fn complete(mut self) {
                self.0.finish();
            }
        }
    };
}

/// A pending non-interactive evaluation.
pub struct EvaluationHandle(RequestHandle);

/// A pending interaction with the user.
pub struct InteractionHandle(RequestHandle);

request_accessors!(EvaluationHandle);
request_accessors!(InteractionHandle);

impl EvaluationHandle {
    pub(crate) fn new(session: Arc<SessionInner>, info: Arc<RequestInfo>) -> Self {
        Self(RequestHandle {
            session,
            info,
            finished: false,
        })
    }

    /// Submit an expression to the host.
    ///
    /// # Errors
    /// `OperationCanceled` if the request was canceled, or a transport error
    /// if the host is gone.
    pub fn evaluate(&self, expression: impl Into<String>) -> Result<(), HostError> {
        self.0.send(HostInput::Evaluate(expression.into()))
    }
}

impl InteractionHandle {
    pub(crate) fn new(session: Arc<SessionInner>, info: Arc<RequestInfo>) -> Self {
        Self(RequestHandle {
            session,
            info,
            finished: false,
        })
    }

    /// Submit the user's input and emit mutated.
    ///
    /// Mutated is only emitted while this request is still pending, so it
    /// never follows the next request's before-request.
    ///
    /// # Errors
    /// `InvalidState` if the text exceeds the maximum input length,
    /// `OperationCanceled` if the request was canceled, or a transport error
    /// if the host is gone.
    pub fn respond(&self, text: impl Into<String>) -> Result<(), HostError> {
        let text = text.into();
        let limit = self.max_input_length();
        if text.len() > limit {
            return Err(HostError::InvalidState(format!(
                "input is {} bytes, limit is {limit}",
                text.len()
            )));
        }
        self.0.send(HostInput::Respond(text))?;
        self.0.session.announce(self.0.info.id, SessionEvent::Mutated);
        Ok(())
    }
}
