//! Outbound responses
//!
//! Every answer is an immutable byte body plus a status and a
//! [`ResponseKind`] saying which protocol shape it has.

use formsync_diff::Instruction;
use formsync_session::PendingActions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Protocol shape of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseKind {
    /// Diff against the previous snapshot
    Incremental,
    /// Diff against the initial snapshot, after a client reload
    AllEvents,
    /// Second pass of a replace-all submission
    NoOp,
    /// Memoized answer to a retransmitted request
    Replay,
    /// Keep-alive answered without the document lock
    Heartbeat,
    /// Document busy; resend the same request later
    Retry,
    /// Document gone; start a new session
    SessionExpired,
    /// Processing failed
    Error,
}

impl ResponseKind {
    /// HTTP-equivalent status
    #[must_use]
    pub fn default_status(self) -> u16 {
        match self {
            Self::Retry => 503,
            Self::SessionExpired => 410,
            Self::Error => 500,
            _ => 200,
        }
    }
}

/// Body of a successful event response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventResponse {
    /// Client-held state to rebuild the document from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_state: Option<String>,
    /// Comparator output and repeat index changes
    #[serde(default)]
    pub control_values: Vec<Instruction>,
    /// Side effects
    #[serde(flatten)]
    pub actions: PendingActions,
}

impl EventResponse {
    /// Encode as the wire body
    ///
    /// # Errors
    /// Returns the serializer error; never expected for these types.
    pub fn to_body(&self) -> Result<Arc<[u8]>, serde_json::Error> {
        Ok(serde_json::to_vec(self)?.into())
    }
}

/// Body of an error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDocument {
    /// Application-level error code
    pub code: String,
    /// Client-visible message
    pub message: String,
}

/// Response ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    kind: ResponseKind,
    status: u16,
    body: Arc<[u8]>,
}

impl Response {
    /// Response with the kind's default status
    #[must_use]
    pub fn new(kind: ResponseKind, body: Arc<[u8]>) -> Self {
        Self {
            kind,
            status: kind.default_status(),
            body,
        }
    }

    /// Error-class response carrying an [`ErrorDocument`]
    #[must_use]
    pub fn error(kind: ResponseKind, status: u16, code: &str, message: &str) -> Self {
        let document = ErrorDocument {
            code: code.to_string(),
            message: message.to_string(),
        };
        let body = serde_json::to_vec(&document).unwrap_or_else(|_| code.as_bytes().to_vec());
        Self {
            kind,
            status,
            body: body.into(),
        }
    }

    /// Keep-alive acknowledgement
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(ResponseKind::Heartbeat, Arc::from(&b"{}"[..]))
    }

    /// Protocol shape
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// HTTP-equivalent status
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Encoded body
    #[inline]
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Shared handle on the body
    #[inline]
    #[must_use]
    pub fn body_handle(&self) -> Arc<[u8]> {
        Arc::clone(&self.body)
    }

    /// Whether the client gets a normal answer
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Decode the body as an event response
    ///
    /// # Errors
    /// Returns the decoder error for error-class bodies.
    pub fn event_response(&self) -> Result<EventResponse, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Decode the body as an error document
    ///
    /// # Errors
    /// Returns the decoder error for non-error bodies.
    pub fn error_document(&self) -> Result<ErrorDocument, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formsync_control::EffectiveId;
    use formsync_session::MessageLevel;

    #[test]
    fn event_response_flattens_actions() {
        let mut actions = PendingActions::new();
        actions.message(MessageLevel::Modal, "Saved");
        actions.focus(EffectiveId::new("c1"));
        let response = EventResponse {
            dynamic_state: None,
            control_values: vec![Instruction::InnerHtml {
                id: EffectiveId::new("g"),
                html: "<div></div>".to_string(),
            }],
            actions,
        };

        let json: serde_json::Value = serde_json::from_slice(&response.to_body().unwrap()).unwrap();
        assert_eq!(json["control-values"][0]["type"], "inner-html");
        assert_eq!(json["messages"][0]["text"], "Saved");
        assert_eq!(json["focus"], "c1");
        assert!(json.get("dynamic-state").is_none());
    }

    #[test]
    fn statuses_by_kind() {
        assert_eq!(Response::heartbeat().status(), 200);
        let retry = Response::error(ResponseKind::Retry, 503, "retry", "Busy");
        assert!(!retry.is_success());
        assert_eq!(retry.error_document().unwrap().code, "retry");
    }
}
