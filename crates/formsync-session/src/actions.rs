//! Side effects accumulated during event dispatch
//!
//! Dispatch records what the client must do besides applying control diffs.
//! The orchestrator drains [`PendingActions`] exactly once, into the response
//! of the request that produced them.

use formsync_control::EffectiveId;
use serde::{Deserialize, Serialize};

/// How a message is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    /// Blocks the form until dismissed
    Modal,
    /// Shown without blocking
    Modeless,
}

/// Message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Presentation
    pub level: MessageLevel,
    /// Text
    pub text: String,
}

/// Client-side script invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptCall {
    /// Script name
    pub name: String,
    /// Control the script runs against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EffectiveId>,
}

/// Where a loaded resource is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadTarget {
    /// Replace the current page
    Replace,
    /// Open a new window
    New,
}

/// Load or redirect directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadDirective {
    /// Resource URL
    pub url: String,
    /// Presentation
    pub show: LoadTarget,
}

/// Event the client must send back in a follow-up request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Event name
    pub name: String,
    /// Target control
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EffectiveId>,
}

/// Submission that replaces the whole page, run once the lock is released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredSubmission {
    /// Submission id within the form
    pub id: String,
    /// Target URL
    pub action: String,
    /// Serialized instance data
    #[serde(default)]
    pub body: String,
}

/// Side effects collected for the next response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingActions {
    /// Messages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    /// Script invocations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScriptCall>,
    /// Control to focus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<EffectiveId>,
    /// Control to blur
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur: Option<EffectiveId>,
    /// Load and redirect directives
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loads: Vec<LoadDirective>,
    /// Control whose help is shown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<EffectiveId>,
    /// Events to echo back
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_events: Vec<ServerEvent>,
    /// Form-level errors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Replace-all submission awaiting the lock release
    #[serde(skip)]
    pub deferred_submission: Option<DeferredSubmission>,
}

impl PendingActions {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message
    pub fn message(&mut self, level: MessageLevel, text: impl Into<String>) {
        self.messages.push(Message {
            level,
            text: text.into(),
        });
    }

    /// Queue a script invocation
    pub fn script(&mut self, name: impl Into<String>, target: Option<EffectiveId>) {
        self.scripts.push(ScriptCall {
            name: name.into(),
            target,
        });
    }

    /// Move focus; the last call wins
    pub fn focus(&mut self, id: EffectiveId) {
        self.focus = Some(id);
    }

    /// Remove focus from a control
    pub fn blur(&mut self, id: EffectiveId) {
        self.blur = Some(id);
    }

    /// Queue a load directive
    pub fn load(&mut self, url: impl Into<String>, show: LoadTarget) {
        self.loads.push(LoadDirective {
            url: url.into(),
            show,
        });
    }

    /// Show help for a control
    pub fn help(&mut self, id: EffectiveId) {
        self.help = Some(id);
    }

    /// Queue an event for the client to send back
    pub fn server_event(&mut self, name: impl Into<String>, target: Option<EffectiveId>) {
        self.server_events.push(ServerEvent {
            name: name.into(),
            target,
        });
    }

    /// Record a form-level error
    pub fn error(&mut self, text: impl Into<String>) {
        self.errors.push(text.into());
    }

    /// Schedule a replace-all submission
    ///
    /// The client is asked to come back with a follow-up request carrying the
    /// submission's server event.
    pub fn defer_submission(&mut self, submission: DeferredSubmission) {
        self.server_event("submission", None);
        self.deferred_submission = Some(submission);
    }

    /// Whether a replace-all submission is scheduled
    #[inline]
    #[must_use]
    pub fn submission_required(&self) -> bool {
        self.deferred_submission.is_some()
    }

    /// Take the scheduled replace-all submission
    #[inline]
    pub fn take_submission(&mut self) -> Option<DeferredSubmission> {
        self.deferred_submission.take()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Append everything pending in `other`
    ///
    /// Single-valued directives (focus, blur, help, submission) from
    /// `other` win.
    pub fn extend(&mut self, other: PendingActions) {
        self.messages.extend(other.messages);
        self.scripts.extend(other.scripts);
        self.loads.extend(other.loads);
        self.server_events.extend(other.server_events);
        self.errors.extend(other.errors);
        self.focus = other.focus.or(self.focus.take());
        self.blur = other.blur.or(self.blur.take());
        self.help = other.help.or(self.help.take());
        self.deferred_submission = other.deferred_submission.or(self.deferred_submission.take());
    }

    /// Take everything destined for the next response
    ///
    /// A scheduled submission stays behind: it is run by the follow-up
    /// request, not delivered.
    pub fn drain(&mut self) -> Self {
        let submission = self.deferred_submission.take();
        let drained = std::mem::take(self);
        self.deferred_submission = submission;
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_set() {
        let mut pending = PendingActions::new();
        pending.message(MessageLevel::Modal, "Saved");
        pending.focus(EffectiveId::new("c1"));
        assert!(!pending.is_empty());

        let drained = pending.drain();
        assert!(pending.is_empty());
        assert_eq!(drained.messages.len(), 1);
        assert_eq!(drained.focus, Some(EffectiveId::new("c1")));
    }

    #[test]
    fn deferred_submission_requests_server_event() {
        let mut pending = PendingActions::new();
        pending.defer_submission(DeferredSubmission {
            id: "save".to_string(),
            action: "/save".to_string(),
            body: String::new(),
        });
        assert!(pending.submission_required());
        assert_eq!(pending.server_events[0].name, "submission");

        let drained = pending.drain();
        assert_eq!(drained.server_events.len(), 1);
        assert!(pending.submission_required());
        assert!(pending.take_submission().is_some());
        assert!(pending.is_empty());
    }

    #[test]
    fn extend_appends_and_overrides_focus() {
        let mut pending = PendingActions::new();
        pending.focus(EffectiveId::new("a"));
        pending.error("first");

        let mut other = PendingActions::new();
        other.focus(EffectiveId::new("b"));
        other.error("second");
        pending.extend(other);

        assert_eq!(pending.focus, Some(EffectiveId::new("b")));
        assert_eq!(pending.errors, vec!["first".to_string(), "second".to_string()]);
    }
}
