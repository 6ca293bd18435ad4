//! Inbound requests

use formsync_control::EffectiveId;
use formsync_session::DocumentKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the request reached the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// Background request from the client script; never waits for the lock
    #[default]
    Ajax,
    /// Navigation or replayed request; waits up to the configured timeout
    NonInteractive,
}

/// Event originated by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// User edited a value
    ValueChanged {
        /// Edited control
        target: EffectiveId,
        /// New value
        value: String,
    },
    /// Trigger activated
    Activate {
        /// Activated control
        target: EffectiveId,
    },
    /// Control received focus
    Focus {
        /// Focused control
        target: EffectiveId,
    },
    /// Control lost focus
    Blur {
        /// Blurred control
        target: EffectiveId,
    },
    /// User selected a repeat iteration
    RepeatIndex {
        /// Repeat control
        repeat: EffectiveId,
        /// New 1-based index
        index: usize,
    },
    /// Session keep-alive
    Heartbeat,
    /// Upload progress poll
    UploadProgress {
        /// Upload control
        target: EffectiveId,
    },
    /// Any other named event
    Custom {
        /// Event name
        name: String,
        /// Target control
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<EffectiveId>,
        /// Event properties
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, String>,
    },
}

impl ClientEvent {
    /// Named event without target or properties
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom {
            name: name.into(),
            target: None,
            properties: BTreeMap::new(),
        }
    }

    /// Add a property to a custom event; other variants are returned as is
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Custom { properties, .. } = &mut self {
            properties.insert(key.into(), value.into());
        }
        self
    }

    /// Property of a custom event
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        match self {
            Self::Custom { properties, .. } => properties.get(key).map(String::as_str),
            _ => None,
        }
    }

    /// Event name used for handler lookup and logging
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ValueChanged { .. } => "value-changed",
            Self::Activate { .. } => "activate",
            Self::Focus { .. } => "focus",
            Self::Blur { .. } => "blur",
            Self::RepeatIndex { .. } => "repeat-index",
            Self::Heartbeat => "heartbeat",
            Self::UploadProgress { .. } => "upload-progress",
            Self::Custom { name, .. } => name,
        }
    }

    /// Whether the event is answered without touching the document
    #[inline]
    #[must_use]
    pub fn is_fast_path(&self) -> bool {
        matches!(self, Self::Heartbeat | Self::UploadProgress { .. })
    }
}

/// Metadata of a file uploaded with the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Upload control
    pub target: EffectiveId,
    /// Client file name
    pub filename: String,
    /// Media type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Size in bytes
    pub size: u64,
}

/// One request against a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Target document
    pub document: DocumentKey,
    /// Sequence number the client believes the document expects
    pub sequence: u64,
    /// Lock wait class
    #[serde(default)]
    pub kind: RequestKind,
    /// Client-originated events, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ClientEvent>,
    /// Events the server asked the client to send back
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_events: Vec<ClientEvent>,
    /// Upload metadata
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<UploadedFile>,
    /// Diff against the initial snapshot instead of the previous one
    #[serde(default)]
    pub all_events: bool,
    /// Client-held state to rebuild the document from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_state: Option<String>,
    /// Second pass of a replace-all submission
    #[serde(default)]
    pub submission_pass: bool,
}

impl Request {
    /// Ajax request without events
    #[must_use]
    pub fn new(document: DocumentKey, sequence: u64) -> Self {
        Self {
            document,
            sequence,
            kind: RequestKind::Ajax,
            events: Vec::new(),
            server_events: Vec::new(),
            files: Vec::new(),
            all_events: false,
            dynamic_state: None,
            submission_pass: false,
        }
    }

    /// With a client event appended
    #[must_use]
    pub fn with_event(mut self, event: ClientEvent) -> Self {
        self.events.push(event);
        self
    }

    /// With a server event appended
    #[must_use]
    pub fn with_server_event(mut self, event: ClientEvent) -> Self {
        self.server_events.push(event);
        self
    }

    /// With lock wait class
    #[must_use]
    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    /// As an all-events request
    #[must_use]
    pub fn with_all_events(mut self) -> Self {
        self.all_events = true;
        self
    }

    /// As the second pass of a replace-all submission
    #[must_use]
    pub fn with_submission_pass(mut self) -> Self {
        self.submission_pass = true;
        self
    }

    /// With client-held dynamic state
    #[must_use]
    pub fn with_dynamic_state(mut self, blob: impl Into<String>) -> Self {
        self.dynamic_state = Some(blob.into());
        self
    }

    /// Events in dispatch order: server events first, then client events
    pub fn dispatch_order(&self) -> impl Iterator<Item = &ClientEvent> {
        self.server_events.iter().chain(&self.events)
    }

    /// Whether every event is a heartbeat or progress poll
    ///
    /// Requests without any event are not on the fast path: they still
    /// advance the sequence.
    #[must_use]
    pub fn is_fast_path(&self) -> bool {
        !self.submission_pass
            && !self.all_events
            && self.files.is_empty()
            && self.dispatch_order().next().is_some()
            && self.dispatch_order().all(ClientEvent::is_fast_path)
    }
}
