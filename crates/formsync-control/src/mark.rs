//! Markup checkpoints
//!
//! A [`Mark`] is an immutable recording of the static template markup of one
//! control, taken when the control was first rendered. Replaying it through a
//! [`MarkupHandler`] regenerates the control's whole subtree.

use crate::error::{ControlError, MarkupError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What a placeholder stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderKind {
    /// Control value
    Value,
    /// Control label
    Label,
    /// Effective id of the enclosing control
    Id,
}

/// One recorded serialization event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MarkupEvent {
    /// Opening tag
    StartElement {
        /// Namespace URI, `None` for plain HTML
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        /// Local name
        name: String,
        /// Attributes in document order
        #[serde(default)]
        attributes: Vec<(String, String)>,
    },
    /// Closing tag
    EndElement {
        /// Namespace URI
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        /// Local name
        name: String,
    },
    /// Character data
    Text(String),
    /// Start of the markup produced for a control
    ControlStart {
        /// Prefixed static id
        static_id: String,
    },
    /// End of the innermost control
    ControlEnd,
    /// Start of a repeat; the enclosed events are the iteration template
    RepeatStart {
        /// Prefixed static id
        static_id: String,
    },
    /// End of the innermost repeat
    RepeatEnd,
    /// Current data of the innermost control
    Placeholder(PlaceholderKind),
}

impl MarkupEvent {
    /// Opening tag without namespace
    #[must_use]
    pub fn start(name: impl Into<String>, attributes: &[(&str, &str)]) -> Self {
        Self::StartElement {
            namespace: None,
            name: name.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// Closing tag without namespace
    #[must_use]
    pub fn end(name: impl Into<String>) -> Self {
        Self::EndElement {
            namespace: None,
            name: name.into(),
        }
    }

    /// Character data
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Receives replayed markup events
pub trait MarkupHandler {
    /// Handle one event
    ///
    /// # Errors
    /// Implementation-defined; replay stops at the first error.
    fn event(&mut self, event: &MarkupEvent) -> Result<(), MarkupError>;
}

impl MarkupHandler for Vec<MarkupEvent> {
    fn event(&mut self, event: &MarkupEvent) -> Result<(), MarkupError> {
        self.push(event.clone());
        Ok(())
    }
}

/// Replayable recording of one control's template markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    static_id: String,
    events: Arc<[MarkupEvent]>,
}

impl Mark {
    /// Prefixed static id of the recorded control
    #[inline]
    #[must_use]
    pub fn static_id(&self) -> &str {
        &self.static_id
    }

    /// Recorded events, starting with the control's own start event
    #[inline]
    #[must_use]
    pub fn events(&self) -> &[MarkupEvent] {
        &self.events
    }

    /// Replay every event into `handler`
    ///
    /// # Errors
    /// Propagates the first handler error.
    pub fn replay(&self, handler: &mut dyn MarkupHandler) -> Result<(), MarkupError> {
        self.events.iter().try_for_each(|event| handler.event(event))
    }
}

/// Records markup events while a template renders
#[derive(Debug, Default)]
pub struct MarkRecorder {
    events: Vec<MarkupEvent>,
}

impl MarkRecorder {
    /// Create empty recorder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event
    pub fn record(&mut self, event: MarkupEvent) -> &mut Self {
        self.events.push(event);
        self
    }

    /// Record an element with text content
    pub fn element(&mut self, name: &str, attributes: &[(&str, &str)], text: &str) -> &mut Self {
        self.record(MarkupEvent::start(name, attributes));
        if !text.is_empty() {
            self.record(MarkupEvent::text(text));
        }
        self.record(MarkupEvent::end(name))
    }

    /// Finish recording and split into one mark per control and repeat
    ///
    /// # Errors
    /// Returns [`ControlError::MalformedMark`] on unbalanced input.
    pub fn finish(self) -> Result<MarkStore, ControlError> {
        MarkStore::from_events(&self.events)
    }
}

/// Marks of a form definition, by prefixed static id
#[derive(Debug, Clone, Default)]
pub struct MarkStore {
    marks: HashMap<String, Arc<Mark>>,
}

impl MarkStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a full template recording into per-control marks
    ///
    /// Each `ControlStart`/`RepeatStart` yields a mark spanning up to its
    /// matching end event.
    ///
    /// # Errors
    /// Returns [`ControlError::MalformedMark`] on unbalanced input.
    pub fn from_events(events: &[MarkupEvent]) -> Result<Self, ControlError> {
        let mut store = Self::new();
        let mut open: Vec<(usize, &str, bool)> = Vec::new();
        let mut elements: Vec<&str> = Vec::new();

        for (position, event) in events.iter().enumerate() {
            match event {
                MarkupEvent::ControlStart { static_id } => open.push((position, static_id.as_str(), false)),
                MarkupEvent::RepeatStart { static_id } => open.push((position, static_id.as_str(), true)),
                MarkupEvent::ControlEnd | MarkupEvent::RepeatEnd => {
                    let is_repeat = matches!(event, MarkupEvent::RepeatEnd);
                    let (start, static_id, opened_repeat) = open.pop().ok_or_else(|| {
                        ControlError::MalformedMark(format!("unmatched end at event {position}"))
                    })?;
                    if opened_repeat != is_repeat {
                        return Err(ControlError::MalformedMark(format!(
                            "'{static_id}' closed by the wrong end event"
                        )));
                    }
                    store.insert(Mark {
                        static_id: static_id.to_string(),
                        events: events[start..=position].into(),
                    });
                }
                MarkupEvent::StartElement { name, .. } => elements.push(name.as_str()),
                MarkupEvent::EndElement { name, .. } => match elements.pop() {
                    Some(open_name) if open_name == name.as_str() => {}
                    Some(open_name) => {
                        return Err(ControlError::MalformedMark(format!(
                            "</{name}> closes <{open_name}>"
                        )))
                    }
                    None => {
                        return Err(ControlError::MalformedMark(format!("unmatched </{name}>")))
                    }
                },
                MarkupEvent::Text(_) | MarkupEvent::Placeholder(_) => {}
            }
        }

        if let Some((_, static_id, _)) = open.pop() {
            return Err(ControlError::MalformedMark(format!("'{static_id}' never closed")));
        }
        if let Some(name) = elements.pop() {
            return Err(ControlError::MalformedMark(format!("<{name}> never closed")));
        }

        tracing::debug!("Recorded {} marks", store.len());
        Ok(store)
    }

    /// Add or replace a mark
    pub fn insert(&mut self, mark: Mark) {
        self.marks.insert(mark.static_id.clone(), Arc::new(mark));
    }

    /// Mark for a prefixed static id
    #[inline]
    #[must_use]
    pub fn get(&self, static_id: &str) -> Option<&Arc<Mark>> {
        self.marks.get(static_id)
    }

    /// Whether a mark exists for a prefixed static id
    #[inline]
    #[must_use]
    pub fn contains(&self, static_id: &str) -> bool {
        self.marks.contains_key(static_id)
    }

    /// Number of marks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Vec<MarkupEvent> {
        vec![
            MarkupEvent::ControlStart { static_id: "g".into() },
            MarkupEvent::start("div", &[("class", "group")]),
            MarkupEvent::ControlStart { static_id: "c1".into() },
            MarkupEvent::start("input", &[]),
            MarkupEvent::Placeholder(PlaceholderKind::Value),
            MarkupEvent::end("input"),
            MarkupEvent::ControlEnd,
            MarkupEvent::RepeatStart { static_id: "r1".into() },
            MarkupEvent::ControlStart { static_id: "v".into() },
            MarkupEvent::Placeholder(PlaceholderKind::Value),
            MarkupEvent::ControlEnd,
            MarkupEvent::RepeatEnd,
            MarkupEvent::end("div"),
            MarkupEvent::ControlEnd,
        ]
    }

    #[test]
    fn from_events_splits_nested_marks() {
        let store = MarkStore::from_events(&template()).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store.get("g").unwrap().events().len(), 14);
        assert_eq!(store.get("c1").unwrap().events().len(), 5);
        assert_eq!(store.get("r1").unwrap().events().len(), 5);
    }

    #[test]
    fn replay_reproduces_events() {
        let store = MarkStore::from_events(&template()).unwrap();
        let mark = store.get("c1").unwrap();
        let mut out: Vec<MarkupEvent> = Vec::new();
        mark.replay(&mut out).unwrap();
        assert_eq!(out.as_slice(), mark.events());
    }

    #[test]
    fn unbalanced_recordings_are_rejected() {
        let events = vec![MarkupEvent::ControlStart { static_id: "g".into() }];
        assert!(MarkStore::from_events(&events).is_err());

        let events = vec![MarkupEvent::RepeatStart { static_id: "r".into() }, MarkupEvent::ControlEnd];
        assert!(MarkStore::from_events(&events).is_err());

        let events = vec![MarkupEvent::start("div", &[]), MarkupEvent::end("span")];
        assert!(MarkStore::from_events(&events).is_err());
    }

    #[test]
    fn recorder_builds_store() {
        let mut recorder = MarkRecorder::new();
        recorder
            .record(MarkupEvent::ControlStart { static_id: "c1".into() })
            .element("span", &[("class", "value")], "static")
            .record(MarkupEvent::ControlEnd);
        let store = recorder.finish().unwrap();
        assert!(store.contains("c1"));
    }
}
