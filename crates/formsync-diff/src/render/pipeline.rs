//! Replay pipeline stages
//!
//! Each stage is a [`MarkupHandler`] wrapping the next one. The renderer
//! assembles `UrlRewriter -> NamespaceFilter -> FragmentSerializer` and feeds
//! it the expanded event stream of a mark.

use formsync_control::{MarkupError, MarkupEvent, MarkupHandler};

const URL_ATTRIBUTES: [&str; 4] = ["href", "src", "action", "poster"];

const VOID_ELEMENTS: [&str; 8] = ["area", "br", "col", "hr", "img", "input", "link", "meta"];

/// Rewrites relative URLs against a context path
#[derive(Debug)]
pub struct UrlRewriter<'a, H> {
    context_path: &'a str,
    next: H,
}

impl<'a, H: MarkupHandler> UrlRewriter<'a, H> {
    /// Create stage forwarding to `next`
    #[inline]
    #[must_use]
    pub fn new(context_path: &'a str, next: H) -> Self {
        Self {
            context_path: context_path.trim_end_matches('/'),
            next,
        }
    }

    /// Downstream stage
    #[inline]
    pub fn into_inner(self) -> H {
        self.next
    }

    /// Resolve one URL; absolute URLs and fragments are left alone
    #[must_use]
    pub fn rewrite(&self, url: &str) -> String {
        let untouched = url.is_empty()
            || url.starts_with('#')
            || url.contains("://")
            || ["data:", "javascript:", "mailto:"]
                .iter()
                .any(|scheme| url.starts_with(scheme));
        if untouched {
            return url.to_string();
        }

        if let Some(path) = url.strip_prefix('/') {
            let already_resolved = !self.context_path.is_empty()
                && url
                    .strip_prefix(self.context_path)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
            if already_resolved {
                return url.to_string();
            }
            return format!("{}/{path}", self.context_path);
        }

        format!("{}/{url}", self.context_path)
    }
}

impl<H: MarkupHandler> MarkupHandler for UrlRewriter<'_, H> {
    fn event(&mut self, event: &MarkupEvent) -> Result<(), MarkupError> {
        match event {
            MarkupEvent::StartElement {
                namespace,
                name,
                attributes,
            } if attributes.iter().any(|(k, _)| URL_ATTRIBUTES.contains(&k.as_str())) => {
                let attributes = attributes
                    .iter()
                    .map(|(k, v)| {
                        if URL_ATTRIBUTES.contains(&k.as_str()) {
                            (k.clone(), self.rewrite(v))
                        } else {
                            (k.clone(), v.clone())
                        }
                    })
                    .collect();
                self.next.event(&MarkupEvent::StartElement {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    attributes,
                })
            }
            other => self.next.event(other),
        }
    }
}

/// Drops elements, and everything inside them, in swallowed namespaces
#[derive(Debug)]
pub struct NamespaceFilter<'a, H> {
    swallowed: &'a [String],
    depth: usize,
    next: H,
}

impl<'a, H: MarkupHandler> NamespaceFilter<'a, H> {
    /// Create stage forwarding to `next`
    #[inline]
    #[must_use]
    pub fn new(swallowed: &'a [String], next: H) -> Self {
        Self {
            swallowed,
            depth: 0,
            next,
        }
    }

    /// Downstream stage
    #[inline]
    pub fn into_inner(self) -> H {
        self.next
    }

    fn is_swallowed(&self, namespace: Option<&String>) -> bool {
        namespace.is_some_and(|ns| self.swallowed.contains(ns))
    }
}

impl<H: MarkupHandler> MarkupHandler for NamespaceFilter<'_, H> {
    fn event(&mut self, event: &MarkupEvent) -> Result<(), MarkupError> {
        match event {
            MarkupEvent::StartElement { namespace, .. } if self.depth > 0 || self.is_swallowed(namespace.as_ref()) => {
                self.depth += 1;
                Ok(())
            }
            MarkupEvent::EndElement { .. } if self.depth > 0 => {
                self.depth -= 1;
                Ok(())
            }
            _ if self.depth > 0 => Ok(()),
            other => self.next.event(other),
        }
    }
}

/// Serializes plain element and text events as an HTML fragment
#[derive(Debug, Default)]
pub struct FragmentSerializer {
    out: String,
    open: Vec<String>,
}

impl FragmentSerializer {
    /// Create empty serializer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized fragment
    ///
    /// # Errors
    /// Returns [`MarkupError::Unbalanced`] if elements are still open.
    pub fn finish(self) -> Result<String, MarkupError> {
        match self.open.last() {
            Some(name) => Err(MarkupError::Unbalanced(format!("<{name}> never closed"))),
            None => Ok(self.out),
        }
    }

    fn escape_into(out: &mut String, text: &str, attribute: bool) {
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' if attribute => out.push_str("&quot;"),
                c => out.push(c),
            }
        }
    }
}

impl MarkupHandler for FragmentSerializer {
    fn event(&mut self, event: &MarkupEvent) -> Result<(), MarkupError> {
        match event {
            MarkupEvent::StartElement { name, attributes, .. } => {
                self.out.push('<');
                self.out.push_str(name);
                for (key, value) in attributes {
                    self.out.push(' ');
                    self.out.push_str(key);
                    self.out.push_str("=\"");
                    Self::escape_into(&mut self.out, value, true);
                    self.out.push('"');
                }
                self.out.push('>');
                if !VOID_ELEMENTS.contains(&name.as_str()) {
                    self.open.push(name.clone());
                }
                Ok(())
            }
            MarkupEvent::EndElement { name, .. } => {
                if VOID_ELEMENTS.contains(&name.as_str()) {
                    return Ok(());
                }
                match self.open.pop() {
                    Some(open) if open == *name => {
                        self.out.push_str("</");
                        self.out.push_str(name);
                        self.out.push('>');
                        Ok(())
                    }
                    Some(open) => Err(MarkupError::Unbalanced(format!("</{name}> closes <{open}>"))),
                    None => Err(MarkupError::Unbalanced(format!("unmatched </{name}>"))),
                }
            }
            MarkupEvent::Text(text) => {
                Self::escape_into(&mut self.out, text, false);
                Ok(())
            }
            other => Err(MarkupError::Handler(format!(
                "unexpanded event reached serializer: {other:?}"
            ))),
        }
    }
}
