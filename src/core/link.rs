/// Link markup — `[[target]]`, `[[display|target]]`, `[[display->target]]`.
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::core::template::escape_html;

static LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[(.*?)\]\]").expect("link regex must compile"));

// ASCII word characters only, matching the link grammar.
static EXTERNAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+:///?[A-Za-z0-9_]").expect("external link regex must compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    /// A URL with a scheme; rendered as a plain hyperlink.
    External,
    /// A passage name; rendered as a navigation control.
    Internal,
}

impl LinkKind {
    pub fn classify(target: &str) -> LinkKind {
        if EXTERNAL_PATTERN.is_match(target) {
            LinkKind::External
        } else {
            LinkKind::Internal
        }
    }
}

/// One resolved link, produced per render and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDescriptor {
    pub display: String,
    pub target: String,
    pub kind: LinkKind,
}

impl LinkDescriptor {
    /// Split a raw link body. `|` is checked before `->`; with neither, the
    /// body is both display text and target.
    pub fn parse(body: &str) -> LinkDescriptor {
        let (display, target) = if let Some((display, target)) = body.split_once('|') {
            (display, target)
        } else if let Some((display, target)) = body.split_once("->") {
            (display, target)
        } else {
            (body, body)
        };
        LinkDescriptor {
            display: display.to_string(),
            target: target.to_string(),
            kind: LinkKind::classify(target),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind == LinkKind::Internal
    }

    /// The element this link renders as. Internal links carry the passage
    /// name in `data-passage`; they have no real destination.
    pub fn to_html(&self) -> String {
        let target = escape_html(&self.target);
        match self.kind {
            LinkKind::External => format!(
                r#"<a href="{}" class="external-link">{}</a>"#,
                target, self.display
            ),
            LinkKind::Internal => format!(
                r#"<a href="javascript:void(0)" data-passage="{}" class="passage-link">{}</a>"#,
                target, self.display
            ),
        }
    }
}

/// Text after link rewriting, with the links in order of appearance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RewrittenText {
    pub text: String,
    pub links: Vec<LinkDescriptor>,
}

/// Replace every `[[...]]` with its rendered element. Unterminated `[[` is
/// left as literal text.
pub fn rewrite_links(text: &str) -> RewrittenText {
    let mut links = Vec::new();
    let rewritten = LINK_PATTERN.replace_all(text, |caps: &Captures<'_>| {
        let link = LinkDescriptor::parse(caps.get(1).map_or("", |m| m.as_str()));
        let html = link.to_html();
        links.push(link);
        html
    });
    RewrittenText {
        text: rewritten.into_owned(),
        links,
    }
}

/// Links in `text` without rewriting it.
pub fn extract_links(text: &str) -> Vec<LinkDescriptor> {
    LINK_PATTERN
        .captures_iter(text)
        .map(|caps| LinkDescriptor::parse(caps.get(1).map_or("", |m| m.as_str())))
        .collect()
}
