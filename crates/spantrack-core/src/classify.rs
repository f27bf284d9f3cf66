//! Attribution of spans to running-count buckets
//!
//! Classification must give the same answer for every delivery of the same
//! span document, so it is a pure function of the document.

use crate::span::{Span, SpanStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attribute holding the explicit span kind
pub const KIND_ATTRIBUTE: &str = "kind";

/// Attribute-level entity id, accepted for non-dependent categories only
pub const NODE_ID_ATTRIBUTE: &str = "nodeId";

/// Bucket a running span is counted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Agent,
    Tool,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Agent => "agent",
            Category::Tool => "tool",
        }
    }

    /// Dependent work must name its entity explicitly at the top level
    pub fn is_dependent(self) -> bool {
        matches!(self, Category::Tool)
    }

    /// Category named by an explicit `kind` attribute.
    ///
    /// `Some(None)` means the kind is explicit but not counted, which still
    /// suppresses the label heuristic.
    fn from_kind(kind: &str) -> Option<Option<Category>> {
        let kind = kind.trim().to_lowercase();
        if kind.is_empty() {
            return None;
        }
        Some(match kind.as_str() {
            "agent" => Some(Category::Agent),
            "tool" | "tool_call" | "tool.call" => Some(Category::Tool),
            _ => None,
        })
    }

    fn from_label(label: &str) -> Option<Category> {
        let label = label.trim_start().to_lowercase();
        if ["tool:", "tool.", "tool "].iter().any(|p| label.starts_with(p)) {
            Some(Category::Tool)
        } else if label.starts_with("agent") {
            Some(Category::Agent)
        } else {
            None
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent" => Ok(Category::Agent),
            "tool" => Ok(Category::Tool),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// Running-count key, rendered as `entityId|category`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CountKey {
    pub entity_id: String,
    pub category: Category,
}

impl CountKey {
    pub fn new(entity_id: impl Into<String>, category: Category) -> Self {
        Self {
            entity_id: entity_id.into(),
            category,
        }
    }
}

impl fmt::Display for CountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.entity_id, self.category)
    }
}

/// Resolve the span's category. An explicit `kind` wins over the label.
pub fn category_of(span: &Span) -> Option<Category> {
    match span.attribute_str(KIND_ATTRIBUTE).and_then(Category::from_kind) {
        Some(explicit) => explicit,
        None => Category::from_label(&span.label),
    }
}

/// Resolve the entity a span of `category` is attributed to.
///
/// Dependent categories only accept the top-level `nodeId`; no attribute is
/// used as a fallback, so an unattributed tool span is not counted at all.
pub fn entity_of(span: &Span, category: Category) -> Option<&str> {
    let top_level = span.node_id.as_deref().filter(|id| !id.trim().is_empty());
    if category.is_dependent() {
        return top_level;
    }
    top_level.or_else(|| {
        span.attribute_str(NODE_ID_ATTRIBUTE)
            .filter(|id| !id.trim().is_empty())
    })
}

/// Map a span to its count key, if it is attributable
pub fn classify(span: &Span) -> Option<CountKey> {
    let category = category_of(span)?;
    let entity = entity_of(span, category)?;
    Some(CountKey::new(entity, category))
}

/// Either signal is enough to treat a span as live
pub fn is_running(span: &Span) -> bool {
    span.status == SpanStatus::Running || !span.completed
}
