use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hydration priority. Higher variants are dequeued first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Below-the-fold decoration, hydrated last.
    Low,
    /// Default band.
    #[default]
    Normal,
    /// Content the user is likely to touch soon.
    High,
    /// Must be interactive as soon as possible (e.g. the primary nav).
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// What admits a boundary into the eligible queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// No admission gate; eligible at registration.
    Manual,
    /// Eligible once the bound element intersects the viewport.
    Visible,
    /// Eligible at registration, drained during idle slices.
    #[default]
    Idle,
    /// Hydrated right away, outside the slice budget.
    Immediate,
}

/// Per-boundary lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryStatus {
    Pending,
    Hydrating,
    Hydrated,
    Error,
}

impl BoundaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryStatus::Pending => "pending",
            BoundaryStatus::Hydrating => "hydrating",
            BoundaryStatus::Hydrated => "hydrated",
            BoundaryStatus::Error => "error",
        }
    }

    /// `hydrated` and `error` only leave through an explicit reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BoundaryStatus::Hydrated | BoundaryStatus::Error)
    }
}

impl fmt::Display for BoundaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to interactions captured before a boundary became interactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InteractionStrategy {
    /// Queue interactions and replay them once hydrated.
    #[default]
    Replay,
    /// Drop interactions that arrive before hydration.
    Discard,
    /// Bump the boundary to `critical`, admit it, and replay once hydrated.
    Prioritize,
}

/// Opaque boundary identifier supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundaryId(Arc<str>);

impl BoundaryId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoundaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for BoundaryId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for BoundaryId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BoundaryId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for BoundaryId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// Opaque handle to a mounted visual element, owned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(Arc<str>);

impl ElementHandle {
    pub fn new(handle: impl AsRef<str>) -> Self {
        Self(Arc::from(handle.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementHandle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A user interaction that reached a boundary before it was interactive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Event kind, e.g. `click` or `keydown`.
    pub kind: String,
    /// Optional host-specific target inside the boundary.
    pub target: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn terminal_states() {
        assert!(!BoundaryStatus::Pending.is_terminal());
        assert!(!BoundaryStatus::Hydrating.is_terminal());
        assert!(BoundaryStatus::Hydrated.is_terminal());
        assert!(BoundaryStatus::Error.is_terminal());
    }

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Priority::Critical).unwrap(), "\"critical\"");
        assert_eq!(serde_json::to_string(&TriggerKind::Visible).unwrap(), "\"visible\"");
        assert_eq!(serde_json::to_string(&BoundaryStatus::Hydrating).unwrap(), "\"hydrating\"");
        let s: InteractionStrategy = serde_json::from_str("\"prioritize\"").unwrap();
        assert_eq!(s, InteractionStrategy::Prioritize);
    }

    #[test]
    fn boundary_id_is_transparent() {
        let id = BoundaryId::from("hero");
        assert_eq!(id.to_string(), "hero");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"hero\"");
        assert_eq!(id, BoundaryId::from(String::from("hero")));
    }

    #[test]
    fn handles_deserialize_from_plain_strings() {
        let id: BoundaryId = serde_json::from_str("\"hero\"").unwrap();
        assert_eq!(id.as_str(), "hero");
        let el: ElementHandle = serde_json::from_str("\"el-hero\"").unwrap();
        assert_eq!(el, ElementHandle::from("el-hero"));

        let interaction: Interaction = serde_json::from_str(
            r#"{"kind":"click","target":"el-hero","captured_at":"2024-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(interaction.kind, "click");
        assert_eq!(interaction.target.as_deref(), Some("el-hero"));
    }
}
