use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a piece of retrieved or recorded knowledge came from. Drives TTL
/// assignment and the extra freshness rules in the tiered retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceClass {
    Web,
    Document,
    Session,
    Other,
}

impl SourceClass {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "web" => SourceClass::Web,
            "document" => SourceClass::Document,
            "session" => SourceClass::Session,
            _ => SourceClass::Other,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            SourceClass::Web => "web",
            SourceClass::Document => "document",
            SourceClass::Session => "session",
            SourceClass::Other => "other",
        }
    }

    /// TTL assigned at insertion time, by source class.
    pub fn ttl_hours(&self) -> f64 {
        match self {
            SourceClass::Web => 6.0,
            SourceClass::Document => 168.0,
            SourceClass::Session | SourceClass::Other => 24.0,
        }
    }

    /// Minimum confidence required for Tier-2 promotion of an answer from
    /// this source class.
    pub fn promotion_confidence_floor(&self) -> f32 {
        match self {
            SourceClass::Web => 0.95,
            _ => 0.9,
        }
    }
}

/// Tier-1 (in-session) record: one recorded question/answer turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    /// Zero-based insertion index; doubles as the turn's stable id.
    pub turn_id: usize,
    pub query: String,
    pub answer: String,
    pub confidence: f32,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub validated: bool,
    /// Backward-only reference to an earlier turn this one was grounded in.
    #[serde(default)]
    pub context_from_turn: Option<usize>,
}

/// Tier-2 (cross-session) cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub query: String,
    pub answer: String,
    pub confidence: f32,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub ttl_hours: f64,
    pub session_id: String,
}

impl MemoryEntry {
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// Tier-3 (document index) chunk. Immutable once indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub doc_name: String,
    pub chunk_index: usize,
    pub text: String,
}

const FRESHNESS_KEYWORDS: &[&str] = &[
    "current", "latest", "now", "today", "updated", "recent", "new",
];

/// Whether a query contains one of the freshness keywords that tighten the
/// Tier-2 TTL to one hour.
pub fn contains_freshness_keyword(query: &str) -> bool {
    let lower = query.to_lowercase();
    FRESHNESS_KEYWORDS.iter().any(|kw| lower.split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == *kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_by_source_class() {
        assert_eq!(SourceClass::Web.ttl_hours(), 6.0);
        assert_eq!(SourceClass::Document.ttl_hours(), 168.0);
        assert_eq!(SourceClass::Other.ttl_hours(), 24.0);
    }

    #[test]
    fn freshness_keyword_detection() {
        assert!(contains_freshness_keyword("Who is the current CEO?"));
        assert!(contains_freshness_keyword("what's the latest version"));
        assert!(!contains_freshness_keyword("Who is the CEO of Example Corp?"));
    }

    #[test]
    fn age_hours_computation() {
        let entry = MemoryEntry {
            query: "q".into(),
            answer: "a".into(),
            confidence: 0.95,
            source: "web".into(),
            timestamp: Utc::now() - chrono::Duration::hours(2),
            ttl_hours: 6.0,
            session_id: "s1".into(),
        };
        let age = entry.age_hours(Utc::now());
        assert!((age - 2.0).abs() < 0.01);
    }
}
