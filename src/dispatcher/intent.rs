//! Intent types and free-text classification.
//!
//! Classification runs an ordered rule table over the lowercased text. The
//! first rule with a matching keyword or phrase wins; text matching nothing
//! is `unknown` with confidence 0.3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// Unique identifier for an intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct IntentId(pub String);

impl IntentId {
    /// Create a new unique intent ID.
    pub fn new() -> Self {
        Self(format!("intent_{}", uuid::Uuid::new_v4()))
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IntentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Classified kind of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    /// Information request
    Query,
    /// Imperative system command
    Command,
    /// Create a new resource
    Create,
    /// Modify an existing resource
    Update,
    /// Remove a resource
    Delete,
    /// Move to another screen or location
    Navigate,
    /// Search for content
    Search,
    /// Narrow a result set
    Filter,
    /// Reorder a result set
    Sort,
    /// Several intents joined together
    Compound,
    /// No rule matched
    Unknown,
}

impl IntentType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Query => "query",
            IntentType::Command => "command",
            IntentType::Create => "create",
            IntentType::Update => "update",
            IntentType::Delete => "delete",
            IntentType::Navigate => "navigate",
            IntentType::Search => "search",
            IntentType::Filter => "filter",
            IntentType::Sort => "sort",
            IntentType::Compound => "compound",
            IntentType::Unknown => "unknown",
        }
    }

    /// Whether this intent writes data.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            IntentType::Create | IntentType::Update | IntentType::Delete
        )
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a stored intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Classified, not dispatched yet
    Pending,
    /// Last dispatch succeeded
    Dispatched,
    /// Last dispatch failed
    Failed,
}

/// A classified unit of user or system input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Unique ID
    pub id: IntentId,
    /// Original text
    pub text: String,
    /// Classified type
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    /// Classification confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Subject words left after removing the matched keyword and stopwords
    pub entities: Vec<String>,
    /// Children owned by a compound intent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<IntentId>,
    /// Owning compound intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<IntentId>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Lifecycle status
    pub status: IntentStatus,
}

impl Intent {
    /// Classify `text` into a new pending intent.
    pub fn classify(text: &str) -> Self {
        let (intent_type, confidence, entities) = classify_text(text);
        Self {
            id: IntentId::new(),
            text: text.to_string(),
            intent_type,
            confidence,
            entities,
            child_ids: Vec::new(),
            parent_id: None,
            timestamp: Utc::now(),
            status: IntentStatus::Pending,
        }
    }

    /// Build a compound parent over already-classified children.
    pub fn compound(text: &str, child_ids: Vec<IntentId>, entities: Vec<String>) -> Self {
        Self {
            id: IntentId::new(),
            text: text.to_string(),
            intent_type: IntentType::Compound,
            confidence: 0.8,
            entities,
            child_ids,
            parent_id: None,
            timestamp: Utc::now(),
            status: IntentStatus::Pending,
        }
    }

    /// Attach this intent to a compound parent.
    pub fn with_parent(mut self, parent_id: IntentId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Confidence assigned when no rule matches.
pub const UNKNOWN_CONFIDENCE: f64 = 0.3;

struct Rule {
    intent_type: IntentType,
    confidence: f64,
    /// Single words matched against whole tokens
    keywords: &'static [&'static str],
    /// Multi-word phrases matched as substrings
    phrases: &'static [&'static str],
}

/// Ordered rule table; earlier rules take precedence.
const RULES: &[Rule] = &[
    Rule {
        intent_type: IntentType::Delete,
        confidence: 0.9,
        keywords: &["delete", "remove", "erase", "destroy", "purge", "drop"],
        phrases: &["get rid of"],
    },
    Rule {
        intent_type: IntentType::Create,
        confidence: 0.85,
        keywords: &["create", "add", "new", "make", "compose", "write"],
        phrases: &[],
    },
    Rule {
        intent_type: IntentType::Update,
        confidence: 0.85,
        keywords: &["update", "edit", "change", "modify", "save", "rename", "set"],
        phrases: &[],
    },
    Rule {
        intent_type: IntentType::Navigate,
        confidence: 0.8,
        keywords: &["navigate", "open", "goto"],
        phrases: &["go to", "take me to", "show me"],
    },
    Rule {
        intent_type: IntentType::Search,
        confidence: 0.8,
        keywords: &["search", "find", "locate"],
        phrases: &["look for", "look up"],
    },
    Rule {
        intent_type: IntentType::Filter,
        confidence: 0.75,
        keywords: &["filter", "only", "exclude"],
        phrases: &["limit to"],
    },
    Rule {
        intent_type: IntentType::Sort,
        confidence: 0.75,
        keywords: &["sort", "arrange", "rank"],
        phrases: &["order by"],
    },
    Rule {
        intent_type: IntentType::Command,
        confidence: 0.7,
        keywords: &["run", "execute", "start", "stop", "restart", "enable", "disable", "sync"],
        phrases: &[],
    },
    Rule {
        intent_type: IntentType::Query,
        confidence: 0.7,
        keywords: &["what", "how", "when", "why", "who", "which", "list", "show", "get"],
        phrases: &[],
    },
];

const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "by", "for", "from", "in", "is", "it", "me", "my",
    "of", "on", "please", "the", "then", "this", "to", "with",
];

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Classify text into `(type, confidence, entities)`.
pub fn classify_text(text: &str) -> (IntentType, f64, Vec<String>) {
    let lowered = text.to_lowercase();
    let tokens = tokenize(text);

    for rule in RULES {
        let keyword_hit = tokens
            .iter()
            .any(|token| rule.keywords.contains(&token.as_str()));
        let phrase_hit = rule.phrases.iter().any(|phrase| lowered.contains(phrase));
        if keyword_hit || phrase_hit {
            return (rule.intent_type, rule.confidence, extract_entities(&tokens));
        }
    }

    // Questions without a leading interrogative still read as queries
    if lowered.trim_end().ends_with('?') {
        return (IntentType::Query, 0.6, extract_entities(&tokens));
    }

    (IntentType::Unknown, UNKNOWN_CONFIDENCE, extract_entities(&tokens))
}

fn is_rule_word(token: &str) -> bool {
    RULES.iter().any(|rule| rule.keywords.contains(&token))
}

fn extract_entities(tokens: &[String]) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    for token in tokens {
        if STOPWORDS.contains(&token.as_str()) || is_rule_word(token) {
            continue;
        }
        if !entities.contains(token) {
            entities.push(token.clone());
        }
    }
    entities
}

/// Split compound text into its segments.
///
/// Separators: `;`, `and then`, `then`, and `, and`. Empty segments are
/// dropped.
pub fn split_compound(text: &str) -> Vec<String> {
    let normalized = text
        .replace(" and then ", ";")
        .replace(", and ", ";")
        .replace(" then ", ";");
    normalized
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Conflict Detection
// ============================================================================

/// Two intents that would act destructively on the same subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentConflict {
    /// The delete intent
    pub delete_intent: IntentId,
    /// The create/update intent
    pub write_intent: IntentId,
    /// Entities both intents reference
    pub shared_entities: Vec<String>,
}

/// Conflict rule: a `delete` intent conflicts with a `create` or `update`
/// intent when their entity sets overlap.
pub fn detect_conflict(a: &Intent, b: &Intent) -> Option<IntentConflict> {
    let (delete, write) = match (a.intent_type, b.intent_type) {
        (IntentType::Delete, IntentType::Create | IntentType::Update) => (a, b),
        (IntentType::Create | IntentType::Update, IntentType::Delete) => (b, a),
        _ => return None,
    };

    let shared: Vec<String> = delete
        .entities
        .iter()
        .filter(|entity| write.entities.contains(entity))
        .cloned()
        .collect();

    if shared.is_empty() {
        None
    } else {
        Some(IntentConflict {
            delete_intent: delete.id.clone(),
            write_intent: write.id.clone(),
            shared_entities: shared,
        })
    }
}
