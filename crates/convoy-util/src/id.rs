//! ULID-based identifier generation with prefixes.
//!
//! Identifiers in convoy follow the pattern: `prefix_ulid`
//! For example: `cnv_01HQXYZ...` for conversations.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    User,
    Conversation,
    Message,
    Prompt,
    Block,
    PromptEvent,
    ToolCall,
}

impl IdPrefix {
    /// Get the string prefix for this identifier type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::User => "usr",
            IdPrefix::Conversation => "cnv",
            IdPrefix::Message => "msg",
            IdPrefix::Prompt => "prm",
            IdPrefix::Block => "blk",
            IdPrefix::PromptEvent => "pev",
            IdPrefix::ToolCall => "tlc",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "usr" => Some(IdPrefix::User),
            "cnv" => Some(IdPrefix::Conversation),
            "msg" => Some(IdPrefix::Message),
            "prm" => Some(IdPrefix::Prompt),
            "blk" => Some(IdPrefix::Block),
            "pev" => Some(IdPrefix::PromptEvent),
            "tlc" => Some(IdPrefix::ToolCall),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    ///
    /// This is the default for most identifiers where we want
    /// chronological ordering.
    pub fn ascending(prefix: IdPrefix) -> String {
        let ulid = Ulid::new();
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Generate a new descending identifier (newer = smaller).
    ///
    /// Used for conversation IDs so the most recently created
    /// conversation sorts first under a plain lexicographic key scan.
    pub fn descending(prefix: IdPrefix) -> String {
        let ulid = Ulid::new();
        let inverted = !ulid.0;
        let inverted_ulid = Ulid(inverted);
        format!(
            "{}_{}",
            prefix.as_str(),
            inverted_ulid.to_string().to_lowercase()
        )
    }

    /// Generate an identifier with a specific ULID (for testing or imports).
    pub fn with_ulid(prefix: IdPrefix, ulid: Ulid) -> String {
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Parse an identifier into its prefix and ULID parts.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let parts: Vec<&str> = id.splitn(2, '_').collect();
        if parts.len() != 2 {
            return None;
        }

        let prefix = IdPrefix::parse(parts[0])?;
        let ulid = Ulid::from_string(parts[1]).ok()?;
        Some((prefix, ulid))
    }

    /// Check if an identifier has the expected prefix.
    pub fn has_prefix(id: &str, prefix: IdPrefix) -> bool {
        id.starts_with(prefix.as_str()) && id.chars().nth(prefix.as_str().len()) == Some('_')
    }

    /// Generate a user ID (ascending).
    pub fn user() -> String {
        Self::ascending(IdPrefix::User)
    }

    /// Generate a conversation ID (descending for recency sort).
    pub fn conversation() -> String {
        Self::descending(IdPrefix::Conversation)
    }

    /// Generate a message ID (ascending for chronological order).
    pub fn message() -> String {
        Self::ascending(IdPrefix::Message)
    }

    /// Generate a prompt ID (ascending for chronological order).
    pub fn prompt() -> String {
        Self::ascending(IdPrefix::Prompt)
    }

    /// Generate a block ID (ascending for chronological order).
    pub fn block() -> String {
        Self::ascending(IdPrefix::Block)
    }

    /// Generate a prompt event ID (ascending, matches `indexNum` ordering).
    pub fn prompt_event() -> String {
        Self::ascending(IdPrefix::PromptEvent)
    }

    /// Generate a tool call ID (ascending).
    pub fn tool_call() -> String {
        Self::ascending(IdPrefix::ToolCall)
    }
}
