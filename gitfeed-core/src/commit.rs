//! Commit records produced by the walker.

use chrono::{DateTime, Utc};

/// A 40-character lowercase hex commit identifier.
///
/// Construction validates the shape only; whether the repository knows
/// the id is decided at lookup time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(String);

impl CommitId {
    /// Accepts a well-formed 40-hex identifier, rejecting anything else.
    pub fn new(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(CommitId(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// For identifiers whose shape is guaranteed by the producer (e.g.
    /// formatted object ids).
    pub(crate) fn from_hex_unchecked(s: String) -> Self {
        CommitId(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display.
    pub fn short(&self) -> &str {
        &self.0[..7]
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable snapshot of one commit in the history feed.
///
/// `diff` is populated only by single-record fetches; bulk walks leave
/// it empty. `flags` holds whatever annotations the flag store has for
/// this id at delivery time.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub id: CommitId,
    /// Author contact address (the signature's email).
    pub author: String,
    /// Raw commit message bytes; may be multi-line and need not be
    /// valid UTF-8.
    pub message: Vec<u8>,
    pub time: DateTime<Utc>,
    pub diff: Option<Vec<u8>>,
    pub flags: Vec<String>,
}

impl Commit {
    /// First line of the message, decoded lossily.
    pub fn summary(&self) -> String {
        let first = self
            .message
            .split(|&b| b == b'\n')
            .next()
            .unwrap_or_default();
        String::from_utf8_lossy(first).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_id_accepts_well_formed_hex() {
        let id = CommitId::new("a".repeat(40)).unwrap();
        assert_eq!(id.as_str().len(), 40);
        assert_eq!(id.short().len(), 7);
    }

    #[test]
    fn commit_id_normalizes_case() {
        let id = CommitId::new("ABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
        assert_eq!(id.as_str(), "abcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn commit_id_rejects_bad_shapes() {
        assert!(CommitId::new("").is_none());
        assert!(CommitId::new("abc123").is_none());
        assert!(CommitId::new("g".repeat(40)).is_none());
        assert!(CommitId::new("a".repeat(41)).is_none());
    }

    #[test]
    fn summary_is_first_message_line() {
        let commit = Commit {
            id: CommitId::new("b".repeat(40)).unwrap(),
            author: "dev@example.org".into(),
            message: b"Fix the frobnicator\n\nLong explanation here.\n".to_vec(),
            time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            diff: None,
            flags: Vec::new(),
        };
        assert_eq!(commit.summary(), "Fix the frobnicator");
    }
}
