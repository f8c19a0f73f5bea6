//! Sequence scopes and allocated ranges.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::entity_ids::{AccountId, SessionId};
use crate::error::ProtocolError;

/// Counter value of a freshly created scope. The first allocated seq is
/// `SEQ_FLOOR + 1`.
pub const SEQ_FLOOR: i64 = 0;

/// Kind of unit owning a sequence counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Account,
    Session,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Account => "account",
            ScopeKind::Session => "session",
        }
    }
}

impl FromStr for ScopeKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" | "accounts" => Ok(ScopeKind::Account),
            "session" | "sessions" => Ok(ScopeKind::Session),
            other => Err(ProtocolError::UnknownScopeKind(other.to_string())),
        }
    }
}

/// The unit that owns one sequence counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ScopeKey {
    Account(AccountId),
    Session(SessionId),
}

impl ScopeKey {
    pub fn new(kind: ScopeKind, id: Uuid) -> Self {
        match kind {
            ScopeKind::Account => ScopeKey::Account(AccountId::from_uuid(id)),
            ScopeKind::Session => ScopeKey::Session(SessionId::from_uuid(id)),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            ScopeKey::Account(_) => ScopeKind::Account,
            ScopeKey::Session(_) => ScopeKind::Session,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            ScopeKey::Account(id) => id.into_uuid(),
            ScopeKey::Session(id) => id.into_uuid(),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.uuid())
    }
}

impl From<AccountId> for ScopeKey {
    fn from(id: AccountId) -> Self {
        ScopeKey::Account(id)
    }
}

impl From<SessionId> for ScopeKey {
    fn from(id: SessionId) -> Self {
        ScopeKey::Session(id)
    }
}

/// A contiguous run of sequence numbers `[start, start + count)`.
///
/// An empty range (`count == 0`) still carries the position the next
/// allocation would start at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceRange {
    pub start: i64,
    pub count: i64,
}

impl SequenceRange {
    /// Builds the range ending at `end` (inclusive) covering `count` numbers.
    pub fn ending_at(end: i64, count: i64) -> Self {
        Self {
            start: end - count + 1,
            count,
        }
    }

    pub fn empty_after(current: i64) -> Self {
        Self {
            start: current + 1,
            count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count <= 0
    }

    /// Last number in the range, `None` when empty.
    pub fn end(&self) -> Option<i64> {
        (!self.is_empty()).then(|| self.start + self.count - 1)
    }

    pub fn contains(&self, seq: i64) -> bool {
        !self.is_empty() && seq >= self.start && seq < self.start + self.count
    }

    pub fn overlaps(&self, other: &SequenceRange) -> bool {
        match (self.end(), other.end()) {
            (Some(a_end), Some(b_end)) => self.start <= b_end && other.start <= a_end,
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> {
        self.start..self.start + self.count.max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_ending_at_covers_count_numbers() {
        let range = SequenceRange::ending_at(8, 3);
        assert_eq!(range.start, 6);
        assert_eq!(range.end(), Some(8));
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![6, 7, 8]);
    }

    #[test]
    fn empty_range_contains_nothing() {
        let range = SequenceRange::empty_after(5);
        assert!(range.is_empty());
        assert_eq!(range.start, 6);
        assert_eq!(range.end(), None);
        assert!(!range.contains(6));
        assert!(!range.overlaps(&SequenceRange::ending_at(6, 1)));
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let a = SequenceRange::ending_at(8, 3);
        let b = SequenceRange::ending_at(11, 3);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&SequenceRange::ending_at(9, 2)));
    }

    #[test]
    fn scope_kind_parses_plural_path_segments() {
        assert_eq!("sessions".parse::<ScopeKind>().unwrap(), ScopeKind::Session);
        assert_eq!("account".parse::<ScopeKind>().unwrap(), ScopeKind::Account);
        assert!("machine".parse::<ScopeKind>().is_err());
    }

    #[test]
    fn scope_key_serializes_with_kind_tag() {
        let id = SessionId::new();
        let json = serde_json::to_value(ScopeKey::Session(id)).unwrap();
        assert_eq!(json["kind"], "session");
        assert_eq!(json["id"], id.to_string());
    }
}
