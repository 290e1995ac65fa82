//! Prefixed ULID identifiers.
//!
//! Identifiers look like `snp_01hqxyz...`: a short kind prefix, an
//! underscore, then a lowercase ULID. ULIDs sort by creation time, so ids of
//! one kind sort chronologically.

use ulid::Ulid;

/// What an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// A captured snapshot.
    Snapshot,
    /// One invocation of the runner.
    Run,
}

impl IdKind {
    const ALL: [IdKind; 2] = [IdKind::Snapshot, IdKind::Run];

    pub fn prefix(&self) -> &'static str {
        match self {
            IdKind::Snapshot => "snp",
            IdKind::Run => "run",
        }
    }
}

/// Identifier generation and inspection.
pub struct Identifier;

impl Identifier {
    /// A fresh identifier of the given kind.
    pub fn new(kind: IdKind) -> String {
        Self::from_ulid(kind, Ulid::new())
    }

    pub fn from_ulid(kind: IdKind, ulid: Ulid) -> String {
        format!("{}_{}", kind.prefix(), ulid.to_string().to_lowercase())
    }

    pub fn snapshot() -> String {
        Self::new(IdKind::Snapshot)
    }

    pub fn run() -> String {
        Self::new(IdKind::Run)
    }

    /// Split an identifier into its kind and ULID.
    pub fn parse(id: &str) -> Option<(IdKind, Ulid)> {
        let (prefix, rest) = id.split_once('_')?;
        let kind = IdKind::ALL.into_iter().find(|k| k.prefix() == prefix)?;
        Some((kind, Ulid::from_string(rest).ok()?))
    }

    /// Kind of a well-formed identifier.
    pub fn kind_of(id: &str) -> Option<IdKind> {
        Self::parse(id).map(|(kind, _)| kind)
    }

    /// Creation time embedded in the identifier, in Unix milliseconds.
    pub fn timestamp_ms(id: &str) -> Option<u64> {
        Self::parse(id).map(|(_, ulid)| ulid.timestamp_ms())
    }
}
