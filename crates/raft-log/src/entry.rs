/// Tag byte identifying the kind of record carried by an [`Entry`].
///
/// Matches the 1-byte `type` field of the on-disk record layout (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    Normal = 0,
    Configuration = 1,
    NoOp = 2,
    SnapshotMarker = 3,
}

impl EntryType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Normal),
            1 => Some(Self::Configuration),
            2 => Some(Self::NoOp),
            3 => Some(Self::SnapshotMarker),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_snapshot_marker(self) -> bool {
        matches!(self, Self::SnapshotMarker)
    }
}

/// A single record in the replicated log.
///
/// `index` is the entry's position in the *global* log (1-based); `term` is
/// the election epoch in which it was appended. Entries are immutable once
/// appended at an index at or below the current commit index (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub entry_type: EntryType,
    /// Retention class; absent unless the embedder assigns one.
    pub mode: Option<u8>,
    pub payload: Vec<u8>,
}

impl Entry {
    pub fn new(index: u64, term: u64, entry_type: EntryType, payload: Vec<u8>) -> Self {
        Self {
            index,
            term,
            entry_type,
            mode: None,
            payload,
        }
    }

    pub fn with_mode(mut self, mode: u8) -> Self {
        self.mode = Some(mode);
        self
    }
}
