//! Change-log and transmit bookkeeping records.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Index of the cursor record, which holds the next free index.
pub const CURSOR_INDEX: u32 = 0;

/// Index of the first real change record.
pub const FIRST_INDEX: u32 = 1;

/// One entry of a repository's append-only change log.
///
/// A record stored at index `i` carries `next = i + 1`. Paths are artifact
/// paths relative to the repository root, `/`-separated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub next: u32,
    #[serde(default)]
    pub add: BTreeSet<String>,
    #[serde(default)]
    pub remove: BTreeSet<String>,
}

impl ChangeRecord {
    /// A record with no changes, used for cursors and empty logs.
    #[must_use]
    pub fn empty(next: u32) -> Self {
        Self {
            next,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Apply a later record on top of this one.
    ///
    /// A later remove cancels an earlier add; a later add revives an earlier
    /// remove. `next` becomes the later record's.
    pub fn fold(&mut self, later: &ChangeRecord) {
        for path in &later.remove {
            self.add.remove(path);
            self.remove.insert(path.clone());
        }
        for path in &later.add {
            self.remove.remove(path);
            self.add.insert(path.clone());
        }
        self.next = later.next;
    }

    /// Fold a sequence of consecutive records. `None` if empty.
    #[must_use]
    pub fn fold_all<'a>(records: impl IntoIterator<Item = &'a ChangeRecord>) -> Option<Self> {
        let mut records = records.into_iter();
        let mut merged = records.next()?.clone();
        for record in records {
            merged.fold(record);
        }
        Some(merged)
    }

    /// The same changes renumbered for storage at `index`.
    #[must_use]
    pub fn stored_at(&self, index: u32) -> Self {
        Self {
            next: index + 1,
            ..self.clone()
        }
    }
}

/// Direction of a transfer, relative to the local repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Push,
    Pull,
}

impl Direction {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Push => Self::Pull,
            Self::Pull => Self::Push,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

/// Per-remote progress, stored by the local repository.
///
/// `push[remote]` is the next local change index to send to `remote`;
/// `pull[remote]` is the next index of `remote`'s log to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmitRecord {
    #[serde(default)]
    pub push: BTreeMap<String, u32>,
    #[serde(default)]
    pub pull: BTreeMap<String, u32>,
}

impl TransmitRecord {
    /// Next index for `remote` in `direction`, starting at [`FIRST_INDEX`].
    #[must_use]
    pub fn next_index(&self, direction: Direction, remote: &str) -> u32 {
        self.map(direction)
            .get(remote)
            .copied()
            .unwrap_or(FIRST_INDEX)
    }

    pub fn set_next_index(&mut self, direction: Direction, remote: &str, next: u32) {
        let map = match direction {
            Direction::Push => &mut self.push,
            Direction::Pull => &mut self.pull,
        };
        map.insert(remote.to_string(), next);
    }

    fn map(&self, direction: Direction) -> &BTreeMap<String, u32> {
        match direction {
            Direction::Push => &self.push,
            Direction::Pull => &self.pull,
        }
    }
}
