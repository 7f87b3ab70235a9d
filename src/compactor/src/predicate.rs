//! Streaming obsolescence decision for ordered version scans.
//!
//! Rows must be presented in `(key ascending, height descending)` order. The
//! first row of every key group therefore carries the key's greatest height,
//! which decides whether the entity still has a value worth preserving below
//! the trim height.

use crate::table::{EntityKey, Height};

/// Per-run state of the ordered trim.
#[derive(Debug, Clone)]
pub struct CompactionPredicate {
    trim_height: Height,
    retained_height: Option<Height>,
    previous_key: Option<EntityKey>,
    key_fully_obsolete: bool,
    boundary_kept: bool,
    last_scanned: i64,
}

impl CompactionPredicate {
    pub fn new(trim_height: Height, retained_height: Option<Height>) -> Self {
        Self {
            trim_height,
            retained_height,
            previous_key: None,
            key_fully_obsolete: false,
            boundary_kept: false,
            last_scanned: i64::MIN,
        }
    }

    /// Leading key value of the last row seen. The next batch starts there.
    pub fn resume_marker(&self) -> i64 {
        self.last_scanned
    }

    /// Forget the current key group.
    ///
    /// A batch resumes at the first row of the group it stopped in, so that
    /// group is decided again from its first remaining row.
    pub fn restart_group(&mut self) {
        self.previous_key = None;
        self.key_fully_obsolete = false;
        self.boundary_kept = false;
    }

    /// Returns `true` when the row can be deleted.
    pub fn decide(&mut self, key: &EntityKey, height: Height, latest: bool) -> bool {
        self.last_scanned = key.leading;

        if self.previous_key.as_ref() != Some(key) {
            self.previous_key = Some(key.clone());
            self.key_fully_obsolete = height < self.trim_height && !latest;
            self.boundary_kept = false;
        }

        if height >= self.trim_height || Some(height) == self.retained_height {
            return false;
        }

        if self.key_fully_obsolete {
            true
        } else if !self.boundary_kept {
            self.boundary_kept = true;
            false
        } else {
            true
        }
    }
}
