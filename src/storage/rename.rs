//! Pairing of rename and move notifications.
//!
//! The host reports a rename as `rename_from` then `rename_to`, and a move
//! between databases as `move_from` then `move_to`. Index entries name
//! containers by key and database, so they must be relocated once both
//! halves have arrived.
//!
//! ```text
//!            rename_from(db, k)              rename_to(db, k')
//!   Idle  ───────────────────▶ PendingRename ──────────────────▶ Idle + Relocation
//!     │      move_from(db, k)                move_to(db', k)
//!     └────────────────────▶ PendingMove   ──────────────────▶ Idle + Relocation
//! ```
//!
//! Anything out of order resets to `Idle` with a warning.

use bytes::Bytes;
use tracing::warn;

/// Where the coordinator stands between notifications.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RelocationState {
    #[default]
    Idle,
    PendingRename { db: usize, from: Bytes },
    PendingMove { key: Bytes, from_db: usize },
}

/// A completed rename or move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub from_db: usize,
    pub from_key: Bytes,
    pub to_db: usize,
    pub to_key: Bytes,
}

#[derive(Debug, Default)]
pub struct RenameMoveCoordinator {
    state: RelocationState,
}

impl RenameMoveCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RelocationState {
        &self.state
    }

    pub fn rename_from(&mut self, db: usize, key: Bytes) {
        self.discard_pending("rename_from");
        self.state = RelocationState::PendingRename { db, from: key };
    }

    pub fn rename_to(&mut self, db: usize, key: Bytes) -> Option<Relocation> {
        match std::mem::take(&mut self.state) {
            RelocationState::PendingRename { db: from_db, from } if from_db == db => {
                Some(Relocation {
                    from_db,
                    from_key: from,
                    to_db: db,
                    to_key: key,
                })
            }
            other => {
                warn!(?other, db, key = ?key, "Discarding unpaired rename_to");
                None
            }
        }
    }

    pub fn move_from(&mut self, db: usize, key: Bytes) {
        self.discard_pending("move_from");
        self.state = RelocationState::PendingMove { key, from_db: db };
    }

    pub fn move_to(&mut self, db: usize, key: Bytes) -> Option<Relocation> {
        match std::mem::take(&mut self.state) {
            RelocationState::PendingMove {
                key: from_key,
                from_db,
            } if from_key == key => Some(Relocation {
                from_db,
                from_key,
                to_db: db,
                to_key: key,
            }),
            other => {
                warn!(?other, db, key = ?key, "Discarding unpaired move_to");
                None
            }
        }
    }

    fn discard_pending(&mut self, event: &str) {
        if self.state != RelocationState::Idle {
            warn!(state = ?self.state, event, "Discarding pending relocation");
            self.state = RelocationState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_pairs() {
        let mut coordinator = RenameMoveCoordinator::new();
        coordinator.rename_from(3, Bytes::from("a"));
        assert_eq!(
            coordinator.state(),
            &RelocationState::PendingRename {
                db: 3,
                from: Bytes::from("a")
            }
        );

        let relocation = coordinator.rename_to(3, Bytes::from("b")).unwrap();
        assert_eq!(relocation.from_key, Bytes::from("a"));
        assert_eq!(relocation.to_key, Bytes::from("b"));
        assert_eq!((relocation.from_db, relocation.to_db), (3, 3));
        assert_eq!(coordinator.state(), &RelocationState::Idle);
    }

    #[test]
    fn test_move_pairs() {
        let mut coordinator = RenameMoveCoordinator::new();
        coordinator.move_from(0, Bytes::from("k"));
        let relocation = coordinator.move_to(5, Bytes::from("k")).unwrap();
        assert_eq!((relocation.from_db, relocation.to_db), (0, 5));
        assert_eq!(relocation.from_key, relocation.to_key);
    }

    #[test]
    fn test_unpaired_events_reset() {
        let mut coordinator = RenameMoveCoordinator::new();
        assert!(coordinator.rename_to(0, Bytes::from("x")).is_none());
        assert!(coordinator.move_to(0, Bytes::from("x")).is_none());

        coordinator.rename_from(0, Bytes::from("a"));
        assert!(coordinator.move_to(1, Bytes::from("a")).is_none());
        assert_eq!(coordinator.state(), &RelocationState::Idle);

        coordinator.move_from(0, Bytes::from("a"));
        assert!(coordinator.move_to(1, Bytes::from("other")).is_none());

        coordinator.rename_from(0, Bytes::from("a"));
        assert!(coordinator.rename_to(1, Bytes::from("b")).is_none());

        // A new from-event replaces a stale pending one
        coordinator.rename_from(0, Bytes::from("a"));
        coordinator.move_from(2, Bytes::from("m"));
        assert_eq!(
            coordinator.state(),
            &RelocationState::PendingMove {
                key: Bytes::from("m"),
                from_db: 2
            }
        );
    }
}
