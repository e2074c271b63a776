//! Ownership of the working state handle across the block lifecycle.

use crate::{StateDb, StateError};
use ember_store::{KvStore, WriteBatch};
use ember_types::Hash;
use std::sync::Arc;

/// Owns the [`StateDb`] between FinalizeBlock and Commit and enforces the
/// reload-after-commit rule: `begin_commit` consumes the handle, and only
/// `finish_commit` (after the batch is durable) or `discard` (crash-replay)
/// produce a fresh one. A missing handle outside that window is an internal
/// invariant violation, so the accessors abort rather than limp on.
pub struct StateManager {
    store: Arc<dyn KvStore>,
    root: Hash,
    db: Option<StateDb>,
}

impl StateManager {
    /// Open the working state at a committed root.
    pub fn load(store: Arc<dyn KvStore>, root: Hash) -> Self {
        StateManager {
            db: Some(StateDb::new(store.clone(), root)),
            store,
            root,
        }
    }

    /// The last durably committed root.
    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn db(&self) -> &StateDb {
        self.db
            .as_ref()
            .expect("state handle consumed: commit in progress")
    }

    pub fn db_mut(&mut self) -> &mut StateDb {
        self.db
            .as_mut()
            .expect("state handle consumed: commit in progress")
    }

    /// Seal the working state. The returned batch must be written to the
    /// store before calling [`finish_commit`]; until then the manager holds
    /// no usable handle.
    pub fn begin_commit(&mut self) -> Result<(Hash, WriteBatch), StateError> {
        let db = self
            .db
            .take()
            .expect("state handle consumed: commit in progress");
        db.commit()
    }

    /// Adopt the new root after its batch is durable and open a fresh
    /// handle on it.
    pub fn finish_commit(&mut self, root: Hash) {
        self.root = root;
        self.db = Some(StateDb::new(self.store.clone(), root));
    }

    /// Drop all in-memory changes and reopen at the last committed root.
    /// This is the crash-replay path: FinalizeBlock can then be re-run.
    pub fn discard(&mut self) {
        self.db = Some(StateDb::new(self.store.clone(), self.root));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_store::MemStore;
    use ember_types::test_utils::coins;
    use ember_types::{keccak256, Account, Address, EMPTY_ROOT};

    fn addr(seed: u8) -> Address {
        Address::from_hash(&keccak256(&[seed]))
    }

    #[test]
    fn commit_cycle_advances_root() {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let mut manager = StateManager::load(store.clone(), EMPTY_ROOT);
        manager
            .db_mut()
            .set_account(addr(1), Account::with_balance(coins(5)));

        let (root, batch) = manager.begin_commit().unwrap();
        store.write(batch).unwrap();
        manager.finish_commit(root);

        assert_eq!(manager.root(), root);
        assert_eq!(
            manager.db().get_account(&addr(1)).unwrap().unwrap().balance,
            coins(5)
        );
    }

    #[test]
    fn discard_drops_uncommitted_changes() {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let mut manager = StateManager::load(store, EMPTY_ROOT);
        manager
            .db_mut()
            .set_account(addr(2), Account::with_balance(coins(9)));
        manager.discard();
        assert_eq!(manager.db().get_account(&addr(2)).unwrap(), None);
        assert_eq!(manager.root(), EMPTY_ROOT);
    }
}
