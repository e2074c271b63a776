//! The account/storage/code composition over the trie.

use crate::StateError;
use ember_store::{KvStore, Namespace, WriteBatch};
use ember_trie::Trie;
use ember_types::{keccak256, Account, Address, Hash, EMPTY_ROOT, KECCAK_EMPTY};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only account access, the view admission checks go through.
pub trait AccountReader: Send + Sync {
    fn account(&self, addr: &Address) -> Result<Option<Account>, StateError>;
}

/// A mutable working copy of the world state at one root.
///
/// Reads resolve dirty entries first, then the underlying tries. Writes
/// accumulate in dirty maps (`BTreeMap`, so commit batches are
/// byte-deterministic) until `commit(self)` folds them into fresh trie
/// versions. Like [`Trie`], committing consumes the handle.
pub struct StateDb {
    store: Arc<dyn KvStore>,
    accounts: Trie,
    dirty_accounts: BTreeMap<Address, Account>,
    dirty_storage: BTreeMap<Address, BTreeMap<Hash, Hash>>,
    dirty_code: BTreeMap<Hash, Vec<u8>>,
}

impl StateDb {
    pub fn new(store: Arc<dyn KvStore>, root: Hash) -> Self {
        StateDb {
            accounts: Trie::new(store.clone(), root),
            store,
            dirty_accounts: BTreeMap::new(),
            dirty_storage: BTreeMap::new(),
            dirty_code: BTreeMap::new(),
        }
    }

    pub fn get_account(&self, addr: &Address) -> Result<Option<Account>, StateError> {
        if let Some(account) = self.dirty_accounts.get(addr) {
            return Ok(Some(account.clone()));
        }
        self.load_account(addr)
    }

    fn load_account(&self, addr: &Address) -> Result<Option<Account>, StateError> {
        match self.accounts.get(&account_key(addr))? {
            Some(bytes) => Ok(Some(
                Account::rlp_decode(&bytes).map_err(|e| StateError::CorruptAccount(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn set_account(&mut self, addr: Address, account: Account) {
        self.dirty_accounts.insert(addr, account);
    }

    /// Storage slot read; absent slots are zero.
    pub fn get_storage(&self, addr: &Address, slot: &Hash) -> Result<Hash, StateError> {
        if let Some(value) = self.dirty_storage.get(addr).and_then(|m| m.get(slot)) {
            return Ok(*value);
        }
        let Some(account) = self.get_account(addr)? else {
            return Ok(Hash::ZERO);
        };
        if account.storage_root == EMPTY_ROOT {
            return Ok(Hash::ZERO);
        }
        let storage = Trie::new(self.store.clone(), account.storage_root);
        match storage.get(&storage_key(slot))? {
            Some(bytes) => {
                Hash::from_slice(&bytes).map_err(|e| StateError::CorruptStorage(e.to_string()))
            }
            None => Ok(Hash::ZERO),
        }
    }

    pub fn set_storage(&mut self, addr: Address, slot: Hash, value: Hash) {
        self.dirty_storage.entry(addr).or_default().insert(slot, value);
    }

    /// Code lookup by hash. [`KECCAK_EMPTY`] resolves to no code.
    pub fn get_code(&self, code_hash: &Hash) -> Result<Vec<u8>, StateError> {
        if *code_hash == KECCAK_EMPTY {
            return Ok(Vec::new());
        }
        if let Some(code) = self.dirty_code.get(code_hash) {
            return Ok(code.clone());
        }
        Ok(self
            .store
            .get(Namespace::Trie, code_hash.as_bytes())?
            .unwrap_or_default())
    }

    /// Attach `code` to `addr`, creating the account if needed. Returns the
    /// code hash.
    pub fn set_code(&mut self, addr: Address, code: Vec<u8>) -> Result<Hash, StateError> {
        let code_hash = keccak256(&code);
        let mut account = self.get_account(&addr)?.unwrap_or_default();
        account.code_hash = code_hash;
        self.set_account(addr, account);
        self.dirty_code.insert(code_hash, code);
        Ok(code_hash)
    }

    /// State root over the pending mutations, without persisting anything.
    pub fn intermediate_root(&self) -> Result<Hash, StateError> {
        let (trie, _nodes) = self.apply_pending()?;
        Ok(trie.root_hash())
    }

    /// Seal this version. Returns the new root and a batch of trie nodes
    /// and code blobs that, applied atomically to the store, make the root
    /// durable. Consumes the handle; reload from the new root to continue.
    pub fn commit(self) -> Result<(Hash, WriteBatch), StateError> {
        let (trie, mut nodes) = self.apply_pending()?;
        let (root, account_nodes) = trie.commit();
        nodes.extend(account_nodes);

        let mut batch = WriteBatch::new();
        for (hash, bytes) in nodes {
            batch.put(Namespace::Trie, hash.to_vec(), bytes);
        }
        for (hash, code) in self.dirty_code {
            batch.put(Namespace::Trie, hash.to_vec(), code);
        }
        Ok((root, batch))
    }

    /// Fold pending storage writes and account updates into a working
    /// account trie. Storage tries commit first so the account records
    /// carry their new storage roots.
    fn apply_pending(&self) -> Result<(Trie, Vec<(Hash, Vec<u8>)>), StateError> {
        let mut nodes = Vec::new();
        let mut touched = self.dirty_accounts.clone();

        for (addr, writes) in &self.dirty_storage {
            let account = match touched.get(addr) {
                Some(account) => account.clone(),
                None => self.load_account(addr)?.unwrap_or_default(),
            };
            let mut storage = Trie::new(self.store.clone(), account.storage_root);
            for (slot, value) in writes {
                storage.insert(&storage_key(slot), value.to_vec())?;
            }
            let (storage_root, storage_nodes) = storage.commit();
            nodes.extend(storage_nodes);
            let mut account = account;
            account.storage_root = storage_root;
            touched.insert(*addr, account);
        }

        let mut accounts = self.accounts.clone();
        for (addr, account) in &touched {
            accounts.insert(&account_key(addr), account.rlp_encode())?;
        }
        Ok((accounts, nodes))
    }
}

impl AccountReader for StateDb {
    fn account(&self, addr: &Address) -> Result<Option<Account>, StateError> {
        self.get_account(addr)
    }
}

fn account_key(addr: &Address) -> Vec<u8> {
    keccak256(addr.as_bytes()).to_vec()
}

fn storage_key(slot: &Hash) -> Vec<u8> {
    keccak256(slot.as_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_store::MemStore;
    use ember_types::test_utils::coins;
    use primitive_types::U256;

    fn fresh() -> (Arc<dyn KvStore>, StateDb) {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let db = StateDb::new(store.clone(), EMPTY_ROOT);
        (store, db)
    }

    fn addr(seed: u8) -> Address {
        Address::from_hash(&keccak256(&[seed]))
    }

    #[test]
    fn empty_state_has_empty_root() {
        let (_store, db) = fresh();
        assert_eq!(db.intermediate_root().unwrap(), EMPTY_ROOT);
    }

    #[test]
    fn account_round_trip_through_commit() {
        let (store, mut db) = fresh();
        let a = addr(1);
        db.set_account(a, Account::with_balance(coins(100)));
        let (root, batch) = db.commit().unwrap();
        store.write(batch).unwrap();

        let reloaded = StateDb::new(store, root);
        let account = reloaded.get_account(&a).unwrap().unwrap();
        assert_eq!(account.balance, coins(100));
        assert_eq!(account.nonce, 0);
    }

    #[test]
    fn intermediate_root_matches_commit_root() {
        let (_store, mut db) = fresh();
        db.set_account(addr(1), Account::with_balance(coins(1)));
        db.set_account(addr(2), Account::with_balance(coins(2)));
        let expected = db.intermediate_root().unwrap();
        let (root, _batch) = db.commit().unwrap();
        assert_eq!(root, expected);
    }

    #[test]
    fn storage_writes_change_account_root() {
        let (store, mut db) = fresh();
        let a = addr(3);
        db.set_account(a, Account::with_balance(coins(1)));
        db.set_storage(a, keccak256(b"slot"), keccak256(b"value"));
        let (root, batch) = db.commit().unwrap();
        store.write(batch).unwrap();

        let reloaded = StateDb::new(store, root);
        assert_eq!(
            reloaded.get_storage(&a, &keccak256(b"slot")).unwrap(),
            keccak256(b"value")
        );
        assert_eq!(
            reloaded.get_storage(&a, &keccak256(b"other")).unwrap(),
            Hash::ZERO
        );
        let account = reloaded.get_account(&a).unwrap().unwrap();
        assert_ne!(account.storage_root, EMPTY_ROOT);
    }

    #[test]
    fn code_round_trip() {
        let (store, mut db) = fresh();
        let a = addr(4);
        let code = vec![0x60, 0x00, 0x60, 0x00, 0xf3];
        let code_hash = db.set_code(a, code.clone()).unwrap();
        let (root, batch) = db.commit().unwrap();
        store.write(batch).unwrap();

        let reloaded = StateDb::new(store, root);
        assert_eq!(reloaded.get_code(&code_hash).unwrap(), code);
        let account = reloaded.get_account(&a).unwrap().unwrap();
        assert!(account.has_code());
        assert_eq!(account.code_hash, code_hash);
    }

    #[test]
    fn deterministic_roots_across_write_orders() {
        let (_s1, mut db1) = fresh();
        let (_s2, mut db2) = fresh();
        for i in 0..20u8 {
            db1.set_account(addr(i), Account::with_balance(U256::from(i)));
        }
        for i in (0..20u8).rev() {
            db2.set_account(addr(i), Account::with_balance(U256::from(i)));
        }
        assert_eq!(
            db1.intermediate_root().unwrap(),
            db2.intermediate_root().unwrap()
        );
    }

    #[test]
    fn dirty_reads_see_pending_writes() {
        let (_store, mut db) = fresh();
        let a = addr(5);
        db.set_account(a, Account::with_balance(coins(7)));
        assert_eq!(db.get_account(&a).unwrap().unwrap().balance, coins(7));
        db.set_storage(a, Hash::ZERO, keccak256(b"x"));
        assert_eq!(db.get_storage(&a, &Hash::ZERO).unwrap(), keccak256(b"x"));
    }
}
