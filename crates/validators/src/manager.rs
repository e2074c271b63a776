//! The validator set manager.

use crate::{PendingAction, SlashPolicy, ValidatorError, ValidatorParams};
use ember_store::{KvStore, Namespace, WriteBatch, VALIDATOR_EMITTED, VALIDATOR_SET};
use ember_types::{
    power_from_stake, Address, GenesisValidator, PublicKey, Validator, ValidatorUpdate,
};
use parking_lot::RwLock;
use primitive_types::U256;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Inner {
    validators: BTreeMap<Address, Validator>,
    /// The `pub_key -> power` map last handed to the consensus engine.
    /// Deltas are diffs against this, never against the raw set.
    last_emitted: BTreeMap<PublicKey, i64>,
    pending: Vec<PendingAction>,
}

/// Stake accounting, slashing, jailing, and voting-power delta emission.
///
/// Single writer, shared readers. `save`-style operations snapshot under
/// the read lock and serialize after releasing it, so no I/O or
/// serialization ever runs while a lock is held.
pub struct ValidatorSetManager {
    store: Arc<dyn KvStore>,
    params: ValidatorParams,
    policy: SlashPolicy,
    inner: RwLock<Inner>,
}

impl ValidatorSetManager {
    pub fn new(store: Arc<dyn KvStore>, params: ValidatorParams, policy: SlashPolicy) -> Self {
        ValidatorSetManager {
            store,
            params,
            policy,
            inner: RwLock::new(Inner {
                validators: BTreeMap::new(),
                last_emitted: BTreeMap::new(),
                pending: Vec::new(),
            }),
        }
    }

    pub fn params(&self) -> &ValidatorParams {
        &self.params
    }

    /// Load the persisted set, replacing the in-memory one. An absent key
    /// is a fresh chain, not an error.
    pub fn load(&self) -> Result<(), ValidatorError> {
        let set_bytes = self.store.get(Namespace::Meta, VALIDATOR_SET)?;
        let emitted_bytes = self.store.get(Namespace::Meta, VALIDATOR_EMITTED)?;

        let validators: Vec<Validator> = match set_bytes {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| ValidatorError::Codec(e.to_string()))?
            }
            None => {
                tracing::info!("no persisted validators, starting with an empty set");
                Vec::new()
            }
        };
        let last_emitted: Vec<ValidatorUpdate> = match emitted_bytes {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| ValidatorError::Codec(e.to_string()))?
            }
            None => Vec::new(),
        };

        let mut inner = self.inner.write();
        inner.validators = validators.into_iter().map(|v| (v.address, v)).collect();
        inner.last_emitted = last_emitted.into_iter().map(|u| (u.pub_key, u.power)).collect();
        tracing::info!(count = inner.validators.len(), "loaded validator set");
        Ok(())
    }

    /// Persist the current set immediately.
    pub fn save(&self) -> Result<(), ValidatorError> {
        let (set_bytes, emitted_bytes) = self.encode();
        self.store.put(Namespace::Meta, VALIDATOR_SET, &set_bytes)?;
        self.store
            .put(Namespace::Meta, VALIDATOR_EMITTED, &emitted_bytes)?;
        Ok(())
    }

    /// Append the persisted form to a commit batch, so validator state
    /// lands atomically with the block that changed it.
    pub fn persist_into(&self, batch: &mut WriteBatch) {
        let (set_bytes, emitted_bytes) = self.encode();
        batch.put(Namespace::Meta, VALIDATOR_SET.to_vec(), set_bytes);
        batch.put(Namespace::Meta, VALIDATOR_EMITTED.to_vec(), emitted_bytes);
    }

    fn encode(&self) -> (Vec<u8>, Vec<u8>) {
        let (validators, emitted): (Vec<Validator>, Vec<ValidatorUpdate>) = {
            let inner = self.inner.read();
            (
                inner.validators.values().cloned().collect(),
                inner
                    .last_emitted
                    .iter()
                    .map(|(pub_key, power)| ValidatorUpdate {
                        pub_key: *pub_key,
                        power: *power,
                    })
                    .collect(),
            )
        };
        let set_bytes =
            serde_json::to_vec(&validators).expect("validator serialization cannot fail");
        let emitted_bytes =
            serde_json::to_vec(&emitted).expect("validator serialization cannot fail");
        (set_bytes, emitted_bytes)
    }

    /// Seed the set from the genesis document. Only meaningful on an empty
    /// set; a loaded set is left intact.
    pub fn init_from_genesis(
        &self,
        genesis: &[GenesisValidator],
        now: u64,
    ) -> Result<(), ValidatorError> {
        {
            let mut inner = self.inner.write();
            if !inner.validators.is_empty() {
                return Ok(());
            }
            for gv in genesis {
                let address = gv.address();
                let validator = Validator::new(address, gv.pub_key, gv.stake(), now);
                tracing::info!(%address, power = gv.power, "registered genesis validator");
                inner.validators.insert(address, validator);
            }
        }
        self.save()
    }

    /// Register a new validator. May evict the smallest-stake member when
    /// the set is full and the candidate outbids it.
    pub fn register(
        &self,
        address: Address,
        pub_key: PublicKey,
        stake: U256,
        now: u64,
    ) -> Result<(), ValidatorError> {
        {
            let mut inner = self.inner.write();
            if inner.validators.contains_key(&address) {
                return Err(ValidatorError::AlreadyRegistered(address));
            }
            if stake < self.params.min_stake {
                return Err(ValidatorError::StakeBelowMinimum {
                    have: stake,
                    min: self.params.min_stake,
                });
            }
            if inner.validators.len() >= self.params.max_validators {
                let lowest = inner
                    .validators
                    .values()
                    .min_by(|a, b| a.stake.cmp(&b.stake).then(a.address.cmp(&b.address)))
                    .map(|v| (v.address, v.stake))
                    .expect("full set is non-empty");
                if stake <= lowest.1 {
                    return Err(ValidatorError::SetFull);
                }
                tracing::info!(evicted = %lowest.0, stake = %lowest.1, "evicting smallest-stake validator");
                inner.validators.remove(&lowest.0);
            }
            inner
                .validators
                .insert(address, Validator::new(address, pub_key, stake, now));
            tracing::info!(%address, %stake, "validator registered");
        }
        self.save()
    }

    /// Increase a validator's stake.
    pub fn stake(&self, address: Address, amount: U256, now: u64) -> Result<(), ValidatorError> {
        {
            let mut inner = self.inner.write();
            let validator = inner
                .validators
                .get_mut(&address)
                .ok_or(ValidatorError::NotFound(address))?;
            if validator.jailed {
                return Err(ValidatorError::Jailed(address));
            }
            validator.stake += amount;
            validator.power = power_from_stake(validator.stake);
            validator.last_active_at = now;
            tracing::info!(%address, added = %amount, total = %validator.stake, "stake increased");
        }
        self.save()
    }

    /// Decrease a validator's stake. Fails (rather than evicting) when the
    /// remainder would fall below the minimum.
    pub fn unstake(&self, address: Address, amount: U256, now: u64) -> Result<(), ValidatorError> {
        {
            let mut inner = self.inner.write();
            let validator = inner
                .validators
                .get_mut(&address)
                .ok_or(ValidatorError::NotFound(address))?;
            if validator.jailed {
                return Err(ValidatorError::Jailed(address));
            }
            let remaining = validator
                .stake
                .checked_sub(amount)
                .ok_or(ValidatorError::UnstakeExceedsStake)?;
            if remaining < self.params.min_stake {
                return Err(ValidatorError::UnstakeBelowMinimum {
                    remaining,
                    min: self.params.min_stake,
                });
            }
            validator.stake = remaining;
            validator.power = power_from_stake(validator.stake);
            validator.last_active_at = now;
            tracing::info!(%address, removed = %amount, total = %validator.stake, "stake decreased");
        }
        self.save()
    }

    /// Slash `percent` of the validator's stake and jail it. Removes the
    /// validator outright, within the same critical section, when the
    /// remaining stake falls below the minimum.
    pub fn slash(
        &self,
        address: Address,
        percent: u8,
        jail_duration_secs: u64,
        now: u64,
    ) -> Result<(), ValidatorError> {
        {
            let mut inner = self.inner.write();
            let validator = inner
                .validators
                .get_mut(&address)
                .ok_or(ValidatorError::NotFound(address))?;
            let slashed = validator.stake * U256::from(percent.min(100)) / U256::from(100u64);
            validator.stake -= slashed;
            validator.power = power_from_stake(validator.stake);
            validator.jailed = true;
            validator.jailed_until = now + jail_duration_secs;
            tracing::warn!(
                %address,
                percent,
                slashed = %slashed,
                remaining = %validator.stake,
                jailed_until = validator.jailed_until,
                "validator slashed"
            );
            if validator.stake < self.params.min_stake {
                tracing::warn!(%address, "validator removed: stake below minimum after slash");
                inner.validators.remove(&address);
            }
        }
        self.save()
    }

    /// Lift the jail after its term. Resets the consecutive-miss counter.
    pub fn unjail(&self, address: Address, now: u64) -> Result<(), ValidatorError> {
        {
            let mut inner = self.inner.write();
            let validator = inner
                .validators
                .get_mut(&address)
                .ok_or(ValidatorError::NotFound(address))?;
            if !validator.jailed {
                return Err(ValidatorError::NotJailed(address));
            }
            if now < validator.jailed_until {
                return Err(ValidatorError::StillJailed {
                    until: validator.jailed_until,
                    now,
                });
            }
            validator.jailed = false;
            validator.jailed_until = 0;
            validator.missed_blocks_consecutive = 0;
            tracing::info!(%address, "validator unjailed");
        }
        self.save()
    }

    /// Record block participation. Crossing the consecutive-miss threshold
    /// queues a slash decision instead of applying it here: `slash` takes
    /// the same lock, and the caller may hold other locks of its own.
    pub fn observe_block(&self, address: Address, missed: bool, now: u64) {
        let mut inner = self.inner.write();
        let policy = &self.policy;
        let Some(validator) = inner.validators.get_mut(&address) else {
            return;
        };
        validator.last_active_at = now;
        if !missed {
            validator.missed_blocks_consecutive = 0;
            return;
        }
        validator.missed_blocks_consecutive += 1;
        validator.total_missed += 1;
        if validator.missed_blocks_consecutive >= policy.missed_block_threshold {
            let windows = validator.missed_blocks_consecutive / policy.missed_block_threshold;
            let percent = policy
                .slash_percent
                .saturating_mul(windows as u8)
                .min(policy.slash_percent_cap);
            tracing::warn!(
                %address,
                missed = validator.missed_blocks_consecutive,
                percent,
                "consecutive-miss threshold crossed, queuing slash"
            );
            validator.missed_blocks_consecutive = 0;
            inner.pending.push(PendingAction::Slash {
                address,
                percent,
                jail_duration_secs: policy.jail_duration_secs,
            });
        }
    }

    /// Take the queued consequences. Called with no validator lock held.
    pub fn drain_pending(&self) -> Vec<PendingAction> {
        std::mem::take(&mut self.inner.write().pending)
    }

    /// Validators eligible for consensus: unjailed, staked at or above the
    /// minimum, sorted by stake descending (address ascending on ties),
    /// truncated to `max_validators`.
    pub fn active_snapshot(&self) -> Vec<Validator> {
        let inner = self.inner.read();
        let mut active: Vec<Validator> = inner
            .validators
            .values()
            .filter(|v| v.is_active(self.params.min_stake))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.stake.cmp(&a.stake).then(a.address.cmp(&b.address)));
        active.truncate(self.params.max_validators);
        active
    }

    /// The full set the consensus engine should start from, emitted at
    /// InitChain. Also primes the remembered emitted set.
    pub fn initial_updates(&self) -> Vec<ValidatorUpdate> {
        let active = self.active_snapshot();
        let mut inner = self.inner.write();
        inner.last_emitted = active
            .iter()
            .map(|v| (v.pub_key, power_from_stake(v.stake)))
            .collect();
        inner
            .last_emitted
            .iter()
            .map(|(pub_key, power)| ValidatorUpdate {
                pub_key: *pub_key,
                power: *power,
            })
            .collect()
    }

    /// The voting-power delta since the last emission. Empty when nothing
    /// changed: an engine fed a non-empty no-op can stall. The remembered
    /// set only advances when a non-empty delta is actually handed out.
    pub fn rotation_delta(&self) -> Vec<ValidatorUpdate> {
        let active = self.active_snapshot();
        let current: BTreeMap<PublicKey, i64> = active
            .iter()
            .map(|v| (v.pub_key, power_from_stake(v.stake)))
            .collect();

        let mut inner = self.inner.write();
        let mut delta = Vec::new();
        for (pub_key, power) in &current {
            if inner.last_emitted.get(pub_key) != Some(power) {
                delta.push(ValidatorUpdate {
                    pub_key: *pub_key,
                    power: *power,
                });
            }
        }
        for pub_key in inner.last_emitted.keys() {
            if !current.contains_key(pub_key) {
                delta.push(ValidatorUpdate {
                    pub_key: *pub_key,
                    power: 0,
                });
            }
        }
        if delta.is_empty() {
            return delta;
        }
        delta.sort_by(|a, b| a.pub_key.cmp(&b.pub_key));
        inner.last_emitted = current;
        tracing::info!(changes = delta.len(), "emitting validator delta");
        delta
    }

    pub fn get(&self, address: &Address) -> Option<Validator> {
        self.inner.read().validators.get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().validators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_store::MemStore;
    use ember_types::test_utils::{coins, test_keypair};

    const NOW: u64 = 1_700_000_000;

    fn manager_with(min_stake: U256, max_validators: usize) -> ValidatorSetManager {
        ValidatorSetManager::new(
            Arc::new(MemStore::new()),
            ValidatorParams {
                min_stake,
                max_validators,
            },
            SlashPolicy::default(),
        )
    }

    fn add(manager: &ValidatorSetManager, seed: u8, stake: U256) -> Address {
        let kp = test_keypair(seed);
        manager
            .register(kp.address(), kp.public_key(), stake, NOW)
            .unwrap();
        kp.address()
    }

    #[test]
    fn register_rejects_duplicates_and_dust() {
        let manager = manager_with(coins(10), 4);
        let kp = test_keypair(1);
        manager
            .register(kp.address(), kp.public_key(), coins(10), NOW)
            .unwrap();
        assert!(matches!(
            manager.register(kp.address(), kp.public_key(), coins(10), NOW),
            Err(ValidatorError::AlreadyRegistered(_))
        ));
        let kp2 = test_keypair(2);
        assert!(matches!(
            manager.register(kp2.address(), kp2.public_key(), coins(9), NOW),
            Err(ValidatorError::StakeBelowMinimum { .. })
        ));
    }

    #[test]
    fn full_set_evicts_smallest_only_when_outbid() {
        let manager = manager_with(coins(1), 2);
        let a = add(&manager, 1, coins(5));
        let _b = add(&manager, 2, coins(10));

        // Equal to the smallest: rejected.
        let kp = test_keypair(3);
        assert!(matches!(
            manager.register(kp.address(), kp.public_key(), coins(5), NOW),
            Err(ValidatorError::SetFull)
        ));

        // Strictly larger: evicts the smallest.
        let kp4 = test_keypair(4);
        manager
            .register(kp4.address(), kp4.public_key(), coins(7), NOW)
            .unwrap();
        assert!(manager.get(&a).is_none());
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn unstake_fails_below_minimum_instead_of_evicting() {
        let manager = manager_with(coins(10), 4);
        let a = add(&manager, 1, coins(15));
        assert!(matches!(
            manager.unstake(a, coins(6), NOW),
            Err(ValidatorError::UnstakeBelowMinimum { .. })
        ));
        // Still present with the original stake.
        assert_eq!(manager.get(&a).unwrap().stake, coins(15));
        manager.unstake(a, coins(5), NOW).unwrap();
        assert_eq!(manager.get(&a).unwrap().stake, coins(10));
    }

    #[test]
    fn stake_and_unstake_fail_when_jailed() {
        let manager = manager_with(coins(10), 4);
        let a = add(&manager, 1, coins(100));
        manager.slash(a, 10, 3600, NOW).unwrap();
        assert!(matches!(
            manager.stake(a, coins(1), NOW),
            Err(ValidatorError::Jailed(_))
        ));
        assert!(matches!(
            manager.unstake(a, coins(1), NOW),
            Err(ValidatorError::Jailed(_))
        ));
    }

    #[test]
    fn slash_halves_stake_and_jails() {
        let manager = manager_with(coins(10), 4);
        let a = add(&manager, 1, coins(1000));
        manager.slash(a, 50, 24 * 3600, NOW).unwrap();
        let v = manager.get(&a).unwrap();
        assert_eq!(v.stake, coins(500));
        assert!(v.jailed);
        assert_eq!(v.jailed_until, NOW + 24 * 3600);
        assert_eq!(v.power, 500);
        // Excluded from the active set while jailed.
        assert!(manager.active_snapshot().iter().all(|x| x.address != a));
    }

    #[test]
    fn slash_below_minimum_removes_atomically() {
        let manager = manager_with(coins(100), 4);
        let a = add(&manager, 1, coins(150));
        manager.slash(a, 50, 3600, NOW).unwrap();
        assert!(manager.get(&a).is_none());
    }

    #[test]
    fn unjail_requires_elapsed_term() {
        let manager = manager_with(coins(10), 4);
        let a = add(&manager, 1, coins(100));
        manager.slash(a, 1, 3600, NOW).unwrap();
        assert!(matches!(
            manager.unjail(a, NOW + 10),
            Err(ValidatorError::StillJailed { .. })
        ));
        manager.unjail(a, NOW + 3600).unwrap();
        let v = manager.get(&a).unwrap();
        assert!(!v.jailed);
        assert_eq!(v.jailed_until, 0);
        assert_eq!(v.missed_blocks_consecutive, 0);
    }

    #[test]
    fn observe_block_queues_slash_at_threshold() {
        let manager = manager_with(coins(10), 4);
        let a = add(&manager, 1, coins(100));
        for _ in 0..99 {
            manager.observe_block(a, true, NOW);
        }
        assert!(manager.drain_pending().is_empty());
        manager.observe_block(a, true, NOW);
        let pending = manager.drain_pending();
        assert_eq!(
            pending,
            vec![PendingAction::Slash {
                address: a,
                percent: 5,
                jail_duration_secs: 24 * 3600,
            }]
        );
        // Counter reset after queueing; a second drain is empty.
        assert!(manager.drain_pending().is_empty());
        assert_eq!(manager.get(&a).unwrap().missed_blocks_consecutive, 0);
        assert_eq!(manager.get(&a).unwrap().total_missed, 100);
    }

    #[test]
    fn observe_block_success_resets_streak() {
        let manager = manager_with(coins(10), 4);
        let a = add(&manager, 1, coins(100));
        for _ in 0..50 {
            manager.observe_block(a, true, NOW);
        }
        manager.observe_block(a, false, NOW);
        assert_eq!(manager.get(&a).unwrap().missed_blocks_consecutive, 0);
        assert_eq!(manager.get(&a).unwrap().total_missed, 50);
    }

    #[test]
    fn active_snapshot_orders_by_stake_and_truncates() {
        let manager = manager_with(coins(1), 2);
        // max_validators = 2, so registration keeps the top two.
        add(&manager, 1, coins(5));
        let b = add(&manager, 2, coins(20));
        let c = add(&manager, 3, coins(10));
        let active = manager.active_snapshot();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].address, b);
        assert_eq!(active[1].address, c);
    }

    #[test]
    fn rotation_delta_is_empty_without_changes() {
        let manager = manager_with(coins(1), 4);
        add(&manager, 1, coins(10));
        add(&manager, 2, coins(20));
        let initial = manager.initial_updates();
        assert_eq!(initial.len(), 2);
        // No stake or jail changes: every subsequent delta is empty.
        for _ in 0..5 {
            assert!(manager.rotation_delta().is_empty());
        }
    }

    #[test]
    fn rotation_delta_reports_changes_and_removals() {
        let manager = manager_with(coins(10), 4);
        let a = add(&manager, 1, coins(100));
        let b = add(&manager, 2, coins(200));
        manager.initial_updates();

        manager.stake(a, coins(50), NOW).unwrap();
        let delta = manager.rotation_delta();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].power, 150);

        // Slashing b out of the active set emits a zero-power removal.
        manager.slash(b, 50, 3600, NOW).unwrap();
        let kp_b = test_keypair(2);
        let delta = manager.rotation_delta();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].pub_key, kp_b.public_key());
        assert_eq!(delta[0].power, 0);

        // And nothing more until the next change.
        assert!(manager.rotation_delta().is_empty());
    }

    #[test]
    fn load_save_round_trip_preserves_emitted_set() {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let params = ValidatorParams {
            min_stake: coins(10),
            max_validators: 4,
        };
        let kp = test_keypair(1);
        {
            let manager =
                ValidatorSetManager::new(store.clone(), params.clone(), SlashPolicy::default());
            manager
                .register(kp.address(), kp.public_key(), coins(100), NOW)
                .unwrap();
            manager.initial_updates();
            manager.save().unwrap();
        }
        {
            let manager = ValidatorSetManager::new(store, params, SlashPolicy::default());
            manager.load().unwrap();
            assert_eq!(manager.len(), 1);
            assert_eq!(manager.get(&kp.address()).unwrap().stake, coins(100));
            // The emitted set survived, so an unchanged set stays silent.
            assert!(manager.rotation_delta().is_empty());
        }
    }

    #[test]
    fn genesis_init_is_idempotent_over_persisted_set() {
        let manager = manager_with(coins(1), 4);
        let kp = test_keypair(1);
        let genesis = vec![GenesisValidator {
            pub_key: kp.public_key(),
            power: 10,
            name: None,
        }];
        manager.init_from_genesis(&genesis, NOW).unwrap();
        assert_eq!(manager.len(), 1);

        // A second init (restart with existing set) leaves it intact.
        manager.stake(kp.address(), coins(5), NOW).unwrap();
        manager.init_from_genesis(&genesis, NOW).unwrap();
        assert_eq!(manager.get(&kp.address()).unwrap().stake, coins(15));
    }
}
