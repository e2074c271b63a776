//! Shared fixtures for the application integration tests.
#![allow(dead_code)]

use ember_app::{Application, Config, ConsensusApp, FinalizeBlockResponse, Metrics};
use ember_store::{KvStore, MemStore};
use ember_types::test_utils::{coins, test_account_key, test_keypair, test_transfer};
use ember_types::{
    Address, GenesisAccount, GenesisDoc, GenesisState, GenesisValidator, Transaction,
};
use primitive_types::U256;
use std::sync::Arc;

pub const CHAIN_ID: &str = "ember-test";
pub const GENESIS_TIME: u64 = 1_700_000_000;

/// Fixed per-height block time so replays are byte-identical.
pub fn block_time(height: u64) -> u64 {
    GENESIS_TIME + height * 5
}

pub fn test_config() -> Config {
    Config::new(CHAIN_ID)
}

pub fn new_store() -> Arc<MemStore> {
    Arc::new(MemStore::new())
}

pub fn new_app(store: Arc<MemStore>) -> Application {
    let store: Arc<dyn KvStore> = store;
    Application::new(test_config(), store, Metrics::new())
        .expect("application opens over a fresh store")
}

/// Genesis with one validator (seed 99) of the given power and the given
/// funded accounts.
pub fn genesis(validator_power: i64, alloc: &[(Address, U256)]) -> GenesisDoc {
    let kp = test_keypair(99);
    GenesisDoc {
        chain_id: CHAIN_ID.to_string(),
        time: GENESIS_TIME,
        validators: vec![GenesisValidator {
            pub_key: kp.public_key(),
            power: validator_power,
            name: Some("val-0".to_string()),
        }],
        app_state: if alloc.is_empty() {
            None
        } else {
            Some(GenesisState {
                alloc: alloc
                    .iter()
                    .map(|(address, balance)| GenesisAccount {
                        address: *address,
                        balance: *balance,
                    })
                    .collect(),
            })
        },
    }
}

/// Finalize and commit one block.
pub fn advance(app: &mut Application, height: u64, txs: &[Vec<u8>]) -> FinalizeBlockResponse {
    let response = app
        .finalize_block(height, block_time(height), txs)
        .expect("finalize succeeds");
    app.commit().expect("commit succeeds");
    response
}

/// The standard funded sender used across scenarios.
pub fn funded_sender() -> (ember_types::AccountKey, Address) {
    let key = test_account_key(1);
    let address = key.address();
    (key, address)
}

pub fn transfer_raw(
    key: &ember_types::AccountKey,
    to: Address,
    value: U256,
    nonce: u64,
) -> Vec<u8> {
    test_transfer(key, to, value, nonce).encode()
}

pub fn decode(raw: &[u8]) -> Transaction {
    Transaction::decode(raw).expect("test transactions decode")
}

pub fn hundred_coins() -> U256 {
    coins(100)
}
