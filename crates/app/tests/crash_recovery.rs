//! Crash-before-commit recovery and deterministic replay.

mod common;

use common::*;
use ember_app::{ConsensusApp, Deadline};
use ember_types::test_utils::coins;
use ember_types::{keccak256, Address, Hash};

/// Proposal stream used by every node in these tests: identical bytes at
/// identical heights.
fn proposals(sender_key: &ember_types::AccountKey) -> Vec<(u64, Vec<Vec<u8>>)> {
    let recipient = Address::from_hash(&keccak256(b"recipient"));
    vec![
        (1, vec![transfer_raw(sender_key, recipient, coins(1), 0)]),
        (2, vec![]),
        (3, vec![transfer_raw(sender_key, recipient, coins(2), 1)]),
        (4, vec![]),
        (
            5,
            vec![
                transfer_raw(sender_key, recipient, coins(3), 2),
                transfer_raw(sender_key, recipient, coins(1), 3),
            ],
        ),
    ]
}

/// Run the whole stream without interruption and return the app hash at
/// every height.
fn uninterrupted_run() -> Vec<Hash> {
    let (key, sender) = funded_sender();
    let store = new_store();
    let mut app = new_app(store);
    app.init_chain(genesis(10, &[(sender, hundred_coins())]))
        .unwrap();

    let mut hashes = Vec::new();
    for (height, txs) in proposals(&key) {
        advance(&mut app, height, &txs);
        hashes.push(app.info().last_app_hash);
    }
    hashes
}

#[test]
fn crash_between_finalize_and_commit_replays_cleanly() {
    let (key, sender) = funded_sender();
    let store = new_store();
    let stream = proposals(&key);

    {
        let mut app = new_app(store.clone());
        app.init_chain(genesis(10, &[(sender, hundred_coins())]))
            .unwrap();
        for (height, txs) in &stream[..4] {
            advance(&mut app, *height, txs);
        }
        // Finalize height 5 but crash before Commit.
        app.finalize_block(5, block_time(5), &stream[4].1).unwrap();
        // Process dies here; in-memory state is dropped with `app`.
    }

    // Restart over the same store.
    let mut app = new_app(store);
    let info = app.info();
    assert_eq!(info.last_height, 4, "uncommitted block must not be visible");

    // The engine replays the unfinalized block.
    app.finalize_block(5, block_time(5), &stream[4].1).unwrap();
    app.commit().unwrap();

    let expected = uninterrupted_run();
    assert_eq!(app.info().last_height, 5);
    assert_eq!(app.info().last_app_hash, *expected.last().unwrap());
}

#[test]
fn two_nodes_converge_on_identical_proposals() {
    let (key, sender) = funded_sender();
    let run = || {
        let store = new_store();
        let mut app = new_app(store);
        app.init_chain(genesis(10, &[(sender, hundred_coins())]))
            .unwrap();
        let mut hashes = Vec::new();
        for (height, txs) in proposals(&key) {
            advance(&mut app, height, &txs);
            hashes.push(app.info().last_app_hash);
        }
        hashes
    };
    let a = run();
    let b = run();
    assert_eq!(a, b);
    // Empty blocks leave the state root alone; blocks with transfers
    // advance it.
    assert_eq!(a[0], a[1]);
    assert_ne!(a[1], a[2]);
    assert_eq!(a[2], a[3]);
    assert_ne!(a[3], a[4]);
}

#[test]
fn restart_preserves_queries_and_continues_the_chain() {
    let (key, sender) = funded_sender();
    let store = new_store();
    let recipient = Address::from_hash(&keccak256(b"recipient"));

    {
        let mut app = new_app(store.clone());
        app.init_chain(genesis(10, &[(sender, hundred_coins())]))
            .unwrap();
        advance(&mut app, 1, &[transfer_raw(&key, recipient, coins(5), 0)]);
    }

    let mut app = new_app(store);
    assert_eq!(app.info().last_height, 1);

    // Committed state is queryable after restart.
    let resp = app.query(&format!("balance/{}", recipient.to_hex()), Deadline::NONE);
    let body: serde_json::Value = serde_json::from_slice(&resp.value).unwrap();
    assert_eq!(body["balance"], coins(5).to_string());

    // And the chain continues where it left off.
    advance(&mut app, 2, &[transfer_raw(&key, recipient, coins(1), 1)]);
    assert_eq!(app.info().last_height, 2);
}

#[test]
fn consensus_state_mismatch_is_fatal_not_repaired() {
    let (_key, sender) = funded_sender();
    let store = new_store();
    let mut app = new_app(store);
    app.init_chain(genesis(10, &[(sender, hundred_coins())]))
        .unwrap();
    advance(&mut app, 1, &[]);

    let good = app.info().last_app_hash;
    app.verify_consensus_state(1, &good).unwrap();

    let bad = keccak256(b"divergent");
    let err = app.verify_consensus_state(1, &bad).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn repeated_finalize_without_commit_is_idempotent() {
    let (key, sender) = funded_sender();
    let store = new_store();
    let mut app = new_app(store);
    app.init_chain(genesis(10, &[(sender, hundred_coins())]))
        .unwrap();

    let recipient = Address::from_hash(&keccak256(b"recipient"));
    let txs = vec![transfer_raw(&key, recipient, coins(1), 0)];

    let first = app.finalize_block(1, block_time(1), &txs).unwrap();
    // Engine retry of the same height before commit.
    let second = app.finalize_block(1, block_time(1), &txs).unwrap();
    assert_eq!(first.tx_results, second.tx_results);
    app.commit().unwrap();

    let resp = app.query(&format!("balance/{}", recipient.to_hex()), Deadline::NONE);
    let body: serde_json::Value = serde_json::from_slice(&resp.value).unwrap();
    // Applied exactly once.
    assert_eq!(body["balance"], coins(1).to_string());
}
