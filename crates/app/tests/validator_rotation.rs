//! Validator set changes through the block lifecycle: rotation deltas,
//! no-op suppression, slashing, and the deferred auto-slash path.

mod common;

use common::*;
use ember_app::ConsensusApp;
use ember_types::test_utils::{coins, test_keypair};

#[test]
fn rotation_without_changes_emits_nothing() {
    let store = new_store();
    let mut app = new_app(store);
    app.init_chain(genesis(10, &[])).unwrap();

    // Advance through a full rotation boundary with no stake or jail
    // changes: the emitted updates stay empty, never a copy of the set.
    for height in 1..=100 {
        let response = advance(&mut app, height, &[]);
        assert!(
            response.validator_updates.is_empty(),
            "unexpected delta at height {height}"
        );
    }
}

#[test]
fn slash_and_remove_from_active_set() {
    let store = new_store();
    let mut app = new_app(store);
    // Genesis validator with power 1000 (stake 1000 coins).
    let init = app.init_chain(genesis(1000, &[])).unwrap();
    assert_eq!(init.validators.len(), 1);
    assert_eq!(init.validators[0].power, 1000);

    let kp = test_keypair(99);
    let address = kp.address();

    // Slash 50% with a 24h jail.
    app.validators()
        .slash(address, 50, 24 * 3600, GENESIS_TIME)
        .unwrap();

    let validator = app.validators().get(&address).unwrap();
    assert_eq!(validator.stake, coins(500));
    assert!(validator.jailed);
    assert!(app.validators().active_snapshot().is_empty());

    // The delta at the next rotation boundary removes the validator.
    let mut removal = None;
    for height in 1..=100 {
        let response = advance(&mut app, height, &[]);
        if !response.validator_updates.is_empty() {
            removal = Some((height, response.validator_updates));
        }
    }
    let (height, updates) = removal.expect("a delta must be emitted at the boundary");
    assert_eq!(height, 100);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].pub_key, kp.public_key());
    assert_eq!(updates[0].power, 0);

    // After the removal is emitted once, silence again.
    for height in 101..=200 {
        let response = advance(&mut app, height, &[]);
        assert!(response.validator_updates.is_empty());
    }
}

#[test]
fn stake_change_emits_power_delta_once() {
    let store = new_store();
    let mut app = new_app(store);
    app.init_chain(genesis(1000, &[])).unwrap();
    let kp = test_keypair(99);

    app.validators()
        .stake(kp.address(), coins(500), GENESIS_TIME)
        .unwrap();

    let mut seen = Vec::new();
    for height in 1..=200 {
        let response = advance(&mut app, height, &[]);
        if !response.validator_updates.is_empty() {
            seen.push((height, response.validator_updates));
        }
    }
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, 100);
    assert_eq!(seen[0].1[0].power, 1500);
}

#[test]
fn consecutive_misses_trigger_deferred_slash() {
    let store = new_store();
    let mut app = new_app(store);
    app.init_chain(genesis(1000, &[])).unwrap();
    let kp = test_keypair(99);
    let address = kp.address();

    // 100 consecutive missed blocks queue a pending slash decision.
    for _ in 0..100 {
        app.validators().observe_block(address, true, GENESIS_TIME);
    }
    // Still intact: nothing is applied while observers run.
    assert_eq!(
        app.validators().get(&address).unwrap().stake,
        coins(1000)
    );

    // The next finalized block drains the queue and applies the slash.
    advance(&mut app, 1, &[]);
    let validator = app.validators().get(&address).unwrap();
    assert_eq!(validator.stake, coins(950), "5% slashed");
    assert!(validator.jailed);

    // Unjail after the term: back in the active set.
    let release = validator.jailed_until;
    app.validators().unjail(address, release).unwrap();
    assert_eq!(app.validators().active_snapshot().len(), 1);
}

#[test]
fn validator_set_survives_restart_with_suppression_intact() {
    let store = new_store();
    let kp = test_keypair(99);
    {
        let mut app = new_app(store.clone());
        app.init_chain(genesis(1000, &[])).unwrap();
        app.validators()
            .stake(kp.address(), coins(1), GENESIS_TIME)
            .unwrap();
        // Emit the updated power at the boundary.
        for height in 1..=100 {
            advance(&mut app, height, &[]);
        }
    }
    {
        // Restart: the persisted set and the persisted emitted-set both
        // reload, so the next boundary emits nothing.
        let mut app = new_app(store);
        assert_eq!(app.validators().len(), 1);
        assert_eq!(
            app.validators().get(&kp.address()).unwrap().stake,
            coins(1001)
        );
        for height in 101..=200 {
            let response = advance(&mut app, height, &[]);
            assert!(response.validator_updates.is_empty());
        }
    }
}
