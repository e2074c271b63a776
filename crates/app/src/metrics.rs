//! Domain metrics.
//!
//! Metrics are domain-specific rather than generic event counters, and the
//! registry is instance-owned: the [`Metrics`] handle is constructor input
//! to the application, never a process-wide static. Counters and gauges
//! mutate only on the FinalizeBlock/Commit path.

use prometheus::{IntCounter, IntGauge, Registry};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub blocks_committed: IntCounter,
    pub block_height: IntGauge,
    pub transactions_finalized: IntCounter,
    pub transactions_rejected: IntCounter,
    pub gas_used_total: IntCounter,
    pub mempool_size: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let blocks_committed = IntCounter::new(
            "ember_blocks_committed_total",
            "Blocks committed by the application",
        )
        .expect("valid metric definition");
        let block_height =
            IntGauge::new("ember_block_height", "Last committed block height")
                .expect("valid metric definition");
        let transactions_finalized = IntCounter::new(
            "ember_transactions_finalized_total",
            "Transactions executed successfully in finalized blocks",
        )
        .expect("valid metric definition");
        let transactions_rejected = IntCounter::new(
            "ember_transactions_rejected_total",
            "Transactions rejected or failed during finalization",
        )
        .expect("valid metric definition");
        let gas_used_total = IntCounter::new(
            "ember_gas_used_total",
            "Cumulative gas consumed by executed transactions",
        )
        .expect("valid metric definition");
        let mempool_size =
            IntGauge::new("ember_mempool_size", "Pending transactions after commit")
                .expect("valid metric definition");

        for collector in [
            Box::new(blocks_committed.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(block_height.clone()),
            Box::new(transactions_finalized.clone()),
            Box::new(transactions_rejected.clone()),
            Box::new(gas_used_total.clone()),
            Box::new(mempool_size.clone()),
        ] {
            registry
                .register(collector)
                .expect("fresh registry accepts each collector once");
        }

        Metrics {
            registry,
            blocks_committed,
            block_height,
            transactions_finalized,
            transactions_rejected,
            gas_used_total,
            mempool_size,
        }
    }

    /// The owning registry, for whatever surface eventually exports it.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
