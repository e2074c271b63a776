//! The application implementation.

use crate::error::{
    CODE_DECODE_ERROR, CODE_EXECUTION_FAILED, CODE_INVALID_TX, CODE_OK, CODE_RATE_LIMITED,
    CODE_TIMEOUT,
};
use crate::protocol::{
    CheckTxResponse, CommitResponse, ConsensusApp, Deadline, ExecResult, FinalizeBlockResponse,
    InfoResponse, InitChainResponse, QueryResponse, StateMeta,
};
use crate::{AppError, Config, Metrics};
use ember_mempool::{AdmissionError, Mempool};
use ember_state::{BlockContext, ExecError, ExecutionEngine, StateDb, StateManager};
use ember_store::{block_key, tx_key, KvStore, Namespace, StoreError, LATEST_HEIGHT, STATE_META};
use ember_types::{
    Account, Address, Block, BlockHeader, GenesisDoc, Hash, Receipt, Transaction, EMPTY_ROOT,
};
use ember_validators::{PendingAction, ValidatorSetManager};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-height protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    AwaitProposal,
    Prepared,
    Processed,
    Finalized,
}

/// The block being assembled between FinalizeBlock and Commit.
struct BlockInProgress {
    height: u64,
    time: u64,
    /// Executed transactions (successes and failed executions), in order.
    txs: Vec<Transaction>,
    /// Parallel receipts.
    receipts: Vec<Receipt>,
    /// Every hash that must leave the mempool at commit.
    touched: Vec<Hash>,
}

/// The bridge between the consensus engine and execution.
///
/// Consensus operations take `&mut self`: the engine serializes them per
/// height by construction, and the application thread owns the execution
/// engine and working state between FinalizeBlock and Commit. `CheckTx`
/// and `Query` take `&self` and read the last committed snapshot through a
/// shared lock.
pub struct Application {
    config: Config,
    store: Arc<dyn KvStore>,
    state: StateManager,
    /// Snapshot of the last committed state, served to readers. Replaced
    /// wholesale at each commit.
    committed: Arc<RwLock<StateDb>>,
    validators: Arc<ValidatorSetManager>,
    mempool: Arc<Mempool>,
    engine: ExecutionEngine,
    metrics: Metrics,
    last_height: u64,
    last_app_hash: Hash,
    last_block_hash: Hash,
    phase: BlockPhase,
    current: Option<BlockInProgress>,
}

impl Application {
    /// Open the application over a store, recovering the last committed
    /// position from persisted metadata.
    pub fn new(
        config: Config,
        store: Arc<dyn KvStore>,
        metrics: Metrics,
    ) -> Result<Application, AppError> {
        let meta: Option<StateMeta> = match store.get(Namespace::Meta, STATE_META)? {
            Some(bytes) => Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| AppError::Invariant(format!("corrupt state_meta: {e}")))?,
            ),
            None => None,
        };
        let (root, last_height, last_app_hash) = match &meta {
            Some(m) => (m.root, m.height, m.app_hash),
            None => (EMPTY_ROOT, 0, Hash::ZERO),
        };
        let last_block_hash = if last_height > 0 {
            let bytes = store
                .get(Namespace::Blocks, &block_key(last_height))?
                .ok_or_else(|| {
                    AppError::Invariant(format!(
                        "state_meta says height {last_height} but the block is missing"
                    ))
                })?;
            Block::decode(&bytes)
                .map_err(|e| AppError::Invariant(e.to_string()))?
                .header
                .hash
        } else {
            Hash::ZERO
        };

        let validators = Arc::new(ValidatorSetManager::new(
            store.clone(),
            config.validator_params(),
            config.slash_policy(),
        ));
        validators.load()?;

        let mempool = Arc::new(Mempool::new(config.mempool_config()));
        let committed = Arc::new(RwLock::new(StateDb::new(store.clone(), root)));
        let engine = ExecutionEngine::new(config.chain_id.clone());
        let state = StateManager::load(store.clone(), root);

        tracing::info!(
            chain_id = %config.chain_id,
            height = last_height,
            app_hash = %last_app_hash,
            "application initialized"
        );

        Ok(Application {
            config,
            store,
            state,
            committed,
            validators,
            mempool,
            engine,
            metrics,
            last_height,
            last_app_hash,
            last_block_hash,
            phase: BlockPhase::AwaitProposal,
            current: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn validators(&self) -> &Arc<ValidatorSetManager> {
        &self.validators
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn last_height(&self) -> u64 {
        self.last_height
    }

    pub fn phase(&self) -> BlockPhase {
        self.phase
    }

    /// Startup cross-check against the consensus engine's recorded state.
    /// A mismatch is surfaced as a fatal error for the operator; the
    /// application never touches the engine's data to "fix" it.
    pub fn verify_consensus_state(
        &self,
        engine_height: u64,
        engine_app_hash: &Hash,
    ) -> Result<(), AppError> {
        if engine_height == self.last_height && *engine_app_hash != self.last_app_hash {
            return Err(AppError::Invariant(format!(
                "app-hash mismatch at height {}: consensus engine has {}, application has {}",
                engine_height, engine_app_hash, self.last_app_hash
            )));
        }
        Ok(())
    }
}

impl ConsensusApp for Application {
    fn info(&self) -> InfoResponse {
        InfoResponse {
            last_height: self.last_height,
            last_app_hash: self.last_app_hash,
        }
    }

    fn init_chain(&mut self, genesis: GenesisDoc) -> Result<InitChainResponse, AppError> {
        if genesis.chain_id != self.config.chain_id {
            return Err(AppError::InvalidRequest(format!(
                "genesis chain id {} does not match configured {}",
                genesis.chain_id, self.config.chain_id
            )));
        }

        if self.validators.is_empty() {
            self.validators
                .init_from_genesis(&genesis.validators, genesis.time)?;
        } else {
            tracing::info!(
                count = self.validators.len(),
                "persisted validator set present, leaving it intact"
            );
        }
        let initial = self.validators.initial_updates();

        let alloc = genesis.app_state.map(|s| s.alloc).unwrap_or_default();
        if !alloc.is_empty() && self.last_height == 0 && self.state.root() == EMPTY_ROOT {
            for account in &alloc {
                self.state
                    .db_mut()
                    .set_account(account.address, Account::with_balance(account.balance));
            }
            let (root, mut batch) = self.state.begin_commit()?;
            let meta = StateMeta {
                root,
                height: 0,
                app_hash: root,
            };
            batch.put(
                Namespace::Meta,
                STATE_META.to_vec(),
                serde_json::to_vec(&meta).expect("meta serialization cannot fail"),
            );
            self.validators.persist_into(&mut batch);
            self.store.write(batch)?;
            self.state.finish_commit(root);
            *self.committed.write() = StateDb::new(self.store.clone(), root);
            self.last_app_hash = root;
            tracing::info!(accounts = alloc.len(), root = %root, "genesis state committed");
        }

        Ok(InitChainResponse {
            validators: initial,
            app_hash: self.last_app_hash,
        })
    }

    fn check_tx(&self, raw_tx: &[u8], deadline: Deadline) -> CheckTxResponse {
        if deadline.expired() {
            return CheckTxResponse {
                code: CODE_TIMEOUT,
                log: "deadline expired before admission".to_string(),
            };
        }
        let view = self.committed.read();
        match self.mempool.check_and_admit(raw_tx, &*view, now_ms()) {
            Ok(_) => CheckTxResponse {
                code: CODE_OK,
                log: "OK".to_string(),
            },
            Err(e) => CheckTxResponse {
                code: admission_code(&e),
                log: e.to_string(),
            },
        }
    }

    fn prepare_proposal(
        &mut self,
        height: u64,
        max_bytes: usize,
        hint_txs: Vec<Vec<u8>>,
    ) -> Vec<Vec<u8>> {
        let mut txs = self.mempool.select_for_proposal(max_bytes);
        let mut seen: std::collections::HashSet<Hash> = txs
            .iter()
            .filter_map(|raw| Transaction::decode(raw).ok())
            .map(|tx| tx.hash)
            .collect();
        let mut total: usize = txs.iter().map(Vec::len).sum();

        for hint in hint_txs {
            if total + hint.len() > max_bytes {
                break;
            }
            let Ok(tx) = Transaction::decode(&hint) else {
                continue;
            };
            if seen.insert(tx.hash) {
                total += hint.len();
                txs.push(hint);
            }
        }

        tracing::debug!(height, count = txs.len(), bytes = total, "proposal prepared");
        self.phase = BlockPhase::Prepared;
        txs
    }

    fn process_proposal(&mut self, _height: u64, _txs: &[Vec<u8>]) -> bool {
        // All validation is deferred to FinalizeBlock; rejecting here can
        // only hurt liveness under an honest leader.
        self.phase = BlockPhase::Processed;
        true
    }

    fn finalize_block(
        &mut self,
        height: u64,
        time: u64,
        txs: &[Vec<u8>],
    ) -> Result<FinalizeBlockResponse, AppError> {
        if height != self.last_height + 1 {
            return Err(AppError::InvalidRequest(format!(
                "finalize at height {} but last committed is {}",
                height, self.last_height
            )));
        }
        if self.current.is_some() {
            // Re-finalization of the same height (engine retry): start from
            // the committed root again.
            tracing::warn!(height, "re-finalizing, discarding prior working state");
            self.state.discard();
            self.current = None;
        }

        tracing::info!(height, txs = txs.len(), "finalizing block");
        let ctx = BlockContext::new(height, time);
        let now = now_ms();
        let mut tx_results = Vec::with_capacity(txs.len());
        let mut block_txs = Vec::new();
        let mut receipts = Vec::new();
        let mut touched = Vec::new();

        for raw in txs {
            let tx = match Transaction::decode(raw) {
                Ok(tx) => tx,
                Err(e) => {
                    tx_results.push(ExecResult::rejected(CODE_DECODE_ERROR, e.to_string()));
                    continue;
                }
            };
            if let Err(e) = tx.verify() {
                tx_results.push(ExecResult::rejected(CODE_INVALID_TX, e.to_string()));
                self.mempool.evict(&tx.hash, now);
                self.metrics.transactions_rejected.inc();
                continue;
            }

            // Re-validate against the working state: the proposer may have
            // included a transaction that has become invalid, including one
            // invalidated by an earlier transaction in this very block.
            {
                let db = self.state.db();
                let account = db.get_account(&tx.from)?.unwrap_or_default();
                if tx.nonce != account.nonce {
                    tx_results.push(ExecResult::rejected(
                        CODE_INVALID_TX,
                        format!(
                            "nonce mismatch: account at {}, transaction has {}",
                            account.nonce, tx.nonce
                        ),
                    ));
                    self.mempool.evict(&tx.hash, now);
                    self.metrics.transactions_rejected.inc();
                    continue;
                }
                let need = tx.max_cost();
                if account.balance < need {
                    tx_results.push(ExecResult::rejected(
                        CODE_INVALID_TX,
                        format!(
                            "insufficient balance: need {}, have {}",
                            need, account.balance
                        ),
                    ));
                    self.mempool.evict(&tx.hash, now);
                    self.metrics.transactions_rejected.inc();
                    continue;
                }
            }

            match self.engine.execute(self.state.db_mut(), &ctx, &tx) {
                Ok(outcome) => {
                    self.mempool.evict(&tx.hash, now);
                    touched.push(tx.hash);
                    if outcome.success {
                        tx_results.push(ExecResult::ok(outcome.gas_used));
                        self.metrics.transactions_finalized.inc();
                        self.metrics.gas_used_total.inc_by(outcome.gas_used);
                        receipts.push(Receipt::success(
                            tx.hash,
                            height,
                            outcome.gas_used,
                            outcome.logs,
                        ));
                    } else {
                        let error = outcome
                            .error
                            .unwrap_or_else(|| "execution failed".to_string());
                        tx_results.push(ExecResult {
                            code: CODE_EXECUTION_FAILED,
                            log: error.clone(),
                            gas_used: outcome.gas_used,
                        });
                        self.metrics.transactions_rejected.inc();
                        receipts.push(Receipt::failure(tx.hash, height, outcome.gas_used, error));
                    }
                    block_txs.push(tx);
                }
                Err(ExecError::State(e)) => return Err(e.into()),
                Err(e) => {
                    // Defense in depth: the re-validation above should have
                    // caught this.
                    tx_results.push(ExecResult::rejected(CODE_INVALID_TX, e.to_string()));
                    self.mempool.evict(&tx.hash, now);
                    self.metrics.transactions_rejected.inc();
                }
            }
        }

        // Consequences queued by observe_block, applied with no validator
        // lock held.
        for action in self.validators.drain_pending() {
            let PendingAction::Slash {
                address,
                percent,
                jail_duration_secs,
            } = action;
            if let Err(e) = self
                .validators
                .slash(address, percent, jail_duration_secs, time)
            {
                tracing::warn!(%address, error = %e, "deferred slash not applied");
            }
        }

        let mut validator_updates = Vec::new();
        if self.config.rotation_interval > 0 && height % self.config.rotation_interval == 0 {
            validator_updates = self.validators.rotation_delta();
        }

        self.current = Some(BlockInProgress {
            height,
            time,
            txs: block_txs,
            receipts,
            touched,
        });
        self.phase = BlockPhase::Finalized;
        Ok(FinalizeBlockResponse {
            tx_results,
            validator_updates,
        })
    }

    fn commit(&mut self) -> Result<CommitResponse, AppError> {
        let block = self.current.take().ok_or_else(|| {
            AppError::InvalidRequest("commit without a finalized block".to_string())
        })?;

        let (root, mut batch) = self.state.begin_commit()?;

        let header = BlockHeader::new(
            block.height,
            self.last_block_hash,
            block.time,
            self.config.chain_id.clone(),
            root,
        );
        let header_hash = header.hash;
        let full = Block {
            header,
            transactions: block.txs,
            receipts: block.receipts,
        };

        batch.put(
            Namespace::Blocks,
            block_key(block.height).to_vec(),
            full.encode(),
        );
        for (tx, receipt) in full.transactions.iter().zip(&full.receipts) {
            if receipt.is_success() {
                batch.put(Namespace::Txs, tx_key(&tx.hash).to_vec(), tx.encode());
            }
        }
        let meta = StateMeta {
            root,
            height: block.height,
            app_hash: root,
        };
        batch.put(
            Namespace::Meta,
            STATE_META.to_vec(),
            serde_json::to_vec(&meta).expect("meta serialization cannot fail"),
        );
        batch.put(
            Namespace::Meta,
            LATEST_HEIGHT.to_vec(),
            block.height.to_string().into_bytes(),
        );
        self.validators.persist_into(&mut batch);

        // A failed batch is fatal: do not acknowledge, do not advance.
        if let Err(e) = self.store.write(batch) {
            tracing::error!(height = block.height, error = %e, "commit batch failed");
            return Err(e.into());
        }

        self.state.finish_commit(root);
        *self.committed.write() = StateDb::new(self.store.clone(), root);
        self.mempool.prune_committed(&block.touched, now_ms());

        self.last_height = block.height;
        self.last_app_hash = root;
        self.last_block_hash = header_hash;
        self.phase = BlockPhase::AwaitProposal;

        self.metrics.blocks_committed.inc();
        self.metrics.block_height.set(block.height as i64);
        self.metrics.mempool_size.set(self.mempool.len() as i64);

        tracing::info!(
            height = block.height,
            app_hash = %root,
            txs = full.transactions.len(),
            "block committed"
        );

        Ok(CommitResponse {
            retain_height: block.height.saturating_sub(self.config.retain_window),
        })
    }

    fn query(&self, path: &str, deadline: Deadline) -> QueryResponse {
        if deadline.expired() {
            return QueryResponse {
                code: CODE_TIMEOUT,
                value: Vec::new(),
                log: "deadline expired".to_string(),
            };
        }

        if path == "height" {
            return QueryResponse::ok(self.last_height.to_string().into_bytes());
        }
        if let Some(addr) = path.strip_prefix("balance/") {
            return match Address::from_hex(addr) {
                Ok(addr) => self.query_balance(&addr),
                Err(e) => QueryResponse::not_found(format!("bad address: {e}")),
            };
        }
        if let Some(addr) = path.strip_prefix("account/") {
            return match Address::from_hex(addr) {
                Ok(addr) => self.query_account(&addr),
                Err(e) => QueryResponse::not_found(format!("bad address: {e}")),
            };
        }
        if let Some(hash) = path.strip_prefix("tx/") {
            return match Hash::from_hex(hash) {
                Ok(hash) => match self.store.get_required(Namespace::Txs, &tx_key(&hash)) {
                    Ok(bytes) => QueryResponse::ok(bytes),
                    Err(StoreError::NotFound) => {
                        QueryResponse::not_found(format!("transaction not found: {hash}"))
                    }
                    Err(e) => QueryResponse::not_found(e.to_string()),
                },
                Err(e) => QueryResponse::not_found(format!("bad transaction hash: {e}")),
            };
        }
        if let Some(height) = path.strip_prefix("block/") {
            return match height.parse::<u64>() {
                Ok(height) => match self.store.get_required(Namespace::Blocks, &block_key(height)) {
                    Ok(bytes) => QueryResponse::ok(bytes),
                    Err(StoreError::NotFound) => {
                        QueryResponse::not_found(format!("block not found at height {height}"))
                    }
                    Err(e) => QueryResponse::not_found(e.to_string()),
                },
                Err(_) => QueryResponse::not_found(format!("bad height: {height}")),
            };
        }
        QueryResponse::not_found(format!("unknown query path: {path}"))
    }
}

impl Application {
    fn query_balance(&self, addr: &Address) -> QueryResponse {
        let view = self.committed.read();
        match view.get_account(addr) {
            Ok(account) => {
                let account = account.unwrap_or_default();
                let body = serde_json::json!({
                    "address": addr.to_hex(),
                    "balance": account.balance.to_string(),
                });
                QueryResponse::ok(body.to_string().into_bytes())
            }
            Err(e) => QueryResponse::not_found(e.to_string()),
        }
    }

    fn query_account(&self, addr: &Address) -> QueryResponse {
        let view = self.committed.read();
        match view.get_account(addr) {
            Ok(account) => {
                let account = account.unwrap_or_default();
                QueryResponse::ok(
                    serde_json::to_vec(&account).expect("account serialization cannot fail"),
                )
            }
            Err(e) => QueryResponse::not_found(e.to_string()),
        }
    }
}

fn admission_code(error: &AdmissionError) -> u32 {
    match error {
        AdmissionError::Decode(_) => CODE_DECODE_ERROR,
        AdmissionError::Invalid(_)
        | AdmissionError::NonceMismatch { .. }
        | AdmissionError::InsufficientBalance { .. }
        | AdmissionError::RecentlyEvicted => CODE_INVALID_TX,
        AdmissionError::RateLimited | AdmissionError::PoolFull => CODE_RATE_LIMITED,
        AdmissionError::State(_) => CODE_INVALID_TX,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
