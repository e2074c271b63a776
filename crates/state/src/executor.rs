//! Transaction execution against a state handle.
//!
//! Applies EVM message semantics: upfront gas purchase, intrinsic gas,
//! value transfer, contract creation with the `(sender, nonce)` address
//! derivation, refund of unused gas and fee credit to the coinbase. Every
//! input that could vary between hosts comes from [`BlockContext`], never
//! from the machine the node happens to run on.

use crate::{StateDb, StateError};
use ember_types::{keccak256, Address, Hash, Log, Transaction};
use primitive_types::U256;
use thiserror::Error;

/// Base cost of any transaction.
pub const TX_BASE_GAS: u64 = 21_000;
/// Additional cost of a contract-creation transaction.
pub const TX_CREATE_GAS: u64 = 32_000;
/// Per-byte calldata costs.
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NONZERO_GAS: u64 = 16;
/// Per-byte cost of depositing contract code.
pub const TX_CODE_DEPOSIT_GAS: u64 = 200;

/// Block-scoped execution inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    /// Unix seconds, fixed by the proposer.
    pub timestamp: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
    pub base_fee: U256,
}

impl BlockContext {
    pub fn new(height: u64, timestamp: u64) -> Self {
        BlockContext {
            height,
            timestamp,
            coinbase: Address::ZERO,
            gas_limit: 30_000_000,
            base_fee: U256::zero(),
        }
    }
}

/// Result of executing one transaction. A failed outcome has still mutated
/// state: the sender's nonce advanced and gas was charged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub return_data: Vec<u8>,
    pub logs: Vec<Log>,
    pub error: Option<String>,
    /// Set for successful contract creations.
    pub contract_address: Option<Address>,
}

impl ExecOutcome {
    fn failure(gas_used: u64, error: impl Into<String>) -> Self {
        ExecOutcome {
            success: false,
            gas_used,
            return_data: Vec::new(),
            logs: Vec::new(),
            error: Some(error.into()),
            contract_address: None,
        }
    }
}

/// Rejections raised before any state is touched. The caller treats these
/// as invalid-transaction results, not receipts.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("signature does not recover the declared sender")]
    SignerMismatch,

    #[error("nonce mismatch: account at {expected}, transaction has {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: U256, have: U256 },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Intrinsic gas of a transaction: the cost charged before any code runs.
pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    let mut gas = TX_BASE_GAS;
    if tx.is_create() {
        gas += TX_CREATE_GAS;
    }
    for byte in &tx.data {
        gas += if *byte == 0 {
            TX_DATA_ZERO_GAS
        } else {
            TX_DATA_NONZERO_GAS
        };
    }
    gas
}

/// Contract address for a creation: rightmost 20 bytes of
/// `keccak256(rlp([sender, nonce]))`, using the sender's pre-increment
/// nonce.
pub fn derive_contract_address(from: &Address, nonce: u64) -> Address {
    let mut stream = rlp::RlpStream::new_list(2);
    stream.append(&from.to_vec());
    stream.append(&nonce);
    Address::from_hash(&keccak256(&stream.out()))
}

/// The deterministic transaction-apply function.
pub struct ExecutionEngine {
    chain_id: String,
}

impl ExecutionEngine {
    pub fn new(chain_id: String) -> Self {
        ExecutionEngine { chain_id }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Execute `tx` against `db` in the context of `ctx`.
    ///
    /// Pre-execution checks run in the order: signer recovery, nonce
    /// equality, balance sufficiency. Those reject with [`ExecError`] and
    /// leave state untouched. Past them, the sender has bought
    /// `gas_limit * gas_price` and taken the nonce, and any later failure
    /// burns gas instead of aborting.
    pub fn execute(
        &self,
        db: &mut StateDb,
        ctx: &BlockContext,
        tx: &Transaction,
    ) -> Result<ExecOutcome, ExecError> {
        let signer = tx.recover_signer().map_err(|_| ExecError::SignerMismatch)?;
        if signer != tx.from {
            return Err(ExecError::SignerMismatch);
        }

        let mut sender = db.get_account(&tx.from)?.unwrap_or_default();
        if tx.nonce != sender.nonce {
            return Err(ExecError::NonceMismatch {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }
        let gas_budget = U256::from(tx.gas_limit) * tx.gas_price;
        let max_cost = tx.value + gas_budget;
        if sender.balance < max_cost {
            return Err(ExecError::InsufficientBalance {
                need: max_cost,
                have: sender.balance,
            });
        }

        // Buy gas and take the nonce. The creation address derives from the
        // pre-increment nonce.
        let creation_nonce = sender.nonce;
        sender.balance -= gas_budget;
        sender.nonce += 1;
        db.set_account(tx.from, sender);

        let intrinsic = intrinsic_gas(tx);
        if intrinsic > tx.gas_limit {
            credit(db, &ctx.coinbase, gas_budget)?;
            tracing::debug!(tx = %tx.hash, intrinsic, gas_limit = tx.gas_limit, "intrinsic gas exceeds limit");
            return Ok(ExecOutcome::failure(
                tx.gas_limit,
                format!("intrinsic gas {intrinsic} exceeds limit {}", tx.gas_limit),
            ));
        }
        let mut gas_used = intrinsic;

        let mut contract_address = None;
        let mut return_data = Vec::new();
        let mut logs = Vec::new();

        if tx.is_create() {
            let deposit = TX_CODE_DEPOSIT_GAS * tx.data.len() as u64;
            if gas_used.saturating_add(deposit) > tx.gas_limit {
                credit(db, &ctx.coinbase, gas_budget)?;
                return Ok(ExecOutcome::failure(
                    tx.gas_limit,
                    "out of gas depositing contract code",
                ));
            }
            gas_used += deposit;

            let addr = derive_contract_address(&tx.from, creation_nonce);
            debit(db, &tx.from, tx.value)?;
            credit(db, &addr, tx.value)?;
            db.set_code(addr, tx.data.clone())?;
            contract_address = Some(addr);
        } else {
            let to = tx.to.expect("non-create transaction has a recipient");
            debit(db, &tx.from, tx.value)?;
            credit(db, &to, tx.value)?;

            let recipient = db.get_account(&to)?.unwrap_or_default();
            if recipient.has_code() {
                let (output, extra_gas, code_logs) = self.invoke_code(db, ctx, tx, &recipient.code_hash)?;
                gas_used = gas_used.saturating_add(extra_gas).min(tx.gas_limit);
                return_data = output;
                logs = code_logs;
            }
        }

        // Refund what was not used and credit the fee.
        let refund = U256::from(tx.gas_limit - gas_used) * tx.gas_price;
        credit(db, &tx.from, refund)?;
        credit(db, &ctx.coinbase, U256::from(gas_used) * tx.gas_price)?;

        Ok(ExecOutcome {
            success: true,
            gas_used,
            return_data,
            logs,
            error: None,
            contract_address,
        })
    }

    /// The interpreter seam. Bytecode interpretation is an external
    /// collaborator; this deterministic stand-in consumes no extra gas and
    /// produces no output, so calls into contracts behave as plain value
    /// transfers.
    fn invoke_code(
        &self,
        _db: &mut StateDb,
        _ctx: &BlockContext,
        _tx: &Transaction,
        _code_hash: &Hash,
    ) -> Result<(Vec<u8>, u64, Vec<Log>), ExecError> {
        Ok((Vec::new(), 0, Vec::new()))
    }
}

fn credit(db: &mut StateDb, addr: &Address, amount: U256) -> Result<(), ExecError> {
    if amount.is_zero() {
        return Ok(());
    }
    let mut account = db.get_account(addr)?.unwrap_or_default();
    account.balance += amount;
    db.set_account(*addr, account);
    Ok(())
}

fn debit(db: &mut StateDb, addr: &Address, amount: U256) -> Result<(), ExecError> {
    if amount.is_zero() {
        return Ok(());
    }
    let mut account = db.get_account(addr)?.unwrap_or_default();
    // The balance check happened before gas purchase; hitting this means a
    // bookkeeping bug, not user error.
    account.balance = account
        .balance
        .checked_sub(amount)
        .expect("debit exceeds balance after admission checks");
    db.set_account(*addr, account);
    Ok(())
}
