//! The consensus↔application protocol layer.
//!
//! [`Application`] implements [`ConsensusApp`], the ABCI-style surface the
//! consensus engine drives: `Info → (InitChain) → repeat{ PrepareProposal,
//! ProcessProposal, FinalizeBlock, Commit }` with `CheckTx` and `Query`
//! interleaved from request-serving threads. The application owns the
//! execution engine, the working state, the validator set manager, and the
//! mempool; collaborators never call back into it.

mod application;
mod config;
mod error;
mod metrics;
mod protocol;

pub use application::{Application, BlockPhase};
pub use config::{Config, ConfigError};
pub use error::{
    AppError, CODE_DECODE_ERROR, CODE_EXECUTION_FAILED, CODE_INVALID_TX, CODE_OK,
    CODE_RATE_LIMITED, CODE_TIMEOUT,
};
pub use metrics::Metrics;
pub use protocol::{
    CheckTxResponse, CommitResponse, ConsensusApp, Deadline, ExecResult, FinalizeBlockResponse,
    InfoResponse, InitChainResponse, QueryResponse, StateMeta,
};
