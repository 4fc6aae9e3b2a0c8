#![warn(
    unused_extern_crates,
    missing_debug_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::dbg_macro
)]
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![forbid(unsafe_code)]

#[cfg(feature = "use-serde")]
pub(crate) mod serde;

pub mod amount;
pub mod config;
pub mod contract;
pub mod owner_auth;
pub mod pledge;
pub mod project;
pub mod script;
pub mod signature;
pub mod transaction;
pub mod wallet;

#[cfg(feature = "use-serde")]
pub mod messages;

#[cfg(test)]
mod property_tests;

pub use ::bitcoin;

pub use amount::{checked_sum, AmountOverflow, MAX_MONEY};
pub use config::{Config, Network};
pub use contract::{add_fee_input, complete_contract, complete_contract_strict, ContractError};
pub use owner_auth::{authenticate_owner, sign_as_owner, SignatureError};
pub use pledge::{fast_sanity_check, verify_pledge, PledgeMessage, UtxoOracle, VerificationError, VerifiedPledge};
pub use project::{ProjectDescriptor, ProjectId, RequiredOutput};
pub use script::{classify, is_standard, ScriptTemplate};
pub use signature::{compute_sighash, verify_input, ScriptError, SighashPolicy};
pub use wallet::{
    Broadcaster, Clock, Executor, KeyProvider, PendingPledge, PledgeHash, PledgeRecord, PledgeStatus, Persistence,
    PledgingWallet, SpendableOutputs, TokioExecutor, WalletError,
};
