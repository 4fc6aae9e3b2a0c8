//! Pledge verification: turning a backer-submitted [`PledgeMessage`] into a
//! trusted [`VerifiedPledge`] against a project and an external UTXO view.

use crate::amount::checked_sum;
use crate::project::ProjectDescriptor;
use crate::script::is_standard;
use crate::signature::{verify_input, ScriptError, SighashPolicy};
use bitcoin::{OutPoint, Transaction, TxOut};
use std::collections::HashSet;

/// External view onto unspent outputs. A pledge's stub is only as good as
/// what this port reports for it.
#[async_trait::async_trait]
pub trait UtxoOracle {
    /// Resolve `outpoints` to their current outputs, in request order.
    /// `None` at a given index means unknown: spent, never existed, or on a
    /// fork the oracle doesn't track.
    async fn resolve(&self, outpoints: &[OutPoint]) -> Vec<Option<TxOut>>;
}

/// A backer's submission: the pledge transaction (last element of
/// `transactions`) plus any dependency transactions needed to resolve its
/// stub, and the metadata the backer declares about it.
#[derive(Clone, Debug, PartialEq)]
pub struct PledgeMessage {
    pub transactions: Vec<Transaction>,
    pub total_input_value: u64,
    pub timestamp: i64,
    pub project_id: String,
    pub contact: Option<Contact>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub email: Option<String>,
    pub name: Option<String>,
}

impl PledgeMessage {
    /// The pledge transaction proper: always the last of `transactions`.
    fn pledge_transaction(&self) -> Option<&Transaction> {
        self.transactions.last()
    }
}

/// A pledge that has passed every verification phase. Carries the parsed
/// transaction and the authoritative (oracle-resolved) input value so
/// downstream code never has to re-trust the backer's declared value.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedPledge {
    pub transaction: Transaction,
    pub input_value: bitcoin::Amount,
}

/// Closed set of ways a pledge can fail verification. Phases run in a fixed
/// order and the first failure is returned; later phases are never reached.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("pledge carries no transaction data")]
    NoTransactionData,
    #[error("pledge transaction has two inputs referencing the same outpoint")]
    DuplicatedOutPoint,
    #[error("pledge transaction output count does not match the project's")]
    TxWrongNumberOfOutputs,
    #[error("a pledge output does not match the project's required output")]
    OutputMismatch,
    #[error("a pledge output script is not one of the standard templates")]
    NonStandard,
    #[error("oracle could not resolve a pledge input's outpoint")]
    UnknownUTXO,
    #[error("declared total input value disagrees with the oracle-resolved total")]
    CachedValueMismatch,
    #[error("pledge input script failed verification: {0}")]
    ScriptError(#[from] ScriptError),
}

/// The structural checks of verification that need no external collaborator:
/// phase 1 (has data) and phase 2 (no duplicate inputs, output count/amount/
/// script match, outputs standard). Exposed standalone so callers can reject
/// a malformed pledge before touching the network.
pub fn fast_sanity_check(
    pledge: &PledgeMessage,
    project: &ProjectDescriptor,
) -> Result<(), VerificationError> {
    let transaction = pledge
        .pledge_transaction()
        .ok_or(VerificationError::NoTransactionData)?;

    let mut seen = HashSet::with_capacity(transaction.input.len());
    for input in &transaction.input {
        if !seen.insert(input.previous_output) {
            return Err(VerificationError::DuplicatedOutPoint);
        }
    }

    if transaction.output.len() != project.outputs.len() {
        return Err(VerificationError::TxWrongNumberOfOutputs);
    }

    if !project.outputs_match(&transaction.output) {
        return Err(VerificationError::OutputMismatch);
    }

    for output in &transaction.output {
        if !is_standard(&output.script_pubkey) {
            return Err(VerificationError::NonStandard);
        }
    }

    Ok(())
}

/// Verify `pledge` against `project`, consulting `oracle` to resolve its
/// inputs. Phases run in order; the first failure short-circuits the rest.
pub async fn verify_pledge(
    pledge: &PledgeMessage,
    project: &ProjectDescriptor,
    oracle: &impl UtxoOracle,
) -> Result<VerifiedPledge, VerificationError> {
    // Phase 1 + 2: structural sanity, no oracle needed.
    if let Err(error) = fast_sanity_check(pledge, project) {
        tracing::warn!(phase = "sanity", error = %error, "rejected pledge");
        return Err(error);
    }
    tracing::debug!(phase = "sanity", "pledge passed structural checks");

    let transaction = pledge.pledge_transaction().expect("checked above");

    // Phase 3: resolve every referenced outpoint.
    let outpoints: Vec<OutPoint> = transaction.input.iter().map(|i| i.previous_output).collect();
    let resolved = oracle.resolve(&outpoints).await;

    let mut prevouts = Vec::with_capacity(resolved.len());
    for prevout in resolved {
        match prevout {
            Some(output) => prevouts.push(output),
            None => {
                tracing::warn!(phase = "utxo", "rejected pledge: unknown utxo");
                return Err(VerificationError::UnknownUTXO);
            }
        }
    }
    tracing::debug!(phase = "utxo", "all pledge inputs resolved");

    // Phase 4: declared value must match what the oracle actually reports.
    let resolved_total = match checked_sum(prevouts.iter().map(|o| bitcoin::Amount::from_sat(o.value))) {
        Ok(total) => total,
        Err(_) => {
            tracing::warn!(phase = "value", "rejected pledge: resolved total overflowed");
            return Err(VerificationError::CachedValueMismatch);
        }
    };
    if resolved_total.as_sat() != pledge.total_input_value {
        tracing::warn!(phase = "value", "rejected pledge: declared value mismatch");
        return Err(VerificationError::CachedValueMismatch);
    }
    tracing::debug!(phase = "value", "declared value matches oracle");

    // Phase 5: script validation. Non-standard input scripts are not
    // themselves grounds for rejection; only script-invalidity is.
    for (index, prevout) in prevouts.iter().enumerate() {
        if let Err(error) = verify_input(transaction, index, prevout, SighashPolicy::AllAppendPermitted) {
            tracing::warn!(phase = "script", input = index, error = %error, "rejected pledge");
            return Err(VerificationError::ScriptError(error));
        }
    }
    tracing::debug!(phase = "script", "all pledge input scripts verified");

    Ok(VerifiedPledge {
        transaction: transaction.clone(),
        input_value: resolved_total,
    })
}
