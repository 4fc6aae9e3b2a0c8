//! Contract assembly: combining verified pledges into the single transaction
//! that, once it reaches the goal, pays every required output at once.

use crate::amount::checked_sum;
use crate::pledge::VerifiedPledge;
use crate::project::ProjectDescriptor;
use crate::signature::{sign_p2pkh, SighashPolicy};
use bitcoin::secp256k1::SecretKey;
use bitcoin::{Amount, Transaction, TxIn, TxOut};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("sum of pledge inputs does not cover the project goal plus fee")]
    ValueMismatch,
}

/// Combine `pledges` into a single transaction carrying the project's
/// required outputs untouched and one input per pledge, signatures
/// preserved verbatim. Inputs are independent under the append-permitted
/// sighash, so they can be appended in any order.
///
/// The sum of input values may end up less than, equal to, or greater than
/// the goal; a result short of the goal is the caller's responsibility to
/// detect (see [`complete_contract_strict`]) before broadcasting.
pub fn complete_contract(project: &ProjectDescriptor, pledges: &[VerifiedPledge]) -> Transaction {
    let outputs: Vec<TxOut> = project
        .outputs
        .iter()
        .map(|required| TxOut {
            value: required.amount.as_sat(),
            script_pubkey: required.script_pubkey.clone(),
        })
        .collect();

    let inputs: Vec<TxIn> = pledges
        .iter()
        .map(|pledge| pledge.transaction.input[0].clone())
        .collect();

    Transaction {
        version: 2,
        lock_time: 0,
        input: inputs,
        output: outputs,
    }
}

/// Like [`complete_contract`], but fails with [`ContractError::ValueMismatch`]
/// unless the pledges' total input value fully covers the project's goal.
pub fn complete_contract_strict(
    project: &ProjectDescriptor,
    pledges: &[VerifiedPledge],
) -> Result<Transaction, ContractError> {
    let total = checked_sum(pledges.iter().map(|p| p.input_value)).map_err(|_| ContractError::ValueMismatch)?;

    if total < project.goal() {
        return Err(ContractError::ValueMismatch);
    }

    Ok(complete_contract(project, pledges))
}

/// Append one additional fee-covering input drawn from a local wallet output
/// and sign it with plain (non-append) sighash, finalizing a contract that
/// has already reached the goal. This is the only place a single fixed fee
/// (not a fee market) is spent from.
pub fn add_fee_input(
    mut contract: Transaction,
    fee_outpoint: bitcoin::OutPoint,
    fee_prevout: TxOut,
    fee_secret_key: &SecretKey,
    tx_fee: Amount,
) -> Transaction {
    let change = fee_prevout.value.saturating_sub(tx_fee.as_sat());

    contract.input.push(TxIn {
        previous_output: fee_outpoint,
        script_sig: bitcoin::Script::new(),
        sequence: 0xFFFF_FFFF,
        witness: Vec::new(),
    });

    if change > 0 {
        contract.output.push(TxOut {
            value: change,
            script_pubkey: fee_prevout.script_pubkey.clone(),
        });
    }

    let index = contract.input.len() - 1;
    let script_sig = sign_p2pkh(
        &contract,
        index,
        &fee_prevout.script_pubkey,
        fee_secret_key,
        SighashPolicy::All,
    );
    contract.input[index].script_sig = script_sig;

    contract
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sign_p2pkh;
    use crate::transaction::TransactionBuilder;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use bitcoin::{Address, Network, OutPoint, PublicKey as BitcoinPublicKey, Txid};

    fn key_pair(byte: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let mut raw = [0u8; 32];
        raw[31] = byte.max(1);
        let secret_key = SecretKey::from_slice(&raw).unwrap();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        (secret_key, public_key)
    }

    fn destination() -> Address {
        "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".parse().unwrap()
    }

    fn verified_pledge(id_byte: u8, goal: Amount, stub_value: Amount) -> VerifiedPledge {
        let (secret_key, public_key) = key_pair(id_byte);
        let address = Address::p2pkh(
            &BitcoinPublicKey {
                compressed: true,
                key: public_key,
            },
            Network::Bitcoin,
        );
        let outpoint = OutPoint::new(Txid::from_inner([id_byte; 32]), 0);
        let prevout = TxOut {
            value: stub_value.as_sat(),
            script_pubkey: address.script_pubkey(),
        };

        let mut tx = TransactionBuilder::new()
            .add_input(outpoint, prevout.clone())
            .add_output(goal, destination().script_pubkey())
            .build();

        let script_sig = sign_p2pkh(
            &tx,
            0,
            &prevout.script_pubkey,
            &secret_key,
            SighashPolicy::AllAppendPermitted,
        );
        tx.input[0].script_sig = script_sig;

        VerifiedPledge {
            transaction: tx,
            input_value: stub_value,
        }
    }

    fn project(goal: Amount) -> ProjectDescriptor {
        ProjectDescriptor::new("Project", "memo", &destination(), goal, key_pair(99).1, 0)
    }

    #[test]
    fn s8_two_pledges_assemble_into_complete_contract() {
        let goal = Amount::from_sat(100_000_000);
        let project = project(goal);

        let pledge_a = verified_pledge(1, goal, Amount::from_sat(10_000_000));
        let pledge_b = verified_pledge(2, goal, Amount::from_sat(90_000_000));

        let contract = complete_contract_strict(&project, &[pledge_a, pledge_b]).unwrap();
        assert_eq!(contract.input.len(), 2);
        assert_eq!(contract.output, vec![TxOut {
            value: goal.as_sat(),
            script_pubkey: destination().script_pubkey(),
        }]);
    }

    #[test]
    fn s9_incomplete_pledges_fail_strict_finalization() {
        let goal = Amount::from_sat(100_000_000);
        let project = project(goal);

        let pledge_a = verified_pledge(1, goal, Amount::from_sat(10_000_000));
        let pledge_b = verified_pledge(2, goal, Amount::from_sat(70_000_000));

        let result = complete_contract_strict(&project, &[pledge_a, pledge_b]);
        assert_eq!(result, Err(ContractError::ValueMismatch));
    }
}
