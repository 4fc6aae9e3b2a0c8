//! Property-based coverage for the two properties that don't reduce to a
//! single literal example: append-permitted sighash invariance under
//! arbitrary additional inputs, and monotone one-error-per-mutation
//! verification failures.

#![cfg(test)]

use crate::pledge::{fast_sanity_check, verify_pledge, PledgeMessage, UtxoOracle, VerificationError};
use crate::project::ProjectDescriptor;
use crate::signature::{sign_p2pkh, verify_input, SighashPolicy};
use crate::transaction::TransactionBuilder;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Address, Amount, Network, OutPoint, PublicKey as BitcoinPublicKey, Script, TxIn, TxOut, Txid};
use proptest::prelude::*;

struct FixedOracle(Vec<Option<TxOut>>);

#[async_trait::async_trait]
impl UtxoOracle for FixedOracle {
    async fn resolve(&self, outpoints: &[OutPoint]) -> Vec<Option<TxOut>> {
        assert_eq!(outpoints.len(), self.0.len());
        self.0.clone()
    }
}

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

fn base_pledge() -> (PledgeMessage, ProjectDescriptor, TxOut) {
    let (secret_key, public_key) = key_pair(1);
    let address = Address::p2pkh(
        &BitcoinPublicKey {
            compressed: true,
            key: public_key,
        },
        Network::Bitcoin,
    );

    let goal = Amount::from_sat(100_000_000);
    let stub_value = Amount::from_sat(10_000_000);
    let outpoint = OutPoint::new(Txid::from_inner([5u8; 32]), 0);
    let prevout = TxOut {
        value: stub_value.as_sat(),
        script_pubkey: address.script_pubkey(),
    };

    let mut tx = TransactionBuilder::new()
        .add_input(outpoint, prevout.clone())
        .add_output(goal, destination().script_pubkey())
        .build();

    let script_sig = sign_p2pkh(&tx, 0, &prevout.script_pubkey, &secret_key, SighashPolicy::AllAppendPermitted);
    tx.input[0].script_sig = script_sig;

    let pledge = PledgeMessage {
        transactions: vec![tx],
        total_input_value: stub_value.as_sat(),
        timestamp: 0,
        project_id: "test".to_string(),
        contact: None,
    };

    let project = ProjectDescriptor::new("Project", "memo", &destination(), goal, key_pair(2).1, 0);

    (pledge, project, prevout)
}

proptest! {
    /// Appending arbitrary extra inputs to a pledge transaction never
    /// invalidates the original input's append-permitted signature.
    #[test]
    fn append_permitted_signature_survives_arbitrary_extra_inputs(
        extra_outpoint_byte in any::<u8>(),
        extra_vout in any::<u32>(),
        extra_sequence in any::<u32>(),
    ) {
        let (pledge, _project, prevout) = base_pledge();
        let mut tx = pledge.transactions[0].clone();

        tx.input.push(TxIn {
            previous_output: OutPoint::new(Txid::from_inner([extra_outpoint_byte; 32]), extra_vout),
            script_sig: Script::new(),
            sequence: extra_sequence,
            witness: Vec::new(),
        });

        prop_assert!(verify_input(&tx, 0, &prevout, SighashPolicy::AllAppendPermitted).is_ok());
    }
}

/// One mutation per closed error-kind, each yielding exactly that
/// `VerificationError` variant and no other.
#[test]
fn each_mutation_yields_exactly_one_error_kind() {
    let mutators: Vec<(&str, Box<dyn Fn(&mut PledgeMessage)>, VerificationError)> = vec![
        (
            "empty transactions",
            Box::new(|pledge: &mut PledgeMessage| pledge.transactions.clear()),
            VerificationError::NoTransactionData,
        ),
        (
            "duplicated outpoint",
            Box::new(|pledge: &mut PledgeMessage| {
                let input = pledge.transactions[0].input[0].clone();
                pledge.transactions[0].input.push(input);
            }),
            VerificationError::DuplicatedOutPoint,
        ),
        (
            "output amount tampered",
            Box::new(|pledge: &mut PledgeMessage| {
                pledge.transactions[0].output[0].value = 1;
            }),
            VerificationError::OutputMismatch,
        ),
        (
            "extra output appended",
            Box::new(|pledge: &mut PledgeMessage| {
                pledge.transactions[0].output.push(TxOut {
                    value: 1,
                    script_pubkey: Script::new(),
                });
            }),
            VerificationError::TxWrongNumberOfOutputs,
        ),
    ];

    for (name, mutate, expected) in mutators {
        let (mut pledge, project, _prevout) = base_pledge();
        mutate(&mut pledge);

        let result = fast_sanity_check(&pledge, &project);
        assert_eq!(result, Err(expected), "mutation `{}` did not yield the expected error", name);
    }
}

#[tokio::test]
async fn unknown_utxo_yields_exactly_that_error() {
    let (pledge, project, _prevout) = base_pledge();
    let oracle = FixedOracle(vec![None]);
    let result = verify_pledge(&pledge, &project, &oracle).await;
    assert_eq!(result, Err(VerificationError::UnknownUTXO));
}

#[tokio::test]
async fn cached_value_mismatch_yields_exactly_that_error() {
    let (mut pledge, project, prevout) = base_pledge();
    pledge.total_input_value += 1;
    let oracle = FixedOracle(vec![Some(prevout)]);
    let result = verify_pledge(&pledge, &project, &oracle).await;
    assert_eq!(result, Err(VerificationError::CachedValueMismatch));
}
