//! Transaction model.
//!
//! The core does not reinvent the consensus transaction format: [`Transaction`],
//! [`TxIn`], [`TxOut`] and [`OutPoint`] are `bitcoin`'s own types, which already
//! guarantee bit-exact canonical serialization via [`bitcoin::consensus::encode`].
//! What this module adds is a small immutable-input-output builder and the
//! round-trip helpers the rest of the core and its tests rely on.

use bitcoin::consensus::encode;
pub use bitcoin::{OutPoint, Script, Transaction, TxIn, TxOut, Txid};
use bitcoin::Amount;

/// Default sequence number: final, no relative timelock, no RBF signalling.
const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// An input paired with the output it spends, i.e. what a signer needs to
/// compute a signature hash or what a verifier needs to check one.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectedInput {
    pub input: TxIn,
    pub prevout: TxOut,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to decode transaction bytes")]
    Decode(#[from] encode::Error),
}

/// Canonical little-endian, length-prefixed consensus serialization. Bit-exact
/// with what the network will accept; this is a compatibility surface, not a
/// format of our own design.
pub fn canonical_serialize(transaction: &Transaction) -> Vec<u8> {
    encode::serialize(transaction)
}

/// Parse a transaction out of its canonical serialization.
pub fn canonical_deserialize(bytes: &[u8]) -> Result<Transaction, EncodeError> {
    Ok(encode::deserialize(bytes)?)
}

/// Re-parse a freshly serialized transaction. Used by tests to make sure no
/// builder-side state leaks into the wire representation.
pub fn round_trip(transaction: &Transaction) -> Result<Transaction, EncodeError> {
    canonical_deserialize(&canonical_serialize(transaction))
}

/// Builds an unsigned transaction from connected inputs (so a signer always
/// has the prevout script and value at hand) and plain outputs. Signatures
/// are filled in afterwards by [`crate::signature`].
#[derive(Clone, Debug, Default)]
pub struct TransactionBuilder {
    version: i32,
    lock_time: u32,
    inputs: Vec<ConnectedInput>,
    outputs: Vec<TxOut>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            version: 2,
            lock_time: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn add_input(mut self, outpoint: OutPoint, prevout: TxOut) -> Self {
        self.inputs.push(ConnectedInput {
            input: TxIn {
                previous_output: outpoint,
                script_sig: Script::new(),
                sequence: SEQUENCE_FINAL,
                witness: Vec::new(),
            },
            prevout,
        });
        self
    }

    pub fn add_output(mut self, amount: Amount, script_pubkey: Script) -> Self {
        self.outputs.push(TxOut {
            value: amount.as_sat(),
            script_pubkey,
        });
        self
    }

    pub fn connected_inputs(&self) -> &[ConnectedInput] {
        &self.inputs
    }

    /// Emit the unsigned transaction. Each input's `script_sig` is empty;
    /// callers sign each input via [`crate::signature`] and patch it in.
    pub fn build(self) -> Transaction {
        Transaction {
            version: self.version,
            lock_time: self.lock_time,
            input: self.inputs.into_iter().map(|c| c.input).collect(),
            output: self.outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::classify;
    use bitcoin::hashes::Hash;
    use bitcoin::Address;

    fn dummy_address() -> Address {
        "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".parse().unwrap()
    }

    #[test]
    fn round_trips_a_built_transaction() {
        let outpoint = OutPoint::new(Txid::from_inner([1u8; 32]), 0);
        let prevout = TxOut {
            value: 100_000,
            script_pubkey: dummy_address().script_pubkey(),
        };

        let tx = TransactionBuilder::new()
            .add_input(outpoint, prevout)
            .add_output(Amount::from_sat(90_000), dummy_address().script_pubkey())
            .build();

        let round_tripped = round_trip(&tx).unwrap();
        assert_eq!(tx, round_tripped);
        assert_eq!(
            classify(&tx.output[0].script_pubkey),
            classify(&round_tripped.output[0].script_pubkey)
        );
    }
}
