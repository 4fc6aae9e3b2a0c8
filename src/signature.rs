//! Sign and verify a single transaction input under a configurable sighash
//! policy.
//!
//! Running the chain's full script interpreter is out of scope (it is
//! treated as a primitive, per the non-goals); what lives here is the narrow
//! slice of it needed to construct and check signatures over the three
//! standard templates classified in [`crate::script`].

use crate::script::{classify, ScriptTemplate};
use bitcoin::blockdata::script::{Builder, Instruction};
use bitcoin::secp256k1::{self, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Script, SigHash, SigHashType, Transaction, TxOut};

/// The two sighash modes the protocol uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SighashPolicy {
    /// Covers all inputs and all outputs.
    All,
    /// Covers only this input and all outputs; other inputs may be freely
    /// added, removed, or reordered without invalidating this signature.
    /// This is the pledge-signing mode.
    AllAppendPermitted,
}

impl SighashPolicy {
    fn to_bitcoin(self) -> SigHashType {
        match self {
            SighashPolicy::All => SigHashType::All,
            SighashPolicy::AllAppendPermitted => SigHashType::AllPlusAnyoneCanPay,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match SigHashType::from_u32_consensus(u32::from(byte)) {
            SigHashType::All => Some(SighashPolicy::All),
            SigHashType::AllPlusAnyoneCanPay => Some(SighashPolicy::AllAppendPermitted),
            _ => None,
        }
    }
}

/// Compute the digest a signature for `input_index` of `transaction` under
/// `policy` must commit to, given the prevout's `script_pubkey` as the
/// signed subscript.
pub fn compute_sighash(
    transaction: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
    policy: SighashPolicy,
) -> SigHash {
    transaction.signature_hash(input_index, script_pubkey, policy.to_bitcoin().as_u32())
}

/// DER-encode `signature` and append the sighash-type byte, as it appears in
/// a `script_sig`.
fn encode_signature(signature: secp256k1::Signature, policy: SighashPolicy) -> Vec<u8> {
    let mut encoded = signature.serialize_der().to_vec();
    encoded.push(policy.to_bitcoin().as_u32() as u8);
    encoded
}

/// Sign input `input_index` of `transaction`, producing a ready-to-embed
/// `script_sig` for a pay-to-pubkey-hash prevout.
pub fn sign_p2pkh(
    transaction: &Transaction,
    input_index: usize,
    prevout_script: &Script,
    secret_key: &SecretKey,
    policy: SighashPolicy,
) -> Script {
    let secp = Secp256k1::signing_only();
    let digest = compute_sighash(transaction, input_index, prevout_script, policy);
    let message = Message::from_slice(&digest[..]).expect("sighash is 32 bytes");
    let signature = secp.sign(&message, secret_key);
    let public_key = PublicKey::from_secret_key(&secp, secret_key);

    Builder::new()
        .push_slice(&encode_signature(signature, policy))
        .push_slice(&public_key.serialize())
        .into_script()
}

/// Sign input `input_index` of `transaction`, producing a ready-to-embed
/// `script_sig` for a pay-to-pubkey prevout.
pub fn sign_p2pk(
    transaction: &Transaction,
    input_index: usize,
    prevout_script: &Script,
    secret_key: &SecretKey,
    policy: SighashPolicy,
) -> Script {
    let secp = Secp256k1::signing_only();
    let digest = compute_sighash(transaction, input_index, prevout_script, policy);
    let message = Message::from_slice(&digest[..]).expect("sighash is 32 bytes");
    let signature = secp.sign(&message, secret_key);

    Builder::new()
        .push_slice(&encode_signature(signature, policy))
        .into_script()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("prevout script is not one of the standard templates")]
    UnsupportedTemplate,
    #[error("script_sig does not match the expected layout for this template")]
    Malformed,
    #[error("script_sig has no signatures")]
    MissingSignature,
    #[error("signature's embedded sighash-type byte does not match the expected policy")]
    SighashTypeMismatch,
    #[error("signature does not verify against the resolved prevout")]
    InvalidSignature,
    #[error("multisig script_sig has fewer valid signatures than required")]
    InsufficientMultisig,
}

/// Verify that input `input_index` of `transaction` is a valid spend of
/// `prevout` under `policy`. This is the narrow stand-in for "run the chain's
/// script interpreter" that the core needs: it only understands the three
/// standard templates a pledge is allowed to use.
pub fn verify_input(
    transaction: &Transaction,
    input_index: usize,
    prevout: &TxOut,
    policy: SighashPolicy,
) -> Result<(), ScriptError> {
    let script_sig = &transaction.input[input_index].script_sig;
    let digest = compute_sighash(transaction, input_index, &prevout.script_pubkey, policy);

    match classify(&prevout.script_pubkey) {
        ScriptTemplate::PayToAddress => verify_p2pkh(script_sig, &digest, policy),
        ScriptTemplate::PayToPubkey => {
            let pubkey = extract_p2pk_pubkey(&prevout.script_pubkey)?;
            let (sig, sighash_byte) = single_signature(script_sig)?;
            let sig_policy = SighashPolicy::from_byte(sighash_byte).ok_or(ScriptError::SighashTypeMismatch)?;
            check_policy(sig_policy, policy)?;
            verify_signature(&pubkey, &digest, &sig)
        }
        ScriptTemplate::Multisig { required, .. } => {
            verify_multisig(script_sig, &prevout.script_pubkey, &digest, policy, required)
        }
        ScriptTemplate::Other => Err(ScriptError::UnsupportedTemplate),
    }
}

fn verify_p2pkh(script_sig: &Script, digest: &SigHash, policy: SighashPolicy) -> Result<(), ScriptError> {
    let mut instructions = script_sig.instructions();

    let sig_push = match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => bytes,
        _ => return Err(ScriptError::Malformed),
    };
    let pubkey_push = match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => bytes,
        _ => return Err(ScriptError::Malformed),
    };
    if instructions.next().is_some() {
        return Err(ScriptError::Malformed);
    }

    let (der, sighash_byte) = split_sighash_byte(sig_push)?;
    let sig_policy = SighashPolicy::from_byte(sighash_byte).ok_or(ScriptError::SighashTypeMismatch)?;
    check_policy(sig_policy, policy)?;

    let pubkey = PublicKey::from_slice(pubkey_push).map_err(|_| ScriptError::Malformed)?;
    let signature = secp256k1::Signature::from_der(der).map_err(|_| ScriptError::InvalidSignature)?;

    verify_signature(&pubkey, digest, &signature)
}

fn extract_p2pk_pubkey(script_pubkey: &Script) -> Result<PublicKey, ScriptError> {
    let mut instructions = script_pubkey.instructions();
    match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => {
            PublicKey::from_slice(bytes).map_err(|_| ScriptError::UnsupportedTemplate)
        }
        _ => Err(ScriptError::UnsupportedTemplate),
    }
}

fn single_signature(script_sig: &Script) -> Result<(secp256k1::Signature, u8), ScriptError> {
    let mut instructions = script_sig.instructions();
    let sig_push = match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => bytes,
        _ => return Err(ScriptError::Malformed),
    };
    if instructions.next().is_some() {
        return Err(ScriptError::Malformed);
    }

    let (der, sighash_byte) = split_sighash_byte(sig_push)?;
    let signature = secp256k1::Signature::from_der(der).map_err(|_| ScriptError::InvalidSignature)?;
    Ok((signature, sighash_byte))
}

fn verify_multisig(
    script_sig: &Script,
    script_pubkey: &Script,
    digest: &SigHash,
    policy: SighashPolicy,
    required: u8,
) -> Result<(), ScriptError> {
    let pubkeys = multisig_pubkeys(script_pubkey)?;

    let mut instructions = script_sig.instructions();
    // OP_CHECKMULTISIG's off-by-one bug: the first item on the stack is
    // consumed and ignored, so script_sig starts with a dummy OP_0 push.
    match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) if bytes.is_empty() => {}
        _ => return Err(ScriptError::Malformed),
    }

    let mut signatures = Vec::new();
    for instruction in instructions {
        match instruction.map_err(|_| ScriptError::Malformed)? {
            Instruction::PushBytes(bytes) => {
                let (der, sighash_byte) = split_sighash_byte(bytes)?;
                let sig_policy =
                    SighashPolicy::from_byte(sighash_byte).ok_or(ScriptError::SighashTypeMismatch)?;
                check_policy(sig_policy, policy)?;
                let signature =
                    secp256k1::Signature::from_der(der).map_err(|_| ScriptError::InvalidSignature)?;
                signatures.push(signature);
            }
            _ => return Err(ScriptError::Malformed),
        }
    }

    if signatures.is_empty() {
        return Err(ScriptError::MissingSignature);
    }

    // Signatures must appear in the same relative order as their pubkeys.
    let mut pubkey_cursor = 0usize;
    let mut matched = 0u8;
    for signature in &signatures {
        while pubkey_cursor < pubkeys.len() {
            let candidate = pubkeys[pubkey_cursor];
            pubkey_cursor += 1;
            if verify_signature(&candidate, digest, signature).is_ok() {
                matched += 1;
                break;
            }
        }
    }

    if matched >= required {
        Ok(())
    } else {
        Err(ScriptError::InsufficientMultisig)
    }
}

fn multisig_pubkeys(script_pubkey: &Script) -> Result<Vec<PublicKey>, ScriptError> {
    let mut instructions = script_pubkey.instructions();
    // skip OP_<m>
    instructions.next().ok_or(ScriptError::UnsupportedTemplate)?;

    let mut pubkeys = Vec::new();
    for instruction in instructions {
        match instruction.map_err(|_| ScriptError::UnsupportedTemplate)? {
            Instruction::PushBytes(bytes) => {
                pubkeys.push(PublicKey::from_slice(bytes).map_err(|_| ScriptError::UnsupportedTemplate)?);
            }
            Instruction::Op(_) => break,
        }
    }

    Ok(pubkeys)
}

fn split_sighash_byte(push: &[u8]) -> Result<(&[u8], u8), ScriptError> {
    match push.split_last() {
        Some((byte, der)) => Ok((der, *byte)),
        None => Err(ScriptError::Malformed),
    }
}

fn check_policy(found: SighashPolicy, expected: SighashPolicy) -> Result<(), ScriptError> {
    if found == expected {
        Ok(())
    } else {
        Err(ScriptError::SighashTypeMismatch)
    }
}

fn verify_signature(
    pubkey: &PublicKey,
    digest: &SigHash,
    signature: &secp256k1::Signature,
) -> Result<(), ScriptError> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_slice(&digest[..]).expect("sighash is 32 bytes");

    secp.verify(&message, signature, pubkey)
        .map_err(|_| ScriptError::InvalidSignature)
}
