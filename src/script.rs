//! Script template classification.
//!
//! The core never interprets arbitrary script; it only needs to recognise
//! the handful of templates a project is allowed to require payment to, and
//! to decide whether a given `script_pubkey` is "standard" for that purpose.
//! Running the chain's own script interpreter is treated as a primitive
//! elsewhere (see [`crate::signature`]).

use bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::blockdata::script::Instruction;
use bitcoin::Script;

/// The recognised output templates. Anything else is [`ScriptTemplate::Other`]
/// and therefore non-standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptTemplate {
    /// `OP_DUP OP_HASH160 <20-byte-hash> OP_EQUALVERIFY OP_CHECKSIG`
    PayToAddress,
    /// `<pubkey> OP_CHECKSIG`
    PayToPubkey,
    /// `OP_<m> <pubkey>... OP_<n> OP_CHECKMULTISIG`
    Multisig { required: u8, total: u8 },
    Other,
}

/// Classify a `script_pubkey` by matching it against the standard templates.
pub fn classify(script: &Script) -> ScriptTemplate {
    if script.is_p2pkh() {
        return ScriptTemplate::PayToAddress;
    }

    if is_pay_to_pubkey(script) {
        return ScriptTemplate::PayToPubkey;
    }

    if let Some((required, total)) = multisig_template(script) {
        return ScriptTemplate::Multisig { required, total };
    }

    ScriptTemplate::Other
}

/// Whether `script` is one of the templates a project is allowed to require
/// payment to, and therefore a pledge is allowed to pay to.
pub fn is_standard(script: &Script) -> bool {
    classify(script) != ScriptTemplate::Other
}

fn is_pay_to_pubkey(script: &Script) -> bool {
    let mut instructions = script.instructions();

    let pubkey = match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => bytes,
        _ => return false,
    };

    if pubkey.len() != 33 && pubkey.len() != 65 {
        return false;
    }

    match instructions.next() {
        Some(Ok(Instruction::Op(op))) if op == bitcoin::blockdata::opcodes::all::OP_CHECKSIG => {}
        _ => return false,
    }

    instructions.next().is_none()
}

fn multisig_template(script: &Script) -> Option<(u8, u8)> {
    let mut instructions = script.instructions();

    let required = small_int(instructions.next()?.ok()?)?;

    let mut total = 0u8;
    let mut last = instructions.next()?.ok()?;
    loop {
        match last {
            Instruction::PushBytes(bytes) if bytes.len() == 33 || bytes.len() == 65 => {
                total += 1;
                last = instructions.next()?.ok()?;
            }
            Instruction::Op(_) => break,
            _ => return None,
        }
    }

    let declared_total = small_int(last)?;
    if declared_total != total {
        return None;
    }

    match instructions.next()? {
        Ok(Instruction::Op(op)) if op == OP_CHECKMULTISIG => {}
        _ => return None,
    }

    if instructions.next().is_some() {
        return None;
    }

    if required == 0 || required > total {
        return None;
    }

    Some((required, total))
}

fn small_int(instruction: Instruction<'_>) -> Option<u8> {
    match instruction {
        Instruction::Op(op) => {
            let byte = op.into_u8();
            if (0x51..=0x60).contains(&byte) {
                Some(byte - 0x50)
            } else {
                None
            }
        }
        _ => None,
    }
}
