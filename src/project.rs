//! Project descriptor: the immutable statement of what a crowdfund is
//! raising for and where the money goes.

use crate::transaction::canonical_serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, Amount, Script, TxOut};

/// Stable identity of a [`ProjectDescriptor`]: the double-SHA256 of its
/// canonical serialization, the same hashing primitive the crate already
/// uses for transaction ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProjectId(pub sha256d::Hash);

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A required payment output: amount and destination script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequiredOutput {
    pub amount: Amount,
    pub script_pubkey: Script,
}

impl RequiredOutput {
    fn matches(&self, output: &TxOut) -> bool {
        output.value == self.amount.as_sat() && output.script_pubkey == self.script_pubkey
    }
}

/// The canonical descriptor of a crowdfund: goal outputs, human-readable
/// metadata, and the key the project owner will authenticate with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectDescriptor {
    pub title: String,
    pub memo: String,
    pub outputs: Vec<RequiredOutput>,
    pub auth_pubkey: PublicKey,
    pub lookahead_index: u32,
}

impl ProjectDescriptor {
    /// Build a descriptor with a single required output paying `goal_amount`
    /// to `destination_address`. The wire format supports many outputs; this
    /// is the common case.
    pub fn new(
        title: impl Into<String>,
        memo: impl Into<String>,
        destination_address: &Address,
        goal_amount: Amount,
        auth_pubkey: PublicKey,
        lookahead_index: u32,
    ) -> Self {
        Self {
            title: title.into(),
            memo: memo.into(),
            outputs: vec![RequiredOutput {
                amount: goal_amount,
                script_pubkey: destination_address.script_pubkey(),
            }],
            auth_pubkey,
            lookahead_index,
        }
    }

    /// Total amount required to fully fund this project.
    pub fn goal(&self) -> Amount {
        Amount::from_sat(self.outputs.iter().map(|o| o.amount.as_sat()).sum())
    }

    /// Whether `outputs` matches this project's required outputs exactly, in
    /// order, by amount and script.
    pub fn outputs_match(&self, outputs: &[TxOut]) -> bool {
        if outputs.len() != self.outputs.len() {
            return false;
        }
        self.outputs
            .iter()
            .zip(outputs)
            .all(|(required, actual)| required.matches(actual))
    }

    /// Stable identity hash over the canonical descriptor bytes.
    pub fn project_id(&self) -> ProjectId {
        ProjectId(sha256d::Hash::hash(&self.canonical_bytes()))
    }

    /// A deterministic byte encoding of the descriptor, used both to derive
    /// [`ProjectDescriptor::project_id`] and as the wire payload.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.title.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(self.memo.as_bytes());
        bytes.push(0);
        for output in &self.outputs {
            bytes.extend_from_slice(&output.amount.as_sat().to_le_bytes());
            bytes.extend_from_slice(&canonical_serialize(&dummy_tx_for_script(&output.script_pubkey)));
        }
        bytes.extend_from_slice(&self.auth_pubkey.serialize());
        bytes.extend_from_slice(&self.lookahead_index.to_le_bytes());
        bytes
    }

    /// URL-safe slug derived from the title: lowercased, each run of
    /// non-alphanumeric characters replaced by one hyphen per two characters
    /// in the run (minimum one), leading and trailing hyphens trimmed.
    pub fn slug(&self) -> String {
        slug(&self.title)
    }
}

/// Wrap `script` in a throwaway single-output transaction so its bytes can be
/// folded into the descriptor hash via the same consensus encoder used
/// everywhere else, rather than writing a second script-serialization path.
fn dummy_tx_for_script(script: &Script) -> bitcoin::Transaction {
    bitcoin::Transaction {
        version: 1,
        lock_time: 0,
        input: Vec::new(),
        output: vec![TxOut {
            value: 0,
            script_pubkey: script.clone(),
        }],
    }
}

/// Derive a URL slug from arbitrary text: lowercase, each run of
/// non-alphanumeric characters becomes one hyphen per two characters in the
/// run (a lone separator still yields one hyphen), trim leading/trailing
/// hyphens.
pub fn slug(title: &str) -> String {
    let mut result = String::with_capacity(title.len());
    let mut run_len: usize = 0;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            for _ in 0..hyphens_for_run(run_len) {
                result.push('-');
            }
            run_len = 0;
            result.push(ch.to_ascii_lowercase());
        } else {
            run_len += 1;
        }
    }
    for _ in 0..hyphens_for_run(run_len) {
        result.push('-');
    }

    result.trim_matches('-').to_string()
}

/// Number of hyphens a run of `len` consecutive non-alphanumeric characters
/// collapses to: one hyphen per two characters, at least one for any
/// non-empty run.
fn hyphens_for_run(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        (len / 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn auth_pubkey() -> PublicKey {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &secret_key)
    }

    fn destination() -> Address {
        "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".parse().unwrap()
    }

    #[test]
    fn slug_matches_documented_example() {
        let input = "A really $cool %20 Title with ;;lots asdf\n of weird // chars";
        assert_eq!(
            slug(input),
            "a-really-cool-20-title-with-lots-asdf-of-weird--chars"
        );
    }

    #[test]
    fn accessors_round_trip_and_reserialize_identically() {
        let project = ProjectDescriptor::new(
            "My Project",
            "a memo",
            &destination(),
            Amount::from_sat(100_000_000),
            auth_pubkey(),
            0,
        );

        assert_eq!(project.title, "My Project");
        assert_eq!(project.memo, "a memo");
        assert_eq!(project.goal(), Amount::from_sat(100_000_000));

        let id_a = project.project_id();
        let id_b = project.project_id();
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn outputs_match_requires_exact_amount_and_script() {
        let project = ProjectDescriptor::new(
            "My Project",
            "a memo",
            &destination(),
            Amount::from_sat(100_000_000),
            auth_pubkey(),
            0,
        );

        let good = vec![TxOut {
            value: 100_000_000,
            script_pubkey: destination().script_pubkey(),
        }];
        assert!(project.outputs_match(&good));

        let wrong_amount = vec![TxOut {
            value: 100,
            script_pubkey: destination().script_pubkey(),
        }];
        assert!(!project.outputs_match(&wrong_amount));
    }
}
