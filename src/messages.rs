//! Wire message types exchanged between a project owner and backers, and
//! persisted by a wallet. Gated behind `use-serde` the way the host gates
//! its own `Message` enum; encoded with `serde_cbor` for a compact,
//! schema-evolvable binary form.

use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, Script, Transaction};

/// The project owner's declared payment request: required outputs plus
/// human-readable metadata and the authentication key backers can challenge.
#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectDetails {
    pub title: String,
    pub memo: String,
    pub outputs: Vec<RequiredOutputDetails>,
    pub payment_url: Option<String>,
    pub merchant_data: Option<Vec<u8>>,
    pub expires: Option<i64>,
    pub time: i64,
    #[cfg_attr(feature = "use-serde", serde(with = "auth_key"))]
    pub auth_key: PublicKey,
    pub auth_key_index: u32,
}

#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RequiredOutputDetails {
    #[cfg_attr(feature = "use-serde", serde(with = "amount"))]
    pub amount: Amount,
    #[cfg_attr(feature = "use-serde", serde(with = "script"))]
    pub script: Script,
}

/// The outer wrapper around a serialized [`ProjectDetails`]. Keeping the
/// payload as opaque bytes behind a detached signature lets a future
/// revision add project-owner certification without breaking parsers that
/// only understand the inner `ProjectDetails` shape.
#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub serialized_project_details: Vec<u8>,
    pub signature: Option<String>,
}

#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Pledge {
    #[cfg_attr(feature = "use-serde", serde(with = "crate::serde::transaction::vec"))]
    pub transactions: Vec<Transaction>,
    pub total_input_value: i64,
    pub timestamp: i64,
    pub project_id: String,
    pub contact: Option<ContactDetails>,
}

#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ContactDetails {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[cfg(feature = "use-serde")]
mod amount {
    use bitcoin::Amount;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_sat())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        Ok(Amount::from_sat(u64::deserialize(deserializer)?))
    }
}

#[cfg(feature = "use-serde")]
mod script {
    use bitcoin::Script;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Script, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(value.as_bytes())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Script, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Ok(Script::from(bytes))
    }
}

#[cfg(feature = "use-serde")]
mod auth_key {
    use bitcoin::secp256k1::PublicKey;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &PublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&value.serialize())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PublicKey, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        PublicKey::from_slice(&bytes).map_err(D::Error::custom)
    }
}

/// Encode `project_details` with `serde_cbor` for persistence or wire
/// transmission.
#[cfg(feature = "use-serde")]
pub fn encode_project_details(project_details: &ProjectDetails) -> Result<Vec<u8>, serde_cbor::Error> {
    serde_cbor::to_vec(project_details)
}

#[cfg(feature = "use-serde")]
pub fn decode_project_details(bytes: &[u8]) -> Result<ProjectDetails, serde_cbor::Error> {
    serde_cbor::from_slice(bytes)
}

#[cfg(all(test, feature = "use-serde"))]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn auth_key() -> PublicKey {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[3u8; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &secret_key)
    }

    #[test]
    fn project_details_round_trip_through_cbor() {
        let details = ProjectDetails {
            title: "My Project".to_string(),
            memo: "a memo".to_string(),
            outputs: vec![RequiredOutputDetails {
                amount: Amount::from_sat(100_000_000),
                script: Script::new(),
            }],
            payment_url: None,
            merchant_data: None,
            expires: None,
            time: 0,
            auth_key: auth_key(),
            auth_key_index: 0,
        };

        let encoded = encode_project_details(&details).unwrap();
        let decoded = decode_project_details(&encoded).unwrap();
        assert_eq!(details, decoded);
    }
}
