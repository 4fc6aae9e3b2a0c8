//! Detached message signing and verification bound to a project's declared
//! authentication key.

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{self, Message, PublicKey, Secp256k1, SecretKey};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature does not verify against the project's authentication key")]
    InvalidSignature,
    #[error("signature is not valid base64")]
    MalformedEncoding,
    #[error("decoded signature is not a valid DER-encoded ECDSA signature")]
    MalformedSignature,
}

/// Sign `message` as the project owner, returning a base64-encoded detached
/// signature suitable for embedding in a wire message.
pub fn sign_as_owner(message: &[u8], auth_secret_key: &SecretKey) -> String {
    let secp = Secp256k1::signing_only();
    let digest = sha256d::Hash::hash(message);
    let msg = Message::from_slice(&digest[..]).expect("sighash is 32 bytes");
    let signature = secp.sign(&msg, auth_secret_key);

    base64::encode(signature.serialize_der())
}

/// Verify a base64-encoded detached signature over `message` against the
/// project's declared `auth_pubkey`.
pub fn authenticate_owner(
    message: &[u8],
    signature: &str,
    auth_pubkey: &PublicKey,
) -> Result<(), SignatureError> {
    let der = base64::decode(signature).map_err(|_| SignatureError::MalformedEncoding)?;
    let signature =
        secp256k1::Signature::from_der(&der).map_err(|_| SignatureError::MalformedSignature)?;

    let secp = Secp256k1::verification_only();
    let digest = sha256d::Hash::hash(message);
    let msg = Message::from_slice(&digest[..]).expect("sighash is 32 bytes");

    secp.verify(&msg, &signature, auth_pubkey)
        .map_err(|_| SignatureError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_key_pair() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(&[42u8; 32]).unwrap();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        (secret_key, public_key)
    }

    #[test]
    fn s10_matching_message_authenticates() {
        let (secret_key, public_key) = auth_key_pair();
        let message = b"I am the project owner";

        let signature = sign_as_owner(message, &secret_key);
        authenticate_owner(message, &signature, &public_key).unwrap();
    }

    #[test]
    fn s10_mismatched_message_fails_authentication() {
        let (secret_key, public_key) = auth_key_pair();
        let message = b"I am the project owner";
        let other_message = b"I am definitely not the project owner";

        let signature = sign_as_owner(message, &secret_key);
        let result = authenticate_owner(other_message, &signature, &public_key);
        assert_eq!(result, Err(SignatureError::InvalidSignature));
    }
}
