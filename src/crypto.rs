//! Cell Protocol - Signature Verification
//!
//! The core treats signatures as opaque bytes: it never
//! signs on a member's behalf, it only verifies. `Ed25519Verifier` is the
//! shipped default, backed by the edwards-curve crate already present in the
//! retrieval pack's workspace dependency set.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::types::{PublicKeyBytes, SignatureBytes};

/// Verifies a signature against a public key and message bytes.
///
/// Implementations are opaque to the engine: the core never constructs or
/// inspects key material beyond the raw bytes it is handed.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &PublicKeyBytes, message: &[u8], signature: &SignatureBytes) -> bool;
}

/// Production verifier backed by `ed25519-dalek`.
#[derive(Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &PublicKeyBytes, message: &[u8], signature: &SignatureBytes) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let sig = Signature::from_bytes(signature);
        key.verify(message, &sig).is_ok()
    }
}

/// Test double that accepts or rejects every signature unconditionally.
pub struct MockVerifier {
    pub accept: bool,
}

impl MockVerifier {
    pub fn accepting() -> Self {
        MockVerifier { accept: true }
    }

    pub fn rejecting() -> Self {
        MockVerifier { accept: false }
    }
}

impl SignatureVerifier for MockVerifier {
    fn verify(&self, _public_key: &PublicKeyBytes, _message: &[u8], _signature: &SignatureBytes) -> bool {
        self.accept
    }
}

/// Deterministic canonical serialization of a spot transaction: fixed
/// field order, fixed-width big-endian integers,
/// length-prefixed UTF-8 strings. Stable across implementations so
/// signatures verify regardless of which language produced them.
#[allow(clippy::too_many_arguments)]
pub fn canonical_transaction_bytes(
    id: &str,
    payer: &str,
    payee: &str,
    amount: u64,
    description: &str,
    category: Option<&str>,
    timestamp: u64,
) -> Vec<u8> {
    let mut buf = Vec::new();
    write_str(&mut buf, id);
    write_str(&mut buf, payer);
    write_str(&mut buf, payee);
    buf.extend_from_slice(&amount.to_be_bytes());
    write_str(&mut buf, description);
    write_str(&mut buf, category.unwrap_or(""));
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf
}

/// Canonical serialization of a commitment, mirroring the transaction scheme.
#[allow(clippy::too_many_arguments)]
pub fn canonical_commitment_bytes(
    id: &str,
    promisor: &str,
    promisee: &str,
    value: u64,
    due_date: u64,
    category: Option<&str>,
    created_at: u64,
) -> Vec<u8> {
    let mut buf = Vec::new();
    write_str(&mut buf, id);
    write_str(&mut buf, promisor);
    write_str(&mut buf, promisee);
    buf.extend_from_slice(&value.to_be_bytes());
    buf.extend_from_slice(&due_date.to_be_bytes());
    write_str(&mut buf, category.unwrap_or(""));
    buf.extend_from_slice(&created_at.to_be_bytes());
    buf
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{SigningKey, Signer};
    use rand::rngs::OsRng;

    #[test]
    fn signature_round_trips_and_field_flip_invalidates() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();

        let message = canonical_transaction_bytes("tx-1", "alice", "bob", 3000, "lunch", None, 100);
        let signature = signing_key.sign(&message);

        let verifier = Ed25519Verifier;
        assert!(verifier.verify(&verifying_key.to_bytes(), &message, &signature.to_bytes()));

        let flipped = canonical_transaction_bytes("tx-1", "alice", "bob", 3001, "lunch", None, 100);
        assert!(!verifier.verify(&verifying_key.to_bytes(), &flipped, &signature.to_bytes()));
    }

    #[test]
    fn mock_verifier_short_circuits() {
        let accepting = MockVerifier::accepting();
        assert!(accepting.verify(&[0u8; 32], b"anything", &[0u8; 64]));
        let rejecting = MockVerifier::rejecting();
        assert!(!rejecting.verify(&[0u8; 32], b"anything", &[0u8; 64]));
    }
}
