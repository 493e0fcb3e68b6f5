//! Interface to the signing collaborator used by the receipt and handshake
//! layers that sit above the disk job system.
//!
//! Nothing in the job system calls into this; failures surfaced to those layers
//! travel as the job's error record (kind and offending path).

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// Signs handshake challenges and download receipts, and verifies the peer's.
pub trait ReceiptSigner: Send + Sync {
    fn sign(&self, bytes: &[u8]) -> Signature;

    fn verify(&self, bytes: &[u8], public_key: &PublicKey, signature: &Signature) -> bool;

    fn public_key(&self) -> PublicKey;

    /// Signs a receipt acknowledging `downloaded_size` bytes served by `replicator`.
    ///
    /// The signed message is the replicator key followed by the size as a
    /// big-endian u64.
    fn sign_receipt(&self, replicator: &PublicKey, downloaded_size: u64) -> Signature {
        self.sign(&receipt_message(replicator, downloaded_size))
    }

    fn verify_receipt(
        &self,
        client: &PublicKey,
        replicator: &PublicKey,
        downloaded_size: u64,
        signature: &Signature,
    ) -> bool {
        self.verify(
            &receipt_message(replicator, downloaded_size),
            client,
            signature,
        )
    }
}

fn receipt_message(replicator: &PublicKey, downloaded_size: u64) -> [u8; 40] {
    let mut msg = [0u8; 40];
    msg[..32].copy_from_slice(&replicator.0);
    crate::io_bytes::write_u64(downloaded_size, &mut &mut msg[32..]);
    msg
}
