//! Schnorr signing keys for events the server authors itself.

use std::fmt;

use secp256k1::{All, Keypair, Message, Secp256k1};
use thiserror::Error;

use crate::event::{event_hash, Event, Tag};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("secret key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid secret key: {0}")]
    Secp(#[from] secp256k1::Error),
}

/// Fields of an event before it is hashed and signed.
#[derive(Debug, Clone)]
pub struct UnsignedEvent {
    pub kind: u32,
    pub created_at: u64,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// A secp256k1 keypair together with its x-only public key in hex.
#[derive(Clone)]
pub struct Keys {
    secp: Secp256k1<All>,
    keypair: Keypair,
    public_hex: String,
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_hex)
            .finish_non_exhaustive()
    }
}

impl Keys {
    /// Load keys from a 32-byte secret key.
    pub fn from_secret_slice(secret: &[u8]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, secret)?;
        Ok(Self::with_keypair(secp, keypair))
    }

    /// Load keys from a hex-encoded secret key.
    pub fn from_secret_hex(secret: &str) -> Result<Self, KeyError> {
        Self::from_secret_slice(&hex::decode(secret.trim())?)
    }

    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut secp256k1::rand::thread_rng());
        Self::with_keypair(secp, keypair)
    }

    fn with_keypair(secp: Secp256k1<All>, keypair: Keypair) -> Self {
        let public_hex = hex::encode(keypair.x_only_public_key().0.serialize());
        Self {
            secp,
            keypair,
            public_hex,
        }
    }

    /// Hex x-only public key, i.e. the identity used in `pubkey`.
    pub fn public_key(&self) -> &str {
        &self.public_hex
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// Schnorr-sign a 32-byte digest and return the hex signature.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> String {
        // 32-byte digests always form a valid message.
        let msg = Message::from_digest(*digest);
        let sig = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        hex::encode(sig.as_ref())
    }

    /// Hash and sign an event authored by these keys.
    pub fn sign(&self, unsigned: UnsignedEvent) -> Result<Event, serde_json::Error> {
        let mut ev = Event {
            id: String::new(),
            pubkey: self.public_hex.clone(),
            kind: unsigned.kind,
            created_at: unsigned.created_at,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: String::new(),
        };
        let hash = event_hash(&ev)?;
        ev.id = hex::encode(hash);
        ev.sig = self.sign_digest(&hash);
        Ok(ev)
    }
}
