//! Stateless Schnorr verification of events and raw digests.
//!
//! Every failure mode collapses to `false`: callers treat an unverifiable
//! event exactly like a missing one.

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};

use crate::event::{event_hash, Event};

/// Verify an event's ID and Schnorr signature against its `pubkey`.
pub fn verify(ev: &Event) -> bool {
    check_event(ev).is_ok()
}

/// Verify a hex Schnorr signature over `digest` by the hex x-only `pubkey`.
pub fn verify_digest(pubkey: &str, digest: &[u8; 32], sig: &str) -> bool {
    check_digest(pubkey, digest, sig).is_ok()
}

fn check_event(ev: &Event) -> Result<()> {
    let hash = event_hash(ev)?;
    if hex::encode(hash) != ev.id.to_ascii_lowercase() {
        return Err(anyhow!("id mismatch"));
    }
    check_digest(&ev.pubkey, &hash, &ev.sig)
}

fn check_digest(pubkey: &str, digest: &[u8; 32], sig: &str) -> Result<()> {
    let sig = Signature::from_slice(&hex::decode(sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(digest)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use crate::keys::{Keys, UnsignedEvent};

    fn signed() -> Event {
        Keys::from_secret_slice(&[1u8; 32])
            .unwrap()
            .sign(UnsignedEvent {
                kind: 27235,
                created_at: 1_700_000_000,
                tags: vec![Tag::new(["method", "PUT"])],
                content: String::new(),
            })
            .unwrap()
    }

    #[test]
    fn accepts_valid_event() {
        let ev = signed();
        assert!(verify(&ev));
        // repeated calls give the same answer
        assert!(verify(&ev));
    }

    #[test]
    fn rejects_tampered_fields() {
        let mut ev = signed();
        ev.tags.push(Tag::new(["u", "http://elsewhere/"]));
        assert!(!verify(&ev));

        let mut ev = signed();
        ev.created_at += 1;
        assert!(!verify(&ev));
    }

    #[test]
    fn rejects_bad_signature_bytes() {
        let mut ev = signed();
        ev.sig.replace_range(0..2, "00");
        assert!(!verify(&ev));

        let mut ev = signed();
        ev.sig = "zz".into();
        assert!(!verify(&ev));

        let mut ev = signed();
        ev.sig.truncate(10);
        assert!(!verify(&ev));
    }

    #[test]
    fn rejects_foreign_signer() {
        let mut ev = signed();
        ev.pubkey = Keys::from_secret_slice(&[2u8; 32])
            .unwrap()
            .public_key()
            .to_string();
        assert!(!verify(&ev));
    }

    #[test]
    fn rejects_garbage_pubkey() {
        let mut ev = signed();
        ev.pubkey = "p".into();
        assert!(!verify(&ev));
    }

    #[test]
    fn digest_round_trip() {
        let keys = Keys::from_secret_slice(&[3u8; 32]).unwrap();
        let digest = [9u8; 32];
        let sig = keys.sign_digest(&digest);
        assert!(verify_digest(keys.public_key(), &digest, &sig));
        assert!(!verify_digest(keys.public_key(), &[8u8; 32], &sig));
    }
}
