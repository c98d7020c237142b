//! OpenPGP key handling.
//!
//! The mirror re-anchors upstream public keys locally and signs advisories
//! that arrive without an upstream signature. The signing key is loaded and
//! unlocked at most once per worker and reused for every signature.

use crate::error::{MirrorError, Result};
use chrono::Utc;
use pgp::composed::{Deserializable, SignedPublicKey, SignedSecretKey, StandaloneSignature};
use pgp::crypto::hash::HashAlgorithm;
use pgp::packet::{SignatureConfig, SignatureType, SignatureVersion, Subpacket, SubpacketData};
use pgp::types::KeyTrait;
use std::path::Path;

/// A lazily constructed signer around the aggregator's private key.
pub struct Signer {
    key: SignedSecretKey,
    passphrase: String,
}

impl Signer {
    /// Load the armored private key from disk.
    ///
    /// The passphrase, if any, is used to unlock the key on each signature.
    pub fn load(path: &Path, passphrase: Option<&str>) -> Result<Self> {
        let armored = std::fs::read_to_string(path)?;
        let (key, _) = SignedSecretKey::from_string(&armored)?;
        Ok(Self {
            key,
            passphrase: passphrase.unwrap_or_default().to_string(),
        })
    }

    /// Produce an ASCII-armored detached signature over `data`.
    pub fn sign_detached(&self, data: &[u8]) -> Result<String> {
        let config = SignatureConfig::new_v4(
            SignatureVersion::V4,
            SignatureType::Binary,
            self.key.algorithm(),
            HashAlgorithm::SHA2_256,
            vec![
                Subpacket::regular(SubpacketData::SignatureCreationTime(Utc::now())),
                Subpacket::regular(SubpacketData::Issuer(self.key.key_id())),
            ],
            vec![],
        );

        let passphrase = self.passphrase.clone();
        let signature = config.sign(&self.key, || passphrase, data)?;
        let standalone = StandaloneSignature::new(signature);
        Ok(standalone.to_armored_string(None.into())?)
    }
}

/// Check that a downloaded `.asc` body is a valid armored PGP signature.
pub fn parse_armored_signature(text: &str) -> Result<()> {
    StandaloneSignature::from_string(text)?;
    Ok(())
}

/// Derive the upper-case hex fingerprint of an armored public key.
pub fn public_key_fingerprint(armored: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(armored)
        .map_err(|e| MirrorError::config(format!("public key is not valid UTF-8: {e}")))?;
    let (key, _) = SignedPublicKey::from_string(text)?;
    Ok(hex::encode_upper(key.fingerprint()))
}

/// Whether a key fingerprint is non-empty valid hex.
pub fn valid_fingerprint(fingerprint: &str) -> bool {
    !fingerprint.is_empty() && hex::decode(fingerprint).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_fingerprint() {
        assert!(valid_fingerprint("ABCDEF0123456789"));
        assert!(valid_fingerprint("abcdef0123456789"));
        assert!(!valid_fingerprint(""));
        assert!(!valid_fingerprint("XYZ"));
        assert!(!valid_fingerprint("ABC")); // odd length
    }

    #[test]
    fn test_parse_armored_signature_rejects_garbage() {
        assert!(parse_armored_signature("not a signature").is_err());
        assert!(
            parse_armored_signature("-----BEGIN PGP SIGNATURE-----\nnope\n-----END PGP SIGNATURE-----\n")
                .is_err()
        );
    }

    #[test]
    fn test_public_key_fingerprint_rejects_garbage() {
        assert!(public_key_fingerprint(b"not a key").is_err());
        assert!(public_key_fingerprint(&[0xff, 0xfe]).is_err());
    }
}
