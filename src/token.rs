use crate::error::{AttendanceError, Result};
use crate::SessionId;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Reversible, forgery-proof transformation for QR token payloads. The
/// engine treats this as a black box: what it seals, it can open, and
/// nothing without the key produces a token that opens.
pub trait TokenCipher: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<String>;

    fn open(&self, token: &str) -> Result<Vec<u8>>;
}

/// Default cipher: hex-encoded payload with an HMAC-SHA256 tag. The payload
/// is authenticated but not hidden; deployments that need confidentiality
/// substitute an AEAD implementation behind the same trait.
pub struct HmacTokenCipher {
    key: [u8; 32],
}

impl HmacTokenCipher {
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

impl TokenCipher for HmacTokenCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let tag = self.mac(plaintext);
        Ok(format!("{}.{}", hex::encode(plaintext), hex::encode(tag)))
    }

    fn open(&self, token: &str) -> Result<Vec<u8>> {
        let (payload_hex, tag_hex) = token
            .split_once('.')
            .ok_or_else(|| AttendanceError::TokenInvalid("malformed token".into()))?;

        let payload = hex::decode(payload_hex)
            .map_err(|_| AttendanceError::TokenInvalid("bad payload encoding".into()))?;
        let tag = hex::decode(tag_hex)
            .map_err(|_| AttendanceError::TokenInvalid("bad tag encoding".into()))?;

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&payload);
        mac.verify_slice(&tag)
            .map_err(|_| AttendanceError::TokenInvalid("authentication failed".into()))?;

        Ok(payload)
    }
}

/// What a QR token binds: the session, when it was minted, and a random
/// nonce so two mints for the same session differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    pub session_id: SessionId,
    pub issued_at: DateTime<Utc>,
    pub nonce: String,
}

impl QrPayload {
    pub fn new(session_id: SessionId, issued_at: DateTime<Utc>) -> Self {
        let mut nonce = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self {
            session_id,
            issued_at,
            nonce: hex::encode(nonce),
        }
    }

    pub fn seal(&self, cipher: &dyn TokenCipher) -> Result<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| AttendanceError::TokenInvalid(e.to_string()))?;
        cipher.seal(&bytes)
    }

    pub fn open(cipher: &dyn TokenCipher, token: &str) -> Result<Self> {
        let bytes = cipher.open(token)?;
        serde_json::from_slice(&bytes)
            .map_err(|_| AttendanceError::TokenInvalid("unreadable payload".into()))
    }
}
