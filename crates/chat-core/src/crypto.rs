//! Cryptographic primitives for the secure-session transport (C1).
//!
//! Hybrid handshake: RSA-2048 wraps a freshly minted 256-bit AES key and
//! signs it so the client can authenticate the server out-of-band via the
//! published fingerprint. Application traffic afterwards is AES-256-GCM
//! with a 96-bit nonce that is never reused within a session.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand::RngCore;
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Digest;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Width in bytes of the AEAD nonce (96 bits).
pub const NONCE_LEN: usize = 12;
/// Width in bytes of the AES-256 session key.
pub const SESSION_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("pkcs8 error: {0}")]
    Pkcs8(#[from] pkcs8::Error),
    #[error("spki error: {0}")]
    Spki(#[from] pkcs8::spki::Error),
    #[error("signature error: {0}")]
    Signature(#[from] rsa::signature::Error),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("io error reading {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session key must be {SESSION_KEY_LEN} bytes, got {0}")]
    BadKeyLength(usize),
    #[error("nonce must be {NONCE_LEN} bytes, got {0}")]
    BadNonceLength(usize),
    #[error("message decryption failed")]
    DecryptFailed,
}

/// The server's long-lived RSA keypair plus its published fingerprint.
pub struct ServerKeys {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
    /// Hex SHA-256 of the DER SubjectPublicKeyInfo encoding.
    pub fingerprint: String,
}

/// Loads the server's RSA keypair from the configured PEM paths, generating
/// and persisting a fresh 2048-bit pair if either file is missing.
pub fn load_or_create_server_keys(
    private_key_path: &Path,
    public_key_path: &Path,
) -> Result<ServerKeys, CryptoError> {
    let (private, public) = if private_key_path.exists() && public_key_path.exists() {
        let private = RsaPrivateKey::read_pkcs8_pem_file(private_key_path).map_err(|e| {
            CryptoError::Io {
                path: private_key_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            }
        })?;
        let public = RsaPublicKey::read_public_key_pem_file(public_key_path).map_err(|e| {
            CryptoError::Io {
                path: public_key_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            }
        })?;
        (private, public)
    } else {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048)?;
        let public = RsaPublicKey::from(&private);

        if let Some(parent) = private_key_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CryptoError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        private
            .write_pkcs8_pem_file(private_key_path, Default::default())
            .map_err(|e| CryptoError::Io {
                path: private_key_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
        public
            .write_public_key_pem_file(public_key_path, Default::default())
            .map_err(|e| CryptoError::Io {
                path: public_key_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
        (private, public)
    };

    let fingerprint = fingerprint_of(&public)?;
    Ok(ServerKeys {
        private,
        public,
        fingerprint,
    })
}

/// Hex SHA-256 of the DER-encoded SubjectPublicKeyInfo.
pub fn fingerprint_of(public: &RsaPublicKey) -> Result<String, CryptoError> {
    let der = public.to_public_key_der()?;
    let mut hasher = sha2::Sha256::new();
    hasher.update(der.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Wraps a raw session key under a client's public key, given as base64 DER SPKI.
/// RSA-OAEP with MGF1/SHA-256, no label.
pub fn wrap_session_key(client_pub_der_b64: &str, key_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    use base64::Engine;
    let der = base64::engine::general_purpose::STANDARD.decode(client_pub_der_b64)?;
    let client_pub = RsaPublicKey::from_public_key_der(&der)?;
    let mut rng = rand::thread_rng();
    let padding = Oaep::new::<Sha256>();
    Ok(client_pub.encrypt(&mut rng, padding, key_bytes)?)
}

/// Encodes a public key as base64 DER SPKI — the shape `SESSION_INIT`
/// expects for `client_key`. Used by tooling and tests standing in for a
/// real client.
pub fn encode_public_key_b64(public: &RsaPublicKey) -> Result<String, CryptoError> {
    use base64::Engine;
    let der = public.to_public_key_der()?;
    Ok(base64::engine::general_purpose::STANDARD.encode(der.as_bytes()))
}

/// Unwraps a session key using the server's private key. Used only in tests
/// and by tooling that needs to round-trip the handshake without a real client.
pub fn unwrap_session_key(private: &RsaPrivateKey, wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let padding = Oaep::new::<Sha256>();
    Ok(private.decrypt(padding, wrapped)?)
}

/// Signs `data` with the server's private key. RSA-PSS, MGF1/SHA-256, salt 32.
pub fn sign(data: &[u8], private: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let signing_key = SigningKey::<Sha256>::new_with_salt_len(private.clone(), 32);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, data);
    Ok(signature.to_bytes().to_vec())
}

/// Verifies a PSS signature against the server's published public key.
pub fn verify(data: &[u8], signature: &[u8], public: &RsaPublicKey) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::<Sha256>::new_with_salt_len(public.clone(), 32);
    let signature = Signature::try_from(signature)?;
    verifying_key.verify(data, &signature)?;
    Ok(())
}

/// A 256-bit AES session key, zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SESSION_KEY_LEN {
            return Err(CryptoError::BadKeyLength(bytes.len()));
        }
        let mut arr = [0u8; SESSION_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&hex::decode(hex_str)?)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0.ct_eq(&other.0).into()
    }
}

/// Generates an opaque session identifier: 16 random bytes as 32 lowercase
/// hex characters (≥128 bits entropy, per the session identity invariant).
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generates an opaque 32-hex-char external identifier for rooms/users —
/// same shape as a session id, since every opaque id on the wire is minted
/// the same way.
pub fn generate_opaque_id() -> String {
    generate_session_id()
}

/// Mints a 96-bit nonce as `(time_ns << 32) | rand32`, represented big-endian
/// as 12 bytes: the high 8 bytes are the nanosecond timestamp, the low 4
/// bytes are random. Uniqueness across the nonce's lifetime is enforced by
/// the nonce ledger (C3), not by this function.
pub fn mint_nonce() -> [u8; NONCE_LEN] {
    let time_ns: u64 = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64;
    let rand32: u32 = rand::thread_rng().next_u32();

    let mut nonce = [0u8; NONCE_LEN];
    nonce[0..8].copy_from_slice(&time_ns.to_be_bytes());
    nonce[8..12].copy_from_slice(&rand32.to_be_bytes());
    nonce
}

/// Seals `plaintext` with AES-256-GCM. No associated data.
pub fn seal(key: &SessionKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Nonce::from_slice(nonce);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Opens a ciphertext sealed with [`seal`]. Fails with `DecryptFailed` on any
/// tag mismatch or malformed input — callers must not distinguish the two,
/// to avoid leaking padding-oracle-style information.
pub fn open(key: &SessionKey, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Nonce::from_slice(nonce);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Parses a hex-encoded nonce into its fixed-size form.
pub fn nonce_from_hex(hex_str: &str) -> Result<[u8; NONCE_LEN], CryptoError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != NONCE_LEN {
        return Err(CryptoError::BadNonceLength(bytes.len()));
    }
    let mut arr = [0u8; NONCE_LEN];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
