//! Session wallet: key generation, address derivation, encrypted keystore.
//!
//! The signing key lives in enclave memory. For restarts it can be persisted
//! under AES-256-GCM with a key derived from an operator passphrase via
//! HKDF-SHA256. The passphrase only ever travels inside `SecretString`.

use std::path::{Path, PathBuf};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use k256::ecdsa::SigningKey;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::chain::address::Address;
use crate::error::ChainError;

const KEYSTORE_VERSION: u8 = 1;
const KEYSTORE_INFO: &[u8] = b"emberagent keystore v1";

/// A secp256k1 wallet bound to one EVM address.
pub struct Wallet {
    key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Generate a fresh random wallet.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        let point = key.verifying_key().to_encoded_point(false);
        // Uncompressed SEC1 is 0x04 || x || y.
        let mut xy = [0u8; 64];
        xy.copy_from_slice(&point.as_bytes()[1..]);
        let address = Address::from_uncompressed_pubkey(&xy);
        Self { key, address }
    }

    /// Load from a 32-byte hex private key (with or without `0x`).
    pub fn from_hex(hex: &str) -> Result<Self, ChainError> {
        let hex = hex.trim().trim_start_matches("0x");
        if hex.len() != 64 {
            return Err(ChainError::Keystore(format!(
                "private key must be 64 hex characters, got {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let parsed = u8::from_str_radix(
                std::str::from_utf8(chunk)
                    .map_err(|_| ChainError::Keystore("non-ascii private key".to_string()))?,
                16,
            )
            .map_err(|_| ChainError::Keystore("non-hex private key".to_string()))?;
            bytes[i] = parsed;
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| ChainError::Keystore(format!("invalid private key: {}", e)))?;
        Ok(Self::from_signing_key(key))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug.
        f.debug_struct("Wallet")
            .field("address", &self.address.to_checksum())
            .finish_non_exhaustive()
    }
}

/// On-disk keystore envelope. All binary fields are base64.
#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    version: u8,
    salt: String,
    nonce: String,
    ciphertext: String,
}

fn derive_cipher(passphrase: &SecretString, salt: &[u8]) -> Result<Aes256Gcm, ChainError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), passphrase.expose_secret().as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(KEYSTORE_INFO, &mut okm)
        .map_err(|_| ChainError::Keystore("key derivation failed".to_string()))?;
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&okm)))
}

/// Encrypt the wallet key and write it to `path` (mode 0600 on unix).
pub fn save_keystore(
    path: &Path,
    wallet: &Wallet,
    passphrase: &SecretString,
) -> Result<(), ChainError> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = derive_cipher(passphrase, &salt)?;
    let plaintext = wallet.key.to_bytes();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
        .map_err(|_| ChainError::Keystore("encryption failed".to_string()))?;

    let file = KeystoreFile {
        version: KEYSTORE_VERSION,
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ChainError::Keystore(format!("create {}: {}", parent.display(), e)))?;
    }
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| ChainError::Keystore(format!("serialize keystore: {}", e)))?;
    std::fs::write(path, json)
        .map_err(|e| ChainError::Keystore(format!("write {}: {}", path.display(), e)))?;

    // Restrictive permissions: the file wraps a spending key.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .map_err(|e| ChainError::Keystore(format!("chmod {}: {}", path.display(), e)))?;
    }

    Ok(())
}

/// Directory of per-session keystore files, so a restarted enclave can
/// hand a session its previous wallet back.
#[derive(Clone)]
pub struct SessionKeystore {
    dir: PathBuf,
    passphrase: SecretString,
}

impl SessionKeystore {
    pub fn new(dir: impl Into<PathBuf>, passphrase: SecretString) -> Self {
        Self {
            dir: dir.into(),
            passphrase,
        }
    }

    /// Persist `wallet` for `session`, replacing any previous entry.
    pub fn store(&self, session: &str, wallet: &Wallet) -> Result<(), ChainError> {
        save_keystore(&self.entry_path(session), wallet, &self.passphrase)
    }

    /// Load the wallet persisted for `session`; `None` when it has none.
    pub fn load(&self, session: &str) -> Result<Option<Wallet>, ChainError> {
        let path = self.entry_path(session);
        if !path.exists() {
            return Ok(None);
        }
        load_keystore(&path, &self.passphrase).map(Some)
    }

    /// Session ids come from channels and may contain path separators or
    /// other unsafe characters. The file name keeps a readable prefix and
    /// disambiguates with a short digest of the raw id.
    fn entry_path(&self, session: &str) -> PathBuf {
        let safe: String = session
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .take(40)
            .collect();
        let digest = blake3::hash(session.as_bytes());
        let hex = digest.to_hex();
        self.dir.join(format!("{safe}-{}.json", &hex[..8]))
    }
}

impl std::fmt::Debug for SessionKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeystore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Decrypt a keystore written by [`save_keystore`].
pub fn load_keystore(path: &Path, passphrase: &SecretString) -> Result<Wallet, ChainError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ChainError::Keystore(format!("read {}: {}", path.display(), e)))?;
    let file: KeystoreFile = serde_json::from_str(&raw)
        .map_err(|e| ChainError::Keystore(format!("parse {}: {}", path.display(), e)))?;

    if file.version != KEYSTORE_VERSION {
        return Err(ChainError::Keystore(format!(
            "unsupported keystore version {}",
            file.version
        )));
    }

    let salt = BASE64
        .decode(&file.salt)
        .map_err(|_| ChainError::Keystore("bad salt encoding".to_string()))?;
    let nonce = BASE64
        .decode(&file.nonce)
        .map_err(|_| ChainError::Keystore("bad nonce encoding".to_string()))?;
    let ciphertext = BASE64
        .decode(&file.ciphertext)
        .map_err(|_| ChainError::Keystore("bad ciphertext encoding".to_string()))?;
    if nonce.len() != 12 {
        return Err(ChainError::Keystore("bad nonce length".to_string()));
    }

    let cipher = derive_cipher(passphrase, &salt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| ChainError::Keystore("decryption failed (wrong passphrase?)".to_string()))?;

    let key = SigningKey::from_slice(&plaintext)
        .map_err(|e| ChainError::Keystore(format!("invalid key material: {}", e)))?;
    Ok(Wallet::from_signing_key(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_known_key_derives_known_address() {
        // secp256k1 private key 1 has a widely published address.
        let wallet = Wallet::from_hex(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(
            wallet.address().to_checksum(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn test_generate_distinct_wallets() {
        let a = Wallet::generate();
        let b = Wallet::generate();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Wallet::from_hex("0x1234").is_err());
        assert!(Wallet::from_hex(&"zz".repeat(32)).is_err());
        // Zero is not a valid secp256k1 scalar.
        assert!(Wallet::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_keystore_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        let passphrase = SecretString::from("correct horse battery staple");

        let wallet = Wallet::generate();
        save_keystore(&path, &wallet, &passphrase).unwrap();

        let loaded = load_keystore(&path, &passphrase).unwrap();
        assert_eq!(loaded.address(), wallet.address());
    }

    #[test]
    fn test_keystore_wrong_passphrase() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.json");

        let wallet = Wallet::generate();
        save_keystore(&path, &wallet, &SecretString::from("right")).unwrap();

        let err = load_keystore(&path, &SecretString::from("wrong")).unwrap_err();
        assert!(matches!(err, ChainError::Keystore(_)));
    }

    #[test]
    fn test_debug_hides_key() {
        let wallet = Wallet::generate();
        let rendered = format!("{:?}", wallet);
        assert!(rendered.contains("address"));
        assert!(!rendered.contains("key"));
    }

    #[test]
    fn test_session_keystore_round_trip() {
        let dir = tempdir().unwrap();
        let keystore = SessionKeystore::new(dir.path(), SecretString::from("hunter2hunter2"));

        assert!(keystore.load("web:42").unwrap().is_none());

        let wallet = Wallet::generate();
        keystore.store("web:42", &wallet).unwrap();

        let restored = keystore.load("web:42").unwrap().unwrap();
        assert_eq!(restored.address(), wallet.address());
        assert!(keystore.load("web:43").unwrap().is_none());
    }

    #[test]
    fn test_session_keystore_sanitizes_ids() {
        let dir = tempdir().unwrap();
        let keystore = SessionKeystore::new(dir.path(), SecretString::from("pw"));

        // Ids differing only in unsafe characters must not collide.
        let a = Wallet::generate();
        let b = Wallet::generate();
        keystore.store("user/1", &a).unwrap();
        keystore.store("user_1", &b).unwrap();

        assert_eq!(keystore.load("user/1").unwrap().unwrap().address(), a.address());
        assert_eq!(keystore.load("user_1").unwrap().unwrap().address(), b.address());

        // Nothing escaped the keystore directory.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 2);
    }
}
