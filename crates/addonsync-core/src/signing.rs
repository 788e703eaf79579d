//! Ed25519 detached signatures for published archives and the index.
//!
//! A signature lives next to its file as `<file>.sig` and holds the base64
//! encoding of the 64-byte signature over the file's bytes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::layout;
use crate::walk;

/// Environment variable holding the base64 secret key.
pub const SIGNING_KEY_ENV: &str = "ADDONSYNC_SIGNING_KEY";

/// Errors signing or verifying a published root.
#[derive(Error, Debug)]
pub enum SigningError {
    /// A file or signature could not be read or written.
    #[error("failed to access {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// A key is not valid base64 or has the wrong length.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The root could not be walked.
    #[error("Failed to walk {0}")]
    Walk(#[from] walkdir::Error),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SigningError + '_ {
    move |source| SigningError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A freshly generated keypair, both halves base64 encoded.
#[derive(Debug, Clone)]
pub struct Keypair {
    /// The 32-byte secret key.
    pub secret: String,
    /// The matching verifying key.
    pub public: String,
}

/// Generate a random Ed25519 keypair.
pub fn generate_keypair() -> Keypair {
    let mut secret_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut secret_bytes);
    let signing_key = SigningKey::from_bytes(&secret_bytes);
    Keypair {
        secret: STANDARD.encode(signing_key.to_bytes()),
        public: STANDARD.encode(signing_key.verifying_key().to_bytes()),
    }
}

/// Decode a 32-byte base64 secret key.
///
/// # Errors
///
/// Returns [`SigningError::InvalidKey`] for bad base64 or a wrong length.
pub fn signing_key_from_base64(encoded: &str) -> Result<SigningKey, SigningError> {
    let bytes = decode_key(encoded)?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Decode a 32-byte base64 public key.
///
/// # Errors
///
/// Returns [`SigningError::InvalidKey`] for bad base64, a wrong length, or
/// bytes that are not a curve point.
pub fn verifying_key_from_base64(encoded: &str) -> Result<VerifyingKey, SigningError> {
    let bytes = decode_key(encoded)?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SigningError::InvalidKey(e.to_string()))
}

fn decode_key(encoded: &str) -> Result<[u8; 32], SigningError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| SigningError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

/// Write `<path>.sig` for one file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the signature written.
pub fn sign_file(path: &Path, key: &SigningKey) -> Result<PathBuf, SigningError> {
    let data = fs::read(path).map_err(io_error(path))?;
    let signature = key.sign(&data);
    let sig_path = layout::signature_path(path);
    fs::write(&sig_path, STANDARD.encode(signature.to_bytes())).map_err(io_error(&sig_path))?;
    debug!(file = %path.display(), "signed");
    Ok(sig_path)
}

/// Sign the newest archive of every entry that has no signature yet, then
/// the compressed index, which is always re-signed.
///
/// # Errors
///
/// Returns an error if the root cannot be read or a file cannot be signed.
pub fn sign_repository(root: &Path, key: &SigningKey) -> Result<Vec<PathBuf>, SigningError> {
    let mut signed = Vec::new();
    for entry in walk::published_entries(root).map_err(io_error(root))? {
        let Some(newest) = entry.newest() else {
            continue;
        };
        if layout::signature_path(&newest.path).exists() {
            continue;
        }
        sign_file(&newest.path, key)?;
        signed.push(newest.path.clone());
    }

    let index = root.join(layout::COMPRESSED_INDEX_FILE);
    if index.is_file() {
        sign_file(&index, key)?;
        signed.push(index);
    }
    info!(root = %root.display(), files = signed.len(), "signed");
    Ok(signed)
}

/// Outcome of checking one signature file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// The signed file.
    pub path: PathBuf,
    /// `None` when the signature is valid, otherwise the reason it is not.
    pub problem: Option<String>,
}

impl Verification {
    /// Whether the signature checked out.
    pub fn is_valid(&self) -> bool {
        self.problem.is_none()
    }
}

/// Check one file against its `.sig`.
///
/// # Errors
///
/// Returns an error only if the signature file cannot be read.
pub fn verify_file(path: &Path, key: &VerifyingKey) -> Result<Verification, SigningError> {
    let sig_path = layout::signature_path(path);
    let encoded = fs::read_to_string(&sig_path).map_err(io_error(&sig_path))?;
    let problem = match check(path, encoded.trim(), key) {
        Ok(()) => None,
        Err(reason) => Some(reason),
    };
    Ok(Verification {
        path: path.to_path_buf(),
        problem,
    })
}

fn check(path: &Path, encoded: &str, key: &VerifyingKey) -> Result<(), String> {
    let bytes = STANDARD.decode(encoded).map_err(|e| format!("bad encoding: {e}"))?;
    let raw: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("expected 64 signature bytes, got {}", bytes.len()))?;
    let data = fs::read(path).map_err(|e| format!("unreadable: {e}"))?;
    key.verify(&data, &Signature::from_bytes(&raw))
        .map_err(|_| "signature mismatch".to_string())
}

/// Verify every `.sig` file below `root`, sorted by path.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or a signature file cannot
/// be read.
pub fn verify_repository(root: &Path, key: &VerifyingKey) -> Result<Vec<Verification>, SigningError> {
    let suffix = format!(".{}", layout::SIGNATURE_EXTENSION);
    let mut results = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(target) = entry.path().to_str().and_then(|p| p.strip_suffix(&suffix)) else {
            continue;
        };
        results.push(verify_file(Path::new(target), key)?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, SigningKey, VerifyingKey) {
        let root = tempfile::tempdir().unwrap();
        let entry = root.path().join("plugin.a");
        fs::create_dir_all(&entry).unwrap();
        fs::write(entry.join("plugin.a-1.0.zip"), b"old").unwrap();
        fs::write(entry.join("plugin.a-1.1.zip"), b"new").unwrap();
        fs::write(root.path().join("addons.xml.gz"), b"index").unwrap();

        let pair = generate_keypair();
        let signing = signing_key_from_base64(&pair.secret).unwrap();
        let verifying = verifying_key_from_base64(&pair.public).unwrap();
        assert_eq!(signing.verifying_key(), verifying);
        (root, signing, verifying)
    }

    #[test]
    fn test_sign_then_verify() {
        let (root, signing, verifying) = setup();
        let signed = sign_repository(root.path(), &signing).unwrap();
        assert_eq!(signed.len(), 2);
        assert!(root.path().join("plugin.a/plugin.a-1.1.zip.sig").is_file());
        assert!(!root.path().join("plugin.a/plugin.a-1.0.zip.sig").exists());

        let results = verify_repository(root.path(), &verifying).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Verification::is_valid));

        // Archives already signed are left alone, the index is re-signed.
        let again = sign_repository(root.path(), &signing).unwrap();
        assert_eq!(again, vec![root.path().join("addons.xml.gz")]);
    }

    #[test]
    fn test_tampered_file_fails() {
        let (root, signing, verifying) = setup();
        sign_repository(root.path(), &signing).unwrap();
        fs::write(root.path().join("addons.xml.gz"), b"tampered").unwrap();

        let results = verify_repository(root.path(), &verifying).unwrap();
        let index = results
            .iter()
            .find(|v| v.path.ends_with("addons.xml.gz"))
            .unwrap();
        assert_eq!(index.problem.as_deref(), Some("signature mismatch"));
    }

    #[test]
    fn test_wrong_key_fails() {
        let (root, signing, _) = setup();
        sign_repository(root.path(), &signing).unwrap();
        let other = verifying_key_from_base64(&generate_keypair().public).unwrap();
        let results = verify_repository(root.path(), &other).unwrap();
        assert!(results.iter().all(|v| !v.is_valid()));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            signing_key_from_base64("not base64!"),
            Err(SigningError::InvalidKey(_))
        ));
        assert!(matches!(
            signing_key_from_base64(&STANDARD.encode([0u8; 16])),
            Err(SigningError::InvalidKey(_))
        ));
    }
}
