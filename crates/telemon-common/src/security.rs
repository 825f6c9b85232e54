use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use ip_network::IpNetwork;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 HMAC-SHA256 of the (compressed) body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Header the trusted-subnet check reads the client address from.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// OAEP label bound into every encrypted chunk.
const OAEP_LABEL: &str = "telemon";

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("invalid signing key")]
    InvalidKey,

    #[error("signature header is not valid base64")]
    MalformedSignature,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("ciphertext length {len} is not a multiple of the {block}-byte block size")]
    TruncatedBlock { len: usize, block: usize },

    #[error("failed to read key file '{path}': {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed PEM key in '{0}'")]
    MalformedPem(String),

    #[error("invalid trusted subnet '{0}'")]
    InvalidSubnet(String),

    #[error("missing client address")]
    MissingClientIp,

    #[error("invalid client address '{0}'")]
    InvalidClientIp(String),

    #[error("client address {0} is outside the trusted subnet")]
    UntrustedClient(IpAddr),
}

/// HMAC-SHA256 of `body` under `key`.
///
/// # Examples
///
/// ```
/// use telemon_common::security::sign;
///
/// let a = sign(b"hello", b"k1").unwrap();
/// assert_eq!(a, sign(b"hello", b"k1").unwrap());
/// assert_ne!(a, sign(b"hello", b"k2").unwrap());
/// ```
pub fn sign(body: &[u8], key: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SecurityError::InvalidKey)?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Signature in the form sent in [`SIGNATURE_HEADER`].
pub fn sign_base64(body: &[u8], key: &[u8]) -> Result<String, SecurityError> {
    Ok(general_purpose::STANDARD.encode(sign(body, key)?))
}

/// Recomputes the digest and compares it in constant time.
pub fn verify_base64(body: &[u8], key: &[u8], header: &str) -> Result<(), SecurityError> {
    let expected = general_purpose::STANDARD
        .decode(header.trim())
        .map_err(|_| SecurityError::MalformedSignature)?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SecurityError::InvalidKey)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SecurityError::SignatureMismatch)
}

fn oaep() -> Oaep {
    Oaep::new_with_label::<Sha256, _>(OAEP_LABEL)
}

/// Largest plaintext chunk one OAEP block can hold for `key`.
pub fn oaep_chunk_size(key: &RsaPublicKey) -> usize {
    key.size() - 2 * <Sha256 as Digest>::output_size() - 2
}

/// Encrypts `plaintext` in independent OAEP blocks and concatenates them.
pub fn encrypt_oaep_chunked(
    key: &RsaPublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, SecurityError> {
    let chunk_size = oaep_chunk_size(key);
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(plaintext.len().div_ceil(chunk_size) * key.size());
    for chunk in plaintext.chunks(chunk_size) {
        out.extend(key.encrypt(&mut rng, oaep(), chunk)?);
    }
    Ok(out)
}

/// Reverses [`encrypt_oaep_chunked`]. The input must be a whole number of
/// modulus-sized blocks.
pub fn decrypt_oaep_chunked(
    key: &RsaPrivateKey,
    ciphertext: &[u8],
) -> Result<Vec<u8>, SecurityError> {
    let block = key.size();
    if ciphertext.len() % block != 0 {
        return Err(SecurityError::TruncatedBlock {
            len: ciphertext.len(),
            block,
        });
    }
    let mut out = Vec::with_capacity(ciphertext.len());
    for chunk in ciphertext.chunks_exact(block) {
        out.extend(key.decrypt(oaep(), chunk)?);
    }
    Ok(out)
}

fn read_pem(path: &Path) -> Result<String, SecurityError> {
    std::fs::read_to_string(path).map_err(|source| SecurityError::KeyFile {
        path: path.display().to_string(),
        source,
    })
}

/// Loads an RSA public key from a PKCS#8 (`PUBLIC KEY`) or PKCS#1
/// (`RSA PUBLIC KEY`) PEM file.
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey, SecurityError> {
    let pem = read_pem(path)?;
    RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .map_err(|_| SecurityError::MalformedPem(path.display().to_string()))
}

/// Loads an RSA private key from a PKCS#8 (`PRIVATE KEY`) or PKCS#1
/// (`RSA PRIVATE KEY`) PEM file.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, SecurityError> {
    let pem = read_pem(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|_| SecurityError::MalformedPem(path.display().to_string()))
}

/// CIDR range whose members may call the ingestion endpoints.
///
/// # Examples
///
/// ```
/// use telemon_common::security::TrustedSubnet;
///
/// let subnet = TrustedSubnet::parse("10.0.0.0/8").unwrap();
/// assert!(subnet.check(Some("10.1.2.3")).is_ok());
/// assert!(subnet.check(Some("192.168.0.1")).is_err());
/// assert!(subnet.check(None).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct TrustedSubnet {
    network: IpNetwork,
}

impl TrustedSubnet {
    pub fn parse(cidr: &str) -> Result<Self, SecurityError> {
        let network = IpNetwork::from_str_truncate(cidr.trim())
            .map_err(|_| SecurityError::InvalidSubnet(cidr.to_string()))?;
        Ok(Self { network })
    }

    /// Validates the forwarded client address and returns it when trusted.
    pub fn check(&self, client_ip: Option<&str>) -> Result<IpAddr, SecurityError> {
        let raw = client_ip
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SecurityError::MissingClientIp)?;
        let ip: IpAddr = raw
            .parse()
            .map_err(|_| SecurityError::InvalidClientIp(raw.to_string()))?;
        if self.network.contains(ip) {
            Ok(ip)
        } else {
            Err(SecurityError::UntrustedClient(ip))
        }
    }
}

impl std::fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.network)
    }
}
