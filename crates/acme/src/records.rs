//! Persisted ACME records
//!
//! JSON layout matches the account and certificate documents other proxies
//! already keep in a shared backend, so replicas can be migrated onto Sentinel
//! without re-registering accounts:
//!
//! ```json
//! {
//!   "Email": "admin@example.com",
//!   "Registration": { "body": { "status": "valid" }, "uri": "https://acme/acct/1" },
//!   "PrivateKey": "MHcCAQEE...",
//!   "KeyType": "4096"
//! }
//! ```
//!
//! Byte fields are base64. Empty collections are written as `[]` and a
//! missing or `null` collection decodes as empty.

use serde::{Deserialize, Serialize};

/// ACME account registration returned by the CA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Account object as returned by the CA
    #[serde(default)]
    pub body: serde_json::Value,

    /// Account URL
    #[serde(default)]
    pub uri: String,
}

/// ACME account identity for one resolver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "Email", default)]
    pub email: String,

    #[serde(rename = "Registration", default)]
    pub registration: Option<Registration>,

    /// DER-encoded account private key
    #[serde(rename = "PrivateKey", default, with = "base64_bytes")]
    pub private_key: Vec<u8>,

    /// Key algorithm ("P256", "P384", "2048", "4096", ...)
    #[serde(rename = "KeyType", default)]
    pub key_type: String,
}

/// Domains covered by one certificate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    #[serde(default)]
    pub main: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub sans: Vec<String>,
}

impl Domain {
    /// Main domain followed by the SANs
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.main.as_str()).chain(self.sans.iter().map(String::as_str))
    }
}

/// Issued certificate with its private key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(default)]
    pub domain: Domain,

    /// PEM bundle including the chain
    #[serde(default, with = "base64_bytes")]
    pub certificate: Vec<u8>,

    /// PEM private key
    #[serde(default, with = "base64_bytes")]
    pub key: Vec<u8>,
}

/// A certificate and the TLS store it belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertAndStore {
    #[serde(flatten)]
    pub certificate: Certificate,

    #[serde(rename = "Store", default)]
    pub store: String,
}

/// Everything persisted for one resolver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredData {
    pub account: Option<Account>,
    pub certificates: Vec<CertAndStore>,
}

/// Decode a certificate list, treating `null` as empty
pub(crate) fn decode_certificates(data: &[u8]) -> serde_json::Result<Vec<CertAndStore>> {
    let certificates: Option<Vec<CertAndStore>> = serde_json::from_slice(data)?;
    Ok(certificates.unwrap_or_default())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
