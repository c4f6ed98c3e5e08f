//! The signing credential: an X.509 certificate and its secp256k1 private key.
//!
//! Everything the signature block and the QR payload need from the certificate is
//! derived once at load time, so a [`Certificate`] can be shared across threads and
//! reused for any number of invoices.
use std::fmt;

use base64ct::{Base64, Encoding};
use const_oid::ObjectIdentifier;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{DerSignature, Signature, SigningKey, VerifyingKey};
use k256::pkcs8::DecodePrivateKey;
use k256::SecretKey;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::warn;
use x509_cert::der::{Decode, Encode, Tag, Tagged};
use x509_cert::name::Name;

use crate::digest::sha256_hex_base64;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("invalid certificate: {reason}")]
    InvalidCertificate { reason: String },
    #[error("invalid private key: {reason}")]
    InvalidPrivateKey { reason: String },
    #[error("signing failed: {reason}")]
    Crypto { reason: String },
    #[error("signature does not verify against the certificate public key")]
    InvalidSignature,
}

/// How a private key that does not belong to the certificate is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyPairing {
    /// Reject the pair with [`CertificateError::InvalidPrivateKey`].
    #[default]
    Required,
    /// Log a warning and load anyway. Signatures made this way do not verify against
    /// the embedded certificate; only useful with published sample credentials.
    Lenient,
}

/// The certificate fields a signature block embeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertFields {
    pub issuer_dn: String,
    pub serial_number: String,
}

pub struct Certificate {
    raw_pem: String,
    plain: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    hash: String,
    issuer_raw: String,
    issuer_normalized: String,
    serial_number: String,
    public_key_plain: String,
    public_key_der: Vec<u8>,
    certificate_signature: Vec<u8>,
}

impl Certificate {
    /// Loads a certificate (PEM or bare base64 DER) and its private key (PKCS#8 or
    /// SEC1, PEM or bare base64 DER).
    ///
    /// The key must belong to the certificate; see [`Certificate::load_with`].
    pub fn load(cert_text: &str, key_text: &str) -> Result<Self, CertificateError> {
        Self::load_with(cert_text, key_text, KeyPairing::Required)
    }

    pub fn load_with(
        cert_text: &str,
        key_text: &str,
        pairing: KeyPairing,
    ) -> Result<Self, CertificateError> {
        let plain = certificate_body(cert_text)?;
        let cert_der =
            Base64::decode_vec(&plain).map_err(|e| CertificateError::InvalidCertificate {
                reason: format!("certificate is not valid base64: {e}"),
            })?;
        let key_der = private_key_der(key_text)?;
        Self::from_parts(cert_text.to_string(), plain, &cert_der, &key_der, pairing)
    }

    pub fn from_der(cert_der: &[u8], key_der: &[u8]) -> Result<Self, CertificateError> {
        let plain = Base64::encode_string(cert_der);
        Self::from_parts(plain.clone(), plain, cert_der, key_der, KeyPairing::Required)
    }

    fn from_parts(
        raw_pem: String,
        plain: String,
        cert_der: &[u8],
        key_der: &[u8],
        pairing: KeyPairing,
    ) -> Result<Self, CertificateError> {
        let cert = x509_cert::Certificate::from_der(cert_der).map_err(|e| {
            CertificateError::InvalidCertificate {
                reason: e.to_string(),
            }
        })?;
        let signing_key = decode_signing_key(key_der)?;

        let tbs = &cert.tbs_certificate;
        let spki_der = tbs.subject_public_key_info.to_der().map_err(|e| {
            CertificateError::InvalidCertificate {
                reason: format!("public key info: {e}"),
            }
        })?;
        let verifying_key = VerifyingKey::from_sec1_bytes(
            tbs.subject_public_key_info.subject_public_key.raw_bytes(),
        )
        .map_err(|_| CertificateError::InvalidCertificate {
            reason: "certificate public key is not a secp256k1 point".into(),
        })?;
        if signing_key.verifying_key() != &verifying_key {
            match pairing {
                KeyPairing::Required => {
                    return Err(CertificateError::InvalidPrivateKey {
                        reason: "key does not match the certificate public key".into(),
                    })
                }
                KeyPairing::Lenient => {
                    warn!("private key does not match the certificate public key")
                }
            }
        }

        Ok(Self {
            hash: sha256_hex_base64(plain.as_bytes()),
            issuer_raw: tbs.issuer.to_string(),
            issuer_normalized: format_issuer_dn(&tbs.issuer),
            serial_number: serial_bytes_to_decimal_string(tbs.serial_number.as_bytes()),
            public_key_plain: Base64::encode_string(&spki_der),
            public_key_der: spki_der,
            certificate_signature: cert.signature.raw_bytes().to_vec(),
            raw_pem,
            plain,
            signing_key,
            verifying_key,
        })
    }

    /// ECDSA-SHA256 over `bytes`, DER encoded.
    pub fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>, CertificateError> {
        let signature: Signature =
            self.signing_key
                .try_sign(bytes)
                .map_err(|e| CertificateError::Crypto {
                    reason: e.to_string(),
                })?;
        let der: DerSignature = signature.to_der();
        Ok(der.as_bytes().to_vec())
    }

    pub fn verify(&self, bytes: &[u8], signature_der: &[u8]) -> Result<(), CertificateError> {
        let signature =
            Signature::from_der(signature_der).map_err(|_| CertificateError::InvalidSignature)?;
        self.verifying_key
            .verify(bytes, &signature)
            .map_err(|_| CertificateError::InvalidSignature)
    }

    /// Base64 of the hex SHA-256 of the base64 certificate body.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn issuer_dn(&self, normalized: bool) -> &str {
        if normalized {
            &self.issuer_normalized
        } else {
            &self.issuer_raw
        }
    }

    /// Serial number in decimal.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Base64 SubjectPublicKeyInfo DER.
    pub fn public_key_plain(&self) -> &str {
        &self.public_key_plain
    }

    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// The certificate's own DER signature, without the bit string's unused-bits
    /// octet.
    pub fn certificate_signature(&self) -> &[u8] {
        &self.certificate_signature
    }

    pub fn raw_pem(&self) -> &str {
        &self.raw_pem
    }

    /// Base64 DER body with armor and whitespace removed.
    pub fn plain(&self) -> &str {
        &self.plain
    }

    pub fn current_cert_fields(&self) -> CertFields {
        CertFields {
            issuer_dn: self.issuer_normalized.clone(),
            serial_number: self.serial_number.clone(),
        }
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("issuer", &self.issuer_normalized)
            .field("serial_number", &self.serial_number)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

impl Serialize for Certificate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Certificate", 4)?;
        state.serialize_field("issuerDn", &self.issuer_normalized)?;
        state.serialize_field("serialNumber", &self.serial_number)?;
        state.serialize_field("hash", &self.hash)?;
        state.serialize_field("publicKey", &self.public_key_plain)?;
        state.end()
    }
}

/// Splits text into `(label, base64 body)` blocks. Text without armor is a single
/// unlabeled block.
fn pem_blocks(text: &str) -> Vec<(&str, String)> {
    let mut blocks = Vec::new();
    let mut current: Option<(&str, String)> = None;
    for line in text.lines().map(str::trim) {
        if let Some(label) = line
            .strip_prefix("-----BEGIN ")
            .and_then(|rest| rest.strip_suffix("-----"))
        {
            current = Some((label, String::new()));
        } else if line.starts_with("-----END ") {
            blocks.extend(current.take());
        } else if let Some((_, body)) = current.as_mut() {
            body.push_str(line);
        }
    }
    if blocks.is_empty() && current.is_none() {
        let body: String = text.split_whitespace().collect();
        if !body.is_empty() {
            blocks.push(("", body));
        }
    }
    blocks
}

fn certificate_body(text: &str) -> Result<String, CertificateError> {
    pem_blocks(text)
        .into_iter()
        .find(|(label, _)| label.is_empty() || *label == "CERTIFICATE")
        .map(|(_, body)| body)
        .ok_or_else(|| CertificateError::InvalidCertificate {
            reason: "no CERTIFICATE block found".into(),
        })
}

fn private_key_der(text: &str) -> Result<Vec<u8>, CertificateError> {
    let (_, body) = pem_blocks(text)
        .into_iter()
        .find(|(label, _)| *label != "EC PARAMETERS")
        .ok_or_else(|| CertificateError::InvalidPrivateKey {
            reason: "no private key block found".into(),
        })?;
    Base64::decode_vec(&body).map_err(|e| CertificateError::InvalidPrivateKey {
        reason: format!("private key is not valid base64: {e}"),
    })
}

/// PKCS#8 first, then SEC1 `ECPrivateKey`.
fn decode_signing_key(der: &[u8]) -> Result<SigningKey, CertificateError> {
    if let Ok(key) = SigningKey::from_pkcs8_der(der) {
        return Ok(key);
    }
    SecretKey::from_sec1_der(der)
        .map(SigningKey::from)
        .map_err(|_| CertificateError::InvalidPrivateKey {
            reason: "expected a secp256k1 key in PKCS#8 or SEC1 DER".into(),
        })
}

const SHORT_NAMES: [(ObjectIdentifier, &str); 11] = [
    (ObjectIdentifier::new_unwrap("2.5.4.3"), "CN"),
    (ObjectIdentifier::new_unwrap("2.5.4.6"), "C"),
    (ObjectIdentifier::new_unwrap("2.5.4.10"), "O"),
    (ObjectIdentifier::new_unwrap("2.5.4.11"), "OU"),
    (ObjectIdentifier::new_unwrap("2.5.4.7"), "L"),
    (ObjectIdentifier::new_unwrap("2.5.4.8"), "ST"),
    (ObjectIdentifier::new_unwrap("2.5.4.9"), "STREET"),
    (ObjectIdentifier::new_unwrap("2.5.4.5"), "SERIALNUMBER"),
    (ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.25"), "DC"),
    (ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.1"), "UID"),
    (ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1"), "E"),
];

/// Most specific RDN first, `SHORT=value` joined by `", "`.
fn format_issuer_dn(name: &Name) -> String {
    name.0
        .iter()
        .rev()
        .flat_map(|rdn| rdn.0.iter())
        .map(|atv| {
            let key = SHORT_NAMES
                .iter()
                .find(|(oid, _)| *oid == atv.oid)
                .map(|(_, short)| (*short).to_string())
                .unwrap_or_else(|| atv.oid.to_string());
            let value = match atv.value.tag() {
                Tag::Utf8String
                | Tag::PrintableString
                | Tag::Ia5String
                | Tag::TeletexString
                | Tag::VisibleString => String::from_utf8_lossy(atv.value.value()).into_owned(),
                _ => {
                    let hex: String = atv.value.value().iter().map(|b| format!("{b:02x}")).collect();
                    format!("#{hex}")
                }
            };
            format!("{key}={value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn serial_bytes_to_decimal_string(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "0".to_string();
    }

    let mut digits: Vec<u8> = vec![0];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 10) as u8;
            carry = value / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }

    while digits.len() > 1 && matches!(digits.last(), Some(0)) {
        digits.pop();
    }

    digits.iter().rev().map(|d| (b'0' + *d) as char).collect()
}
