#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::{DerSignature, SigningKey};
use k256::pkcs8::EncodePrivateKey;
use rand_core::OsRng;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::EncodePem;
use x509_cert::der::pem::LineEnding;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use zatca_sign_core::certificate::{Certificate, KeyPairing};
use zatca_sign_core::config::SignerConfig;
use zatca_sign_core::invoice::InvoiceSigner;

pub const SIMPLIFIED: &str = "simplified.xml";
pub const STANDARD: &str = "standard.xml";

pub fn fixture_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(relative)
}

pub fn invoice(name: &str) -> String {
    std::fs::read_to_string(fixture_path(&format!("invoices/{name}"))).expect("read invoice")
}

/// The onboarding sample certificate with its published (non-matching) key.
pub fn sample_signer() -> InvoiceSigner {
    let cert = std::fs::read_to_string(fixture_path("certs/cert.b64")).expect("cert");
    let key = std::fs::read_to_string(fixture_path("certs/ec-key.b64")).expect("key");
    let certificate = Certificate::load_with(&cert, &key, KeyPairing::Lenient).expect("certificate");
    InvoiceSigner::new(Arc::new(certificate), SignerConfig::default())
}

/// A self-issued certificate and the PKCS#8 PEM of the key it certifies.
pub fn self_issued() -> (String, String) {
    let key = SigningKey::random(&mut OsRng);
    let subject =
        Name::from_str("CN=TST-886431145-399999999900003,O=Maximum Speed Tech Supply LTD,C=SA")
            .expect("subject");
    let spki = SubjectPublicKeyInfoOwned::from_key(*key.verifying_key()).expect("spki");
    let validity = Validity::from_now(Duration::from_secs(3600)).expect("validity");
    let cert = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::from(1_u32),
        validity,
        subject,
        spki,
        &key,
    )
    .expect("builder")
    .build::<DerSignature>()
    .expect("certificate");

    let cert_pem = cert.to_pem(LineEnding::LF).expect("cert pem");
    let key_pem = key.to_pkcs8_pem(LineEnding::LF).expect("key pem");
    (cert_pem, key_pem.as_str().to_owned())
}

pub fn matching_signer() -> InvoiceSigner {
    let (cert, key) = self_issued();
    InvoiceSigner::from_pem(&cert, &key).expect("signer")
}
