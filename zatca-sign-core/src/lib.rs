//! Signing engine for ZATCA Phase 2 e-invoices: canonical invoice hashing, XAdES
//! signature blocks, TLV QR payloads and onboarding CSRs.
//!
//! # Examples
//! ```rust,no_run
//! use zatca_sign_core::invoice::InvoiceSigner;
//!
//! let cert = std::fs::read_to_string("cert.pem")?;
//! let key = std::fs::read_to_string("key.pem")?;
//! let invoice = std::fs::read_to_string("invoice.xml")?;
//!
//! let signer = InvoiceSigner::from_pem(&cert, &key)?;
//! let signed = signer.sign(&invoice)?;
//! println!("{}", signed.qr_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod certificate;
pub mod config;
pub mod csr;
pub mod digest;
pub mod invoice;

use thiserror::Error;

pub use certificate::{Certificate, CertificateError, KeyPairing};
pub use config::{EnvironmentParseError, EnvironmentType, SignerConfig, SigningTime};
pub use csr::CsrError;
pub use invoice::xml::XmlError;
pub use invoice::{QrCodeError, SignedInvoice, SigningError};

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Qr(#[from] QrCodeError),
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Csr(#[from] CsrError),
    #[error(transparent)]
    Environment(#[from] EnvironmentParseError),
}
