//! Invoice signing: document navigation, QR payloads, signature blocks and the signer.
pub mod qr;
pub mod sign;
pub mod signature;
pub mod xml;

pub use qr::{encode_tags, QrCodeError, QrField, QrPayloadBuilder, QrResult, Tag};
pub use sign::{invoice_hash, InvoiceSigner, SigningError};
pub use signature::{SignatureBlock, SignatureBlockBuilder};

use std::sync::Arc;

use serde::Serialize;

use crate::certificate::Certificate;

/// The outcome of [`InvoiceSigner::sign`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInvoice {
    xml: String,
    invoice_hash: String,
    qr_code: String,
    certificate: Arc<Certificate>,
}

impl SignedInvoice {
    pub(crate) fn new(
        xml: String,
        invoice_hash: String,
        qr_code: String,
        certificate: Arc<Certificate>,
    ) -> Self {
        Self {
            xml,
            invoice_hash,
            qr_code,
            certificate,
        }
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Base64 SHA-256 of the canonical invoice.
    pub fn invoice_hash(&self) -> &str {
        &self.invoice_hash
    }

    pub fn qr_code(&self) -> &str {
        &self.qr_code
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn into_xml(self) -> String {
        self.xml
    }
}
