use base64ct::{Base64, Encoding};
use thiserror::Error;
use tracing::debug;

use super::sign::canonical_invoice_hash;
use super::xml::{Navigator, XmlError, XmlFormat};
use crate::certificate::{Certificate, CertificateError};

#[derive(Debug, Error)]
pub enum QrCodeError {
    #[error("TLV field {tag} exceeds 255 bytes (len={len})")]
    ValueTooLarge { tag: u8, len: usize },
    #[error("QR payload has no tags")]
    Empty,
    #[error("TLV stream truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("invoice hash is not valid base64")]
    InvalidHash,
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

pub type QrResult<T> = std::result::Result<T, QrCodeError>;

/// Tag ids of the QR payload fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QrField {
    SellerName = 1,
    VatNumber = 2,
    Timestamp = 3,
    TotalWithVat = 4,
    VatTotal = 5,
    InvoiceHash = 6,
    Signature = 7,
    PublicKey = 8,
    CertificateSignature = 9,
}

impl QrField {
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn tag(self, value: impl Into<Vec<u8>>) -> Tag {
        Tag::new(self.id(), value)
    }
}

/// One TLV entry. The length byte counts bytes, not characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    id: u8,
    value: Vec<u8>,
}

impl Tag {
    pub fn new(id: u8, value: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn encode(&self) -> QrResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.value.len() + 2);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> QrResult<()> {
        let len = u8::try_from(self.value.len()).map_err(|_| QrCodeError::ValueTooLarge {
            tag: self.id,
            len: self.value.len(),
        })?;
        out.push(self.id);
        out.push(len);
        out.extend_from_slice(&self.value);
        Ok(())
    }

    /// Parses a concatenated TLV stream.
    pub fn decode_all(bytes: &[u8]) -> QrResult<Vec<Tag>> {
        let mut tags = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let len = *bytes
                .get(offset + 1)
                .ok_or(QrCodeError::Truncated { offset })? as usize;
            let start = offset + 2;
            let value = bytes
                .get(start..start + len)
                .ok_or(QrCodeError::Truncated { offset })?;
            tags.push(Tag::new(bytes[offset], value));
            offset = start + len;
        }
        Ok(tags)
    }
}

/// Base64 of the concatenated TLV encoding of `tags`.
pub fn encode_tags(tags: &[Tag]) -> QrResult<String> {
    if tags.is_empty() {
        return Err(QrCodeError::Empty);
    }
    let mut tlv = Vec::new();
    for tag in tags {
        tag.encode_into(&mut tlv)?;
    }
    Ok(Base64::encode_string(&tlv))
}

/// Reads the QR fields out of an invoice document.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrPayloadBuilder {
    format: XmlFormat,
}

impl QrPayloadBuilder {
    /// `format` is the layout the invoice hash is computed over when no hash is given.
    pub fn new(format: XmlFormat) -> Self {
        Self { format }
    }

    pub fn build(
        &self,
        nav: &Navigator,
        certificate: &Certificate,
        invoice_hash: Option<&str>,
        digital_signature: Option<&str>,
    ) -> QrResult<String> {
        let tags = self.tags(nav, certificate, invoice_hash, digital_signature)?;
        debug!(tags = tags.len(), "encoding QR payload");
        encode_tags(&tags)
    }

    pub fn tags(
        &self,
        nav: &Navigator,
        certificate: &Certificate,
        invoice_hash: Option<&str>,
        digital_signature: Option<&str>,
    ) -> QrResult<Vec<Tag>> {
        let root = nav.root_element()?;
        let text = |path: &str| -> QrResult<String> {
            Ok(nav.text(root, path)?.unwrap_or_default())
        };

        let invoice_hash = match invoice_hash {
            Some(hash) => hash.to_string(),
            None => canonical_invoice_hash(nav, self.format)?,
        };
        let digital_signature = match digital_signature {
            Some(signature) => signature.to_string(),
            None => {
                let hash_bytes =
                    Base64::decode_vec(&invoice_hash).map_err(|_| QrCodeError::InvalidHash)?;
                Base64::encode_string(&certificate.sign(&hash_bytes)?)
            }
        };

        let mut timestamp = format!(
            "{}T{}",
            text("cbc:IssueDate")?,
            text("cbc:IssueTime")?
        );
        if !timestamp.ends_with('Z') {
            timestamp.push('Z');
        }

        let mut tags = vec![
            QrField::SellerName.tag(text(
                "cac:AccountingSupplierParty//cac:PartyLegalEntity/cbc:RegistrationName",
            )?),
            QrField::VatNumber.tag(text(
                "cac:AccountingSupplierParty//cac:PartyTaxScheme/cbc:CompanyID",
            )?),
            QrField::Timestamp.tag(timestamp),
            QrField::TotalWithVat.tag(text("cac:LegalMonetaryTotal/cbc:TaxInclusiveAmount")?),
            QrField::VatTotal.tag(text("cac:TaxTotal/cbc:TaxAmount")?),
            QrField::InvoiceHash.tag(invoice_hash),
            QrField::Signature.tag(digital_signature),
            QrField::PublicKey.tag(certificate.public_key_der()),
        ];
        if is_simplified(nav)? {
            tags.push(QrField::CertificateSignature.tag(certificate.certificate_signature()));
        }
        Ok(tags)
    }
}

/// Simplified (B2C) invoices carry a type-code qualifier starting with `02`.
pub fn is_simplified(nav: &Navigator) -> Result<bool, XmlError> {
    let root = nav.root_element()?;
    Ok(nav
        .require(root, "cbc:InvoiceTypeCode?")?
        .and_then(|code| nav.attribute(code, "name"))
        .is_some_and(|name| name.trim().starts_with("02")))
}
