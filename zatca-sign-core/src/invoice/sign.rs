use std::sync::Arc;

use base64ct::{Base64, Encoding};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::qr::{QrCodeError, QrPayloadBuilder};
use super::signature::SignatureBlockBuilder;
use super::xml::constants::{
    EXTENSION_URI, QR_ID_PATH, QR_VALUE_PATH, REFERENCED_SIGNATURE_ID, SIGNATURE_PATH,
    UBL_EXTENSIONS_PATH,
};
use super::xml::{Navigator, NodeId, SerializeOptions, XmlError, XmlFormat};
use super::SignedInvoice;
use crate::certificate::{Certificate, CertificateError};
use crate::config::{SignerConfig, SigningTime};
use crate::digest::sha256_base64;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error(transparent)]
    Qr(#[from] QrCodeError),
    #[error("invalid {field} '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// Signs UBL invoices with one certificate.
///
/// # Examples
/// ```rust,no_run
/// use std::sync::Arc;
/// use zatca_sign_core::certificate::Certificate;
/// use zatca_sign_core::config::SignerConfig;
/// use zatca_sign_core::invoice::sign::InvoiceSigner;
///
/// let certificate = Certificate::load(
///     &std::fs::read_to_string("cert.pem")?,
///     &std::fs::read_to_string("key.pem")?,
/// )?;
/// let signer = InvoiceSigner::new(Arc::new(certificate), SignerConfig::default());
/// let signed = signer.sign(&std::fs::read_to_string("invoice.xml")?)?;
/// println!("{}", signed.qr_code());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct InvoiceSigner {
    certificate: Arc<Certificate>,
    config: SignerConfig,
}

impl InvoiceSigner {
    pub fn new(certificate: Arc<Certificate>, config: SignerConfig) -> Self {
        Self {
            certificate,
            config,
        }
    }

    pub fn from_pem(cert_pem: &str, private_key_pem: &str) -> Result<Self, SigningError> {
        let certificate = Certificate::load(cert_pem, private_key_pem)?;
        Ok(Self::new(Arc::new(certificate), SignerConfig::default()))
    }

    pub fn from_der(cert_der: &[u8], private_key_der: &[u8]) -> Result<Self, SigningError> {
        let certificate = Certificate::from_der(cert_der, private_key_der)?;
        Ok(Self::new(Arc::new(certificate), SignerConfig::default()))
    }

    pub fn certificate(&self) -> &Arc<Certificate> {
        &self.certificate
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Strips prior signature artifacts, hashes, signs and re-assembles `xml`.
    #[instrument(skip_all, fields(bytes = xml.len()))]
    pub fn sign(&self, xml: &str) -> Result<SignedInvoice, SigningError> {
        let format = self.config.format;
        let mut nav = Navigator::parse(xml)?;

        let slots = reserve_slots(&mut nav)?;
        debug!("signature slots reserved");

        let digest = canonical_invoice_digest(&nav, format)?;
        let invoice_hash = Base64::encode_string(&digest);
        debug!(%invoice_hash, "invoice hashed");

        let digital_signature = Base64::encode_string(&self.certificate.sign(&digest)?);
        let signing_time = self.signing_time(&nav)?;

        let block = SignatureBlockBuilder::new(format).build(
            &self.certificate,
            &invoice_hash,
            &digital_signature,
            &signing_time,
        )?;
        let qr_code = QrPayloadBuilder::new(format).build(
            &nav,
            &self.certificate,
            Some(&invoice_hash),
            Some(&digital_signature),
        )?;

        nav.graft(slots.extensions, None, block.document())?;
        nav.set_text(slots.qr_value, &qr_code)?;
        debug!("signature and QR payload assembled");

        let xml = nav.serialize(&SerializeOptions::new(format, self.config.xml_declaration));
        Ok(SignedInvoice::new(
            xml,
            invoice_hash,
            qr_code,
            Arc::clone(&self.certificate),
        ))
    }

    /// Hash of `xml` with signature artifacts excluded, laid out per the configured
    /// format.
    pub fn invoice_hash(&self, xml: &str) -> Result<String, SigningError> {
        invoice_hash(xml, self.config.format)
    }

    /// QR payload for an already signed document; hash and signature are recomputed.
    #[instrument(skip_all)]
    pub fn qr_code(&self, xml: &str) -> Result<String, SigningError> {
        let nav = Navigator::parse(xml)?;
        Ok(QrPayloadBuilder::new(self.config.format).build(&nav, &self.certificate, None, None)?)
    }

    fn signing_time(&self, nav: &Navigator) -> Result<DateTime<Utc>, SigningError> {
        match self.config.signing_time {
            SigningTime::IssueDateTime => issue_date_time(nav),
            SigningTime::Now => Ok(Utc::now()),
            SigningTime::Fixed(time) => Ok(time),
        }
    }
}

/// Base64 SHA-256 of `xml` laid out in `format`, with the signature artifacts left out.
/// Needs no certificate; the result matches the hash a signer reports for the same layout.
#[instrument(skip_all, fields(bytes = xml.len()))]
pub fn invoice_hash(xml: &str, format: XmlFormat) -> Result<String, SigningError> {
    let nav = Navigator::parse(xml)?;
    Ok(canonical_invoice_hash(&nav, format)?)
}

/// Nodes left out of the invoice hash: extensions, signatures and the QR reference.
pub(crate) fn hash_exclusions(nav: &Navigator) -> Result<Vec<NodeId>, XmlError> {
    let root = nav.root_element()?;
    let mut excluded = nav.find_all(root, UBL_EXTENSIONS_PATH, None)?;
    excluded.extend(nav.find_all(root, SIGNATURE_PATH, None)?);
    excluded.extend(
        nav.find_all(root, QR_ID_PATH, None)?
            .into_iter()
            .filter_map(|id| nav.parent(id)),
    );
    Ok(excluded)
}

fn canonical_invoice_digest(nav: &Navigator, format: XmlFormat) -> Result<Vec<u8>, XmlError> {
    let canonical = nav.canonicalize(format, &hash_exclusions(nav)?);
    Ok(Sha256::digest(&canonical).to_vec())
}

/// Excluded nodes contribute neither content nor indentation, so a fresh invoice, one
/// with reserved slots and its signed output all hash alike.
pub(crate) fn canonical_invoice_hash(
    nav: &Navigator,
    format: XmlFormat,
) -> Result<String, XmlError> {
    Ok(sha256_base64(&nav.canonicalize(format, &hash_exclusions(nav)?)))
}

/// Empty nodes that receive the signature block and the QR payload.
struct Slots {
    extensions: NodeId,
    qr_value: NodeId,
}

/// Where a stripped node sat: its parent and the next surviving element sibling.
type Placeholder = (NodeId, Option<NodeId>);

fn reserve_slots(nav: &mut Navigator) -> Result<Slots, XmlError> {
    let root = nav.root_element()?;
    let extensions = nav.find_all(root, UBL_EXTENSIONS_PATH, None)?;
    let signatures = nav.find_all(root, SIGNATURE_PATH, None)?;
    let qr_references: Vec<NodeId> = nav
        .find_all(root, QR_ID_PATH, None)?
        .into_iter()
        .filter_map(|id| nav.parent(id))
        .collect();

    let stale: Vec<NodeId> = extensions
        .iter()
        .chain(&signatures)
        .chain(&qr_references)
        .copied()
        .collect();
    if !stale.is_empty() {
        warn!(
            extensions = extensions.len(),
            signatures = signatures.len(),
            qr_references = qr_references.len(),
            "stripping prior signature artifacts"
        );
    }

    let extensions_at = extensions
        .first()
        .and_then(|node| placeholder(nav, *node, &stale));
    let qr_at = qr_references
        .first()
        .or(signatures.first())
        .and_then(|node| placeholder(nav, *node, &stale));
    for node in &stale {
        nav.remove(*node);
    }

    let (parent, before) = match extensions_at {
        Some(at) => at,
        None => (root, Some(required(nav, root, "cbc:ProfileID")?)),
    };
    let extensions = nav.add_child(parent, before, "ext:UBLExtensions", None, &[])?;

    let (parent, before) = match qr_at {
        Some(at) => at,
        None => (root, Some(required(nav, root, "cac:AccountingSupplierParty")?)),
    };
    let reference = nav.add_child(parent, before, "cac:AdditionalDocumentReference", None, &[])?;
    nav.add_child(reference, None, "cbc:ID", Some("QR"), &[])?;
    let attachment = nav.add_child(reference, None, "cac:Attachment", None, &[])?;
    nav.add_child(
        attachment,
        None,
        "cbc:EmbeddedDocumentBinaryObject",
        None,
        &[("mimeCode", "text/plain")],
    )?;
    let signature = nav.add_child(parent, before, "cac:Signature", None, &[])?;
    nav.add_child(signature, None, "cbc:ID", Some(REFERENCED_SIGNATURE_ID), &[])?;
    nav.add_child(signature, None, "cbc:SignatureMethod", Some(EXTENSION_URI), &[])?;

    let qr_value = required(nav, reference, QR_VALUE_PATH)?;
    Ok(Slots {
        extensions,
        qr_value,
    })
}

fn placeholder(nav: &Navigator, node: NodeId, stale: &[NodeId]) -> Option<Placeholder> {
    let parent = nav.parent(node)?;
    let mut next = nav.next_element_sibling(node);
    while let Some(sibling) = next.filter(|sibling| stale.contains(sibling)) {
        next = nav.next_element_sibling(sibling);
    }
    Some((parent, next))
}

fn required(nav: &Navigator, from: NodeId, path: &str) -> Result<NodeId, XmlError> {
    nav.find(from, path)?.ok_or_else(|| XmlError::MissingField {
        path: path.to_string(),
    })
}

fn issue_date_time(nav: &Navigator) -> Result<DateTime<Utc>, SigningError> {
    let root = nav.root_element()?;
    let issue_date = nav.text(root, "cbc:IssueDate")?.unwrap_or_default();
    let issue_time = nav.text(root, "cbc:IssueTime")?.unwrap_or_default();

    let date = NaiveDate::parse_from_str(&issue_date, "%Y-%m-%d").map_err(|_| {
        SigningError::InvalidTimestamp {
            field: "cbc:IssueDate",
            value: issue_date.clone(),
        }
    })?;
    let bare_time = issue_time.trim_end_matches('Z');
    let time = NaiveTime::parse_from_str(bare_time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(bare_time, "%H:%M:%S%.f"))
        .map_err(|_| SigningError::InvalidTimestamp {
            field: "cbc:IssueTime",
            value: issue_time.clone(),
        })?;
    Ok(DateTime::from_naive_utc_and_offset(
        NaiveDateTime::new(date, time),
        Utc,
    ))
}
