//! The enveloped XAdES signature carried in the invoice's `ext:UBLExtensions`.
use chrono::{DateTime, Utc};

use super::xml::constants::{
    C14N11_ALGORITHM, CBC_NS, ECDSA_SHA256_ALGORITHM, EXTENSION_URI, EXT_NS,
    REFERENCED_SIGNATURE_ID, SAC_NS, SBC_NS, SHA256_ALGORITHM, SIGNATURE_INFORMATION_ID,
    SIGNATURE_PROPERTIES_TYPE, SIG_NS, XPATH_ALGORITHM, XPATH_EXCLUSIONS,
};
use super::xml::{Document, Navigator, NodeId, SerializeOptions, XmlError, XmlFormat};
use crate::certificate::Certificate;
use crate::digest::sha256_hex_base64;

/// Depth of `ext:UBLExtension` below the invoice root.
pub(crate) const EXTENSION_DEPTH: usize = 2;
/// Depth of `xades:SignedProperties` below the invoice root.
const SIGNED_PROPERTIES_DEPTH: usize = EXTENSION_DEPTH + 7;

pub(crate) fn format_signing_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// A built `ext:UBLExtension` fragment.
#[derive(Debug, Clone)]
pub struct SignatureBlock {
    nav: Navigator,
    format: XmlFormat,
    signed_properties_digest: String,
    signing_time: String,
}

impl SignatureBlock {
    /// The fragment as a document whose root is `ext:UBLExtension`.
    pub fn document(&self) -> &Document {
        self.nav.document()
    }

    /// Standalone rendering of the fragment.
    pub fn to_xml(&self) -> String {
        self.nav
            .serialize(&SerializeOptions::new(self.format, false))
            .trim_end()
            .to_string()
    }

    pub fn signed_properties_digest(&self) -> &str {
        &self.signed_properties_digest
    }

    pub fn signing_time(&self) -> &str {
        &self.signing_time
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureBlockBuilder {
    format: XmlFormat,
}

impl SignatureBlockBuilder {
    /// `format` must match the layout of the invoice the block is placed in, since
    /// the signed-properties digest covers the indentation.
    pub fn new(format: XmlFormat) -> Self {
        Self { format }
    }

    pub fn build(
        &self,
        certificate: &Certificate,
        invoice_hash: &str,
        digital_signature: &str,
        signing_time: &DateTime<Utc>,
    ) -> Result<SignatureBlock, XmlError> {
        let signing_time = format_signing_time(signing_time);
        let mut nav = Navigator::default();
        let top = nav.document_node();

        let extension = nav.add_child(
            top,
            None,
            "ext:UBLExtension",
            None,
            &[("xmlns:ext", EXT_NS), ("xmlns:cbc", CBC_NS)],
        )?;
        append(&mut nav, extension, "ext:ExtensionURI", Some(EXTENSION_URI), &[])?;
        let content = append(&mut nav, extension, "ext:ExtensionContent", None, &[])?;
        let signatures = append(
            &mut nav,
            content,
            "sig:UBLDocumentSignatures",
            None,
            &[("xmlns:sig", SIG_NS), ("xmlns:sac", SAC_NS), ("xmlns:sbc", SBC_NS)],
        )?;
        let information = append(&mut nav, signatures, "sac:SignatureInformation", None, &[])?;
        append(&mut nav, information, "cbc:ID", Some(SIGNATURE_INFORMATION_ID), &[])?;
        append(
            &mut nav,
            information,
            "sbc:ReferencedSignatureID",
            Some(REFERENCED_SIGNATURE_ID),
            &[],
        )?;
        let signature = append(&mut nav, information, "ds:Signature", None, &[("Id", "signature")])?;

        let signed_info = append(&mut nav, signature, "ds:SignedInfo", None, &[])?;
        append(
            &mut nav,
            signed_info,
            "ds:CanonicalizationMethod",
            None,
            &[("Algorithm", C14N11_ALGORITHM)],
        )?;
        append(
            &mut nav,
            signed_info,
            "ds:SignatureMethod",
            None,
            &[("Algorithm", ECDSA_SHA256_ALGORITHM)],
        )?;

        let invoice_reference = append(
            &mut nav,
            signed_info,
            "ds:Reference",
            None,
            &[("Id", "invoiceSignedData"), ("URI", "")],
        )?;
        let transforms = append(&mut nav, invoice_reference, "ds:Transforms", None, &[])?;
        for exclusion in XPATH_EXCLUSIONS {
            let transform = append(
                &mut nav,
                transforms,
                "ds:Transform",
                None,
                &[("Algorithm", XPATH_ALGORITHM)],
            )?;
            append(&mut nav, transform, "ds:XPath", Some(exclusion), &[])?;
        }
        append(
            &mut nav,
            transforms,
            "ds:Transform",
            None,
            &[("Algorithm", C14N11_ALGORITHM)],
        )?;
        digest(&mut nav, invoice_reference, invoice_hash)?;

        let properties_reference = append(
            &mut nav,
            signed_info,
            "ds:Reference",
            None,
            &[
                ("Type", SIGNATURE_PROPERTIES_TYPE),
                ("URI", "#xadesSignedProperties"),
            ],
        )?;
        let properties_digest = digest(&mut nav, properties_reference, "")?;

        append(&mut nav, signature, "ds:SignatureValue", Some(digital_signature), &[])?;
        let key_info = append(&mut nav, signature, "ds:KeyInfo", None, &[])?;
        let x509_data = append(&mut nav, key_info, "ds:X509Data", None, &[])?;
        append(
            &mut nav,
            x509_data,
            "ds:X509Certificate",
            Some(certificate.plain()),
            &[],
        )?;

        let object = append(&mut nav, signature, "ds:Object", None, &[])?;
        let qualifying = append(
            &mut nav,
            object,
            "xades:QualifyingProperties",
            None,
            &[("Target", "signature")],
        )?;
        let signed_properties = append(
            &mut nav,
            qualifying,
            "xades:SignedProperties",
            None,
            &[("Id", "xadesSignedProperties")],
        )?;
        let signature_properties = append(
            &mut nav,
            signed_properties,
            "xades:SignedSignatureProperties",
            None,
            &[],
        )?;
        append(
            &mut nav,
            signature_properties,
            "xades:SigningTime",
            Some(&signing_time),
            &[],
        )?;
        let signing_certificate = append(
            &mut nav,
            signature_properties,
            "xades:SigningCertificate",
            None,
            &[],
        )?;
        let cert = append(&mut nav, signing_certificate, "xades:Cert", None, &[])?;
        let cert_digest = append(&mut nav, cert, "xades:CertDigest", None, &[])?;
        append(
            &mut nav,
            cert_digest,
            "ds:DigestMethod",
            None,
            &[("Algorithm", SHA256_ALGORITHM)],
        )?;
        append(&mut nav, cert_digest, "ds:DigestValue", Some(certificate.hash()), &[])?;
        let fields = certificate.current_cert_fields();
        let issuer_serial = append(&mut nav, cert, "xades:IssuerSerial", None, &[])?;
        append(
            &mut nav,
            issuer_serial,
            "ds:X509IssuerName",
            Some(&fields.issuer_dn),
            &[],
        )?;
        append(
            &mut nav,
            issuer_serial,
            "ds:X509SerialNumber",
            Some(&fields.serial_number),
            &[],
        )?;

        let canonical =
            nav.canonicalize_subtree(signed_properties, self.format, SIGNED_PROPERTIES_DEPTH);
        let signed_properties_digest = sha256_hex_base64(&canonical);
        nav.set_text(properties_digest, &signed_properties_digest)?;

        Ok(SignatureBlock {
            nav,
            format: self.format,
            signed_properties_digest,
            signing_time,
        })
    }
}

fn append(
    nav: &mut Navigator,
    parent: NodeId,
    name: &str,
    text: Option<&str>,
    attrs: &[(&str, &str)],
) -> Result<NodeId, XmlError> {
    nav.add_child(parent, None, name, text, attrs)
}

/// Adds the `DigestMethod`/`DigestValue` pair, returning the value node.
fn digest(nav: &mut Navigator, reference: NodeId, value: &str) -> Result<NodeId, XmlError> {
    append(
        nav,
        reference,
        "ds:DigestMethod",
        None,
        &[("Algorithm", SHA256_ALGORITHM)],
    )?;
    append(nav, reference, "ds:DigestValue", Some(value), &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::KeyPairing;
    use chrono::TimeZone;

    const CERT: &str = include_str!("../../tests/fixtures/certs/cert.b64");
    const KEY: &str = include_str!("../../tests/fixtures/certs/ec-key.b64");

    fn build(format: XmlFormat, second: u32) -> SignatureBlock {
        let certificate = Certificate::load_with(CERT, KEY, KeyPairing::Lenient).expect("certificate");
        let time = Utc
            .with_ymd_and_hms(2022, 9, 7, 12, 21, second)
            .single()
            .expect("time");
        SignatureBlockBuilder::new(format)
            .build(&certificate, "aW52b2ljZS1oYXNo", "c2lnbmF0dXJl", &time)
            .expect("build block")
    }

    #[test]
    fn emits_fixed_structure() {
        let block = build(XmlFormat::Compact, 28);
        let xml = block.to_xml();
        let order = [
            "<ext:UBLExtension xmlns:ext=",
            "<ext:ExtensionURI>urn:oasis:names:specification:ubl:dsig:enveloped:xades</ext:ExtensionURI>",
            "<sig:UBLDocumentSignatures xmlns:sig=",
            "<cbc:ID>urn:oasis:names:specification:ubl:signature:1</cbc:ID>",
            "<sbc:ReferencedSignatureID>urn:oasis:names:specification:ubl:signature:Invoice</sbc:ReferencedSignatureID>",
            "<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\" Id=\"signature\">",
            "<ds:Reference Id=\"invoiceSignedData\" URI=\"\">",
            "<ds:XPath>not(//ancestor-or-self::ext:UBLExtensions)</ds:XPath>",
            "<ds:XPath>not(//ancestor-or-self::cac:Signature)</ds:XPath>",
            "<ds:XPath>not(//ancestor-or-self::cac:AdditionalDocumentReference[cbc:ID='QR'])</ds:XPath>",
            "<ds:DigestValue>aW52b2ljZS1oYXNo</ds:DigestValue>",
            "URI=\"#xadesSignedProperties\">",
            "<ds:SignatureValue>c2lnbmF0dXJl</ds:SignatureValue>",
            "<ds:X509Certificate>MIID3jCC",
            "<xades:QualifyingProperties xmlns:xades=\"http://uri.etsi.org/01903/v1.3.2#\" Target=\"signature\">",
            "<xades:SigningTime>2022-09-07T12:21:28</xades:SigningTime>",
            "<ds:X509IssuerName>CN=PRZEINVOICESCA4-CA, DC=extgazt, DC=gov, DC=local</ds:X509IssuerName>",
            "<ds:X509SerialNumber>379112742831380471835263969587287663520528387</ds:X509SerialNumber>",
        ];
        let mut cursor = 0;
        for needle in order {
            let found = xml[cursor..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing or out of order: {needle}"));
            cursor += found + needle.len();
        }
        assert_eq!(xml.matches("xmlns:ds=").count(), 1);
        assert_eq!(block.signing_time(), "2022-09-07T12:21:28");
    }

    fn signed_properties_input(block: &SignatureBlock, format: XmlFormat) -> String {
        let nav = Navigator::new(block.document().clone());
        let properties = nav
            .find(nav.document_node(), "//xades:SignedProperties")
            .expect("find")
            .expect("signed properties");
        let canonical = nav.canonicalize_subtree(properties, format, SIGNED_PROPERTIES_DEPTH);
        String::from_utf8(canonical).expect("utf8")
    }

    #[test]
    fn signed_properties_digest_input_declares_used_namespaces() {
        let block = build(XmlFormat::Compact, 28);
        let hash = Certificate::load_with(CERT, KEY, KeyPairing::Lenient)
            .expect("certificate")
            .hash()
            .to_string();
        let ds = "xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\"";
        let expected = format!(
            "<xades:SignedProperties xmlns:xades=\"http://uri.etsi.org/01903/v1.3.2#\" Id=\"xadesSignedProperties\">\
             <xades:SignedSignatureProperties>\
             <xades:SigningTime>2022-09-07T12:21:28</xades:SigningTime>\
             <xades:SigningCertificate><xades:Cert><xades:CertDigest>\
             <ds:DigestMethod {ds} Algorithm=\"http://www.w3.org/2001/04/xmlenc#sha256\"></ds:DigestMethod>\
             <ds:DigestValue {ds}>{hash}</ds:DigestValue>\
             </xades:CertDigest><xades:IssuerSerial>\
             <ds:X509IssuerName {ds}>CN=PRZEINVOICESCA4-CA, DC=extgazt, DC=gov, DC=local</ds:X509IssuerName>\
             <ds:X509SerialNumber {ds}>379112742831380471835263969587287663520528387</ds:X509SerialNumber>\
             </xades:IssuerSerial></xades:Cert></xades:SigningCertificate>\
             </xades:SignedSignatureProperties></xades:SignedProperties>"
        );
        let input = signed_properties_input(&block, XmlFormat::Compact);
        assert_eq!(input, expected);
        assert_eq!(block.signed_properties_digest(), sha256_hex_base64(input.as_bytes()));
    }

    #[test]
    fn signed_properties_digest_covers_placed_subtree() {
        let format = XmlFormat::spaces(4);
        let block = build(format, 28);
        let input = signed_properties_input(&block, format);
        assert!(input.starts_with(&format!(
            "<xades:SignedProperties xmlns:xades=\"http://uri.etsi.org/01903/v1.3.2#\" Id=\"xadesSignedProperties\">\n{}<xades:SignedSignatureProperties>",
            " ".repeat(40)
        )));
        assert_eq!(input.matches("xmlns:ds=").count(), 4);
        assert_eq!(block.signed_properties_digest(), sha256_hex_base64(input.as_bytes()));

        assert!(block
            .to_xml()
            .contains(&format!("<ds:DigestValue>{}</ds:DigestValue>", block.signed_properties_digest())));
    }

    #[test]
    fn digest_depends_on_signing_time() {
        assert_ne!(
            build(XmlFormat::Compact, 28).signed_properties_digest(),
            build(XmlFormat::Compact, 29).signed_properties_digest()
        );
    }
}
