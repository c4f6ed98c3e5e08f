//! CSR generation for onboarding an EGS unit.
//!
//! The request carries the taxpayer subject (`C, OU, O, CN`), the Microsoft
//! certificate-template-name extension selecting the ZATCA environment, and a
//! SubjectAltName directory name describing the unit.
use crate::config::EnvironmentType;
use java_properties::read;
use k256::{
    ecdsa::{DerSignature, SigningKey},
    pkcs8::EncodePrivateKey,
};
use rand_core::OsRng;
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::debug;
use x509_cert::{
    builder::{Builder, RequestBuilder},
    der::{
        asn1::{PrintableStringRef, Utf8StringRef},
        pem::LineEnding,
        Encode, EncodePem, Error as DerError, Length, Result as DerResult, Writer,
    },
    ext::{
        pkix::{name::GeneralName, SubjectAltName},
        AsExtension, Extension,
    },
    name::Name,
    request::CertReq,
};
use zatca_sign_derive::Validate;

/// Errors that can occur while generating or validating CSRs.
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("failed to open CSR config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSR properties from '{path}': {source}")]
    PropertiesRead {
        path: PathBuf,
        #[source]
        source: java_properties::PropertiesError,
    },

    #[error("missing required CSR property '{key}' in file '{path}'")]
    MissingProperty { path: PathBuf, key: String },

    #[error("invalid subject distinguished name constructed from provided fields: {message}")]
    InvalidSubject { message: String },

    #[error("invalid Subject Alternative Name (SAN) from fields: {message}")]
    InvalidSan { message: String },

    #[error("failed to construct CSR request: {message}")]
    RequestBuild { message: String },

    #[error("failed adding CSR extension '{which}': {message}")]
    AddExtension {
        which: &'static str,
        message: String,
    },

    #[error("failed to build CSR: {message}")]
    CsrBuild { message: String },

    #[error("failed DER encoding for {context}: {source}")]
    DerEncode {
        context: &'static str,
        #[source]
        source: DerError,
    },

    #[error("failed to encode private key: {message}")]
    KeyEncode { message: String },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

impl From<(&'static str, String)> for CsrError {
    fn from((field, reason): (&'static str, String)) -> Self {
        CsrError::Validation { field, reason }
    }
}

/// `szOID_CERTIFICATE_TEMPLATE_NAME`. Sandbox requests carry a UTF8String,
/// simulation and production a PrintableString.
#[derive(Debug, Clone, Copy)]
enum TemplateName {
    Utf8(Utf8StringRef<'static>),
    Printable(PrintableStringRef<'static>),
}

impl const_oid::AssociatedOid for TemplateName {
    const OID: const_oid::ObjectIdentifier =
        const_oid::ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.20.2");
}

impl Encode for TemplateName {
    fn encoded_len(&self) -> DerResult<Length> {
        match self {
            TemplateName::Utf8(s) => s.encoded_len(),
            TemplateName::Printable(s) => s.encoded_len(),
        }
    }

    fn encode(&self, encoder: &mut impl Writer) -> DerResult<()> {
        match self {
            TemplateName::Utf8(s) => s.encode(encoder),
            TemplateName::Printable(s) => s.encode(encoder),
        }
    }
}

impl AsExtension for TemplateName {
    fn critical(&self, _name: &Name, _exts: &[Extension]) -> bool {
        false
    }
}

impl EnvironmentType {
    /// Certificate template the authority issues against in this environment.
    pub const fn template_name(&self) -> &'static str {
        match self {
            EnvironmentType::NonProduction => "TSTZATCA-Code-Signing",
            EnvironmentType::Simulation => "PREZATCA-Code-Signing",
            EnvironmentType::Production => "ZATCA-Code-Signing",
        }
    }

    fn to_extension(self) -> Result<TemplateName, CsrError> {
        let name = self.template_name();
        let invalid = |e: DerError| CsrError::RequestBuild {
            message: format!("invalid template name for extension: {e}"),
        };
        match self {
            EnvironmentType::NonProduction => {
                Ok(TemplateName::Utf8(Utf8StringRef::new(name).map_err(invalid)?))
            }
            EnvironmentType::Simulation | EnvironmentType::Production => Ok(
                TemplateName::Printable(PrintableStringRef::new(name).map_err(invalid)?),
            ),
        }
    }
}

/// Formats the EGS serial number as `1-<solution>|2-<model>|3-<serial>`.
///
/// ```rust
/// use zatca_sign_core::csr::egs_serial_number;
///
/// assert_eq!(
///     egs_serial_number("TST", "TST", "ed22f1d8-e6a2-1118-9b58-d9a8f11e445f"),
///     "1-TST|2-TST|3-ed22f1d8-e6a2-1118-9b58-d9a8f11e445f"
/// );
/// ```
pub fn egs_serial_number(solution: &str, model: &str, serial: &str) -> String {
    format!("1-{solution}|2-{model}|3-{serial}")
}

/// CSR properties parsed from the SDK properties file.
///
/// # Examples
/// ```rust,no_run
/// use zatca_sign_core::config::EnvironmentType;
/// use zatca_sign_core::csr::CsrProperties;
///
/// let props = CsrProperties::parse_csr_config("csr.properties".as_ref())?;
/// let (csr, _key) = props.build_with_rng(EnvironmentType::NonProduction)?;
/// # let _ = csr;
/// # Ok::<(), zatca_sign_core::csr::CsrError>(())
/// ```
#[derive(Validate, Debug, Clone)]
#[validate_error(CsrError)]
#[validate(non_empty, dn_safe)]
pub struct CsrProperties {
    common_name: String,
    #[validate(egs_serial)]
    serial_number: String,
    #[validate(vat_number)]
    organization_identifier: String,
    organization_unit_name: String,
    organization_name: String,
    #[validate(is_country_code)]
    country_name: String,
    #[validate(invoice_type)]
    invoice_type: String,
    location_address: String,
    industry_business_category: String,
}

impl CsrProperties {
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn organization_identifier(&self) -> &str {
        &self.organization_identifier
    }

    pub fn organization_name(&self) -> &str {
        &self.organization_name
    }

    pub fn country_name(&self) -> &str {
        &self.country_name
    }

    fn generate_subject(&self) -> Result<Name, CsrError> {
        Name::from_str(&format!(
            "C={},OU={},O={},CN={}",
            self.country_name.to_uppercase(),
            self.organization_unit_name,
            self.organization_name,
            self.common_name
        ))
        .map_err(|e| CsrError::InvalidSubject {
            message: e.to_string(),
        })
    }

    fn generate_san_extension(&self) -> Result<SubjectAltName, CsrError> {
        let name = Name::from_str(&format!(
            "SN={},UID={},title={},registeredAddress={},businessCategory={}",
            self.serial_number,
            self.organization_identifier,
            self.invoice_type,
            self.location_address,
            self.industry_business_category
        ))
        .map_err(|e| CsrError::InvalidSan {
            message: e.to_string(),
        })?;
        Ok(SubjectAltName(vec![GeneralName::DirectoryName(name)]))
    }

    /// Builds a request signed by `signer`.
    pub fn build(&self, signer: &SigningKey, env: EnvironmentType) -> Result<CertReq, CsrError> {
        let subject = self.generate_subject()?;
        let template = env.to_extension()?;
        let san = self.generate_san_extension()?;

        let mut builder =
            RequestBuilder::new(subject, signer).map_err(|e| CsrError::RequestBuild {
                message: e.to_string(),
            })?;
        builder
            .add_extension(&template)
            .map_err(|e| CsrError::AddExtension {
                which: "TemplateName",
                message: e.to_string(),
            })?;
        builder
            .add_extension(&san)
            .map_err(|e| CsrError::AddExtension {
                which: "SubjectAltName",
                message: e.to_string(),
            })?;
        let csr = builder
            .build::<DerSignature>()
            .map_err(|e| CsrError::CsrBuild {
                message: e.to_string(),
            })?;
        debug!(env = env.as_str(), template = env.template_name(), "built CSR");
        Ok(csr)
    }

    /// Builds a request with a freshly generated secp256k1 key.
    pub fn build_with_rng(&self, env: EnvironmentType) -> Result<(CertReq, SigningKey), CsrError> {
        let signer = SigningKey::random(&mut OsRng);
        let csr = self.build(&signer, env)?;
        Ok((csr, signer))
    }

    pub fn parse_csr_config(csr_path: &Path) -> Result<CsrProperties, CsrError> {
        let pathbuf = csr_path.to_path_buf();
        let file = File::open(csr_path).map_err(|e| CsrError::Io {
            path: pathbuf.clone(),
            source: e,
        })?;
        let dst_map = read(BufReader::new(file)).map_err(|e| CsrError::PropertiesRead {
            path: pathbuf.clone(),
            source: e,
        })?;

        let req = |key: &str| -> Result<String, CsrError> {
            dst_map
                .get(key)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| CsrError::MissingProperty {
                    path: pathbuf.clone(),
                    key: key.to_string(),
                })
        };

        CsrProperties::new(
            req("csr.common.name")?,
            req("csr.serial.number")?,
            req("csr.organization.identifier")?,
            req("csr.organization.unit.name")?,
            req("csr.organization.name")?,
            req("csr.country.name")?,
            req("csr.invoice.type")?,
            req("csr.location.address")?,
            req("csr.industry.business.category")?,
        )
    }
}

/// PEM text for writing requests and keys to disk.
pub trait ToPemString {
    fn to_pem_string(&self) -> Result<String, CsrError>;
}

impl ToPemString for CertReq {
    fn to_pem_string(&self) -> Result<String, CsrError> {
        self.to_pem(LineEnding::LF)
            .map_err(|e| CsrError::DerEncode {
                context: "certificate request (PEM)",
                source: e,
            })
    }
}

impl ToPemString for SigningKey {
    fn to_pem_string(&self) -> Result<String, CsrError> {
        self.to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.as_str().to_owned())
            .map_err(|e| CsrError::KeyEncode {
                message: e.to_string(),
            })
    }
}
