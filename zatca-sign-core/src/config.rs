//! Configuration and environment selection.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::invoice::xml::XmlFormat;

/// ZATCA environment a CSR is issued for; selects the certificate template name.
/// - NonProduction: what ZATCA refers to as the "Integration Sandbox".
/// - Simulation: the "Simulation Test Environment".
/// - Production: the live environment.
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use zatca_sign_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("simulation")?;
/// assert_eq!(env, EnvironmentType::Simulation);
/// assert_eq!("sandbox".parse::<EnvironmentType>()?, EnvironmentType::NonProduction);
/// # Ok::<(), zatca_sign_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentType {
    NonProduction,
    Simulation,
    Production,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.to_ascii_lowercase().as_str() {
            "non_production" | "sandbox" => Ok(EnvironmentType::NonProduction),
            "simulation" => Ok(EnvironmentType::Simulation),
            "production" => Ok(EnvironmentType::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::NonProduction => "non_production",
            EnvironmentType::Simulation => "simulation",
            EnvironmentType::Production => "production",
        }
    }
}

/// Where the `xades:SigningTime` value comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningTime {
    /// The invoice's `cbc:IssueDate` and `cbc:IssueTime`.
    #[default]
    IssueDateTime,
    Now,
    Fixed(DateTime<Utc>),
}

/// Output layout and signing-time policy for [`InvoiceSigner`](crate::invoice::sign::InvoiceSigner).
///
/// # Examples
/// ```rust
/// use zatca_sign_core::config::{SignerConfig, SigningTime};
/// use zatca_sign_core::invoice::xml::XmlFormat;
///
/// let config = SignerConfig::default().with_format(XmlFormat::spaces(2));
/// assert!(config.xml_declaration);
/// assert_eq!(config.signing_time, SigningTime::IssueDateTime);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    pub format: XmlFormat,
    pub xml_declaration: bool,
    pub signing_time: SigningTime,
}

impl SignerConfig {
    pub fn with_format(mut self, format: XmlFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_signing_time(mut self, signing_time: SigningTime) -> Self {
        self.signing_time = signing_time;
        self
    }

    pub fn with_xml_declaration(mut self, xml_declaration: bool) -> Self {
        self.xml_declaration = xml_declaration;
        self
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig {
            format: XmlFormat::spaces(4),
            xml_declaration: true,
            signing_time: SigningTime::IssueDateTime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_round_trips_through_str() {
        for env in [
            EnvironmentType::NonProduction,
            EnvironmentType::Simulation,
            EnvironmentType::Production,
        ] {
            assert_eq!(env.as_str().parse::<EnvironmentType>(), Ok(env));
        }
        assert_eq!(
            "PRODUCTION".parse::<EnvironmentType>(),
            Ok(EnvironmentType::Production)
        );
        assert_eq!(
            "staging".parse::<EnvironmentType>(),
            Err(EnvironmentParseError::Invalid {
                input: "staging".into()
            })
        );
    }

    #[test]
    fn signer_config_deserializes_from_json() {
        let config: SignerConfig = serde_json::from_str(
            r#"{"format":{"pretty":{"indent_char":" ","indent_size":2}},"xml_declaration":false,"signing_time":"now"}"#,
        )
        .expect("config json");
        assert_eq!(
            config,
            SignerConfig::default()
                .with_format(XmlFormat::spaces(2))
                .with_xml_declaration(false)
                .with_signing_time(SigningTime::Now)
        );
    }
}
