use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64ct::{Base64, Encoding};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zatca_sign_core::certificate::{Certificate, KeyPairing};
use zatca_sign_core::config::{EnvironmentType, SignerConfig, SigningTime};
use zatca_sign_core::csr::{CsrProperties, ToPemString};
use zatca_sign_core::invoice::xml::XmlFormat;
use zatca_sign_core::invoice::{invoice_hash, InvoiceSigner, QrField, Tag};

#[derive(Parser)]
#[command(name = "zatca-sign")]
#[command(about = "Sign ZATCA e-invoices, build their QR payloads and onboarding CSRs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign an invoice and print (or write) the signed XML.
    Sign {
        #[arg(long)]
        invoice: PathBuf,
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Spaces per nesting level; 0 writes compact XML.
        #[arg(long, default_value_t = 4)]
        indent: usize,
        #[arg(long, value_enum, default_value_t = SigningTimeArg::Issue)]
        signing_time: SigningTimeArg,
        /// Print the hash, QR payload and XML as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the QR payload of a signed invoice.
    Qr {
        #[arg(long)]
        invoice: PathBuf,
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long, default_value_t = 4)]
        indent: usize,
        /// List the decoded tags instead of the base64 payload.
        #[arg(long)]
        decode: bool,
    },
    /// Print the invoice hash.
    Hash {
        #[arg(long)]
        invoice: PathBuf,
        #[arg(long, default_value_t = 4)]
        indent: usize,
    },
    /// Generate a key pair and CSR from an SDK properties file.
    Csr {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, env = "ZATCA_ENV", default_value = "non_production")]
        env: EnvironmentType,
        #[arg(long)]
        csr_out: PathBuf,
        #[arg(long)]
        key_out: PathBuf,
    },
}

#[derive(clap::Args)]
struct Credentials {
    /// Certificate as PEM or bare base64.
    #[arg(long, env = "ZATCA_CERT")]
    cert: PathBuf,
    /// secp256k1 private key, PKCS#8 or SEC1.
    #[arg(long, env = "ZATCA_KEY")]
    key: PathBuf,
    /// Load a key that does not belong to the certificate, as with published samples.
    #[arg(long)]
    allow_key_mismatch: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SigningTimeArg {
    Issue,
    Now,
}

#[derive(Clone, Copy)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_target(true).with_writer(io::stderr))
            .init(),
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(io::stderr),
            )
            .init(),
    }
}

fn layout(indent: usize) -> XmlFormat {
    match indent {
        0 => XmlFormat::Compact,
        n => XmlFormat::spaces(n),
    }
}

fn read(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} '{}'", path.display()))
}

fn write(path: &Path, contents: &str, what: &str) -> Result<()> {
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write {what} '{}'", path.display()))
}

fn load_certificate(credentials: &Credentials) -> Result<Arc<Certificate>> {
    let cert = read(&credentials.cert, "certificate")?;
    let key = read(&credentials.key, "private key")?;
    let pairing = if credentials.allow_key_mismatch {
        KeyPairing::Lenient
    } else {
        KeyPairing::Required
    };
    let certificate = Certificate::load_with(&cert, &key, pairing)
        .context("failed to load signing credentials")?;
    Ok(Arc::new(certificate))
}

fn describe(tag: &Tag) -> String {
    let binary = tag.id() == QrField::PublicKey.id() || tag.id() == QrField::CertificateSignature.id();
    match std::str::from_utf8(tag.value()) {
        Ok(text) if !binary => format!("{}: {text}", tag.id()),
        _ => format!("{}: {}", tag.id(), Base64::encode_string(tag.value())),
    }
}

fn main() -> Result<()> {
    init_logging(LogFormat::from_env());
    let cli = Cli::parse();

    match cli.command {
        Commands::Sign {
            invoice,
            credentials,
            output,
            indent,
            signing_time,
            json,
        } => {
            let xml = read(&invoice, "invoice")?;
            let signing_time = match signing_time {
                SigningTimeArg::Issue => SigningTime::IssueDateTime,
                SigningTimeArg::Now => SigningTime::Now,
            };
            let config = SignerConfig::default()
                .with_format(layout(indent))
                .with_signing_time(signing_time);
            let signer = InvoiceSigner::new(load_certificate(&credentials)?, config);
            let signed = signer
                .sign(&xml)
                .with_context(|| format!("failed to sign '{}'", invoice.display()))?;
            info!(invoice_hash = signed.invoice_hash(), "invoice signed");

            if json {
                println!("{}", serde_json::to_string_pretty(&signed)?);
            } else if let Some(output) = output {
                write(&output, signed.xml(), "signed invoice")?;
            } else {
                println!("{}", signed.xml());
            }
        }
        Commands::Qr {
            invoice,
            credentials,
            indent,
            decode,
        } => {
            let xml = read(&invoice, "invoice")?;
            let config = SignerConfig::default().with_format(layout(indent));
            let signer = InvoiceSigner::new(load_certificate(&credentials)?, config);
            let qr = signer
                .qr_code(&xml)
                .with_context(|| format!("failed to build QR payload for '{}'", invoice.display()))?;
            if decode {
                let tlv = Base64::decode_vec(&qr).context("QR payload is not base64")?;
                for tag in Tag::decode_all(&tlv)? {
                    println!("{}", describe(&tag));
                }
            } else {
                println!("{qr}");
            }
        }
        Commands::Hash { invoice, indent } => {
            let xml = read(&invoice, "invoice")?;
            let hash = invoice_hash(&xml, layout(indent))
                .with_context(|| format!("failed to hash '{}'", invoice.display()))?;
            println!("{hash}");
        }
        Commands::Csr {
            config,
            env,
            csr_out,
            key_out,
        } => {
            let props = CsrProperties::parse_csr_config(&config)?;
            let (csr, key) = props.build_with_rng(env)?;
            write(&csr_out, &csr.to_pem_string()?, "CSR")?;
            write(&key_out, &key.to_pem_string()?, "private key")?;
            info!(env = env.as_str(), csr = %csr_out.display(), "CSR generated");
        }
    }

    Ok(())
}
