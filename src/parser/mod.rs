// CT entry parser
//
// Decodes Merkle Tree Leaf entries (RFC 6962) and issuance chains into
// parsed certificates, and defines the broadcast record shape.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::{Ipv4Addr, Ipv6Addr};
use x509_parser::prelude::*;

use crate::error::StreamError;
use crate::Result;

/// Distinguished-name projection of a subject or issuer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnInfo {
    #[serde(rename = "CN")]
    pub common_name: String,
    #[serde(rename = "O")]
    pub organization: Vec<String>,
    #[serde(rename = "OU")]
    pub organizational_unit: Vec<String>,
    #[serde(rename = "C")]
    pub country: Vec<String>,
    pub raw: String,
}

/// Subject alternative names; empty lists are omitted from the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SanInfo {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub dns_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ip_addresses: Vec<String>,
}

/// Certificate digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintInfo {
    pub sha256: String,
}

/// The unit of broadcast: one certificate as a single JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_pem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_fingerprint: Option<FingerprintInfo>,
    pub subject: DnInfo,
    pub sans: SanInfo,
    pub issuer: DnInfo,
    pub not_before: String,
    pub not_after: String,
    pub source: String,
    pub timestamp: i64,
}

/// A certificate extracted from a CT entry, with owned DER and the fields
/// the record needs
#[derive(Debug, Clone)]
pub struct ParsedCert {
    pub der: Vec<u8>,
    pub subject: DnInfo,
    pub issuer: DnInfo,
    pub sans: SanInfo,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ParsedCert {
    /// Parse a DER-encoded certificate and extract record fields
    pub fn from_der(der: &[u8]) -> Result<ParsedCert> {
        let (_, cert) = X509Certificate::from_der(der).map_err(|e| StreamError::ParseError {
            message: format!("invalid X.509 certificate: {}", e),
        })?;

        let not_before =
            DateTime::<Utc>::from_timestamp(cert.validity().not_before.timestamp(), 0)
                .unwrap_or_else(Utc::now);
        let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .unwrap_or_else(Utc::now);

        Ok(ParsedCert {
            der: der.to_vec(),
            subject: parse_dn(cert.subject()),
            issuer: parse_dn(cert.issuer()),
            sans: parse_sans(&cert),
            not_before,
            not_after,
        })
    }
}

/// Parse the certificates carried by one CT log entry.
///
/// The leaf yields the end-entity certificate for X509 entries; precert
/// leaves carry no extractable end-entity certificate here. A non-empty
/// `extra_data` is decoded as a 24-bit-length-prefixed chain and each
/// certificate that parses is appended. Individually invalid certificates
/// are skipped; the result may be empty.
pub fn parse_certificates(leaf_b64: &str, extra_b64: &str) -> Result<Vec<ParsedCert>> {
    let leaf = BASE64.decode(leaf_b64)?;

    let mut certs = Vec::new();

    if let Some(der) = x509_entry_der(&leaf)? {
        if let Ok(cert) = ParsedCert::from_der(der) {
            certs.push(cert);
        }
    }

    if !extra_b64.is_empty() {
        if let Ok(extra) = BASE64.decode(extra_b64) {
            certs.extend(parse_cert_chain(&extra));
        }
    }

    Ok(certs)
}

/// Extract the end-entity DER from a Merkle Tree Leaf, if it is an X509
/// entry.
///
/// Layout: version (1), leaf type (1), timestamp (8), entry type (2),
/// then for X509 entries a 24-bit length followed by the DER.
fn x509_entry_der(leaf: &[u8]) -> Result<Option<&[u8]>> {
    if leaf.len() < 12 {
        return Err(StreamError::ParseError {
            message: format!("leaf input too short: {} bytes", leaf.len()),
        });
    }

    let version = leaf[0];
    if version != 0 {
        return Err(StreamError::ParseError {
            message: format!("unsupported CT version: {}", version),
        });
    }

    let leaf_type = leaf[1];
    if leaf_type != 0 {
        return Err(StreamError::ParseError {
            message: format!("unsupported leaf type: {}", leaf_type),
        });
    }

    let entry_type = u16::from_be_bytes([leaf[10], leaf[11]]);
    match entry_type {
        // X509 entry: 24-bit length-prefixed DER follows.
        0 => {
            if leaf.len() < 15 {
                return Err(StreamError::ParseError {
                    message: "leaf too short for certificate".to_string(),
                });
            }

            let cert_len = u32::from_be_bytes([0, leaf[12], leaf[13], leaf[14]]) as usize;
            let cert_start = 15;
            let cert_end = cert_start + cert_len;

            if cert_end > leaf.len() {
                return Err(StreamError::ParseError {
                    message: format!(
                        "certificate length {} exceeds leaf size {}",
                        cert_len,
                        leaf.len()
                    ),
                });
            }

            Ok(Some(&leaf[cert_start..cert_end]))
        }
        // Precert entry: the end-entity certificate is not extracted.
        1 => Ok(None),
        other => Err(StreamError::ParseError {
            message: format!("unknown entry type: {}", other),
        }),
    }
}

/// Parse a chain of 24-bit-length-prefixed DER certificates, skipping the
/// ones that fail to parse
fn parse_cert_chain(data: &[u8]) -> Vec<ParsedCert> {
    let mut certs = Vec::new();
    let mut rest = data;

    while rest.len() >= 3 {
        let length = ((rest[0] as usize) << 16) | ((rest[1] as usize) << 8) | rest[2] as usize;
        if rest.len() < 3 + length {
            break;
        }

        if let Ok(cert) = ParsedCert::from_der(&rest[3..3 + length]) {
            certs.push(cert);
        }

        rest = &rest[3 + length..];
    }

    certs
}

fn parse_dn(name: &X509Name) -> DnInfo {
    DnInfo {
        common_name: name
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string(),
        organization: name
            .iter_organization()
            .filter_map(|o| o.as_str().ok().map(str::to_string))
            .collect(),
        organizational_unit: name
            .iter_organizational_unit()
            .filter_map(|ou| ou.as_str().ok().map(str::to_string))
            .collect(),
        country: name
            .iter_country()
            .filter_map(|c| c.as_str().ok().map(str::to_string))
            .collect(),
        raw: name.to_string(),
    }
}

fn parse_sans(cert: &X509Certificate) -> SanInfo {
    let mut san = SanInfo::default();

    if let Ok(Some(ext)) = cert.subject_alternative_name() {
        for name in &ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => san.dns_names.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => match bytes.len() {
                    4 => {
                        let octets: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
                        san.ip_addresses.push(Ipv4Addr::from(octets).to_string());
                    }
                    16 => {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(bytes);
                        san.ip_addresses.push(Ipv6Addr::from(octets).to_string());
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    san
}

/// PEM-encode a DER certificate
pub fn cert_to_pem(der: &[u8]) -> String {
    let block = ::pem::Pem::new("CERTIFICATE", der.to_vec());
    ::pem::encode_config(
        &block,
        ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF),
    )
}

/// Lowercase hex SHA-256 of the DER
pub fn fingerprint(der: &[u8]) -> FingerprintInfo {
    FingerprintInfo {
        sha256: hex::encode(Sha256::digest(der)),
    }
}

/// Render a timestamp in RFC 3339 form with second precision
pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
