/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use std::{
    collections::BTreeMap,
    fmt,
    io::{Cursor, Read},
};
use ring::signature::{self, UnparsedPublicKey};
use x509_parser::prelude::*;
use zip::ZipArchive;

use crate::{
    crypto::CryptoEngine,
    error::SignerError,
    pkcs7::{self, DigestAlgorithm},
    processor::is_signature_entry,
    BUFFER_SIZE, MANIFEST_NAME,
};

const APK_SIG_BLOCK_MAGIC: &[u8] = b"APK Sig Block 42";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// JAR signing: MANIFEST.MF, .SF and a PKCS#7 block.
    V1,
    /// An APK Signing Block is present (v2 or later). Detected only.
    ApkSigningBlock,
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignatureScheme::V1 => "v1 (JAR)",
            SignatureScheme::ApkSigningBlock => "v2+ (APK Signing Block)",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub verified: bool,
    pub schemes: Vec<SignatureScheme>,
    /// DER certificates of every signer whose signature checked out.
    pub signer_certificates: Vec<Vec<u8>>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl VerifyReport {
    pub fn signed_by(&self, cert_der: &[u8]) -> bool {
        self.signer_certificates.iter().any(|c| c == cert_der)
    }
}

pub trait Verifier {
    /// Check the signatures of an APK held in memory. Only an unreadable
    /// archive is an `Err`; signature problems land in the report.
    fn verify(&self, apk: &[u8]) -> Result<VerifyReport, SignerError>;
}

/// Verifies v1 signatures: each signer block against its `.SF`, the `.SF`
/// against the manifest, and the manifest against every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct JarVerifier;

impl Verifier for JarVerifier {
    fn verify(&self, apk: &[u8]) -> Result<VerifyReport, SignerError> {
        let mut report = VerifyReport::default();
        let mut archive = ZipArchive::new(Cursor::new(apk))?;

        if apk.windows(APK_SIG_BLOCK_MAGIC.len()).any(|w| w == APK_SIG_BLOCK_MAGIC) {
            report.schemes.push(SignatureScheme::ApkSigningBlock);
            report
                .warnings
                .push("APK Signing Block present; only the v1 signature is checked".into());
        }

        let Some(manifest) = read_entry(&mut archive, MANIFEST_NAME)? else {
            report.errors.push(format!("No v1 signature: {} missing", MANIFEST_NAME));
            return Ok(report);
        };
        report.schemes.insert(0, SignatureScheme::V1);

        let sections = split_sections(&manifest);
        let manifest_entries: BTreeMap<String, (BTreeMap<String, String>, &[u8])> = sections
            .iter()
            .skip(1)
            .filter_map(|raw| {
                let attrs = parse_attributes(raw);
                attrs.get("Name").cloned().map(|name| (name, (attrs, *raw)))
            })
            .collect();

        let signature_files: Vec<String> = archive
            .file_names()
            .filter(|n| is_signature_entry(n) && n.to_ascii_uppercase().ends_with(".SF"))
            .map(str::to_string)
            .collect();
        if signature_files.is_empty() {
            report.errors.push("No signature files (*.SF) in META-INF".into());
        }

        for sf_name in &signature_files {
            let Some(sf) = read_entry(&mut archive, sf_name)? else {
                continue;
            };
            let stem = &sf_name[..sf_name.len() - 3];
            let block = ["RSA", "rsa", "EC", "DSA"]
                .iter()
                .map(|ext| format!("{}.{}", stem, ext))
                .find(|n| archive.index_for_name(n).is_some());
            let Some(block_name) = block else {
                report.errors.push(format!("{}: no matching signature block", sf_name));
                continue;
            };
            if !block_name.to_ascii_uppercase().ends_with(".RSA") {
                report
                    .errors
                    .push(format!("{}: only RSA signature blocks are supported", block_name));
                continue;
            }
            let block = read_entry(&mut archive, &block_name)?.unwrap_or_default();

            match Self::check_signature_block(&block, &sf) {
                Ok(cert) => {
                    if !report.signed_by(&cert) {
                        report.signer_certificates.push(cert);
                    }
                }
                Err(e) => {
                    report.errors.push(format!("{}: {}", block_name, e));
                    continue;
                }
            }

            Self::check_signature_file(
                sf_name,
                &sf,
                &manifest,
                &sections,
                &manifest_entries,
                &mut report,
            );
        }

        Self::check_entries(&mut archive, &manifest_entries, &mut report)?;

        report.verified = report.errors.is_empty() && !report.signer_certificates.is_empty();
        Ok(report)
    }
}

impl JarVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Verify the PKCS#7 block over `sf` and return the signer certificate.
    fn check_signature_block(block: &[u8], sf: &[u8]) -> Result<Vec<u8>, String> {
        let signed = pkcs7::decode(block).map_err(|e| e.to_string())?;
        let signer = signed
            .signers
            .first()
            .ok_or_else(|| "signature block has no signers".to_string())?;
        let cert = signed
            .certificate_for(signer)
            .ok_or_else(|| "signer certificate not included".to_string())?;

        let message: &[u8] = match (&signer.signed_attributes, &signer.message_digest) {
            (Some(attrs), Some(expected)) => {
                let actual = match signer.digest {
                    DigestAlgorithm::Sha256 => ring::digest::digest(&ring::digest::SHA256, sf),
                    DigestAlgorithm::Sha1 => {
                        ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, sf)
                    }
                };
                if actual.as_ref() != expected.as_slice() {
                    return Err("messageDigest attribute does not match the .SF file".into());
                }
                attrs.as_slice()
            }
            (Some(_), None) => return Err("signed attributes lack messageDigest".into()),
            (None, _) => sf,
        };

        let algorithm: &'static dyn signature::VerificationAlgorithm = match signer.digest {
            DigestAlgorithm::Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
            DigestAlgorithm::Sha1 => &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
        };
        let (_, parsed) =
            X509Certificate::from_der(cert).map_err(|e| format!("invalid certificate: {}", e))?;
        let spki: &[u8] = &parsed.public_key().subject_public_key.data;
        UnparsedPublicKey::new(algorithm, spki)
            .verify(message, &signer.signature)
            .map_err(|_| "RSA signature does not verify".to_string())?;
        Ok(cert.to_vec())
    }

    fn check_signature_file(
        sf_name: &str,
        sf: &[u8],
        manifest: &[u8],
        sections: &[&[u8]],
        manifest_entries: &BTreeMap<String, (BTreeMap<String, String>, &[u8])>,
        report: &mut VerifyReport,
    ) {
        let sf_sections = split_sections(sf);
        let main = sf_sections.first().map(|s| parse_attributes(s)).unwrap_or_default();

        let whole_manifest_ok = digest_attribute(&main, "-Digest-Manifest")
            .map(|(alg, expected)| digest_b64(alg, manifest) == expected)
            .unwrap_or(false);
        if whole_manifest_ok {
            return;
        }
        report.warnings.push(format!(
            "{}: whole-manifest digest missing or stale, checking sections",
            sf_name
        ));

        if let (Some(main_section), Some((alg, expected))) = (
            sections.first(),
            digest_attribute(&main, "-Digest-Manifest-Main-Attributes"),
        ) {
            if digest_b64(alg, main_section) != expected {
                report
                    .errors
                    .push(format!("{}: manifest main attributes digest mismatch", sf_name));
            }
        }

        for raw in sf_sections.iter().skip(1) {
            let attrs = parse_attributes(raw);
            let Some(name) = attrs.get("Name") else {
                continue;
            };
            let Some((_, section)) = manifest_entries.get(name) else {
                report
                    .errors
                    .push(format!("{}: entry {} not in manifest", sf_name, name));
                continue;
            };
            match digest_attribute(&attrs, "-Digest") {
                Some((alg, expected)) if digest_b64(alg, section) == expected => {}
                _ => report
                    .errors
                    .push(format!("{}: digest mismatch for manifest section {}", sf_name, name)),
            }
        }
    }

    fn check_entries(
        archive: &mut ZipArchive<Cursor<&[u8]>>,
        manifest_entries: &BTreeMap<String, (BTreeMap<String, String>, &[u8])>,
        report: &mut VerifyReport,
    ) -> Result<(), SignerError> {
        let mut seen = 0usize;
        let mut buf = vec![0u8; BUFFER_SIZE];
        for i in 0..archive.len() {
            let mut f = archive.by_index(i)?;
            let name = f.name().to_string();
            if f.is_dir() || is_signature_entry(&name) {
                continue;
            }
            let Some((attrs, _)) = manifest_entries.get(&name) else {
                report.errors.push(format!("Entry {} is not covered by the manifest", name));
                continue;
            };
            seen += 1;
            let Some((alg, expected)) = digest_attribute(attrs, "-Digest") else {
                report.errors.push(format!("Manifest entry {} has no digest", name));
                continue;
            };
            let actual = match alg {
                DigestAlgorithm::Sha256 => CryptoEngine::compute_stream_sha256(&mut f)?,
                DigestAlgorithm::Sha1 => {
                    let mut data = Vec::with_capacity(f.size() as usize);
                    loop {
                        let n = f.read(&mut buf)?;
                        if n == 0 {
                            break;
                        }
                        data.extend_from_slice(&buf[..n]);
                    }
                    CryptoEngine::compute_sha1(&data)
                }
            };
            if actual != expected {
                report.errors.push(format!("Manifest digest mismatch for {}", name));
            }
        }
        if seen < manifest_entries.len() {
            for name in manifest_entries.keys() {
                if archive.index_for_name(name).is_none() {
                    report
                        .warnings
                        .push(format!("Manifest references missing file {}", name));
                }
            }
        }
        Ok(())
    }
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, SignerError> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut out)?;
    Ok(Some(out))
}

/// Split manifest bytes into raw sections, each including its terminating
/// blank line.
fn split_sections(bytes: &[u8]) -> Vec<&[u8]> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let end = if bytes[i..].starts_with(b"\r\n\r\n") {
            Some(i + 4)
        } else if bytes[i..].starts_with(b"\n\n") {
            Some(i + 2)
        } else {
            None
        };
        match end {
            Some(end) => {
                sections.push(&bytes[start..end]);
                start = end;
                i = end;
            }
            None => i += 1,
        }
    }
    if start < bytes.len() {
        sections.push(&bytes[start..]);
    }
    sections
}

fn unfold_lines(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in s.lines() {
        if let Some(last) = out.last_mut() {
            if let Some(cont) = line.strip_prefix(' ') {
                last.push_str(cont);
                continue;
            }
        }
        out.push(line.to_string());
    }
    out
}

fn parse_attributes(section: &[u8]) -> BTreeMap<String, String> {
    unfold_lines(&String::from_utf8_lossy(section))
        .into_iter()
        .filter_map(|line| {
            line.split_once(": ")
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Strongest `<ALG><suffix>` attribute present, e.g. `SHA-256-Digest`.
fn digest_attribute(
    attrs: &BTreeMap<String, String>,
    suffix: &str,
) -> Option<(DigestAlgorithm, String)> {
    [("SHA-256", DigestAlgorithm::Sha256), ("SHA1", DigestAlgorithm::Sha1)]
        .into_iter()
        .find_map(|(prefix, alg)| {
            attrs
                .get(&format!("{}{}", prefix, suffix))
                .map(|v| (alg, v.clone()))
        })
}

fn digest_b64(alg: DigestAlgorithm, data: &[u8]) -> String {
    match alg {
        DigestAlgorithm::Sha256 => CryptoEngine::compute_sha256(data),
        DigestAlgorithm::Sha1 => CryptoEngine::compute_sha1(data),
    }
}
