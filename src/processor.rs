/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! APK Signature Scheme v1 (JAR signing).
//! Builds the manifest, the signature file and the PKCS#7 block, then rewrites
//! the archive with every entry stamped with the certificate's notBefore time.

use crate::{
    crypto::CryptoEngine, error::SignerError, keys::KeyMaterial, pkcs7, signing::Signer, ui::Ui,
    APP_NAME, APP_VERSION, BUFFER_SIZE, MANIFEST_NAME,
};
use crc32fast::Hasher as Crc32;
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    io::{Cursor, Read, Write},
};
use zip::{
    write::{SimpleFileOptions, ZipWriter},
    CompressionMethod, DateTime, ZipArchive,
};

pub const DIGEST_ATTRIBUTE: &str = "SHA-256-Digest";
pub const MANIFEST_DIGEST_ATTRIBUTE: &str = "SHA-256-Digest-Manifest";
const MAIN_ATTRIBUTES_DIGEST_ATTRIBUTE: &str = "SHA-256-Digest-Manifest-Main-Attributes";
const ENTRY_ALIGNMENT: u16 = 4;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// True for the files a v1 signature consists of: `META-INF/MANIFEST.MF` and
/// the per-signer `.SF`/`.RSA`/`.DSA`/`.EC`/`SIG-*` files directly in
/// `META-INF/`. Anything else under `META-INF/` is ordinary content.
pub fn is_signature_entry(name: &str) -> bool {
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    let upper = file.to_ascii_uppercase();
    upper == "MANIFEST.MF"
        || upper.starts_with("SIG-")
        || [".SF", ".RSA", ".DSA", ".EC"]
            .iter()
            .any(|ext| upper.ends_with(ext))
}

/// Bundled [`Signer`] producing v1 signatures with SHA-256 digests and
/// RSA-PKCS1-SHA256.
#[derive(Debug, Clone)]
pub struct JarSigner {
    created_by: String,
}

impl Default for JarSigner {
    fn default() -> Self {
        Self {
            created_by: format!("{} ({})", APP_VERSION, APP_NAME),
        }
    }
}

impl Signer for JarSigner {
    fn sign(&self, apk: &[u8], key: &KeyMaterial, ui: &Ui) -> Result<Vec<u8>, SignerError> {
        let mut archive = ZipArchive::new(Cursor::new(apk))?;
        let digests = Self::compute_manifest_digests(&mut archive, ui)?;
        ui.very_verbose(&format!("Digested {} entries", digests.len()));
        let signed = self.write_signed_zip(&mut archive, key, &digests, ui)?;
        Self::verify_zip_integrity(&signed)?;
        Ok(signed)
    }
}

impl JarSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base name of the `.SF`/`.RSA` pair for `alias`: upper case, at most
    /// eight characters of `[A-Z0-9_-]`.
    pub fn signature_base_name(alias: &str) -> String {
        let name: String = alias
            .chars()
            .map(|c| match c.to_ascii_uppercase() {
                c @ ('A'..='Z' | '0'..='9' | '_' | '-') => c,
                _ => '_',
            })
            .take(8)
            .collect();
        if name.is_empty() {
            "CERT".to_string()
        } else {
            name
        }
    }

    /// SHA-256 of every content entry, keyed by entry name.
    pub fn compute_manifest_digests(
        archive: &mut Archive<'_>,
        ui: &Ui,
    ) -> Result<BTreeMap<String, String>, SignerError> {
        let mut names = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if !entry.is_dir() && !is_signature_entry(entry.name()) {
                names.push(entry.name().to_string());
            }
        }

        let shared: &Archive<'_> = archive;
        let digests: Result<Vec<(String, String)>, SignerError> = names
            .into_par_iter()
            .map(|name| {
                let mut local = shared.clone();
                let mut entry = local.by_name(&name)?;
                let digest = CryptoEngine::compute_stream_sha256(&mut entry)?;
                Ok((name, digest))
            })
            .collect();

        let digests: BTreeMap<String, String> = digests?.into_iter().collect();
        if ui.debug {
            for (name, digest) in &digests {
                ui.debug(&format!("{} {}", digest, name));
            }
        }
        Ok(digests)
    }

    fn write_signed_zip(
        &self,
        archive: &mut Archive<'_>,
        key: &KeyMaterial,
        digests: &BTreeMap<String, String>,
        ui: &Ui,
    ) -> Result<Vec<u8>, SignerError> {
        let timestamp = key.reproducible_timestamp();
        ui.verbose(&format!(
            "Timestamp used: {:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
            timestamp.year(),
            timestamp.month(),
            timestamp.day(),
            timestamp.hour(),
            timestamp.minute(),
            timestamp.second()
        ));

        let base = Self::signature_base_name(&key.alias);
        let sf_name = format!("META-INF/{}.SF", base);
        let rsa_name = format!("META-INF/{}.RSA", base);

        let manifest_bytes = self.gen_manifest(digests);
        let sf_bytes = self.gen_sf(&manifest_bytes, digests);
        let rsa_bytes = pkcs7::sign_signature_file(key, &sf_bytes)?;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        Self::write_entry(&mut writer, MANIFEST_NAME, &manifest_bytes, timestamp)?;
        Self::write_entry(&mut writer, &sf_name, &sf_bytes, timestamp)?;
        Self::write_entry(&mut writer, &rsa_name, &rsa_bytes, timestamp)?;

        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut stripped = 0usize;
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let name = file.name().to_string();
            if is_signature_entry(&name) {
                stripped += 1;
                continue;
            }

            let options = SimpleFileOptions::default()
                .compression_method(file.compression())
                .last_modified_time(timestamp)
                .unix_permissions(file.unix_mode().unwrap_or(0o644));

            if file.is_dir() {
                writer.add_directory(name.as_str(), options)?;
                continue;
            }

            writer.start_file(name.as_str(), options.with_alignment(ENTRY_ALIGNMENT))?;
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                writer.write_all(&buf[..n])?;
            }
            ui.very_verbose(&format!("Copied {}", name));
        }
        if stripped > 0 {
            ui.verbose(&format!("Replaced {} existing signature file(s)", stripped));
        }

        Ok(writer.finish()?.into_inner())
    }

    fn write_entry<W: Write + std::io::Seek>(
        w: &mut ZipWriter<W>,
        n: &str,
        d: &[u8],
        t: DateTime,
    ) -> Result<(), SignerError> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(t)
            .with_alignment(ENTRY_ALIGNMENT);
        w.start_file(n, options)?;
        w.write_all(d)?;
        Ok(())
    }

    /// Append `key: value` folded at 72 bytes per line, continuation lines
    /// starting with a single space.
    pub fn write_manifest_line(out: &mut Vec<u8>, key: &str, value: &str) {
        let line = format!("{}: {}", key, value).into_bytes();
        let mut cursor = 0;
        let len = line.len();
        while cursor < len {
            let remaining = len - cursor;
            let limit = if cursor == 0 { 72 } else { 71 };
            let chunk_size = std::cmp::min(remaining, limit);
            if cursor > 0 {
                out.push(b' ');
            }
            out.extend_from_slice(&line[cursor..cursor + chunk_size]);
            out.extend_from_slice(b"\r\n");
            cursor += chunk_size;
        }
    }

    fn create_manifest_entry(name: &str, hash: &str) -> Vec<u8> {
        let mut entry = Vec::with_capacity(name.len() + hash.len() + 50);
        Self::write_manifest_line(&mut entry, "Name", name);
        Self::write_manifest_line(&mut entry, DIGEST_ATTRIBUTE, hash);
        entry.extend_from_slice(b"\r\n");
        entry
    }

    fn main_attributes(&self, version_key: &str) -> Vec<u8> {
        let mut out = Vec::new();
        Self::write_manifest_line(&mut out, version_key, "1.0");
        Self::write_manifest_line(&mut out, "Created-By", &self.created_by);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn gen_manifest(&self, digests: &BTreeMap<String, String>) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + digests.len() * 100);
        out.extend(self.main_attributes("Manifest-Version"));
        for (name, hash) in digests {
            out.extend(Self::create_manifest_entry(name, hash));
        }
        out
    }

    fn gen_sf(&self, manifest_bytes: &[u8], digests: &BTreeMap<String, String>) -> Vec<u8> {
        let mut out = Vec::new();
        Self::write_manifest_line(&mut out, "Signature-Version", "1.0");
        Self::write_manifest_line(&mut out, "Created-By", &self.created_by);
        Self::write_manifest_line(
            &mut out,
            MANIFEST_DIGEST_ATTRIBUTE,
            &CryptoEngine::compute_sha256(manifest_bytes),
        );
        let main = self.main_attributes("Manifest-Version");
        Self::write_manifest_line(
            &mut out,
            MAIN_ATTRIBUTES_DIGEST_ATTRIBUTE,
            &CryptoEngine::compute_sha256(&main),
        );
        out.extend_from_slice(b"\r\n");
        for (name, file_hash) in digests {
            let section = Self::create_manifest_entry(name, file_hash);
            Self::write_manifest_line(&mut out, "Name", name);
            Self::write_manifest_line(
                &mut out,
                DIGEST_ATTRIBUTE,
                &CryptoEngine::compute_sha256(&section),
            );
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    /// Re-read every entry of a written archive and compare CRC-32s.
    pub fn verify_zip_integrity(bytes: &[u8]) -> Result<(), SignerError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut buf = vec![0u8; BUFFER_SIZE];
        for i in 0..archive.len() {
            let mut f = archive.by_index(i)?;
            let mut hasher = Crc32::new();
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let stored = f.crc32();
            let computed = hasher.finalize();
            if stored != computed {
                return Err(SignerError::Validation(format!(
                    "CRC mismatch for `{}`: stored={:#010x}, computed={:#010x}",
                    f.name(),
                    stored,
                    computed
                )));
            }
        }
        Ok(())
    }
}
