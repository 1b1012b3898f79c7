/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use crate::{error::SignerError, ui::Ui, BUFFER_SIZE};
use base64::{engine::general_purpose::STANDARD as base64_engine, Engine};
use ring::digest;
use std::io::Read;

pub struct CryptoEngine;

impl CryptoEngine {
    /// Base64 SHA-256, the form used in `*-Digest` manifest attributes.
    pub fn compute_sha256(data: &[u8]) -> String {
        base64_engine.encode(digest::digest(&digest::SHA256, data).as_ref())
    }

    pub fn compute_sha1(data: &[u8]) -> String {
        base64_engine.encode(digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data).as_ref())
    }

    pub fn compute_stream_sha256<R: Read>(reader: &mut R) -> Result<String, SignerError> {
        Self::compute_stream_sha256_with_ui(reader, None, None)
    }

    pub fn compute_stream_sha256_with_ui<R: Read>(
        reader: &mut R,
        ui: Option<&Ui>,
        entry_name: Option<&str>,
    ) -> Result<String, SignerError> {
        let mut ctx = digest::Context::new(&digest::SHA256);

        if let (Some(ui), Some(name)) = (ui, entry_name) {
            ui.debug(&format!("SHA-256: {}", name));
        }

        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut processed = 0u64;
        loop {
            let count = reader.read(&mut buf)?;
            if count == 0 {
                break;
            }
            ctx.update(&buf[..count]);
            processed += count as u64;
        }

        if let Some(ui) = ui {
            ui.debug(&format!("SHA-256 complete: {} bytes", processed));
        }

        Ok(base64_engine.encode(ctx.finish().as_ref()))
    }

    pub fn decode_digest(encoded: &str) -> Option<Vec<u8>> {
        base64_engine.decode(encoded.trim()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stream_and_slice_digests_agree() {
        let data = vec![7u8; BUFFER_SIZE * 2 + 13];
        let streamed = CryptoEngine::compute_stream_sha256(&mut Cursor::new(&data)).unwrap();
        assert_eq!(streamed, CryptoEngine::compute_sha256(&data));
    }

    #[test]
    fn empty_input_has_known_digest() {
        assert_eq!(
            CryptoEngine::compute_sha256(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
        assert_eq!(
            CryptoEngine::decode_digest(&CryptoEngine::compute_sha256(b"x")).map(|d| d.len()),
            Some(32)
        );
    }
}
