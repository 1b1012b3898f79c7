/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! The signing seam. The orchestrator only sees [`Signer`]; the bundled
//! implementation is [`crate::processor::JarSigner`].

use crate::{error::SignerError, keys::KeyMaterial, ui::Ui};

pub use crate::crypto::CryptoEngine;
pub use crate::processor::JarSigner;

pub trait Signer {
    /// Sign a complete APK held in memory and return the signed archive.
    fn sign(&self, apk: &[u8], key: &KeyMaterial, ui: &Ui) -> Result<Vec<u8>, SignerError>;
}

impl<S: Signer + ?Sized> Signer for &S {
    fn sign(&self, apk: &[u8], key: &KeyMaterial, ui: &Ui) -> Result<Vec<u8>, SignerError> {
        (**self).sign(apk, key, ui)
    }
}
