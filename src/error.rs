/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Error types for the signing pipeline.
//! Every variant is run-fatal; the message carries the keystore id, alias or
//! path needed to diagnose the failure from the build log alone.

use std::{io, path::PathBuf};
use thiserror::Error;

/// Comprehensive error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum SignerError {
    /// Bad glob, exhausted scan bound, or no files matched
    #[error("Validation Error: {0}")]
    Validation(String),

    /// Bad CLI arguments or job definition
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("No credentials found for key store '{key_store_id}'")]
    CredentialsNotFound { key_store_id: String },

    /// PKCS#12 stores cannot be enumerated without a password
    #[error("Key store '{key_store_id}' has a null or empty password; a password is required to read its entries")]
    NullKeyStorePassword { key_store_id: String },

    #[error("Key store '{key_store_id}' does not contain a private key with alias '{alias}'")]
    AliasNotFound { key_store_id: String, alias: String },

    #[error("Key store '{key_store_id}' contains {} private keys ({}); specify which alias to sign with", .aliases.len(), .aliases.join(", "))]
    AmbiguousAlias {
        key_store_id: String,
        aliases: Vec<String>,
    },

    #[error("Cannot recover key '{alias}' from key store '{key_store_id}': {reason}")]
    UnrecoverableKey {
        key_store_id: String,
        alias: String,
        reason: String,
    },

    #[error("failed to find zipalign; searched: {}", .searched.join("; "))]
    ToolNotFound { searched: Vec<String> },

    #[error("Signing Error for {}: {reason}", .path.display())]
    Signing { path: PathBuf, reason: String },

    /// Nonzero exit (or signal) from the alignment tool
    #[error("Process Error: {} exited with {status} while processing {}: {stderr}", .executable.display(), .input.display())]
    ProcessFailure {
        executable: PathBuf,
        input: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),

    #[error("ZIP Error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Cryptography Error: {0}")]
    Ring(ring::error::Unspecified),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl SignerError {
    /// Fully-qualified kind name appended to the build log so operators can
    /// tell "wrong alias" from "wrong password" from "tool missing" at a glance.
    pub fn kind(&self) -> &'static str {
        match self {
            SignerError::Validation(_) => "apksignerust::error::SignerError::Validation",
            SignerError::Config(_) => "apksignerust::error::SignerError::Config",
            SignerError::CredentialsNotFound { .. } => {
                "apksignerust::error::SignerError::CredentialsNotFound"
            }
            SignerError::NullKeyStorePassword { .. } => {
                "apksignerust::error::SignerError::NullKeyStorePassword"
            }
            SignerError::AliasNotFound { .. } => "apksignerust::error::SignerError::AliasNotFound",
            SignerError::AmbiguousAlias { .. } => {
                "apksignerust::error::SignerError::AmbiguousAlias"
            }
            SignerError::UnrecoverableKey { .. } => {
                "apksignerust::error::SignerError::UnrecoverableKey"
            }
            SignerError::ToolNotFound { .. } => "apksignerust::error::SignerError::ToolNotFound",
            SignerError::Signing { .. } => "apksignerust::error::SignerError::Signing",
            SignerError::ProcessFailure { .. } => {
                "apksignerust::error::SignerError::ProcessFailure"
            }
            SignerError::Io(_) => "apksignerust::error::SignerError::Io",
            SignerError::Zip(_) => "apksignerust::error::SignerError::Zip",
            SignerError::Ring(_) => "apksignerust::error::SignerError::Ring",
            SignerError::Cancelled(_) => "apksignerust::error::SignerError::Cancelled",
        }
    }

    /// Key-store and key failures come from the security layer and get their
    /// kind name printed alongside the message.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            SignerError::NullKeyStorePassword { .. }
                | SignerError::AliasNotFound { .. }
                | SignerError::AmbiguousAlias { .. }
                | SignerError::UnrecoverableKey { .. }
                | SignerError::Ring(_)
        )
    }

    pub(crate) fn signing(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        SignerError::Signing {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ring::error::Unspecified> for SignerError {
    fn from(e: ring::error::Unspecified) -> Self {
        Self::Ring(e)
    }
}
