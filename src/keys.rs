/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Keystore alias resolution and private-key extraction.

use crate::{credentials::CredentialsStore, error::SignerError, ui::Ui};

use ::pem as pem_crate;
use p12_keystore::{KeyStore, KeyStoreEntry, PrivateKeyChain};
use ring::signature::{self, KeyPair, RsaKeyPair, UnparsedPublicKey};
use std::{fmt, fs, path::Path};
use x509_parser::prelude::*;
use zip::DateTime;

pub const RSA_SIGNATURE_SCHEME: &dyn signature::RsaEncoding = &signature::RSA_PKCS1_SHA256;

pub const RSA_VERIFICATION_ALGORITHM: &'static dyn signature::VerificationAlgorithm =
    &signature::RSA_PKCS1_2048_8192_SHA256;

/// A resolved signing key. Lives for one run and is never cloned or logged.
pub struct KeyMaterial {
    pub alias: String,
    pub private_key: RsaKeyPair,
    /// DER certificates, signing certificate first.
    pub certificate_chain: Vec<Vec<u8>>,
    not_before: DateTime,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("alias", &self.alias)
            .field("certificates", &self.certificate_chain.len())
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn signing_certificate(&self) -> &[u8] {
        &self.certificate_chain[0]
    }

    /// Entry timestamp for signed archives: the certificate's notBefore, so
    /// re-signing the same input yields the same bytes.
    pub fn reproducible_timestamp(&self) -> DateTime {
        self.not_before
    }
}

pub struct KeyResolver<'a> {
    credentials: &'a dyn CredentialsStore,
}

impl<'a> KeyResolver<'a> {
    pub fn new(credentials: &'a dyn CredentialsStore) -> Self {
        Self { credentials }
    }

    /// Resolve `alias` in key store `key_store_id`. An empty alias selects the
    /// store's only private key.
    pub fn resolve(
        &self,
        key_store_id: &str,
        alias: &str,
        ui: &Ui,
    ) -> Result<KeyMaterial, SignerError> {
        let creds = self.credentials.lookup(key_store_id)?;
        let password = match creds.password.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => {
                return Err(SignerError::NullKeyStorePassword {
                    key_store_id: key_store_id.to_string(),
                })
            }
        };

        let unrecoverable = |alias: &str, reason: String| SignerError::UnrecoverableKey {
            key_store_id: key_store_id.to_string(),
            alias: if alias.is_empty() {
                "<sole key>".to_string()
            } else {
                alias.to_string()
            },
            reason,
        };

        let store = KeyStore::from_pkcs12(&creds.bytes, password)
            .map_err(|e| unrecoverable(alias, format!("cannot open key store: {}", e)))?;

        let mut keys: Vec<(&str, &PrivateKeyChain)> = store
            .entries()
            .filter_map(|(name, entry)| match entry {
                KeyStoreEntry::PrivateKeyChain(chain) => Some((name.as_str(), chain)),
                _ => None,
            })
            .collect();
        keys.sort_by(|a, b| a.0.cmp(b.0));
        ui.very_verbose(&format!(
            "Key store '{}' holds {} private key(s)",
            key_store_id,
            keys.len()
        ));

        let (name, chain) = Self::select(key_store_id, alias, &keys)?;
        if name != alias && !alias.is_empty() {
            ui.verbose(&format!("Alias '{}' matched entry '{}'", alias, name));
        }

        let private_key = RsaKeyPair::from_pkcs8(chain.key())
            .map_err(|e| unrecoverable(name, format!("not an RSA PKCS#8 key: {}", e)))?;

        let mut certificate_chain: Vec<Vec<u8>> =
            chain.chain().iter().map(|c| c.as_der().to_vec()).collect();
        let leaf = certificate_chain
            .iter()
            .position(|der| Self::matches_key(der, &private_key))
            .ok_or_else(|| {
                unrecoverable(name, "no certificate matches the private key".to_string())
            })?;
        certificate_chain.swap(0, leaf);

        let (_, cert) = X509Certificate::from_der(&certificate_chain[0])
            .map_err(|e| unrecoverable(name, format!("invalid certificate: {}", e)))?;
        ui.debug(&format!("Signer: {}", cert.subject()));
        ui.debug(&format!(
            "Valid: {} .. {}",
            cert.validity().not_before,
            cert.validity().not_after
        ));
        if !cert.validity().is_valid() {
            ui.warn(&format!(
                "Certificate for '{}' is outside its validity period",
                name
            ));
        }
        let not_before = asn1_to_zip_datetime(cert.validity().not_before, ui);

        Ok(KeyMaterial {
            alias: name.to_string(),
            private_key,
            certificate_chain,
            not_before,
        })
    }

    fn select<'k>(
        key_store_id: &str,
        alias: &str,
        keys: &[(&'k str, &'k PrivateKeyChain)],
    ) -> Result<(&'k str, &'k PrivateKeyChain), SignerError> {
        if alias.is_empty() {
            return match keys {
                [only] => Ok(*only),
                [] => Err(SignerError::AliasNotFound {
                    key_store_id: key_store_id.to_string(),
                    alias: alias.to_string(),
                }),
                many => Err(SignerError::AmbiguousAlias {
                    key_store_id: key_store_id.to_string(),
                    aliases: many.iter().map(|(n, _)| n.to_string()).collect(),
                }),
            };
        }

        keys.iter()
            .find(|(n, _)| *n == alias)
            .or_else(|| keys.iter().find(|(n, _)| n.eq_ignore_ascii_case(alias)))
            .copied()
            .ok_or_else(|| SignerError::AliasNotFound {
                key_store_id: key_store_id.to_string(),
                alias: alias.to_string(),
            })
    }

    fn matches_key(cert_der: &[u8], key: &RsaKeyPair) -> bool {
        let ours: &[u8] = key.public_key().as_ref();
        X509Certificate::from_der(cert_der)
            .map(|(_, c)| {
                let theirs: &[u8] = &c.public_key().subject_public_key.data;
                theirs == ours
            })
            .unwrap_or(false)
    }
}

/// Read an X.509 certificate from PEM or raw DER.
pub fn load_certificate(path: &Path, ui: &Ui) -> Result<Vec<u8>, SignerError> {
    let content = fs::read(path)?;
    let der = match pem_crate::parse(&content) {
        Ok(block) => block.contents().to_vec(),
        Err(_) => {
            ui.debug("Input is not PEM, attempting to parse as binary X.509 DER...");
            content
        }
    };
    X509Certificate::from_der(&der).map_err(|e| {
        SignerError::Config(format!("Invalid certificate {}: {}", path.display(), e))
    })?;
    Ok(der)
}

/// Verifier for RSA signatures made by the key in `cert_der`.
pub fn certificate_public_key(cert_der: &[u8]) -> Result<UnparsedPublicKey<Vec<u8>>, SignerError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| SignerError::Validation(format!("Invalid certificate: {}", e)))?;
    let pk_der = cert.public_key().subject_public_key.data.to_vec();
    Ok(UnparsedPublicKey::new(RSA_VERIFICATION_ALGORITHM, pk_der))
}

fn asn1_to_zip_datetime(asn1: ASN1Time, ui: &Ui) -> DateTime {
    let dt = asn1.to_datetime();
    // ZIP timestamps cover 1980..=2107 only.
    let year = (dt.year().clamp(1980, 2107)) as u16;

    DateTime::from_date_and_time(
        year,
        dt.month() as u8,
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
    )
    .unwrap_or_else(|_| {
        ui.debug("Certificate notBefore not representable in ZIP; using 1980-01-01");
        DateTime::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialsStore;

    const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

    fn store() -> MemoryCredentialsStore {
        let mut store = MemoryCredentialsStore::new();
        store
            .insert(
                "release",
                fs::read(format!("{}/release.p12", FIXTURES)).unwrap(),
                Some("storepass".into()),
            )
            .insert(
                "multi",
                fs::read(format!("{}/multi.p12", FIXTURES)).unwrap(),
                Some("multipass".into()),
            )
            .insert(
                "nopass",
                fs::read(format!("{}/release.p12", FIXTURES)).unwrap(),
                Some(String::new()),
            )
            .insert(
                "wrongpass",
                fs::read(format!("{}/release.p12", FIXTURES)).unwrap(),
                Some("not-the-password".into()),
            );
        store
    }

    #[test]
    fn sole_key_is_used_when_alias_is_empty() {
        let store = store();
        let key = KeyResolver::new(&store)
            .resolve("release", "", &Ui::silent())
            .unwrap();
        assert_eq!(key.alias, "release");
        let text = fs::read(format!("{}/release-cert.pem", FIXTURES)).unwrap();
        assert_eq!(key.signing_certificate(), pem_crate::parse(text).unwrap().contents());
    }

    #[test]
    fn empty_alias_with_several_keys_is_ambiguous() {
        let store = store();
        let err = KeyResolver::new(&store)
            .resolve("multi", "", &Ui::silent())
            .unwrap_err();
        match err {
            SignerError::AmbiguousAlias { aliases, .. } => assert_eq!(aliases, vec!["alpha", "beta"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn named_alias_is_selected_case_insensitively() {
        let store = store();
        let resolver = KeyResolver::new(&store);
        assert_eq!(resolver.resolve("multi", "beta", &Ui::silent()).unwrap().alias, "beta");
        assert_eq!(resolver.resolve("multi", "ALPHA", &Ui::silent()).unwrap().alias, "alpha");
    }

    #[test]
    fn missing_alias_is_reported_with_its_name() {
        let store = store();
        let err = KeyResolver::new(&store)
            .resolve("release", "does-not-exist", &Ui::silent())
            .unwrap_err();
        assert!(matches!(err, SignerError::AliasNotFound { .. }));
        assert!(err.to_string().contains("does-not-exist"));
    }

    #[test]
    fn empty_password_fails_before_parsing() {
        let store = store();
        let err = KeyResolver::new(&store)
            .resolve("nopass", "", &Ui::silent())
            .unwrap_err();
        assert!(matches!(err, SignerError::NullKeyStorePassword { .. }));
    }

    #[test]
    fn wrong_password_is_unrecoverable_not_missing() {
        let store = store();
        let err = KeyResolver::new(&store)
            .resolve("wrongpass", "release", &Ui::silent())
            .unwrap_err();
        assert!(matches!(err, SignerError::UnrecoverableKey { .. }));
    }

    #[test]
    fn unknown_store_is_credentials_not_found() {
        let store = store();
        let err = KeyResolver::new(&store)
            .resolve("nope", "", &Ui::silent())
            .unwrap_err();
        assert!(matches!(err, SignerError::CredentialsNotFound { .. }));
    }

    #[test]
    fn pem_certificate_loads() {
        let der = load_certificate(
            Path::new(&format!("{}/beta-cert.pem", FIXTURES)),
            &Ui::silent(),
        )
        .unwrap();
        assert!(certificate_public_key(&der).is_ok());
    }
}
