/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! PKCS#7 SignedData for v1 signature blocks (`META-INF/<ALIAS>.RSA`).
//!
//! Encoding goes through `simple_asn1`, with certificates and the issuer name
//! carried as opaque blocks so they round-trip byte for byte. Decoding walks
//! the structure with `der_parser` and keeps the raw slices it needs.

use crate::{error::SignerError, keys::KeyMaterial};
use simple_asn1::{ASN1Block, ASN1Class, BigInt, BigUint, OID};
use x509_parser::der_parser::der::{parse_der, DerObject};
use x509_parser::prelude::*;

const OID_DATA: &str = "1.2.840.113549.1.7.1";
const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
const OID_MESSAGE_DIGEST: &str = "1.2.840.113549.1.9.4";
const OID_SHA1: &str = "1.3.14.3.2.26";
const OID_SHA256: &str = "2.16.840.1.101.3.4.2.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    fn oid(&self) -> OID {
        match self {
            DigestAlgorithm::Sha1 => simple_asn1::oid!(1, 3, 14, 3, 2, 26),
            DigestAlgorithm::Sha256 => simple_asn1::oid!(2, 16, 840, 1, 101, 3, 4, 2, 1),
        }
    }

    fn from_dotted(oid: &str) -> Option<Self> {
        match oid {
            OID_SHA1 => Some(DigestAlgorithm::Sha1),
            OID_SHA256 => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignerInfo {
    pub issuer: Vec<u8>,
    /// INTEGER content octets of the serial number.
    pub serial: Vec<u8>,
    pub digest: DigestAlgorithm,
    /// Authenticated attributes re-tagged as a SET, i.e. the bytes that were
    /// signed when attributes are present.
    pub signed_attributes: Option<Vec<u8>>,
    pub message_digest: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SignedData {
    pub certificates: Vec<Vec<u8>>,
    pub signers: Vec<SignerInfo>,
}

impl SignedData {
    /// The certificate whose issuer and serial match `signer`.
    pub fn certificate_for(&self, signer: &SignerInfo) -> Option<&[u8]> {
        self.certificates
            .iter()
            .find(|der| {
                X509Certificate::from_der(der)
                    .map(|(_, c)| {
                        c.tbs_certificate.issuer.as_raw() == signer.issuer.as_slice()
                            && c.tbs_certificate.raw_serial() == signer.serial.as_slice()
                    })
                    .unwrap_or(false)
            })
            .map(Vec::as_slice)
    }
}

/// Sign `signature_file` with `key` and wrap the result in a detached
/// SignedData carrying the full certificate chain.
pub fn sign_signature_file(
    key: &KeyMaterial,
    signature_file: &[u8],
) -> Result<Vec<u8>, SignerError> {
    let mut signature = vec![0u8; key.private_key.public().modulus_len()];
    let rng = ring::rand::SystemRandom::new();
    key.private_key.sign(
        crate::keys::RSA_SIGNATURE_SCHEME,
        &rng,
        signature_file,
        &mut signature,
    )?;

    let (_, cert) = X509Certificate::from_der(key.signing_certificate())
        .map_err(|e| SignerError::Config(format!("Failed to parse cert for PKCS7: {}", e)))?;
    let (issuer, _) = next_element(cert.tbs_certificate.issuer.as_raw())?;

    let sha256 = algorithm_identifier(DigestAlgorithm::Sha256.oid());
    let signer_info = ASN1Block::Sequence(
        0,
        vec![
            ASN1Block::Integer(0, BigInt::from(1u32)),
            // issuerAndSerialNumber; the name is copied verbatim so it
            // matches the certificate's own encoding
            ASN1Block::Sequence(
                0,
                vec![
                    ASN1Block::Unknown(
                        ASN1Class::Universal,
                        true,
                        0,
                        BigUint::from(16u32),
                        issuer.content.to_vec(),
                    ),
                    ASN1Block::Integer(
                        0,
                        BigInt::from_signed_bytes_be(cert.tbs_certificate.raw_serial()),
                    ),
                ],
            ),
            sha256.clone(),
            algorithm_identifier(simple_asn1::oid!(1, 2, 840, 113549, 1, 1, 1)),
            ASN1Block::OctetString(0, signature),
        ],
    );

    let signed_data = ASN1Block::Sequence(
        0,
        vec![
            ASN1Block::Integer(0, BigInt::from(1u32)),
            ASN1Block::Set(0, vec![sha256]),
            ASN1Block::Sequence(
                0,
                vec![ASN1Block::ObjectIdentifier(
                    0,
                    simple_asn1::oid!(1, 2, 840, 113549, 1, 7, 1),
                )],
            ),
            // certificates [0] IMPLICIT SET OF Certificate, chain bytes as issued
            ASN1Block::Unknown(
                ASN1Class::ContextSpecific,
                true,
                0,
                BigUint::from(0u32),
                key.certificate_chain.concat(),
            ),
            ASN1Block::Set(0, vec![signer_info]),
        ],
    );

    let content_info = ASN1Block::Sequence(
        0,
        vec![
            ASN1Block::ObjectIdentifier(0, simple_asn1::oid!(1, 2, 840, 113549, 1, 7, 2)),
            ASN1Block::Explicit(
                ASN1Class::ContextSpecific,
                0,
                BigUint::from(0u32),
                Box::new(signed_data),
            ),
        ],
    );

    simple_asn1::to_der(&content_info)
        .map_err(|e| SignerError::Config(format!("ASN1 encode error: {}", e)))
}

/// Parse a DER SignedData signature block.
pub fn decode(der: &[u8]) -> Result<SignedData, SignerError> {
    let (content_info, _) = next_element(der)?;
    let (content_type, rest) = next_element(content_info.content)?;
    if dotted_oid(&content_type)? != OID_SIGNED_DATA {
        return Err(malformed("content type is not signedData"));
    }
    let (explicit, _) = next_element(rest)?;
    if !is_context(&explicit, 0) {
        return Err(malformed("signedData content missing"));
    }
    let (signed_data, _) = next_element(explicit.content)?;
    signed_data
        .value
        .as_sequence()
        .map_err(|_| malformed("signedData is not a SEQUENCE"))?;

    let (_version, rest) = next_element(signed_data.content)?;
    let (_digest_algorithms, rest) = next_element(rest)?;
    let (encapsulated, mut rest) = next_element(rest)?;
    let (inner_type, _) = next_element(encapsulated.content)?;
    if dotted_oid(&inner_type)? != OID_DATA {
        return Err(malformed("encapsulated content is not data"));
    }

    let mut certificates = Vec::new();
    let mut signer_infos = None;
    while !rest.is_empty() {
        let (el, next) = next_element(rest)?;
        if is_context(&el, 0) {
            let mut inner = el.content;
            while !inner.is_empty() {
                let (cert, after) = next_element(inner)?;
                certificates.push(cert.raw.to_vec());
                inner = after;
            }
        } else if el.value.as_set().is_ok() {
            signer_infos = Some(el);
        }
        rest = next;
    }

    let signer_infos = signer_infos.ok_or_else(|| malformed("no signerInfos"))?;
    let mut signers = Vec::new();
    let mut inner = signer_infos.content;
    while !inner.is_empty() {
        let (info, next) = next_element(inner)?;
        signers.push(decode_signer_info(info.content)?);
        inner = next;
    }

    Ok(SignedData {
        certificates,
        signers,
    })
}

fn decode_signer_info(content: &[u8]) -> Result<SignerInfo, SignerError> {
    let (_version, rest) = next_element(content)?;
    let (issuer_serial, rest) = next_element(rest)?;
    let (issuer, after_issuer) = next_element(issuer_serial.content)?;
    let (serial, _) = next_element(after_issuer)?;

    let (digest_alg, mut rest) = next_element(rest)?;
    let (digest_oid, _) = next_element(digest_alg.content)?;
    let digest = DigestAlgorithm::from_dotted(&dotted_oid(&digest_oid)?)
        .ok_or_else(|| malformed("unsupported digest algorithm"))?;

    let mut signed_attributes = None;
    let mut message_digest = None;
    let (attributes, after) = next_element(rest)?;
    if is_context(&attributes, 0) {
        message_digest = find_message_digest(attributes.content)?;
        // [0] IMPLICIT is signed as the universal SET it replaces
        let mut as_set = attributes.raw.to_vec();
        as_set[0] = 0x31;
        signed_attributes = Some(as_set);
        rest = after;
    }

    let (_encryption_alg, rest) = next_element(rest)?;
    let (signature, _) = next_element(rest)?;
    let signature = signature
        .value
        .as_slice()
        .map_err(|_| malformed("encryptedDigest is not an OCTET STRING"))?;

    Ok(SignerInfo {
        issuer: issuer.raw.to_vec(),
        serial: serial.content.to_vec(),
        digest,
        signed_attributes,
        message_digest,
        signature: signature.to_vec(),
    })
}

fn find_message_digest(mut attrs: &[u8]) -> Result<Option<Vec<u8>>, SignerError> {
    while !attrs.is_empty() {
        let (attr, next) = next_element(attrs)?;
        let (attr_type, values) = next_element(attr.content)?;
        if dotted_oid(&attr_type)? == OID_MESSAGE_DIGEST {
            let (set, _) = next_element(values)?;
            let (value, _) = next_element(set.content)?;
            let digest = value
                .value
                .as_slice()
                .map_err(|_| malformed("messageDigest is not an OCTET STRING"))?;
            return Ok(Some(digest.to_vec()));
        }
        attrs = next;
    }
    Ok(None)
}

/// A parsed DER element with its full encoding and content octets.
struct Element<'a> {
    value: DerObject<'a>,
    raw: &'a [u8],
    content: &'a [u8],
}

fn next_element(input: &[u8]) -> Result<(Element<'_>, &[u8]), SignerError> {
    let (rest, value) = parse_der(input).map_err(|e| malformed(&e.to_string()))?;
    let raw = &input[..input.len() - rest.len()];
    let len = value
        .header
        .length()
        .definite()
        .map_err(|_| malformed("indefinite length"))?;
    let content = &raw[raw.len() - len..];
    Ok((Element { value, raw, content }, rest))
}

fn is_context(el: &Element<'_>, tag: u32) -> bool {
    el.value.header.is_contextspecific() && el.value.header.tag().0 == tag
}

fn dotted_oid(el: &Element<'_>) -> Result<String, SignerError> {
    el.value
        .as_oid()
        .map(|oid| oid.to_id_string())
        .map_err(|_| malformed("expected an object identifier"))
}

fn algorithm_identifier(oid: OID) -> ASN1Block {
    ASN1Block::Sequence(0, vec![ASN1Block::ObjectIdentifier(0, oid), ASN1Block::Null(0)])
}

fn malformed(reason: &str) -> SignerError {
    SignerError::Validation(format!("Malformed PKCS#7 signature block: {}", reason))
}
