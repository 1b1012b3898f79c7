/*
 * ApkSignerust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! # ApkSignerust Library
//!
//! The signing step of an Android build pipeline: finds built APKs in a
//! workspace by glob, resolves the signing key from a PKCS#12 keystore, signs
//! each APK, runs `zipalign` on it and places the result where downstream
//! steps expect it. The `apksignerust` binary is a thin `clap` front-end over
//! [`orchestrator::SigningOrchestrator`].

pub mod archive;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod host;
pub mod keys;
pub mod mapping;
pub mod matcher;
pub mod orchestrator;
pub mod pkcs7;
pub mod processor;
pub mod signing;
pub mod ui;
pub mod verification;
pub mod zipalign;

pub const APP_NAME: &str = "ApkSignerust";
pub const APP_BIN_NAME: &str = "apksignerust";
pub const APP_VERSION: &str = "1.0.0";
pub const APP_AUTHOR: &str = "Tiash H Kabir / @MrCarb0n";
pub const APP_ABOUT: &str =
    "Discover, sign, zipalign and publish Android APKs as a build-pipeline step.";
pub const BUFFER_SIZE: usize = 64 * 1024;

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
