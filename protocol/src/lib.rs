// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ptm-resync: Private Transaction Resynchronization
//!
//! The anti-entropy subsystem of a private transaction manager node. Nodes
//! hold encrypted payloads that every entitled party must eventually hold
//! too; this crate repairs drift between them.
//!
//! A node asked to resend walks its primary store and republishes, to one
//! peer, every view of every transaction that peer may see. A node receiving
//! such pushes stages them, orders them by dependency depth, and commits
//! them without re-entering resend.
//!
//! ## Architecture
//!
//! - **config**: Constants and the runtime [`config::ResyncConfig`].
//! - **crypto**: X25519 keys, SHA-512 message hashes, AES-256-GCM boxes.
//! - **payload**: The payload structure and its codec.
//! - **enclave**: Owned keys and payload decryption.
//! - **storage**: sled-backed primary store and staging area.
//! - **resend**: The orchestrator and its commit path.
//!
//! Every collaborator of the orchestrator is a trait with a bundled
//! implementation, so the whole pipeline runs in-process for tests.

pub mod config;
pub mod crypto;
pub mod enclave;
pub mod payload;
pub mod resend;
pub mod storage;
