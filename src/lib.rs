//! # docbridge
//!
//! Incremental document processing with export/merge sync between a
//! primary machine and a replica.
//!
//! The primary watches folders, turns new and modified files into
//! embedded chunks, and records what it processed. Export packages carry
//! either a full snapshot or only the files processed since a timestamp;
//! the replica merges them with a "newer wins, whole file" policy.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Watched    │──▶│ Orchestrator │──▶│ Knowledge base│
//! │  folders    │   │ extract+embed│   │   + state     │
//! └─────────────┘   └──────────────┘   └──────┬────────┘
//!                                             │ export
//!                                             ▼
//!                                      ┌─────────────┐   merge   ┌─────────┐
//!                                      │   Package   │──────────▶│ Replica │
//!                                      └─────────────┘           └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docbridge init
//! docbridge owner add alice
//! docbridge folder add ~/Documents/receipts --owner alice
//! docbridge process
//! docbridge export --output ./exports --incremental --since 2026-01-01
//! docbridge merge ./exports/docbridge_incremental_20260102_080000   # on the replica
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`state`] | Owners, watched folders, processed-file records |
//! | [`tracker`] | New / modified / unchanged classification |
//! | [`orchestrator`] | Scan, extract, embed, store, commit |
//! | [`sqlite_kb`] | SQLite-backed knowledge base |
//! | [`export`] | Full and incremental export packages |
//! | [`merge`] | Merging packages into a replica |
//! | [`monitor`] | Periodic resource logging |
//! | [`services`] | Composition root |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod export;
pub mod extract;
pub mod fields;
pub mod fsutil;
pub mod http;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod progress;
pub mod replica;
pub mod scanner;
pub mod services;
pub mod sqlite_kb;
pub mod state;
pub mod stats;
pub mod tracker;
pub mod traits;
pub mod vision;
