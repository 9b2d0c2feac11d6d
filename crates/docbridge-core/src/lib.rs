//! # docbridge core
//!
//! Shared, runtime-free logic for docbridge: the chunk data model, the
//! text chunker, the knowledge-base abstraction, the embedding trait,
//! and the two validators shared by the export and merge paths.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Storage
//! backends and collaborator adapters live in the `docbridge` app crate.

pub mod chunk;
pub mod embedding;
pub mod manifest;
pub mod models;
pub mod store;
pub mod validator;
