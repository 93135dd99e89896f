#![allow(clippy::missing_docs_in_private_items)]

pub mod service;
pub mod types;

pub use service::VectorStoreService;
pub use types::{
    ChunkingStrategy, CreateVectorStoreOutcome, CreateVectorStoreParams, ExpiresAfter,
    FileIngestFailure, UpdateVectorStoreParams, VectorStore, VectorStoreFile,
};
