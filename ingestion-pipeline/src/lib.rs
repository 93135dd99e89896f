#![allow(clippy::missing_docs_in_private_items)]

pub mod pipeline;
pub mod splitter;

pub use pipeline::{EmbeddingPipeline, IngestedFile};
pub use splitter::{ChunkSplitter, SplitterRegistry};
