//! # CatalogRAG
//!
//! Retrieval-augmented product-catalogue assistant library: catalogue
//! ingestion, vector index build and atomic install, rate-limited model
//! access, and the multi-stage chat pipeline with durable per-session
//! history.
//!
//! The binary front end (Telegram long polling) lives in the companion
//! `catalograg-bot` crate; everything here is transport-agnostic.

pub mod catalogue;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod history;
pub mod index;
pub mod install;
pub mod prompt;
pub mod prompts;
pub mod providers;
pub mod storage;

pub use coordinator::{KnowledgeBase, UpdateReport};
pub use engine::{ChatEngine, KnowledgeService};
pub use errors::{KbError, ProviderError};
pub use gateway::{ModelGateway, RateLimiter};
pub use index::{Retriever, VectorIndex};
pub use install::{IndexMetadata, KbPaths};
pub use storage::SqliteProvider;
