//! Launchpad - retrieval core for the startup-toolkit agents
//!
//! Turns text into embeddings, stores and searches them in a local flat index
//! or a Weaviate collection (optionally behind a managed query agent), and
//! migrates PostgreSQL corpus tables into Weaviate with checkpoint/resume.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexing;
pub mod migration;
pub mod retrieval;
pub mod signals;
pub mod store;

pub use error::{LaunchpadError, Result};
pub use retrieval::{Retrieval, RetrievedDoc, Retriever};
