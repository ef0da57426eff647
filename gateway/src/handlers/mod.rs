pub mod chat;
pub mod common;
pub mod embeddings;
pub mod models;
pub mod transcriptions;
pub mod unstructured;
