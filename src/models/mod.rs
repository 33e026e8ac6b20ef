//! Data models for the chunked upload service.
//!
//! `upload` holds what a client declares with every chunk request; `chunk`
//! holds what the server keeps and reports about individual chunks.

pub mod chunk;
pub mod upload;
