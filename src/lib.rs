//! Server side of a chunked large-file upload protocol.
//!
//! Clients split a file into numbered chunks and send each as its own request.
//! The server stores chunks per session, detects completion against the
//! declared total size, reassembles the file exactly once, answers per-chunk
//! status queries, and reaps sessions that were abandoned.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
