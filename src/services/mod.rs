//! Upload core: capability probe, chunk storage, completion, assembly and
//! reaping, plus the `UploadService` that wires them together.

pub mod assembler;
pub mod chunk_store;
pub mod completion;
pub mod error;
pub mod probe;
pub mod reaper;
pub mod session_locks;
pub mod upload_service;
