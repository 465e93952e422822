//! Collaborator contracts for the despacho dispatch system.
//!
//! The messaging provider, file storage, recipient directory, and session
//! credential store are external collaborators. This crate defines their
//! capability traits plus the filesystem-backed and in-memory
//! implementations the rest of the workspace wires in.

pub mod adapter;
pub mod close;
pub mod directory;
pub mod files;
pub mod session;
pub mod types;

pub use {
    adapter::{ProviderConnector, ProviderEvent, ProviderHandle},
    close::CloseClass,
    directory::{MemoryDirectory, RecipientDirectory},
    files::{FileStore, FsFileStore, MemoryFileStore},
    session::{FsSessionStore, MemorySessionStore, SessionStore},
    types::{FilePayload, RecipientRecord},
};
