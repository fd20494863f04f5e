//! JSON file storage backend.
//!
//! The whole database is one JSON document holding an array of podcasts with
//! their episodes and transcript links nested inside. Suited to a single user
//! on a single machine; concurrent writers in separate processes race.

mod document;
mod json_store;

pub use json_store::JsonFileRepository;
