//! Core types and trait definitions for the LoopIn backup engine.
//!
//! This crate is deliberately free of database and filesystem dependencies.
//! The engine (`loopin-backup`) and the operator binary depend on it; it
//! depends on nothing proprietary.

pub mod artifact;
pub mod error;
pub mod metadata;
pub mod report;
pub mod retention;
pub mod session;
pub mod storage;

pub use error::{Error, Result};
