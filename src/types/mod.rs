//! Shared types

pub mod error;

pub use error::{BgSaveError, Result};
