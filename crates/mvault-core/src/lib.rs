//! mvault-core: types, configuration and error taxonomy shared by every
//! mediavault crate.

pub mod config;
pub mod error;
pub mod types;

pub use error::{VaultError, VaultResult};
