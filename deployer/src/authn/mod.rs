//! Credential handling

pub mod credential;

pub use credential::{Credential, CredentialKey};
