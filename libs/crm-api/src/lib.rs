//! Wire models for the remote CRM REST API

pub mod models;

pub use models::*;
