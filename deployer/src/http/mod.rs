//! CRM REST API client

pub mod account;
pub mod client;
pub mod pipelines;
pub mod properties;

pub use client::HttpClient;
