//! crmdeploy library
//!
//! Pushes a declared CRM configuration (property groups, properties,
//! pipelines and lifecycle stages) into a remote CRM account, with a shared
//! rate limiter, live progress and compensating rollback.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod dispatch;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod remote;
pub mod server;
pub mod storage;
pub mod templates;
pub mod utils;
pub mod workers;
