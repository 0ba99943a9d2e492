//! Rate-limited dispatch of outbound CRM calls.
//!
//! Every remote call of every deployment goes through one shared
//! [`Dispatcher`], which keeps an independent fixed-window budget per
//! credential fingerprint.

mod dispatcher;
mod limiter;

pub use dispatcher::{DispatchOptions, DispatchStats, Dispatcher};
