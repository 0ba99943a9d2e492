//! Background workers

pub mod recovery;
