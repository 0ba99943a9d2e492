//! Unit tests for crmdeploy

mod common;
mod test_crm_client;
mod test_dispatcher;
mod test_fsm;
mod test_scenarios;
mod test_server;
