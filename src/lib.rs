pub mod config;
pub mod error;
pub mod hierarchy;
pub mod indicators;
pub mod infra;
pub mod output;
pub mod publish;
pub mod services;
pub mod session;
pub mod snapshot;
pub mod submission;
