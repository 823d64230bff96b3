#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod api;
mod config;
mod server;

pub use config::Config;
pub use server::InstanceStateServer;
