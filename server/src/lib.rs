pub mod app;
pub mod config;
pub mod error;
pub mod leads;
pub mod notifier;
pub mod replies;
pub mod store;
pub mod types;
pub mod webhook;
pub mod workflow;
