pub mod autosave;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod git_backend;
pub mod hosting;
pub mod logger;
pub mod message;
pub mod naming;
pub mod projects;
pub mod reconcile;
pub mod repo_status;
pub mod retry;
pub mod vcs;

pub use error::{Error, Result};
