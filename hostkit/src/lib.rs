//! HostKit Library
//!
//! Deployment and release orchestration for projects hosted on a single
//! machine: versioned releases behind an atomically swapped pointer,
//! rollback, rate limiting, auto-pause and post-deploy validation.

pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod ledger;
pub mod logs;
pub mod services;
pub mod storage;
pub mod utils;
