//! Report models returned by the HostKit deploy engine

pub mod models;

pub use models::*;
