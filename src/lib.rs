#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::similar_names
)]

pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod format;
pub mod locks;
pub mod logger;
pub mod ops;
pub mod progress;
pub mod remote;
pub mod stats;
pub mod store;
pub mod task;
