//! Configuration module for the dev server runner.
//!
//! This module handles parsing, validation, and access to the server
//! definition, the bound runtime and the supervision policies. It supports
//! loading configurations from files or strings in JSON format.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use devserver_runner::config::Config;
//!
//! let config = Config::from_file("devserver.json").unwrap();
//! println!("Primary port: {:?}", config.server.primary_port());
//! ```
mod duration;
mod parser;
pub mod validator;

pub use duration::{format_duration, parse_duration_string, serde_duration};
pub use parser::{
    Config, ContentKind, EntryKind, RuntimeConfig, SdkClasspathEntry, SdkConfig, ServerConfig,
    ServerPort, VmInstall,
};
pub use validator::validate_config;
