/// Error handling module for the dev server runner.
///
/// This module defines the error types used throughout the library.
/// Only a handful of them ever reach the caller of
/// [`ServerController::start`](crate::ServerController::start); most
/// failures during supervision are logged and recovered locally.
///
/// # Example
///
/// ```
/// use devserver_runner::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Server launched"),
///         Err(Error::PortUnavailable(port)) => println!("Port {} is already taken", port),
///         Err(Error::Configuration(msg)) => println!("Fix the runtime binding: {}", msg),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use thiserror::Error;

/// Errors that can occur in the devserver-runner library.
///
/// Each variant includes context information to help diagnose and handle
/// the error appropriately.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration JSON is malformed
    /// - Required fields are missing
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration is valid JSON but contains invalid values.
    ///
    /// This error occurs when:
    /// - The server declares no ports, or a port of 0
    /// - The host name is empty
    /// - The deploy directory is not an absolute path
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The server cannot be launched with its current runtime binding.
    ///
    /// This error occurs when:
    /// - No runtime is bound to the server
    /// - The bound runtime has no SDK, or the SDK is invalid
    #[error("Server is misconfigured: {0}")]
    Configuration(String),

    /// A declared server port is already bound by another process.
    #[error("Cannot start server, port {0} is not available")]
    PortUnavailable(u16),

    /// The launch facility rejected the launch configuration.
    ///
    /// This error occurs when:
    /// - The VM executable cannot be spawned
    /// - The server was stopped while the launch was in flight
    #[error("Failed to launch server: {0}")]
    Launch(String),

    /// Error in serializing or deserializing data.
    ///
    /// This error occurs when:
    /// - A classpath entry cannot be turned into a host memento
    /// - A memento cannot be read back
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A startup probe could not be issued.
    ///
    /// Probe errors never abort a start; the prober treats them as
    /// "not ready yet".
    #[error("Probe error: {0}")]
    Probe(String),

    /// The server is already running.
    ///
    /// This error occurs when:
    /// - Attempting to start a server whose state is not stopped
    #[error("Already running")]
    AlreadyRunning,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for devserver-runner operations.
pub type Result<T> = std::result::Result<T, Error>;
