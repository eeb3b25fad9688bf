//! Contracts with the hosting environment.
//!
//! The controller never looks up host capabilities at runtime. Everything it
//! needs is injected as a typed reference:
//!
//! * [`LaunchFacility`] turns a [`LaunchConfiguration`] into a running process
//! * [`LaunchedProcess`] is the opaque handle to that process
//! * [`Subscription`] is a registered termination observer, removed by
//!   consuming it
//!
//! [`ProcessLauncher`] is the stock facility that spawns a local JVM.

mod process;

pub use process::ProcessLauncher;

use crate::config::VmInstall;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the server process is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    #[default]
    Run,
    Debug,
}

/// Which VM runs the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmSelection {
    /// Whatever the host considers its default VM.
    Default,
    /// A specific installation.
    Install(VmInstall),
}

/// Kind of a runtime classpath entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEntryKind {
    /// A jar or class folder.
    Archive,
    /// Output of a project in the host workspace.
    Project,
    /// A container resolved by the host, such as the JRE system library.
    Container,
}

/// One entry of a runtime classpath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeClasspathEntry {
    pub kind: RuntimeEntryKind,
    pub path: PathBuf,
}

impl RuntimeClasspathEntry {
    /// A jar or class folder entry.
    pub fn archive(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RuntimeEntryKind::Archive,
            path: path.into(),
        }
    }

    /// A project output entry.
    pub fn project(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RuntimeEntryKind::Project,
            path: path.into(),
        }
    }

    /// A host-resolved container entry.
    pub fn container(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RuntimeEntryKind::Container,
            path: path.into(),
        }
    }

    /// Serialize this entry into the host's persisted form.
    ///
    /// Fails for paths that are not valid UTF-8.
    pub fn memento(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::Serialization(format!(
                "Could not create memento for classpath entry {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Restore an entry from its memento.
    pub fn from_memento(memento: &str) -> Result<Self> {
        serde_json::from_str(memento).map_err(|e| {
            Error::Serialization(format!("Invalid classpath memento '{}': {}", memento, e))
        })
    }
}

/// Everything the launch facility needs to create the server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfiguration {
    /// Fully qualified main class.
    pub main_type: String,
    /// Program arguments, in order.
    pub program_arguments: Vec<String>,
    /// VM arguments, in order.
    pub vm_arguments: Vec<String>,
    /// Classpath entry mementos, see [`RuntimeClasspathEntry::memento`].
    pub classpath: Vec<String>,
    /// VM to run.
    pub vm: VmSelection,
    /// Working directory of the process.
    pub working_directory: PathBuf,
    /// Run or debug.
    pub mode: LaunchMode,
}

/// Called once when the observed process terminates.
pub type TerminationCallback = Box<dyn FnOnce() + Send + 'static>;

/// A registered termination observer.
pub trait Subscription: Send {
    /// Remove the observer. Consuming the box makes a second removal
    /// impossible.
    fn unsubscribe(self: Box<Self>);
}

/// Handle to a launched server process.
pub trait LaunchedProcess: Send + Sync {
    /// OS process id, when the host knows it.
    fn pid(&self) -> Option<u32>;

    /// Whether the process has exited.
    fn is_terminated(&self) -> bool;

    /// Ask the process to terminate. Must not block on the exit.
    fn terminate(&self) -> Result<()>;

    /// Register an observer for process termination.
    ///
    /// The callback is delivered on a notification task, never from inside
    /// `subscribe` itself. If the process has already exited the callback
    /// still fires, shortly after registration.
    fn subscribe(&self, on_terminated: TerminationCallback) -> Box<dyn Subscription>;
}

/// The host's process launching facility.
#[async_trait]
pub trait LaunchFacility: Send + Sync {
    /// The host's unresolved runtime classpath for the launch target.
    fn unresolved_classpath(&self) -> Result<Vec<RuntimeClasspathEntry>>;

    /// Launch a process for the given configuration.
    async fn launch(&self, configuration: LaunchConfiguration) -> Result<Box<dyn LaunchedProcess>>;
}
