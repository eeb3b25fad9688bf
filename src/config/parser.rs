use crate::error::{Error, Result};
use crate::ports::PortCheckConfig;
use crate::prober::ProberConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_host() -> String {
    "localhost".to_string()
}

fn default_protocol() -> String {
    "http".to_string()
}

/// A single protocol-tagged port declared by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPort {
    /// Display name of the port, e.g. "HTTP".
    #[serde(default)]
    pub name: String,

    /// TCP port number.
    pub port: u16,

    /// Protocol spoken on the port.
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

impl ServerPort {
    /// Create an HTTP port with the given number.
    pub fn http(port: u16) -> Self {
        Self {
            name: "HTTP".to_string(),
            port,
            protocol: default_protocol(),
        }
    }
}

impl std::fmt::Display for ServerPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{} ({})", self.port, self.protocol)
        } else {
            write!(f, "{} {} ({})", self.name, self.port, self.protocol)
        }
    }
}

/// Logical description of a dev server instance.
///
/// The controller takes a private copy at construction time, so the
/// configuration cannot change underneath a running launch.
///
/// # Examples
///
/// ```
/// use devserver_runner::config::{ServerConfig, ServerPort};
/// use std::path::PathBuf;
///
/// let server = ServerConfig {
///     host: "localhost".to_string(),
///     ports: vec![ServerPort::http(8888)],
///     deploy_directory: PathBuf::from("/work/guestbook/war"),
///     auto_reload_seconds: Some(5),
///     state_directory: PathBuf::from("/work/.state/guestbook"),
/// };
/// assert_eq!(server.primary_port(), Some(8888));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host name the server is reachable on.
    #[serde(default = "default_host")]
    pub host: String,

    /// Declared ports. The first one is the primary port handed to the
    /// dev server and probed for startup.
    pub ports: Vec<ServerPort>,

    /// Exploded application directory served by the dev server.
    pub deploy_directory: PathBuf,

    /// Interval for the SDK's class-change full scan, in seconds.
    #[serde(default)]
    pub auto_reload_seconds: Option<u32>,

    /// Per-server directory for runtime and publish data.
    pub state_directory: PathBuf,
}

impl ServerConfig {
    /// The port passed on the command line and used for probing.
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.first().map(|p| p.port)
    }
}

/// A Java VM installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInstall {
    /// Name the host shows for this installation.
    pub name: String,

    /// Installation home; the launcher runs `<home>/bin/java`.
    pub home: PathBuf,
}

impl VmInstall {
    /// Path of the `java` executable inside this installation.
    pub fn java_executable(&self) -> PathBuf {
        let exe = if cfg!(windows) { "java.exe" } else { "java" };
        self.home.join("bin").join(exe)
    }
}

/// Kind of an SDK classpath entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Library,
    Project,
    Source,
    Variable,
    Container,
}

/// Content kind of an SDK classpath entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Binary,
    Source,
}

/// A classpath entry contributed by the SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkClasspathEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub entry_kind: EntryKind,
    #[serde(default)]
    pub content_kind: ContentKind,
}

impl SdkClasspathEntry {
    /// Binary library archive, the only kind put on the dev server classpath.
    pub fn library(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entry_kind: EntryKind::Library,
            content_kind: ContentKind::Binary,
        }
    }

    /// Whether this entry belongs on a runtime classpath.
    pub fn is_binary_library(&self) -> bool {
        self.entry_kind == EntryKind::Library && self.content_kind == ContentKind::Binary
    }
}

/// The App Engine SDK bound to a runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkConfig {
    /// Dotted SDK version, e.g. "1.8.9".
    pub version: String,

    /// SDK installation directory.
    pub location: PathBuf,

    /// Classpath entries the SDK contributes.
    #[serde(default)]
    pub classpath: Vec<SdkClasspathEntry>,
}

impl SdkConfig {
    /// Reports why the SDK cannot be used, if it cannot.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::Configuration(
                "App Engine SDK version is unknown".to_string(),
            ));
        }
        if self.location.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "App Engine SDK location is not set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runtime bound to the server: VM, SDK and default VM arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// VM to launch with; the host default is used when absent.
    #[serde(default)]
    pub vm: Option<VmInstall>,

    /// SDK providing the dev server classes.
    #[serde(default)]
    pub sdk: Option<SdkConfig>,

    /// VM arguments every launch starts with.
    #[serde(default)]
    pub default_vm_arguments: Vec<String>,
}

impl RuntimeConfig {
    /// Returns the bound SDK if it is present and valid.
    pub fn sdk(&self) -> Result<&SdkConfig> {
        let sdk = self.sdk.as_ref().ok_or_else(|| {
            Error::Configuration("App Engine SDK is missing or invalid.".to_string())
        })?;
        sdk.validate()?;
        Ok(sdk)
    }
}

/// Main configuration for a dev server controller.
///
/// # JSON Schema
///
/// ```json
/// {
///   "server": {
///     "host": "localhost",
///     "ports": [{ "name": "HTTP", "port": 8888, "protocol": "http" }],
///     "deployDirectory": "/work/guestbook/war",
///     "autoReloadSeconds": 5,
///     "stateDirectory": "/work/.state/guestbook"
///   },
///   "runtime": {
///     "vm": { "name": "jdk7", "home": "/usr/lib/jvm/java-7" },
///     "sdk": {
///       "version": "1.8.9",
///       "location": "/opt/appengine-java-sdk",
///       "classpath": [{ "path": "/opt/appengine-java-sdk/lib/appengine-tools-api.jar" }]
///     },
///     "defaultVmArguments": ["-Xmx512m"]
///   },
///   "prober": { "initialDelay": "2s", "interval": "250ms" },
///   "portCheck": { "attempts": 5, "interval": "200ms" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// The server definition.
    pub server: ServerConfig,

    /// Bound runtime, if any. A server without a runtime cannot start.
    #[serde(default)]
    pub runtime: Option<RuntimeConfig>,

    /// Startup probing policy.
    #[serde(default)]
    pub prober: ProberConfig,

    /// Port availability checking policy.
    #[serde(default)]
    pub port_check: PortCheckConfig,
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The string is not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }
}
