//! Launch specification for the dev server.
//!
//! A [`LaunchSpec`] is computed once per start attempt from the server
//! definition, the bound runtime and the host's unresolved classpath. It is
//! deterministic: the same inputs always give the same spec.

use crate::config::{RuntimeConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::host::{LaunchConfiguration, LaunchMode, RuntimeClasspathEntry, VmSelection};
use std::cmp::Ordering;
use std::path::PathBuf;

/// Main class of the SDK's development server.
pub const DEV_SERVER_MAIN: &str = "com.google.appengine.tools.development.DevAppServerMain";

/// First SDK release that honours the full-scan reload property.
pub const MIN_SDK_VERSION_USING_AUTORELOAD: &str = "1.7.6";

const ARG_PORT: &str = "--port=";
const ARG_DISABLE_UPDATE_CHECK: &str = "--disable_update_check";
const ARG_ENABLE_AUTO_RELOAD: &str = "-Dappengine.fullscan.seconds=";

/// Fully resolved process-creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Entry point class.
    pub main_type: String,
    /// Program arguments; the deploy directory is always last.
    pub program_arguments: Vec<String>,
    /// VM arguments.
    pub vm_arguments: Vec<String>,
    /// Classpath, unique by path, in first-seen order.
    pub classpath: Vec<RuntimeClasspathEntry>,
    /// Working directory.
    pub working_directory: PathBuf,
    /// VM to launch.
    pub vm: VmSelection,
}

impl LaunchSpec {
    /// Program arguments joined the way the host displays them.
    pub fn program_arguments_line(&self) -> String {
        merge_args(&self.program_arguments)
    }

    /// VM arguments joined the way the host displays them.
    pub fn vm_arguments_line(&self) -> String {
        merge_args(&self.vm_arguments)
    }

    /// Convert into the host-level launch configuration.
    pub fn to_launch_configuration(&self, mode: LaunchMode) -> LaunchConfiguration {
        LaunchConfiguration {
            main_type: self.main_type.clone(),
            program_arguments: self.program_arguments.clone(),
            vm_arguments: self.vm_arguments.clone(),
            classpath: self
                .classpath
                .iter()
                .filter_map(|entry| entry.memento().ok())
                .collect(),
            vm: self.vm.clone(),
            working_directory: self.working_directory.clone(),
            mode,
        }
    }
}

fn merge_args(args: &[String]) -> String {
    let mut merged = String::new();
    for arg in args.iter().filter(|a| !a.is_empty()) {
        if !merged.is_empty() && !merged.ends_with(' ') {
            merged.push(' ');
        }
        merged.push_str(arg);
    }
    merged
}

/// Compare two dotted version strings, e.g. "1.7.10" > "1.7.6".
///
/// Components are compared numerically when both are numbers and as text
/// otherwise; missing trailing components count as zero.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let mut left_parts = left.trim().split('.');
    let mut right_parts = right.trim().split('.');
    loop {
        let (l, r) = match (left_parts.next(), right_parts.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => (l.unwrap_or("0"), r.unwrap_or("0")),
        };
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

/// Program arguments for the dev server, deploy directory last.
pub fn program_arguments(server: &ServerConfig) -> Result<Vec<String>> {
    let port = server
        .primary_port()
        .ok_or_else(|| Error::ConfigInvalid("Server declares no ports".to_string()))?;

    Ok(vec![
        format!("{}{}", ARG_PORT, port),
        // TODO: expose the update check as a server option.
        ARG_DISABLE_UPDATE_CHECK.to_string(),
        // Parsed positionally by the dev server, must stay the last argument.
        server.deploy_directory.display().to_string(),
    ])
}

/// VM arguments: runtime defaults plus auto-reload when the SDK supports it.
pub fn vm_arguments(server: &ServerConfig, runtime: &RuntimeConfig) -> Result<Vec<String>> {
    let sdk = runtime.sdk()?;
    let mut args: Vec<String> = runtime
        .default_vm_arguments
        .iter()
        .filter(|a| !a.trim().is_empty())
        .cloned()
        .collect();

    if let Some(seconds) = server.auto_reload_seconds
        && compare_versions(&sdk.version, MIN_SDK_VERSION_USING_AUTORELOAD) != Ordering::Less
    {
        args.push(format!("{}{}", ARG_ENABLE_AUTO_RELOAD, seconds));
    }

    Ok(args)
}

/// Append `entry` unless an entry with the same path is already present.
fn merge_classpath(classpath: &mut Vec<RuntimeClasspathEntry>, entry: RuntimeClasspathEntry) {
    if classpath.iter().any(|existing| existing.path == entry.path) {
        return;
    }
    classpath.push(entry);
}

/// Runtime classpath: the host's entries, then the SDK's binary libraries.
///
/// Entries that cannot be stored as a host memento are dropped with a
/// warning instead of failing the launch.
pub fn runtime_classpath(
    runtime: &RuntimeConfig,
    unresolved: Vec<RuntimeClasspathEntry>,
) -> Result<Vec<RuntimeClasspathEntry>> {
    let sdk = runtime.sdk()?;
    let mut classpath = unresolved;

    for sdk_entry in sdk.classpath.iter().filter(|e| e.is_binary_library()) {
        merge_classpath(
            &mut classpath,
            RuntimeClasspathEntry::archive(sdk_entry.path.clone()),
        );
    }

    classpath.retain(|entry| match entry.memento() {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(path = %entry.path.display(), error = %e, "Could not resolve classpath entry");
            false
        }
    });

    Ok(classpath)
}

/// Build the launch spec for one start attempt.
///
/// # Errors
///
/// * [`Error::Configuration`] if no runtime or no valid SDK is bound
/// * [`Error::ConfigInvalid`] if the server declares no ports
pub fn build_launch_spec(
    server: &ServerConfig,
    runtime: Option<&RuntimeConfig>,
    unresolved_classpath: Vec<RuntimeClasspathEntry>,
) -> Result<LaunchSpec> {
    let runtime = runtime.ok_or_else(|| {
        Error::Configuration("App Engine Server is misconfigured or invalid.".to_string())
    })?;
    runtime.sdk()?;

    let spec = LaunchSpec {
        main_type: DEV_SERVER_MAIN.to_string(),
        program_arguments: program_arguments(server)?,
        vm_arguments: vm_arguments(server, runtime)?,
        classpath: runtime_classpath(runtime, unresolved_classpath)?,
        working_directory: server.deploy_directory.clone(),
        vm: runtime
            .vm
            .clone()
            .map(VmSelection::Install)
            .unwrap_or(VmSelection::Default),
    };

    tracing::debug!(
        program_arguments = %spec.program_arguments_line(),
        vm_arguments = %spec.vm_arguments_line(),
        classpath_entries = spec.classpath.len(),
        "Built launch spec"
    );
    Ok(spec)
}
