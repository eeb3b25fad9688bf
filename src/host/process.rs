// src/host/process.rs
use super::{
    LaunchConfiguration, LaunchFacility, LaunchedProcess, RuntimeClasspathEntry, RuntimeEntryKind,
    Subscription, TerminationCallback, VmSelection,
};
use crate::config::VmInstall;
use crate::error::{Error, Result};
use async_process::{Child, Command, Stdio};
use async_trait::async_trait;
use futures::io::BufReader;
use futures::{AsyncBufReadExt, AsyncRead, StreamExt};
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Launch facility that runs the dev server in a local JVM.
///
/// The process is spawned with `async-process`; a watcher task owns the
/// child, kills it on request and publishes its exit on a watch channel.
/// Output is forwarded to `tracing` under the `devserver::output` target.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    /// VM used for [`VmSelection::Default`]; `java` on the `PATH` otherwise.
    default_vm: Option<VmInstall>,
    /// Classpath of the launch target, e.g. the application's class output.
    project_classpath: Vec<RuntimeClasspathEntry>,
}

impl ProcessLauncher {
    /// Create a launcher that uses `java` from the `PATH` by default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given installation when no VM is selected explicitly.
    pub fn with_default_vm(mut self, vm: VmInstall) -> Self {
        self.default_vm = Some(vm);
        self
    }

    /// Set the unresolved classpath reported for the launch target.
    pub fn with_project_classpath(mut self, entries: Vec<RuntimeClasspathEntry>) -> Self {
        self.project_classpath = entries;
        self
    }

    fn java_executable(&self, vm: &VmSelection) -> PathBuf {
        match vm {
            VmSelection::Install(install) => install.java_executable(),
            VmSelection::Default => self
                .default_vm
                .as_ref()
                .map(VmInstall::java_executable)
                .unwrap_or_else(|| PathBuf::from("java")),
        }
    }

    /// Resolve the executable and argument vector for a launch.
    pub fn command_line(&self, configuration: &LaunchConfiguration) -> Result<(PathBuf, Vec<OsString>)> {
        let mut paths = Vec::new();
        for memento in &configuration.classpath {
            let entry = RuntimeClasspathEntry::from_memento(memento)?;
            // The VM brings its own system library.
            if entry.kind != RuntimeEntryKind::Container {
                paths.push(entry.path);
            }
        }

        let mut args: Vec<OsString> = configuration
            .vm_arguments
            .iter()
            .map(OsString::from)
            .collect();

        if !paths.is_empty() {
            let classpath = std::env::join_paths(&paths)
                .map_err(|e| Error::Launch(format!("Invalid classpath: {}", e)))?;
            args.push("-cp".into());
            args.push(classpath);
        }

        args.push(configuration.main_type.clone().into());
        args.extend(configuration.program_arguments.iter().map(OsString::from));

        Ok((self.java_executable(&configuration.vm), args))
    }
}

#[async_trait]
impl LaunchFacility for ProcessLauncher {
    fn unresolved_classpath(&self) -> Result<Vec<RuntimeClasspathEntry>> {
        Ok(self.project_classpath.clone())
    }

    async fn launch(&self, configuration: LaunchConfiguration) -> Result<Box<dyn LaunchedProcess>> {
        let (program, args) = self.command_line(&configuration)?;
        tracing::debug!(program = %program.display(), ?args, "Spawning dev server");

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&configuration.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::Launch(format!("Failed to start {}: {}", program.display(), e)))?;

        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, pid, "stderr"));
        }

        let kill = CancellationToken::new();
        let (terminated_tx, terminated_rx) = watch::channel(false);
        tokio::spawn(watch_child(child, kill.clone(), terminated_tx));

        tracing::info!(pid, "Dev server process spawned");
        Ok(Box::new(SpawnedProcess {
            pid,
            kill,
            terminated: terminated_rx,
        }))
    }
}

/// Owns the child until it exits, killing it when asked to.
async fn watch_child(mut child: Child, kill: CancellationToken, terminated: watch::Sender<bool>) {
    let pid = child.id();
    let exited = tokio::select! {
        status = child.status() => Some(status),
        _ = kill.cancelled() => None,
    };

    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.kill() {
                tracing::warn!(pid, error = %e, "Failed to kill dev server process");
            }
            child.status().await
        }
    };

    match status {
        Ok(status) => tracing::info!(pid, %status, "Dev server process exited"),
        Err(e) => tracing::warn!(pid, error = %e, "Failed to collect dev server exit status"),
    }

    terminated.send_replace(true);
}

async fn forward_output<R>(stream: R, pid: u32, stream_name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => tracing::info!(target: "devserver::output", pid, stream = stream_name, "{}", line),
            Err(e) => {
                tracing::debug!(pid, stream = stream_name, error = %e, "Output stream closed");
                break;
            }
        }
    }
}

/// A process spawned by [`ProcessLauncher`].
struct SpawnedProcess {
    pid: u32,
    kill: CancellationToken,
    terminated: watch::Receiver<bool>,
}

impl LaunchedProcess for SpawnedProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    fn terminate(&self) -> Result<()> {
        self.kill.cancel();
        Ok(())
    }

    fn subscribe(&self, on_terminated: TerminationCallback) -> Box<dyn Subscription> {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut terminated = self.terminated.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                exited = terminated.wait_for(|done| *done) => {
                    // A closed channel means the watcher is gone without
                    // reporting, there is nothing to observe.
                    if exited.is_ok() {
                        drop(exited);
                        on_terminated();
                    }
                }
            }
        });

        Box::new(WatchSubscription { token })
    }
}

struct WatchSubscription {
    token: CancellationToken,
}

impl Subscription for WatchSubscription {
    fn unsubscribe(self: Box<Self>) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LaunchMode;

    fn configuration(classpath: Vec<String>) -> LaunchConfiguration {
        LaunchConfiguration {
            main_type: "com.example.Main".to_string(),
            program_arguments: vec!["--port=8080".to_string(), "/war".to_string()],
            vm_arguments: vec!["-Xmx512m".to_string()],
            classpath,
            vm: VmSelection::Default,
            working_directory: PathBuf::from("/war"),
            mode: LaunchMode::Run,
        }
    }

    #[test]
    fn test_command_line_order() {
        let classpath = vec![
            RuntimeClasspathEntry::container("JRE_CONTAINER").memento().unwrap(),
            RuntimeClasspathEntry::archive("/sdk/a.jar").memento().unwrap(),
        ];
        let (program, args) = ProcessLauncher::new()
            .command_line(&configuration(classpath))
            .unwrap();

        assert_eq!(program, PathBuf::from("java"));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec!["-Xmx512m", "-cp", "/sdk/a.jar", "com.example.Main", "--port=8080", "/war"]
        );
    }

    #[test]
    fn test_selected_vm_wins_over_default() {
        let launcher = ProcessLauncher::new().with_default_vm(VmInstall {
            name: "default".to_string(),
            home: PathBuf::from("/jvm/default"),
        });
        let mut config = configuration(vec![]);
        assert_eq!(
            launcher.command_line(&config).unwrap().0,
            VmInstall {
                name: "default".to_string(),
                home: PathBuf::from("/jvm/default"),
            }
            .java_executable()
        );

        let chosen = VmInstall {
            name: "jdk7".to_string(),
            home: PathBuf::from("/jvm/jdk7"),
        };
        config.vm = VmSelection::Install(chosen.clone());
        assert_eq!(launcher.command_line(&config).unwrap().0, chosen.java_executable());
    }

    #[test]
    fn test_bad_memento_is_rejected() {
        let result = ProcessLauncher::new().command_line(&configuration(vec!["{".to_string()]));
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
