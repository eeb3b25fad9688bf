// Shared fakes for the integration tests. Each test crate uses a different
// subset of these helpers.
#![allow(dead_code, unused_imports)]

use async_trait::async_trait;
use devserver_runner::config::{
    Config, ContentKind, EntryKind, RuntimeConfig, SdkClasspathEntry, SdkConfig, ServerConfig,
    ServerPort,
};
use devserver_runner::error::{Error, Result};
use devserver_runner::host::{
    LaunchConfiguration, LaunchFacility, LaunchedProcess, RuntimeClasspathEntry, Subscription,
    TerminationCallback,
};
use devserver_runner::ports::PortCheckConfig;
use devserver_runner::prober::{Probe, ProberConfig};
use std::net::{Ipv4Addr, TcpListener};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// A port nobody listens on right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

pub fn sdk(version: &str) -> SdkConfig {
    SdkConfig {
        version: version.to_string(),
        location: PathBuf::from("/opt/appengine-java-sdk"),
        classpath: vec![
            SdkClasspathEntry::library("/opt/appengine-java-sdk/lib/appengine-tools-api.jar"),
            SdkClasspathEntry {
                path: PathBuf::from("/opt/appengine-java-sdk/src"),
                entry_kind: EntryKind::Library,
                content_kind: ContentKind::Source,
            },
        ],
    }
}

pub fn runtime(version: &str) -> RuntimeConfig {
    RuntimeConfig {
        vm: None,
        sdk: Some(sdk(version)),
        default_vm_arguments: vec!["-Xmx512m".to_string()],
    }
}

pub fn server(port: u16) -> ServerConfig {
    ServerConfig {
        host: "localhost".to_string(),
        ports: vec![ServerPort::http(port)],
        deploy_directory: PathBuf::from("/work/guestbook/war"),
        auto_reload_seconds: Some(5),
        state_directory: PathBuf::from("/work/.state/guestbook"),
    }
}

/// Fast-polling configuration bound to a free port.
pub fn test_config() -> Config {
    Config {
        server: server(free_port()),
        runtime: Some(runtime("1.8.9")),
        prober: ProberConfig {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(10),
            max_attempts: None,
            request_timeout: Duration::from_millis(100),
            ..ProberConfig::default()
        },
        port_check: PortCheckConfig {
            attempts: 1,
            interval: Duration::from_millis(1),
        },
    }
}

/// Observable side of a fake process.
#[derive(Default)]
pub struct ProcessRecord {
    pub terminated: AtomicBool,
    pub terminate_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    pub unsubscribe_calls: AtomicUsize,
    observer: Mutex<Option<TerminationCallback>>,
}

impl ProcessRecord {
    /// The process exits; registered observers hear about it.
    pub fn exit(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        let observer = self.observer.lock().unwrap().take();
        if let Some(observer) = observer {
            observer();
        }
    }

    pub fn has_observer(&self) -> bool {
        self.observer.lock().unwrap().is_some()
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }
}

struct FakeProcess {
    record: Arc<ProcessRecord>,
}

impl LaunchedProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn is_terminated(&self) -> bool {
        self.record.terminated.load(Ordering::SeqCst)
    }

    fn terminate(&self) -> Result<()> {
        self.record.terminate_calls.fetch_add(1, Ordering::SeqCst);
        // Like a real host, killing the process produces a termination event.
        self.record.exit();
        Ok(())
    }

    fn subscribe(&self, on_terminated: TerminationCallback) -> Box<dyn Subscription> {
        self.record.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.record.observer.lock().unwrap() = Some(on_terminated);
        Box::new(FakeSubscription {
            record: Arc::clone(&self.record),
        })
    }
}

struct FakeSubscription {
    record: Arc<ProcessRecord>,
}

impl Subscription for FakeSubscription {
    fn unsubscribe(self: Box<Self>) {
        self.record.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.record.observer.lock().unwrap().take();
    }
}

/// Launch facility that records launches and hands out fake processes.
#[derive(Default)]
pub struct RecordingLauncher {
    pub classpath: Vec<RuntimeClasspathEntry>,
    pub fail: bool,
    pub launch_delay: Option<Duration>,
    launches: Mutex<Vec<LaunchConfiguration>>,
    processes: Mutex<Vec<Arc<ProcessRecord>>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A launcher whose launches take `delay` to complete.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            launch_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn launches(&self) -> Vec<LaunchConfiguration> {
        self.launches.lock().unwrap().clone()
    }

    pub fn process(&self, index: usize) -> Arc<ProcessRecord> {
        Arc::clone(&self.processes.lock().unwrap()[index])
    }

    pub fn process_count(&self) -> usize {
        self.processes.lock().unwrap().len()
    }
}

#[async_trait]
impl LaunchFacility for RecordingLauncher {
    fn unresolved_classpath(&self) -> Result<Vec<RuntimeClasspathEntry>> {
        Ok(self.classpath.clone())
    }

    async fn launch(&self, configuration: LaunchConfiguration) -> Result<Box<dyn LaunchedProcess>> {
        self.launches.lock().unwrap().push(configuration);
        if self.fail {
            return Err(Error::Launch("java executable not found".to_string()));
        }
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }
        let record = Arc::new(ProcessRecord::default());
        self.processes.lock().unwrap().push(Arc::clone(&record));
        Ok(Box::new(FakeProcess { record }))
    }
}

/// Probe that fails until it is opened.
#[derive(Default)]
pub struct GateProbe {
    open: AtomicBool,
    pub calls: AtomicUsize,
}

impl GateProbe {
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for GateProbe {
    async fn probe(&self, _url: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Probe("connection refused".to_string()))
        }
    }
}

/// Tracing layer counting events with a given message.
#[derive(Clone)]
pub struct EventCounter {
    message: &'static str,
    count: Arc<AtomicUsize>,
}

impl EventCounter {
    pub fn new(message: &'static str) -> Self {
        Self {
            message,
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// A dispatcher that feeds this counter, for `tracing::dispatcher::with_default`.
    pub fn dispatch(&self) -> Dispatch {
        Dispatch::new(tracing_subscriber::registry().with(self.clone()))
    }
}

struct MessageMatch<'a> {
    expected: &'a str,
    matched: bool,
}

impl Visit for MessageMatch<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" && format!("{:?}", value) == self.expected {
            self.matched = true;
        }
    }
}

impl<S: Subscriber> Layer<S> for EventCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageMatch {
            expected: self.message,
            matched: false,
        };
        event.record(&mut visitor);
        if visitor.matched {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}
