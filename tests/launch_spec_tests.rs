mod common;

use common::{runtime, server};
use devserver_runner::config::{ContentKind, EntryKind, SdkClasspathEntry, VmInstall};
use devserver_runner::error::{Error, Result};
use devserver_runner::host::{LaunchMode, RuntimeClasspathEntry, VmSelection};
use devserver_runner::launch::{DEV_SERVER_MAIN, build_launch_spec};
use std::path::PathBuf;

fn paths(classpath: &[RuntimeClasspathEntry]) -> Vec<PathBuf> {
    classpath.iter().map(|entry| entry.path.clone()).collect()
}

#[test]
fn test_sdk_libraries_are_merged_by_path() -> Result<()> {
    let mut runtime = runtime("1.8.9");
    runtime.sdk.as_mut().unwrap().classpath = vec![
        SdkClasspathEntry::library("/a"),
        SdkClasspathEntry::library("/b"),
        SdkClasspathEntry {
            path: PathBuf::from("/c"),
            entry_kind: EntryKind::Library,
            content_kind: ContentKind::Source,
        },
    ];

    let spec = build_launch_spec(
        &server(8888),
        Some(&runtime),
        vec![RuntimeClasspathEntry::project("/a")],
    )?;

    assert_eq!(paths(&spec.classpath), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    // The host's entry wins over the SDK's archive for the same path.
    assert_eq!(spec.classpath[0], RuntimeClasspathEntry::project("/a"));
    Ok(())
}

#[test]
fn test_non_library_sdk_entries_are_skipped() -> Result<()> {
    let mut runtime = runtime("1.8.9");
    runtime.sdk.as_mut().unwrap().classpath = vec![
        SdkClasspathEntry {
            path: PathBuf::from("/sdk/var"),
            entry_kind: EntryKind::Variable,
            content_kind: ContentKind::Binary,
        },
        SdkClasspathEntry::library("/sdk/lib/tools.jar"),
    ];

    let spec = build_launch_spec(&server(8888), Some(&runtime), vec![])?;

    assert_eq!(paths(&spec.classpath), vec![PathBuf::from("/sdk/lib/tools.jar")]);
    Ok(())
}

#[test]
fn test_program_arguments() -> Result<()> {
    let spec = build_launch_spec(&server(8888), Some(&runtime("1.8.9")), vec![])?;

    assert_eq!(spec.main_type, DEV_SERVER_MAIN);
    assert_eq!(
        spec.program_arguments,
        vec!["--port=8888", "--disable_update_check", "/work/guestbook/war"]
    );
    assert_eq!(
        spec.program_arguments_line(),
        "--port=8888 --disable_update_check /work/guestbook/war"
    );
    assert_eq!(spec.working_directory, PathBuf::from("/work/guestbook/war"));
    Ok(())
}

#[test]
fn test_deploy_directory_is_always_last() -> Result<()> {
    for deploy in ["/srv/app", "/work/with space/war", "/x"] {
        let mut server = server(9000);
        server.deploy_directory = PathBuf::from(deploy);
        let spec = build_launch_spec(&server, Some(&runtime("1.9.0")), vec![])?;
        assert_eq!(spec.program_arguments.last().map(String::as_str), Some(deploy));
    }
    Ok(())
}

#[test]
fn test_auto_reload_argument_follows_sdk_version() -> Result<()> {
    let server = server(8888);

    for (version, expected) in [
        ("1.7.5", false),
        ("1.7.6", true),
        ("1.7.10", true),
        ("1.9.0", true),
        ("1.6", false),
    ] {
        let spec = build_launch_spec(&server, Some(&runtime(version)), vec![])?;
        assert_eq!(
            spec.vm_arguments.contains(&"-Dappengine.fullscan.seconds=5".to_string()),
            expected,
            "sdk version {}",
            version
        );
        assert_eq!(spec.vm_arguments[0], "-Xmx512m");
    }
    Ok(())
}

#[test]
fn test_auto_reload_needs_an_interval() -> Result<()> {
    let mut server = server(8888);
    server.auto_reload_seconds = None;

    let spec = build_launch_spec(&server, Some(&runtime("1.9.0")), vec![])?;

    assert_eq!(spec.vm_arguments, vec!["-Xmx512m"]);
    assert_eq!(spec.vm_arguments_line(), "-Xmx512m");
    Ok(())
}

#[test]
fn test_missing_runtime_or_sdk_is_a_configuration_error() {
    let result = build_launch_spec(&server(8888), None, vec![]);
    assert!(matches!(result, Err(Error::Configuration(_))));

    let mut runtime = runtime("1.8.9");
    runtime.sdk = None;
    let result = build_launch_spec(&server(8888), Some(&runtime), vec![]);
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_vm_selection() -> Result<()> {
    let spec = build_launch_spec(&server(8888), Some(&runtime("1.8.9")), vec![])?;
    assert_eq!(spec.vm, VmSelection::Default);

    let install = VmInstall {
        name: "jdk7".to_string(),
        home: PathBuf::from("/usr/lib/jvm/java-7"),
    };
    let mut runtime = runtime("1.8.9");
    runtime.vm = Some(install.clone());
    let spec = build_launch_spec(&server(8888), Some(&runtime), vec![])?;
    assert_eq!(spec.vm, VmSelection::Install(install));
    Ok(())
}

#[test]
fn test_launch_configuration_carries_mementos() -> Result<()> {
    let spec = build_launch_spec(
        &server(8888),
        Some(&runtime("1.8.9")),
        vec![RuntimeClasspathEntry::project("/work/guestbook/classes")],
    )?;

    let configuration = spec.to_launch_configuration(LaunchMode::Debug);

    assert_eq!(configuration.mode, LaunchMode::Debug);
    assert_eq!(configuration.program_arguments, spec.program_arguments);
    assert_eq!(configuration.classpath.len(), spec.classpath.len());
    let restored = configuration
        .classpath
        .iter()
        .map(|memento| RuntimeClasspathEntry::from_memento(memento))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(restored, spec.classpath);
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_unserializable_entries_are_dropped() -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let broken = PathBuf::from(OsStr::from_bytes(b"/work/\xff\xfe.jar"));
    let spec = build_launch_spec(
        &server(8888),
        Some(&runtime("1.8.9")),
        vec![
            RuntimeClasspathEntry::archive(broken),
            RuntimeClasspathEntry::project("/work/guestbook/classes"),
        ],
    )?;

    assert_eq!(
        paths(&spec.classpath),
        vec![
            PathBuf::from("/work/guestbook/classes"),
            PathBuf::from("/opt/appengine-java-sdk/lib/appengine-tools-api.jar"),
        ]
    );
    Ok(())
}

#[test]
fn test_spec_is_deterministic() -> Result<()> {
    let unresolved = vec![RuntimeClasspathEntry::project("/work/guestbook/classes")];
    let first = build_launch_spec(&server(8888), Some(&runtime("1.8.9")), unresolved.clone())?;
    let second = build_launch_spec(&server(8888), Some(&runtime("1.8.9")), unresolved)?;
    assert_eq!(first, second);
    Ok(())
}
