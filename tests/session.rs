//! End-to-end session tests against a scripted host application.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clprobe::{DebugError, DebugSession, Value};

const KERNEL: &str = r#"__kernel void vadd(__global float* a) {
    int i = 0;
    float f = 14.31f;
    i = i + 1;
}
"#;

fn write_kernel(dir: &Path) -> PathBuf {
    let path = dir.join("vadd.cl");
    std::fs::write(&path, KERNEL).unwrap();
    path
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[tokio::test]
async fn decodes_variables_for_each_thread_in_request_order() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_kernel(dir.path());
    let app = write_script(
        dir.path(),
        "app",
        r#"echo "platform: fake"
echo "__clprobe_debug__"
echo "i 2a "
echo "f 3.5 "
echo "i 7 "
echo "f 1.25 "
"#,
    );

    let vars = DebugSession::new(&kernel, &app)
        .run(4, &[2, 0])
        .await
        .unwrap();

    assert_eq!(vars.len(), 4);
    assert_eq!(vars[0].gid, Some(2));
    assert_eq!(vars[0].decl.name, "i");
    assert_eq!(vars[0].value, Value::Int(0x2a));
    assert_eq!(vars[1].value, Value::Float(3.5));
    assert_eq!(vars[2].gid, Some(0));
    assert_eq!(vars[2].value, Value::Int(7));
    assert_eq!(vars[3].value, Value::Float(1.25));

    // the kernel file is back to its original bytes
    assert_eq!(std::fs::read_to_string(&kernel).unwrap(), KERNEL);
    assert!(!dir.path().join("vadd.cl.probe-backup").exists());
    // the side copy stays around for inspection
    let side = std::fs::read_to_string(dir.path().join("vadd.cl.instrumented")).unwrap();
    assert!(side.contains("_probe_targets"));
}

#[tokio::test]
async fn missing_binary_leaves_kernel_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_kernel(dir.path());
    let app = dir.path().join("no-such-app");

    let err = DebugSession::new(&kernel, &app)
        .run(4, &[0])
        .await
        .unwrap_err();

    assert!(matches!(err, DebugError::BinaryNotFound(_)));
    assert_eq!(std::fs::read_to_string(&kernel).unwrap(), KERNEL);
    assert!(!dir.path().join("vadd.cl.probe-backup").exists());
}

#[tokio::test]
async fn stream_ending_before_marker_is_no_debug_data() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_kernel(dir.path());
    let app = write_script(dir.path(), "app", "echo \"no kernel output today\"");

    let err = DebugSession::new(&kernel, &app)
        .run(4, &[0])
        .await
        .unwrap_err();

    assert!(matches!(err, DebugError::NoDebugData));
    assert_eq!(std::fs::read_to_string(&kernel).unwrap(), KERNEL);
}

#[tokio::test]
async fn stream_ending_mid_record_is_no_debug_data() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_kernel(dir.path());
    let app = write_script(
        dir.path(),
        "app",
        r#"echo "__clprobe_debug__"
echo "i 1 "
"#,
    );

    let err = DebugSession::new(&kernel, &app)
        .run(4, &[0])
        .await
        .unwrap_err();

    assert!(matches!(err, DebugError::NoDebugData));
}

#[tokio::test]
async fn stalled_application_times_out_and_restores() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_kernel(dir.path());
    let app = write_script(
        dir.path(),
        "app",
        r#"echo "__clprobe_debug__"
sleep 10
"#,
    );

    let err = DebugSession::new(&kernel, &app)
        .with_timeout(Duration::from_millis(300))
        .run(4, &[0])
        .await
        .unwrap_err();

    assert!(matches!(err, DebugError::Timeout(_)));
    assert_eq!(std::fs::read_to_string(&kernel).unwrap(), KERNEL);
}

#[tokio::test]
async fn failing_build_command_aborts_and_restores() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_kernel(dir.path());
    let app = write_script(dir.path(), "app", "echo unused");

    let err = DebugSession::new(&kernel, &app)
        .with_build_command("echo broken >&2; exit 3")
        .run(4, &[0])
        .await
        .unwrap_err();

    match err {
        DebugError::BuildFailed(msg) => assert!(msg.contains("broken")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(std::fs::read_to_string(&kernel).unwrap(), KERNEL);
}

#[tokio::test]
async fn build_command_runs_in_the_binary_directory() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_kernel(dir.path());
    let app = write_script(
        dir.path(),
        "app",
        r#"echo "__clprobe_debug__"
echo "i 0 "
echo "f 14.31 "
"#,
    );

    let vars = DebugSession::new(&kernel, &app)
        .with_build_command("touch built.txt")
        .run(4, &[0])
        .await
        .unwrap();

    assert_eq!(vars.len(), 2);
    assert!(dir.path().join("built.txt").exists());
}

#[tokio::test]
async fn scope_errors_do_not_touch_the_kernel_file() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = write_kernel(dir.path());
    let app = write_script(dir.path(), "app", "echo unused");

    // line 6 is outside every block
    let err = DebugSession::new(&kernel, &app)
        .run(6, &[0])
        .await
        .unwrap_err();

    assert!(matches!(err, DebugError::OutOfScope(6)));
    assert!(!dir.path().join("vadd.cl.instrumented").exists());
    assert!(!dir.path().join("vadd.cl.probe-backup").exists());
}
