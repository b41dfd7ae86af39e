#![cfg(unix)]

use std::time::Duration;

use cb_session::{CommandStatus, SessionHandle, SessionOptions, ShellSession};

fn handle() -> (SessionHandle, tempfile::TempDir, tempfile::TempDir) {
    let work = tempfile::tempdir().expect("work dir");
    let out = tempfile::tempdir().expect("output dir");
    let session = ShellSession::new(
        SessionOptions::new(work.path())
            .with_output_dir(out.path())
            .with_default_timeout(Duration::from_secs(10)),
    );
    (SessionHandle::new(session), work, out)
}

#[tokio::test]
async fn test_handle_executes_commands() {
    let (handle, _work, _out) = handle();
    let result = handle.execute("echo via_handle", None).await;
    assert_eq!(result.status(), CommandStatus::Success);
    assert_eq!(result.output(), "via_handle\n");
    assert!(handle.is_running().await);

    handle.stop().await;
    assert!(!handle.is_running().await);
}

#[tokio::test]
async fn test_concurrent_callers_are_serialized() {
    let (handle, _work, _out) = handle();
    let mut tasks = Vec::new();
    for i in 0..4 {
        let h = handle.clone();
        tasks.push(tokio::spawn(async move {
            h.execute(format!("echo caller_{i}"), None).await
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let result = task.await.expect("task");
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.output(), format!("caller_{i}\n"));
    }
    handle.stop().await;
}

#[tokio::test]
async fn test_working_dir_falls_back_before_start() {
    let (handle, work, _out) = handle();
    assert_eq!(handle.working_dir().await, work.path());
    assert_eq!(handle.initial_dir(), work.path());
}

#[tokio::test]
async fn test_read_artifact_through_handle() {
    let (handle, _work, _out) = handle();
    let result = handle.execute("echo stored", None).await;
    let path = result.artifact().expect("artifact").to_path_buf();
    let text = handle.read_artifact(path).await.expect("read");
    assert_eq!(text, "stored\n");
    handle.stop().await;
}
