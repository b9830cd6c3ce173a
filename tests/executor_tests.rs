use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use rtags_lite::error::BridgeError;
use rtags_lite::worker::ProcessRunner;

/// Create a runner that executes `sh -c`
fn test_runner() -> ProcessRunner {
    ProcessRunner::new("sh", "test")
}

fn script(cmd: &str) -> Vec<String> {
    vec!["-c".to_string(), cmd.to_string()]
}

#[tokio::test]
async fn test_execute_simple_command() {
    let runner = test_runner();

    let result = runner.execute(&script("echo hello"), b"", None).await.unwrap();

    assert_eq!(result.exit_code, Some(0));
    assert!(result.success());
    assert_eq!(result.output, b"hello\n");
}

#[tokio::test]
async fn test_execute_empty_output() {
    let runner = test_runner();

    let result = runner.execute(&script("true"), b"", None).await.unwrap();

    assert!(result.success());
    assert!(result.output.is_empty());
}

#[tokio::test]
async fn test_execute_large_output() {
    let runner = test_runner();

    let result = runner.execute(&script("seq 1 1000"), b"", None).await.unwrap();

    assert!(result.success());
    let output = String::from_utf8(result.output).unwrap();
    assert_eq!(output.lines().count(), 1000);
}

#[tokio::test]
async fn test_execute_command_failure() {
    let runner = test_runner();

    let result = runner.execute(&script("exit 3"), b"", None).await.unwrap();

    assert_eq!(result.exit_code, Some(3));
    assert!(!result.success());
}

#[tokio::test]
async fn test_stderr_is_merged_into_output() {
    let runner = test_runner();

    let result = runner
        .execute(&script("echo 'error message' >&2; exit 1"), b"", None)
        .await
        .unwrap();

    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.output, b"error message\n");
}

#[tokio::test]
async fn test_input_is_written_to_stdin() {
    let runner = test_runner();

    let result = runner
        .execute(&script("cat"), b"int main() {}\n", None)
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(result.output, b"int main() {}\n");
}

#[tokio::test]
async fn test_input_ignored_by_process_does_not_fail() {
    let runner = test_runner();
    let input = vec![b'x'; 1024 * 1024];

    let result = runner
        .execute(&script("echo done"), &input, None)
        .await
        .unwrap();

    assert_eq!(result.output, b"done\n");
}

#[tokio::test]
async fn test_launch_failure() {
    let runner = ProcessRunner::new("/nonexistent/rc", "test");

    let err = runner.execute(&[], b"", None).await.unwrap_err();

    match err {
        BridgeError::Launch { program, .. } => assert_eq!(program, "/nonexistent/rc"),
        other => panic!("expected launch error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let runner = test_runner();
    let started = Instant::now();

    let err = runner
        .execute(&script("sleep 30"), b"", Some(Duration::from_millis(200)))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_returns_promptly() {
    let runner = test_runner();
    let stopper = runner.clone();

    let handle = tokio::spawn(async move { runner.execute(&script("sleep 30"), b"", None).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = Instant::now();
    stopper.stop();
    stopper.stop();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("execute did not return after stop")
        .unwrap();
    assert!(matches!(result, Err(BridgeError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(stopper.is_stopped());
}

#[tokio::test]
async fn test_stopped_runner_never_spawns() {
    let runner = test_runner();
    runner.stop();

    let result = runner.execute(&script("echo hello"), b"", None).await;

    assert!(matches!(result, Err(BridgeError::Cancelled)));
}

#[tokio::test]
async fn test_streaming_delivers_lines_in_order() {
    let runner = test_runner();
    let mut lines = Vec::new();

    let result = runner
        .execute_streaming(&script("echo one; echo two; echo three"), b"", None, |line| {
            lines.push(String::from_utf8_lossy(line).trim_end().to_string());
            ControlFlow::Continue(())
        })
        .await
        .unwrap();

    assert!(result.success());
    assert!(result.output.is_empty());
    assert_eq!(lines, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_streaming_break_kills_process() {
    let runner = test_runner();
    let started = Instant::now();
    let mut seen = 0;

    let result = runner
        .execute_streaming(&script("echo first; sleep 30; echo never"), b"", None, |_| {
            seen += 1;
            ControlFlow::Break(())
        })
        .await
        .unwrap();

    assert_eq!(seen, 1);
    assert_ne!(result.exit_code, Some(0));
    assert!(started.elapsed() < Duration::from_secs(5));
}
