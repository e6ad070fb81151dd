use codecell::types::{ExecutionOutcome, ExecutionRequest, StageResult};

use super::{assert_clean, fixture_source, test_root, test_runner};

#[tokio::test]
async fn test_python_hello() {
    let runner = test_runner("py-hello");
    let result = runner
        .submit("python", &fixture_source("hello.py"), "")
        .await;

    assert_eq!(result, StageResult::new("hi\n", "", 0));
    assert_clean(&test_root("py-hello"));
}

#[tokio::test]
async fn test_python_reads_stdin() {
    let runner = test_runner("py-stdin");
    let result = runner
        .submit("python", &fixture_source("echo_upper.py"), "abc\ndef\n")
        .await;

    assert_eq!(result, StageResult::new("ABC\nDEF\n", "", 0));
    assert_clean(&test_root("py-stdin"));
}

#[tokio::test]
async fn test_python_exit_code_and_stderr() {
    let runner = test_runner("py-exit");
    let outcome = runner
        .execute(ExecutionRequest::new(
            "python",
            fixture_source("exit_code.py"),
            "",
        ))
        .await;

    // A non-zero exit is still a completed run
    let ExecutionOutcome::Success(result) = outcome else {
        panic!("expected success outcome, got {outcome:?}");
    };
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stdout, "partial\n");
    assert_eq!(result.stderr, "something went wrong\n");
    assert_clean(&test_root("py-exit"));
}

#[tokio::test]
async fn test_python_uncaught_exception() {
    let runner = test_runner("py-raise");
    let result = runner
        .submit("python", "raise ValueError('boom')\n", "")
        .await;

    assert_eq!(result.exit_code, 1);
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("ValueError: boom"));
    assert_clean(&test_root("py-raise"));
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let runner = test_runner("py-loop");
    let result = runner
        .submit("python", &fixture_source("infinite_loop.py"), "")
        .await;

    assert_eq!(result, StageResult::new("", "Execution timed out", 124));
    assert_clean(&test_root("py-loop"));
}

#[tokio::test]
async fn test_unsupported_language() {
    let runner = test_runner("unsupported");
    let result = runner.submit("brainfuck", "+++.", "").await;

    assert_eq!(result, StageResult::new("", "Unsupported language", 1));
    assert!(!test_root("unsupported").exists());
}

#[tokio::test]
async fn test_program_sees_only_sandbox_environment() {
    let runner = test_runner("py-env");
    let code = "import os\nprint(sorted(k for k in os.environ if k != 'LC_CTYPE'))\n";
    let result = runner.submit("python", code, "").await;

    assert_eq!(result.exit_code, 0, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "['HOME', 'PATH']\n");
    assert_clean(&test_root("py-env"));
}
