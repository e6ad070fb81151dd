use codecell::runner::{CompileResult, compile};
use codecell::sandbox::WorkspaceManager;
use codecell::types::{ExecutionOutcome, ExecutionRequest, StageResult};

use super::{assert_clean, fixture_source, test_config, test_root, test_runner};

#[tokio::test]
async fn test_c_doubles_input() {
    let runner = test_runner("c-double");
    let result = runner
        .submit("c", &fixture_source("double.c"), "21")
        .await;

    assert_eq!(result, StageResult::new("42\n", "", 0));
    assert_clean(&test_root("c-double"));
}

#[tokio::test]
async fn test_c_compile_error() {
    let runner = test_runner("c-error");
    let outcome = runner
        .execute(ExecutionRequest::new(
            "c",
            fixture_source("compile_error.c"),
            "",
        ))
        .await;

    match outcome {
        ExecutionOutcome::CompileFailure { stderr, exit_code } => {
            assert_ne!(exit_code, 0);
            assert!(stderr.contains("error"), "stderr: {stderr}");
            assert!(stderr.contains("main.c"), "stderr: {stderr}");
        }
        other => panic!("expected compile failure, got {other:?}"),
    }
    assert_clean(&test_root("c-error"));
}

#[tokio::test]
async fn test_c_signal_death_exit_code() {
    let runner = test_runner("c-segv");
    let result = runner
        .submit("c", &fixture_source("segfault.c"), "")
        .await;

    assert_eq!(result.exit_code, 128 + 11);
    assert_eq!(result.stdout, "");
    assert_clean(&test_root("c-segv"));
}

#[tokio::test]
async fn test_cpp_hello() {
    let runner = test_runner("cpp-hello");
    let result = runner
        .submit("cpp", &fixture_source("hello.cpp"), "")
        .await;

    assert_eq!(result, StageResult::new("Hello, World!\n", "", 0));
    assert_clean(&test_root("cpp-hello"));
}

#[tokio::test]
async fn test_cpp_with_stdin() {
    let runner = test_runner("cpp-sum");
    let result = runner
        .submit("cpp", &fixture_source("sum.cpp"), "40 2\n")
        .await;

    assert_eq!(result, StageResult::new("42\n", "", 0));
    assert_clean(&test_root("cpp-sum"));
}

#[tokio::test]
async fn test_java_main_class() {
    let mut config = test_config("java-hello");
    // JVM startup is slow on loaded CI machines
    config.default_limits.wall_time_limit = Some(10.0);
    let runner = codecell::Runner::new(config);
    let result = runner
        .submit("java", &fixture_source("Main.java"), "")
        .await;

    assert_eq!(result, StageResult::new("Hello from Java\n", "", 0));
    assert_clean(&test_root("java-hello"));
}

#[tokio::test]
async fn test_java_mismatched_class_fails() {
    let runner = test_runner("java-mismatch");
    let result = runner
        .submit("java", &fixture_source("wrong_class.java"), "")
        .await;

    assert_ne!(result.exit_code, 0);
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("Program"), "stderr: {}", result.stderr);
    assert_clean(&test_root("java-mismatch"));
}

#[tokio::test]
async fn test_java_missing_main_class_reports_java_error() {
    // Compiles cleanly to Program.class, so the JVM finds no Main
    let mut config = test_config("java-no-main");
    config.default_limits.wall_time_limit = Some(10.0);
    let runner = codecell::Runner::new(config);
    let outcome = runner
        .execute(ExecutionRequest::new(
            "java",
            fixture_source("hidden_class.java"),
            "",
        ))
        .await;

    match outcome {
        ExecutionOutcome::Success(result) => {
            assert_ne!(result.exit_code, 0);
            assert_eq!(result.stdout, "");
            assert!(result.stderr.contains("Main"), "stderr: {}", result.stderr);
        }
        other => panic!("expected the program's own failure, got {other:?}"),
    }
    assert_clean(&test_root("java-no-main"));
}

#[tokio::test]
async fn test_compile_stage_leaves_artifact() {
    let config = test_config("c-artifact");
    let language = config.get_language("c").unwrap();
    let workspace = WorkspaceManager::new(test_root("c-artifact"))
        .acquire()
        .await
        .unwrap();
    workspace
        .write_file("main.c", fixture_source("double.c").as_bytes())
        .await
        .unwrap();

    let result = compile(&workspace, &config, language).await.unwrap();
    assert_eq!(result, CompileResult::Compiled);
    assert!(workspace.file_exists("main").await.unwrap());

    workspace.release().await;
    assert_clean(&test_root("c-artifact"));
}
