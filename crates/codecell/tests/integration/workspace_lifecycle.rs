use codecell::Janitor;
use codecell::config::JanitorConfig;
use codecell::runner::Runner;
use codecell::sandbox::{WORKSPACE_PREFIX, WorkspaceManager};

use super::{assert_clean, fixture_source, test_config, test_root, test_runner};

#[tokio::test]
async fn test_workspace_removed_after_every_outcome() {
    let runner = test_runner("every-outcome");

    // success, compile failure, timeout, unsupported
    runner.submit("python", &fixture_source("hello.py"), "").await;
    runner
        .submit("c", &fixture_source("compile_error.c"), "")
        .await;
    runner
        .submit("python", &fixture_source("infinite_loop.py"), "")
        .await;
    runner.submit("cobol", "", "").await;

    assert_clean(&test_root("every-outcome"));
}

#[tokio::test]
async fn test_concurrent_identical_requests() {
    let runner = test_runner("concurrent");
    let source = fixture_source("double.c");

    let (a, b) = tokio::join!(
        runner.submit("c", &source, "21"),
        runner.submit("c", &source, "21"),
    );

    assert_eq!(a.stdout, "42\n");
    assert_eq!(b.stdout, "42\n");
    assert_eq!(a, b);
    assert_clean(&test_root("concurrent"));
}

#[tokio::test]
async fn test_many_concurrent_requests_with_cap() {
    let mut config = test_config("capped");
    config.max_concurrent = Some(2);
    let runner = Runner::new(config);

    let mut handles = Vec::new();
    for i in 0..6 {
        let runner = runner.clone();
        handles.push(tokio::spawn(async move {
            runner
                .submit("python", "print(int(input()) + 1)\n", &format!("{i}\n"))
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result.stdout, format!("{}\n", i + 1));
    }
    assert_eq!(runner.workspaces().available(), Some(2));
    assert_clean(&test_root("capped"));
}

#[tokio::test]
async fn test_janitor_spares_live_workspace() {
    let root = test_root("janitor-live");
    let workspace = WorkspaceManager::new(&root).acquire().await.unwrap();
    let leaked = root.join(format!("{WORKSPACE_PREFIX}leaked"));
    std::fs::create_dir_all(&leaked).unwrap();

    let janitor = Janitor::new(
        &root,
        &JanitorConfig {
            enabled: true,
            interval_secs: 60,
            max_age_secs: 3600,
        },
    );
    // Both are fresh, so nothing is old enough to sweep
    assert_eq!(janitor.sweep().await, 0);
    assert!(workspace.path().exists());
    assert!(leaked.exists());

    workspace.release().await;
    std::fs::remove_dir_all(&leaked).unwrap();
    assert_clean(&root);
}
