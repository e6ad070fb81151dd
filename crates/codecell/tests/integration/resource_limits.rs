use std::time::Duration;

use codecell::runner::Runner;

use super::{assert_clean, fixture_source, test_config, test_root};

/// Whether `pid` is running; zombies count as dead
fn running(pid: i32) -> bool {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap_or_default();
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next());
    !matches!(state, None | Some('Z') | Some('X'))
}

#[tokio::test]
async fn test_memory_limit_stops_allocation() {
    // python runs with a 512 MB address space limit
    let runner = Runner::new(test_config("mem-hog"));
    let result = runner
        .submit("python", &fixture_source("memory_hog.py"), "")
        .await;

    assert_ne!(result.exit_code, 0);
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("MemoryError"), "stderr: {}", result.stderr);
    assert_clean(&test_root("mem-hog"));
}

#[tokio::test]
async fn test_output_is_capped() {
    let mut config = test_config("big-output");
    config.default_limits.max_output = Some(1); // 1 KB
    let runner = Runner::new(config);
    let result = runner
        .submit("python", &fixture_source("big_output.py"), "")
        .await;

    assert_eq!(result.stdout.len(), 1024);
    assert!(result.stdout.chars().all(|c| c == 'x'));
    assert_clean(&test_root("big-output"));
}

#[tokio::test]
async fn test_timeout_kills_spawned_children() {
    let pid_file = std::env::temp_dir().join(format!(
        "codecell-it-sleeper-{}.pid",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&pid_file);

    let mut config = test_config("sleeper");
    config.default_limits.wall_time_limit = Some(1.0);
    let runner = Runner::new(config);
    let result = runner
        .submit(
            "python",
            &fixture_source("spawn_sleeper.py"),
            &format!("{}\n", pid_file.display()),
        )
        .await;

    assert_eq!(result.exit_code, 124);
    let pid: i32 = std::fs::read_to_string(&pid_file)
        .expect("sleeper did not record its pid")
        .trim()
        .parse()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!running(pid), "sleeper {pid} survived the timeout");

    let _ = std::fs::remove_file(&pid_file);
    assert_clean(&test_root("sleeper"));
}

#[tokio::test]
async fn test_timeout_kills_child_in_new_session() {
    let pid_file = std::env::temp_dir().join(format!(
        "codecell-it-escapee-{}.pid",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&pid_file);

    let mut config = test_config("escapee");
    config.default_limits.wall_time_limit = Some(1.0);
    let runner = Runner::new(config);
    let result = runner
        .submit(
            "python",
            &fixture_source("escape_session.py"),
            &format!("{}\n", pid_file.display()),
        )
        .await;

    assert_eq!(result.exit_code, 124);
    let pid: i32 = std::fs::read_to_string(&pid_file)
        .expect("escapee did not record its pid")
        .trim()
        .parse()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!running(pid), "escapee {pid} survived the request");

    let _ = std::fs::remove_file(&pid_file);
    assert_clean(&test_root("escapee"));
}

#[tokio::test]
async fn test_cpu_limit_applies_to_busy_loop() {
    let mut config = test_config("cpu-limit");
    config.default_limits.time_limit = Some(1.0);
    config.default_limits.wall_time_limit = Some(10.0);
    let runner = Runner::new(config);
    let result = runner
        .submit("python", &fixture_source("infinite_loop.py"), "")
        .await;

    // Killed by SIGXCPU (or SIGKILL at the hard limit), not by the wall clock
    assert!(
        result.exit_code == 128 + 24 || result.exit_code == 128 + 9,
        "exit code {}",
        result.exit_code
    );
    assert_clean(&test_root("cpu-limit"));
}
