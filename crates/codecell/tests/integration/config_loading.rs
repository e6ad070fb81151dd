use std::path::Path;

use codecell::config::Config;

use super::FIXTURES_PATH;

#[test]
fn test_load_valid_config() {
    let path = format!("{}/configs/valid_full.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert!(config.languages.contains_key("python"));
    assert!(config.languages.contains_key("c"));
    assert_eq!(config.default_limits.time_limit, Some(2.0));
    assert_eq!(config.default_limits.wall_time_limit, Some(1.5));
    assert_eq!(config.max_concurrent, Some(4));
    assert_eq!(
        config.workspace_root(),
        Path::new("/tmp/codecell-fixture")
    );

    let user = config.sandbox_user.expect("sandbox user missing");
    assert_eq!((user.uid, user.gid), (65534, 65534));
    assert!(config.janitor.enabled);
    assert_eq!(config.janitor.max_age_secs, 600);

    let c = config.get_language("c").unwrap();
    let compile_limits = c.compile.as_ref().unwrap().limits.as_ref().unwrap();
    assert_eq!(compile_limits.wall_time_limit, Some(20.0));
    assert_eq!(
        c.run.limits.as_ref().unwrap().memory_limit,
        Some(262144)
    );
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{}/configs/valid_minimal.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert!(config.languages.contains_key("test"));
    assert!(config.sandbox_user.is_none());
    assert!(!config.janitor.enabled);
}

#[test]
fn test_load_with_path_reads_file() {
    let path = format!("{}/configs/valid_minimal.toml", FIXTURES_PATH);
    let config = Config::load(Some(Path::new(&path))).expect("Failed to load config");

    assert_eq!(config.languages.len(), 1);
}

#[test]
fn test_load_invalid_empty_name() {
    let path = format!("{}/configs/invalid_empty_name.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_source_name() {
    let path = format!("{}/configs/invalid_source_name.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_empty_run_command() {
    let path = format!("{}/configs/invalid_empty_run_command.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_negative_limit() {
    let path = format!("{}/configs/invalid_negative_limit.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_nonexistent_file() {
    let result = Config::from_file("/nonexistent/path/config.toml");
    assert!(result.is_err());
}
