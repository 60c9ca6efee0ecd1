use dockerbox::cli::{Args, ConfigDiscovery, ExecutionMode, SandboxConfig};
use dockerbox::env;
use clap::Parser;
use serial_test::serial;
use std::path::Path;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

/// Run `f` with the working directory set to `dir`.
fn in_dir<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
    let previous = std::env::current_dir().expect("Should have a working directory");
    std::env::set_current_dir(dir).expect("Should be able to enter temp dir");
    let result = f();
    std::env::set_current_dir(previous).expect("Should be able to restore working directory");
    result
}

#[test]
fn test_config_file_operations() {
    let original_config = SandboxConfig {
        shell: vec!["/bin/bash".to_string(), "-l".to_string()],
        commit_when_headless: false,
        stop_timeout_secs: 3,
        ..Default::default()
    };

    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    let temp_path = temp_file.path();

    original_config
        .to_toml_file(temp_path)
        .expect("Should be able to save config to file");

    let loaded_config =
        SandboxConfig::from_toml_file(temp_path).expect("Should be able to load config from file");
    assert_eq!(original_config, loaded_config);
}

#[test]
fn test_malformed_config_rejected() {
    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    std::fs::write(temp_file.path(), "commit = \"sometimes\"\n").unwrap();

    assert!(SandboxConfig::from_toml_file(temp_file.path()).is_err());
}

#[test]
#[serial]
fn test_local_file_discovered_first() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join(env::LOCAL_CONFIG_FILE_NAME),
        "drain_timeout_ms = 900\n",
    )
    .unwrap();
    std::fs::create_dir(temp_dir.path().join(env::APP_DIR_NAME)).unwrap();
    std::fs::write(
        env::local_config_file_path(temp_dir.path()),
        "drain_timeout_ms = 100\n",
    )
    .unwrap();

    let (found, config) = in_dir(temp_dir.path(), || {
        (
            ConfigDiscovery::find_config_file(),
            ConfigDiscovery::discover_config(),
        )
    });

    let found = found.expect("Should find the local config");
    assert_eq!(
        found.file_name().unwrap(),
        env::LOCAL_CONFIG_FILE_NAME
    );
    let options = config.unwrap().session_options().unwrap();
    assert_eq!(options.drain_timeout, Duration::from_millis(900));
}

#[test]
#[serial]
fn test_app_dir_config_discovered() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir(temp_dir.path().join(env::APP_DIR_NAME)).unwrap();
    std::fs::write(
        env::local_config_file_path(temp_dir.path()),
        "commit = false\n",
    )
    .unwrap();

    let config = in_dir(temp_dir.path(), ConfigDiscovery::discover_config).unwrap();
    assert!(!config.commit);
}

#[test]
fn test_cli_flags_override_file() {
    let temp_file = NamedTempFile::new().unwrap();
    std::fs::write(
        temp_file.path(),
        "shell = [\"/bin/ash\"]\ndetach_keys = \"ctrl-p,ctrl-q\"\n",
    )
    .unwrap();
    let config_path = temp_file.path().to_str().unwrap();

    let args = Args::try_parse_from([
        "d7x",
        "-c",
        config_path,
        "create",
        "box",
        "alpine:latest",
        "--shell",
        "/bin/bash",
        "--no-commit",
    ])
    .unwrap();

    let create = match args.mode().unwrap() {
        ExecutionMode::Create(create) => create,
        other => panic!("unexpected mode: {:?}", other),
    };
    let file_config = ConfigDiscovery::load(create.config_override.as_deref()).unwrap();
    let options = file_config.session_options_for(&create).unwrap();

    assert_eq!(options.shell, vec!["/bin/bash".to_string()]);
    assert_eq!(options.detach_keys, "ctrl-p,ctrl-q");
    assert!(!options.commit);
    assert!(options.announce);
}
