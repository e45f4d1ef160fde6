use adapters::adapters::AdapterDefaults;
use adapters::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
    time::Duration,
};
use tempfile::TempDir;

const VARS: &[&str] = &[
    "ADAPTERS_PROFILE",
    "ADAPTERS_LOG_LEVEL",
    "ADAPTERS_LOG_FORMAT",
    "ADAPTERS_CATALOG_PATH",
    "ADAPTERS_HTTP_TIMEOUT_SECONDS",
    "ADAPTERS_RETRY_MAX_ATTEMPTS",
    "ADAPTERS_RATE_LIMIT_ENABLED",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for var in VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

#[test]
fn loads_defaults_from_empty_directory() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .expect("defaults load");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.log_format, "pretty");
    assert_eq!(cfg.catalog_path.to_str(), Some("catalog.json"));
    assert_eq!(cfg.http_timeout_seconds, 30);
    assert!(!cfg.rate_limit.enabled);
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "ADAPTERS_HTTP_TIMEOUT_SECONDS=10\nADAPTERS_CATALOG_PATH=/etc/catalog.json\n",
    );
    // profile chosen before the profile-specific files are read
    write_env_file(
        &dir,
        ".env.local",
        "ADAPTERS_PROFILE=staging\nADAPTERS_HTTP_TIMEOUT_SECONDS=11\n",
    );
    write_env_file(
        &dir,
        ".env.staging",
        "ADAPTERS_HTTP_TIMEOUT_SECONDS=12\nADAPTERS_RETRY_MAX_ATTEMPTS=5\n",
    );
    write_env_file(
        &dir,
        ".env.staging.local",
        "ADAPTERS_HTTP_TIMEOUT_SECONDS=13\nUNRELATED=1\n",
    );

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();
    assert_eq!(cfg.profile, "staging");
    assert_eq!(cfg.http_timeout_seconds, 13);
    assert_eq!(cfg.retry.max_attempts, 5);
    assert_eq!(cfg.catalog_path.to_str(), Some("/etc/catalog.json"));

    unsafe {
        env::set_var("ADAPTERS_HTTP_TIMEOUT_SECONDS", "14");
    }
    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();
    assert_eq!(cfg.http_timeout_seconds, 14);
    assert_eq!(
        AdapterDefaults::from(&cfg).http_timeout,
        Duration::from_secs(14)
    );
    clear_env();
}

#[test]
fn provider_rate_limit_overrides_are_collected() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "ADAPTERS_RATE_LIMIT_ENABLED=true\n\
         ADAPTERS_RATE_LIMIT_REQUESTS_PER_SECOND=20\n\
         ADAPTERS_RATE_LIMIT_OVERRIDE_OPEN_METEO_REQUESTS_PER_SECOND=2\n\
         ADAPTERS_RATE_LIMIT_OVERRIDE_OPEN_METEO_BURST=4\n",
    );

    let cfg = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap();
    let open_meteo = &cfg.rate_limit.provider_overrides["open_meteo"];
    assert_eq!(open_meteo.requests_per_second, Some(2));
    assert_eq!(open_meteo.burst, Some(4));

    let defaults = AdapterDefaults::from(&cfg);
    assert_eq!(defaults.rate_limit.map(|r| r.requests_per_second), Some(20));
    assert_eq!(defaults.rate_limit_overrides["open_meteo"].burst, Some(4));
}

#[test]
fn malformed_values_are_rejected() {
    let _guard = env_guard();
    clear_env();

    let dir = TempDir::new().unwrap();
    write_env_file(&dir, ".env", "ADAPTERS_HTTP_TIMEOUT_SECONDS=soon\n");
    let err = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ADAPTERS_HTTP_TIMEOUT_SECONDS"));

    write_env_file(&dir, ".env", "ADAPTERS_LOG_FORMAT=xml\n");
    let err = ConfigLoader::with_base_dir(dir.path().to_path_buf())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidLogFormat { .. }));
}
