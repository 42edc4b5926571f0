//! Settings loading. A `Settings` value is read once at startup and passed by
//! reference through the dispatcher; there is no process-global mutable config.

use anyhow::Result;
use serde::Deserialize;
use std::{fs::File, io::Read, path::Path};

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub db_pgconn: String,
    pub redis_url: String,

    /// Path prefix under which all content is served, e.g. "/pulp/content/".
    #[serde(default = "default_content_path_prefix")]
    pub content_path_prefix: String,
    #[serde(default)]
    pub domain_enabled: bool,
    #[serde(default)]
    pub hide_guarded_distributions: bool,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cooldown")]
    pub remote_content_fetch_failure_cooldown: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Local directory newly-fetched artifacts are staged into and persisted under.
    /// Independent of a domain's own `storage_kind`: on-demand fetches always land
    /// here first, regardless of whether the domain ultimately serves from S3,
    /// Azure, or GCS.
    #[serde(default = "default_artifact_storage_root")]
    pub artifact_storage_root: String,
}

fn default_artifact_storage_root() -> String {
    "/var/lib/pulp/media".to_string()
}

fn default_content_path_prefix() -> String {
    "/pulp/content/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cooldown() -> u64 {
    1800
}

fn default_cache_ttl() -> u64 {
    86400
}

pub fn parse_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let mut f = File::open(path)?;
    let mut content = String::new();
    content.reserve(1024);
    f.read_to_string(&mut content)?;

    Ok(toml::from_str(&content)?)
}

#[test]
fn test_defaults_fill_in() {
    let toml = r#"
        bind_addr = "127.0.0.1:8080"
        db_pgconn = "postgres://localhost/pulp"
        redis_url = "redis://localhost"
    "#;
    let settings: Settings = toml::from_str(toml).unwrap();
    assert_eq!(settings.content_path_prefix, "/pulp/content/");
    assert!(settings.cache_enabled);
    assert_eq!(settings.remote_content_fetch_failure_cooldown, 1800);
}
