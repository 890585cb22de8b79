use std::{collections::HashMap, env, path::PathBuf, sync::OnceLock};
use tokio::{fs::{create_dir_all, read_to_string, File}, io::AsyncWriteExt, sync::Mutex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use clap::Parser;
use crate::{error::Error, tools::log::{log_info, LogServiceType}, Result};


static CONFIG: OnceLock<Mutex<Settings>> = OnceLock::new();
static OVERRIDES: OnceLock<Mutex<RuntimeOverrides>> = OnceLock::new();


const ENV_DIR: &str = "FACEBRIDGE_DIR";
const ENV_PORT: &str = "FACEBRIDGE_PORT";
const ENV_SOURCE_DB: &str = "FACEBRIDGE_SOURCE_DB";
const ENV_TARGET_API_URL: &str = "FACEBRIDGE_TARGET_API_URL";
const ENV_TARGET_API_KEY: &str = "FACEBRIDGE_TARGET_API_KEY";
const ENV_TARGET_DB_PASSWORD: &str = "FACEBRIDGE_TARGET_DB_PASSWORD";

/// Base configuration, loaded from config.json in the server local
/// directory with env overrides on top. Runtime overrides from the
/// /config routes layer over this and are not persisted.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    pub source_db_path: Option<String>,
    #[serde(default = "default_target_api_url")]
    pub target_api_url: String,
    #[serde(default)]
    pub target_api_key: String,
    #[serde(default = "default_target_db_host")]
    pub target_db_host: String,
    #[serde(default = "default_target_db_port")]
    pub target_db_port: u16,
    #[serde(default = "default_target_db_name")]
    pub target_db_name: String,
    #[serde(default = "default_target_db_user")]
    pub target_db_user: String,
    #[serde(default)]
    pub target_db_password: String,
    #[serde(default = "default_min_overlap_score")]
    pub min_overlap_score: f64,
    #[serde(default = "default_min_photos_in_cluster")]
    pub min_photos_in_cluster: u32,
    #[serde(default = "default_min_matches")]
    pub min_matches: u64,
    #[serde(default = "default_validation_min_minority_faces")]
    pub validation_min_minority_faces: u64,
    #[serde(default = "default_validation_min_minority_share")]
    pub validation_min_minority_share: f64,
    #[serde(default = "default_true")]
    pub name_match_case_insensitive: bool,
    /// Target-side path prefixes mapped to local ones; only the thumbnail
    /// proxy of the UI cares, accepted and echoed here for it.
    #[serde(default)]
    pub path_mappings: HashMap<String, String>,
    pub port: Option<u16>,
}

fn default_target_api_url() -> String {
    "http://localhost:2283".to_string()
}
fn default_target_db_host() -> String {
    "localhost".to_string()
}
fn default_target_db_port() -> u16 {
    5432
}
fn default_target_db_name() -> String {
    "immich".to_string()
}
fn default_target_db_user() -> String {
    "postgres".to_string()
}
fn default_min_overlap_score() -> f64 {
    0.30
}
fn default_min_photos_in_cluster() -> u32 {
    1
}
fn default_min_matches() -> u64 {
    2
}
fn default_validation_min_minority_faces() -> u64 {
    2
}
fn default_validation_min_minority_share() -> f64 {
    0.10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Clone)]
struct RuntimeOverrides {
    source_db_path: Option<String>,
    target_api_url: Option<String>,
    target_api_key: Option<String>,
    target_db_host: Option<String>,
    target_db_port: Option<u16>,
    target_db_name: Option<String>,
    target_db_user: Option<String>,
    target_db_password: Option<String>,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server local directory holding config.json
    #[arg(short, long)]
    dir: Option<String>,

    /// Path to the legacy photo database
    #[arg(short, long)]
    source_db: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,
}

/// Unrecognized argv (test harness flags included) falls back to an empty
/// argument set instead of exiting.
fn parse_args() -> Args {
    Args::try_parse().unwrap_or(Args { dir: None, source_db: None, port: None })
}

pub async fn initialize_config() -> Result<Settings> {
    let local_path = get_server_local_path().await?;
    log_info(LogServiceType::Config, format!("LocalPath: {:?}", local_path));
    let config = get_config_with_overrides().await?;
    let _ = CONFIG.set(Mutex::new(config.clone()));
    Ok(config)
}

pub async fn get_server_local_path() -> Result<PathBuf> {
    let args = parse_args();

    let dir_path = if let Some(argdir) = args.dir {
        PathBuf::from(&argdir)
    } else if let Ok(val) = env::var(ENV_DIR) {
        PathBuf::from(&val)
    } else {
        let Some(mut dir_path) = dirs::config_local_dir() else { return Err(Error::ServerUnableToAccessServerLocalFolder); };
        dir_path.push("facebridge");
        dir_path
    };

    let Ok(_) = create_dir_all(&dir_path).await else { return Err(Error::ServerUnableToAccessServerLocalFolder); };

    Ok(dir_path)
}

pub async fn get_server_port() -> u16 {
    let config_port = get_base_config().await.port;
    env::var(ENV_PORT).ok().and_then(|p| p.parse::<u16>().ok()).or(config_port).unwrap_or(8080)
}

async fn get_config_with_overrides() -> Result<Settings> {
    let args = parse_args();
    let mut config = get_raw_config().await?;

    if let Some(source_db) = args.source_db {
        config.source_db_path = Some(source_db);
    } else if let Ok(val) = env::var(ENV_SOURCE_DB) {
        config.source_db_path = Some(val);
    }
    if let Ok(val) = env::var(ENV_TARGET_API_URL) {
        config.target_api_url = val;
    }
    if let Ok(val) = env::var(ENV_TARGET_API_KEY) {
        config.target_api_key = val;
    }
    if let Ok(val) = env::var(ENV_TARGET_DB_PASSWORD) {
        config.target_db_password = val;
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }

    Ok(config)
}

async fn get_raw_config() -> Result<Settings> {
    let mut dir_path: PathBuf = get_server_local_path().await?;
    dir_path.push("config.json");

    if let Ok(data) = read_to_string(dir_path.clone()).await {
        let Ok(config) = serde_json::from_str::<Settings>(&data) else { return Err(Error::ServerMalformatedConfigFile); };
        Ok(config)
    } else {
        let new_config: Settings = serde_json::from_str(r#"{}"#).map_err(|_| Error::ServerMalformatedConfigFile)?;
        let new_config_string = serde_json::to_string(&new_config).map_err(|_| Error::ServerMalformatedConfigFile)?;

        let Ok(mut file) = File::create(dir_path).await else { return Err(Error::ServerUnableToAccessServerLocalFolder); };
        if file.write_all(new_config_string.as_bytes()).await.is_err() {
            return Err(Error::ServerUnableToAccessServerLocalFolder);
        }
        Ok(new_config)
    }
}

async fn get_base_config() -> Settings {
    if let Some(config) = CONFIG.get() {
        config.lock().await.clone()
    } else {
        let config = get_config_with_overrides().await.unwrap_or_else(|_| {
            serde_json::from_str::<Settings>(r#"{}"#).expect("empty settings always parse")
        });
        let _ = CONFIG.set(Mutex::new(config));
        CONFIG.get().expect("config just set").lock().await.clone()
    }
}

fn overrides() -> &'static Mutex<RuntimeOverrides> {
    OVERRIDES.get_or_init(|| Mutex::new(RuntimeOverrides::default()))
}

/// Effective settings: base config with the runtime overrides applied.
pub async fn get_settings() -> Settings {
    let mut settings = get_base_config().await;
    let overrides = overrides().lock().await.clone();
    if overrides.source_db_path.is_some() {
        settings.source_db_path = overrides.source_db_path;
    }
    if let Some(url) = overrides.target_api_url {
        settings.target_api_url = url;
    }
    if let Some(key) = overrides.target_api_key {
        settings.target_api_key = key;
    }
    if let Some(host) = overrides.target_db_host {
        settings.target_db_host = host;
    }
    if let Some(port) = overrides.target_db_port {
        settings.target_db_port = port;
    }
    if let Some(name) = overrides.target_db_name {
        settings.target_db_name = name;
    }
    if let Some(user) = overrides.target_db_user {
        settings.target_db_user = user;
    }
    if let Some(password) = overrides.target_db_password {
        settings.target_db_password = password;
    }
    settings
}

pub async fn update_source_db(path: String) {
    overrides().lock().await.source_db_path = Some(path);
}

pub async fn update_target_api(url: Option<String>, api_key: Option<String>) {
    let mut overrides = overrides().lock().await;
    if url.is_some() {
        overrides.target_api_url = url;
    }
    if api_key.is_some() {
        overrides.target_api_key = api_key;
    }
}

pub async fn update_target_db(
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
) {
    let mut overrides = overrides().lock().await;
    if host.is_some() {
        overrides.target_db_host = host;
    }
    if port.is_some() {
        overrides.target_db_port = port;
    }
    if name.is_some() {
        overrides.target_db_name = name;
    }
    if user.is_some() {
        overrides.target_db_user = user;
    }
    if password.is_some() {
        overrides.target_db_password = password;
    }
}

/// Effective configuration with secrets reduced to presence booleans.
pub async fn current_config() -> Value {
    let settings = get_settings().await;
    let overrides = overrides().lock().await.clone();
    json!({
        "source_db_path": settings.source_db_path,
        "target_api_url": settings.target_api_url,
        "target_api_key_set": !settings.target_api_key.is_empty(),
        "target_db_host": settings.target_db_host,
        "target_db_port": settings.target_db_port,
        "target_db_name": settings.target_db_name,
        "target_db_user": settings.target_db_user,
        "target_db_password_set": !settings.target_db_password.is_empty(),
        "min_overlap_score": settings.min_overlap_score,
        "min_photos_in_cluster": settings.min_photos_in_cluster,
        "min_matches": settings.min_matches,
        "validation_min_minority_faces": settings.validation_min_minority_faces,
        "validation_min_minority_share": settings.validation_min_minority_share,
        "name_match_case_insensitive": settings.name_match_case_insensitive,
        "path_mappings": settings.path_mappings,
        "has_overrides": {
            "source_db_path": overrides.source_db_path.is_some(),
            "target_api_url": overrides.target_api_url.is_some(),
            "target_api_key": overrides.target_api_key.is_some(),
            "target_db": overrides.target_db_host.is_some()
                || overrides.target_db_port.is_some()
                || overrides.target_db_name.is_some()
                || overrides.target_db_user.is_some()
                || overrides.target_db_password.is_some(),
        }
    })
}
