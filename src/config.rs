use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// バックエンドAPI設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// APIベースURL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// リクエストタイムアウト（秒）
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_base_url() -> String {
    "http://practicas.teclab.edu.ar".to_string()
}

fn default_timeout_sec() -> u64 {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_sec: default_timeout_sec(),
        }
    }
}

/// 認証エンドポイント設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,

    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    #[serde(default = "default_me_path")]
    pub me_path: String,

    #[serde(default = "default_verify_path")]
    pub verify_path: String,

    /// 401を受けてもトークン更新を行わない追加のパス
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

fn default_me_path() -> String {
    "/users/me".to_string()
}

fn default_verify_path() -> String {
    "/auth/verify".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
            me_path: default_me_path(),
            verify_path: default_verify_path(),
            excluded_paths: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Paths whose 401 responses must never start a token renewal.
    ///
    /// Entries are normalized with [`endpoint_path`].
    pub fn renewal_excluded_paths(&self) -> Vec<String> {
        let mut paths = vec![
            endpoint_path(&self.login_path),
            endpoint_path(&self.refresh_path),
        ];
        for path in &self.excluded_paths {
            let path = endpoint_path(path);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }
}

/// Reduces a request path to the form used for endpoint comparison:
/// query and fragment dropped, leading `/` ensured, trailing `/` removed.
/// Absolute URLs are reduced to their path.
pub fn endpoint_path(path: &str) -> String {
    let path = match url::Url::parse(path) {
        Ok(url) if url.has_host() => url.path().to_string(),
        _ => path.split(['?', '#']).next().unwrap_or(path).to_string(),
    };
    let path = path.trim_end_matches('/');
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// セッションの保存先
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OSのキーリング（利用できない場合はファイル）
    Keyring,
    /// JSONファイルのみ
    File,
    /// 保存しない
    Memory,
}

/// セッション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_storage")]
    pub storage: StorageBackend,

    /// セッションファイルのパス（省略可、デフォルト: 設定ディレクトリ下の session.json）
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_storage() -> StorageBackend {
    StorageBackend::Keyring
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage: default_storage(),
            file_path: None,
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// ログレベル（省略可、デフォルト: info）
    #[serde(default = "default_log_level")]
    pub level: String,

    /// ログファイルのパス（省略時は標準エラー出力）
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn base_url(&self) -> &str {
        &self.api.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_sec)
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    pub fn log_file_path(&self) -> &Option<String> {
        &self.logging.file_path
    }

    pub fn session_file_path(&self) -> PathBuf {
        match &self.session.file_path {
            Some(path) => PathBuf::from(path),
            None => config_dir().join("session.json"),
        }
    }

    /// 設定値の検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.api.base_url).map_err(|e| ConfigError::ValidationError {
            reason: format!("api.base_url '{}' is not a valid URL: {}", self.api.base_url, e),
        })?;

        if self.api.timeout_sec == 0 {
            return Err(ConfigError::ValidationError {
                reason: "api.timeout_sec must be greater than zero".to_string(),
            });
        }

        let paths = [
            ("auth.login_path", &self.auth.login_path),
            ("auth.refresh_path", &self.auth.refresh_path),
            ("auth.logout_path", &self.auth.logout_path),
            ("auth.me_path", &self.auth.me_path),
            ("auth.verify_path", &self.auth.verify_path),
        ];
        for (name, path) in paths {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationError {
                    reason: format!("{} must start with '/', got '{}'", name, path),
                });
            }
        }

        Ok(())
    }
}

/// 設定ディレクトリを取得
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("backoffice-client")
}

/// 設定ファイルのパスを取得
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// 設定ファイルを読み込む
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_file_path())
}

/// 指定したパスから設定ファイルを読み込む（存在しない場合はデフォルト設定）
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config = if path.exists() {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)?
    } else {
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

/// 設定ファイルを保存する
pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent_dir) = path.parent()
        && !parent_dir.exists()
    {
        fs::create_dir_all(parent_dir).map_err(|e| ConfigError::WriteError { source: e })?;
    }

    let contents = toml::to_string_pretty(config)?;
    fs::write(path, contents).map_err(|e| ConfigError::WriteError { source: e })?;
    Ok(())
}
