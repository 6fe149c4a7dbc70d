use reqwest::StatusCode;
use thiserror::Error;

/// アプリケーション全体のエラー型
#[derive(Error, Debug)]
pub enum AppError {
    /// 認証関連エラー
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// APIリクエスト関連エラー
    #[error("API request error: {0}")]
    Dispatch(#[from] DispatchError),

    /// 設定関連エラー
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// セッション保存関連エラー
    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),

    /// 汎用エラー
    #[error("{message}")]
    Generic { message: String },
}

/// トランスポート層のエラー（レスポンスを受信できなかった場合）
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTPリクエストエラー
    #[error("HTTP request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },

    /// URL組み立てエラー
    #[error("Invalid request path '{path}': {source}")]
    InvalidUrl {
        path: String,
        #[source]
        source: url::ParseError,
    },

    /// 汎用トランスポートエラー
    #[error("{message}")]
    Generic { message: String },
}

/// トークン更新エラー
///
/// 待機中のすべてのリクエストへ同じ失敗を配るため `Clone` を実装する。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    /// リフレッシュトークンが保存されていない
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// サーバーがリフレッシュトークンを拒否した
    #[error("Refresh token rejected by the server ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// 更新リクエスト自体が失敗した
    #[error("Token refresh request failed: {message}")]
    Transport { message: String },

    /// レスポンスを解釈できなかった
    #[error("Invalid token refresh response: {message}")]
    InvalidResponse { message: String },

    /// 更新処理が完了前に破棄された
    #[error("Token refresh was abandoned before it completed")]
    Abandoned,
}

/// Dispatcher経由のリクエストエラー
#[derive(Error, Debug)]
pub enum DispatchError {
    /// レスポンスなし
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 成功以外のステータス
    #[error("Server responded with {status}")]
    Status { status: StatusCode, body: String },

    /// トークン更新に失敗した（セッション終了）
    #[error("Session renewal failed: {0}")]
    Renewal(#[from] RenewalError),

    /// レスポンスボディのデコードエラー
    #[error("Failed to decode response body: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
}

impl DispatchError {
    /// Status code of the response that caused the error, if there was one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DispatchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Backend supplied error message (`detail` or `message` field of a JSON body).
    pub fn detail(&self) -> Option<String> {
        match self {
            DispatchError::Status { body, .. } => extract_detail(body),
            _ => None,
        }
    }
}

/// Pulls the `detail` (or `message`) field out of a JSON error body.
pub(crate) fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "message"].iter().find_map(|key| match value.get(key) {
        Some(serde_json::Value::String(text)) => Some(text.clone()),
        Some(other) if !other.is_null() => Some(other.to_string()),
        _ => None,
    })
}

/// 認証サービスのエラー
#[derive(Error, Debug)]
pub enum AuthError {
    /// ユーザー名またはパスワードが不正
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// ユーザーが無効化されている
    #[error("User account is disabled")]
    UserDisabled,

    /// バックエンドが返したエラーメッセージ
    #[error("{detail}")]
    Backend { status: StatusCode, detail: String },

    /// サーバーに接続できない、または想定外の応答
    #[error("Could not reach the server: {source}")]
    Connection {
        #[source]
        source: DispatchError,
    },

    /// ログインしていない
    #[error("Not authenticated")]
    NotAuthenticated,

    /// 認証情報の入力エラー
    #[error("Failed to read credentials: {reason}")]
    Input { reason: String },
}

/// 設定関連エラー
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 設定ファイル読み込みエラー
    #[error("Failed to load config file: {source}")]
    LoadError {
        #[source]
        source: std::io::Error,
    },

    /// 設定ファイルパースエラー
    #[error("Failed to parse config file: {source}")]
    ParseError {
        #[source]
        source: toml::de::Error,
    },

    /// 設定ファイルシリアライズエラー
    #[error("Failed to serialize config: {source}")]
    SerializeError {
        #[source]
        source: toml::ser::Error,
    },

    /// 設定ファイル書き込みエラー
    #[error("Failed to write config file: {source}")]
    WriteError {
        #[source]
        source: std::io::Error,
    },

    /// 設定バリデーションエラー
    #[error("Configuration validation failed: {reason}")]
    ValidationError { reason: String },
}

/// セッション保存関連エラー
#[derive(Error, Debug)]
pub enum StorageError {
    /// Keyring操作エラー
    #[error("Keyring error: {source}")]
    KeyringError {
        #[source]
        source: keyring::Error,
    },

    /// JSONエラー
    #[error("Session serialization failed: {source}")]
    JsonError {
        #[source]
        source: serde_json::Error,
    },

    /// ファイル操作エラー
    #[error("Session file error ({path}): {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        TransportError::Request { source: error }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(error: serde_json::Error) -> Self {
        DispatchError::Decode { source: error }
    }
}

impl From<keyring::Error> for StorageError {
    fn from(error: keyring::Error) -> Self {
        StorageError::KeyringError { source: error }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        StorageError::JsonError { source: error }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::LoadError { source: error }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(error: toml::de::Error) -> Self {
        ConfigError::ParseError { source: error }
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(error: toml::ser::Error) -> Self {
        ConfigError::SerializeError { source: error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_detail_from_json_body() {
        let error = DispatchError::Status {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"detail": "Menu name already exists"}"#.to_string(),
        };
        assert_eq!(error.detail().as_deref(), Some("Menu name already exists"));
        assert_eq!(error.status(), Some(StatusCode::BAD_REQUEST));
        assert!(!error.is_unauthorized());
    }

    #[test]
    fn test_dispatch_error_detail_falls_back_to_message() {
        let error = DispatchError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: r#"{"message": "boom"}"#.to_string(),
        };
        assert_eq!(error.detail().as_deref(), Some("boom"));
    }

    #[test]
    fn test_dispatch_error_detail_absent_for_plain_body() {
        let error = DispatchError::Status {
            status: StatusCode::UNAUTHORIZED,
            body: "Unauthorized".to_string(),
        };
        assert!(error.detail().is_none());
        assert!(error.is_unauthorized());
    }

    #[test]
    fn test_renewal_error_is_cloneable_into_dispatch_error() {
        let renewal = RenewalError::Rejected {
            status: 401,
            detail: "expired".to_string(),
        };
        let dispatch: DispatchError = renewal.clone().into();
        assert!(matches!(dispatch, DispatchError::Renewal(ref e) if *e == renewal));
        assert!(dispatch.status().is_none());
    }
}
