use crate::config::AuthConfig;
use crate::credential_store::CredentialStore;
use crate::dispatch::{ApiRequest, Dispatcher, Transport};
use crate::errors::{AuthError, DispatchError};
use crate::models::{LoginCredentials, LoginResponse, User, VerifyResponse, token_preview};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use std::sync::Arc;

/// Login, logout and session queries against the backend's auth endpoints.
///
/// Every call goes through the dispatcher, so `/users/me` and `/auth/verify`
/// benefit from token renewal like any other request.
pub struct AuthService<T> {
    dispatcher: Arc<Dispatcher<T>>,
    paths: AuthConfig,
}

impl<T: Transport> AuthService<T> {
    pub fn new(dispatcher: Arc<Dispatcher<T>>, paths: &AuthConfig) -> Self {
        Self {
            dispatcher,
            paths: paths.clone(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<T>> {
        &self.dispatcher
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        self.dispatcher.credentials()
    }

    /// Authenticates and stores the new session. When the login response
    /// carries no user record it is fetched from `/users/me`.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, AuthError> {
        if credentials.username.trim().is_empty() || credentials.password.expose_secret().is_empty()
        {
            return Err(AuthError::Input {
                reason: "username and password are required".to_string(),
            });
        }

        tracing::info!("Logging in as {}", credentials.username);
        let request = ApiRequest::post(self.paths.login_path.clone())
            .json(credentials)
            .map_err(|source| AuthError::Connection { source })?;
        let response: LoginResponse = self
            .dispatcher
            .dispatch_json(request)
            .await
            .map_err(login_error)?;

        tracing::debug!(
            "Received access token {}",
            token_preview(&response.access_token)
        );
        let store = self.credentials();
        store.set_tokens(Some(response.access_token), response.refresh_token);

        let user = match response.user {
            Some(user) => user,
            None => match self.current_user().await {
                Ok(user) => user,
                Err(e) => {
                    store.clear();
                    return Err(e);
                }
            },
        };
        store.set_user(Some(user.clone()));

        tracing::info!("Logged in as {}", user.username);
        Ok(user)
    }

    /// Invalidates the refresh token on the backend when possible, then
    /// clears the local session whatever the outcome.
    pub async fn logout(&self) {
        let store = self.credentials();
        if let Some(refresh_token) = store.refresh_token() {
            let request = ApiRequest::post(self.paths.logout_path.clone()).with_body(
                serde_json::json!({ "refresh_token": refresh_token.expose_secret() }),
            );
            if let Err(e) = self.dispatcher.dispatch(request).await {
                tracing::warn!("Backend logout failed: {}", e);
            }
        }
        store.clear();
        tracing::info!("Logged out");
    }

    /// Fetches the authenticated user and refreshes the stored record.
    pub async fn current_user(&self) -> Result<User, AuthError> {
        let user: User = self
            .dispatcher
            .dispatch_json(ApiRequest::get(self.paths.me_path.clone()))
            .await
            .map_err(session_error)?;
        self.credentials().set_user(Some(user.clone()));
        Ok(user)
    }

    /// Asks the backend whether the current access token is valid.
    /// Any failure counts as invalid.
    pub async fn verify_token(&self) -> bool {
        match self
            .dispatcher
            .dispatch_json::<VerifyResponse>(ApiRequest::get(self.paths.verify_path.clone()))
            .await
        {
            Ok(response) => response.valid,
            Err(e) => {
                tracing::debug!("Token verification failed: {}", e);
                false
            }
        }
    }
}

fn login_error(error: DispatchError) -> AuthError {
    match error.status() {
        Some(StatusCode::UNAUTHORIZED) => AuthError::InvalidCredentials,
        Some(StatusCode::FORBIDDEN) => AuthError::UserDisabled,
        Some(status) => match error.detail() {
            Some(detail) => AuthError::Backend { status, detail },
            None => AuthError::Connection { source: error },
        },
        None => AuthError::Connection { source: error },
    }
}

fn session_error(error: DispatchError) -> AuthError {
    if error.is_unauthorized() || matches!(error, DispatchError::Renewal(_)) {
        return AuthError::NotAuthenticated;
    }
    match (error.status(), error.detail()) {
        (Some(status), Some(detail)) => AuthError::Backend { status, detail },
        _ => AuthError::Connection { source: error },
    }
}
