use super::events::SessionEvent;
use super::renewal::{
    Admission, LeaderGuard, RenewalPhase, RenewalResult, RenewalState, lock_state,
};
use super::request::{ApiRequest, ApiResponse, bearer_header};
use super::transport::Transport;
use crate::config::{AuthConfig, endpoint_path};
use crate::credential_store::CredentialStore;
use crate::errors::{DispatchError, RenewalError};
use crate::models::{RefreshResponse, token_preview};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

type ExpiryHook = Box<dyn Fn(&RenewalError) + Send + Sync>;

/// Sends API requests with the current access token and transparently
/// renews it when the backend answers 401.
///
/// All requests that fail during one expiry wave share a single renewal
/// call; each request is retried at most once.
pub struct Dispatcher<T> {
    transport: T,
    store: Arc<dyn CredentialStore>,
    refresh_path: String,
    excluded_paths: Vec<String>,
    renewal: Mutex<RenewalState>,
    events: broadcast::Sender<SessionEvent>,
    expiry_hook: Option<ExpiryHook>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, store: Arc<dyn CredentialStore>, auth: &AuthConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            store,
            refresh_path: auth.refresh_path.clone(),
            excluded_paths: auth.renewal_excluded_paths(),
            renewal: Mutex::new(RenewalState::default()),
            events,
            expiry_hook: None,
        }
    }

    /// Registers a callback run once per failed renewal, after the session is cleared.
    pub fn on_session_expired<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RenewalError) + Send + Sync + 'static,
    {
        self.expiry_hook = Some(Box::new(hook));
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn renewal_phase(&self) -> RenewalPhase {
        lock_state(&self.renewal).phase()
    }

    /// Requests currently parked behind an in-flight renewal.
    pub fn queued_requests(&self) -> usize {
        lock_state(&self.renewal).queued()
    }

    pub fn renewals_started(&self) -> u64 {
        lock_state(&self.renewal).renewals_started()
    }

    pub async fn dispatch(&self, mut request: ApiRequest) -> Result<ApiResponse, DispatchError> {
        let sent_with = self.attach_credentials(&mut request);
        tracing::debug!(
            "{} {} (authenticated: {})",
            request.method(),
            request.path(),
            sent_with.is_some()
        );

        let response = self.transport.send(&request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return response.into_result();
        }

        if request.is_retried() {
            tracing::debug!("401 on an already retried request to {}", request.path());
            return response.into_result();
        }
        if self.is_auth_endpoint(request.path()) {
            tracing::debug!("401 from auth endpoint {}, not renewing", request.path());
            return response.into_result();
        }

        let token = match self.admit(sent_with.as_ref()) {
            Admission::Leader => self.lead_renewal().await?,
            Admission::Queued { ticket, resume } => {
                tracing::debug!(ticket, "Renewal in flight, queueing {}", request.path());
                resume.await.map_err(|_| RenewalError::Abandoned)??
            }
            Admission::Current(token) => {
                tracing::debug!("Token already renewed, retrying {}", request.path());
                token
            }
            Admission::SessionEnded => {
                tracing::debug!("Session ended while {} was in flight", request.path());
                return response.into_result();
            }
        };

        request.mark_retried();
        if !request.set_bearer(&token) {
            // never resend the rejected credential
            return response.into_result();
        }
        self.transport.send(&request).await?.into_result()
    }

    /// Dispatches and decodes a JSON response body.
    pub async fn dispatch_json<R: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<R, DispatchError> {
        self.dispatch(request).await?.json()
    }

    fn attach_credentials(&self, request: &mut ApiRequest) -> Option<SecretString> {
        let token = self.store.access_token()?;
        request.set_bearer(&token).then_some(token)
    }

    /// Absolute URLs may carry the API base path in front of the endpoint,
    /// so they match on a trailing path.
    fn is_auth_endpoint(&self, path: &str) -> bool {
        let absolute = path.starts_with("http://") || path.starts_with("https://");
        let path = endpoint_path(path);
        self.excluded_paths.iter().any(|excluded| {
            path == *excluded || (absolute && excluded != "/" && path.ends_with(excluded.as_str()))
        })
    }

    fn admit(&self, sent_with: Option<&SecretString>) -> Admission {
        let mut state = lock_state(&self.renewal);
        if state.phase() == RenewalPhase::Idle {
            match (sent_with, self.store.access_token()) {
                (Some(sent), Some(current)) if sent.expose_secret() != current.expose_secret() => {
                    return Admission::Current(current);
                }
                (Some(_), None) => return Admission::SessionEnded,
                _ => {}
            }
        }
        state.admit()
    }

    async fn lead_renewal(&self) -> RenewalResult {
        let leader = LeaderGuard::new(&self.renewal);
        tracing::info!("Access token rejected, renewing session");

        let outcome = self.request_new_tokens().await;

        let result = {
            let mut state = leader.finish();
            let result = match outcome {
                Ok((access, refresh)) => {
                    self.store.stage_tokens(Some(access.clone()), Some(refresh));
                    Ok(access)
                }
                Err(error) => {
                    self.store.stage_clear();
                    Err(error)
                }
            };
            let resumed = state.settle(&result);
            tracing::debug!(?resumed, "Resumed queued requests");
            result
        };

        // storage I/O stays outside the renewal lock
        self.store.persist();

        match &result {
            Ok(token) => {
                tracing::info!("Session renewed (token {})", token_preview(token));
                let _ = self.events.send(SessionEvent::Renewed);
            }
            Err(error) => {
                tracing::error!("Session renewal failed: {}. Logging out.", error);
                let _ = self.events.send(SessionEvent::Expired {
                    reason: error.to_string(),
                });
                if let Some(hook) = &self.expiry_hook {
                    hook(error);
                }
            }
        }

        result
    }

    /// Exchanges the refresh token for new tokens. Goes straight to the
    /// transport so a 401 here can never start another renewal.
    async fn request_new_tokens(&self) -> Result<(SecretString, SecretString), RenewalError> {
        let refresh_token = self
            .store
            .refresh_token()
            .ok_or(RenewalError::MissingRefreshToken)?;

        let mut request = ApiRequest::post(self.refresh_path.clone()).with_body(
            serde_json::json!({ "refresh_token": refresh_token.expose_secret() }),
        );
        request.set_bearer(&refresh_token);

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| RenewalError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.detail().unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("refresh rejected")
                    .to_string()
            });
            return Err(RenewalError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        let renewed: RefreshResponse =
            response
                .json()
                .map_err(|e| RenewalError::InvalidResponse {
                    message: e.to_string(),
                })?;

        if bearer_header(&renewed.access_token).is_none() {
            return Err(RenewalError::InvalidResponse {
                message: "access token is not a valid header value".to_string(),
            });
        }

        // backend may keep the refresh token unchanged
        let refresh = renewed.refresh_token.unwrap_or(refresh_token);
        Ok((renewed.access_token, refresh))
    }
}
