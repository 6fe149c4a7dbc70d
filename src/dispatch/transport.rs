use super::request::{ApiRequest, ApiResponse};
use crate::config::Config;
use crate::errors::TransportError;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::future::Future;
use std::time::Duration;
use url::Url;

/// Sends a single request and buffers the response. No credential handling.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send;
}

/// [`Transport`] backed by a `reqwest` client rooted at the API base URL.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl {
            path: base_url.to_string(),
            source: e,
        })?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(format!("backoffice-client/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers)
            .timeout(timeout)
            .build()?;

        Ok(ReqwestTransport { client, base_url })
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        Self::new(config.base_url(), config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a request path against the base URL. Absolute URLs are used as is.
    pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        let invalid = |source| TransportError::InvalidUrl {
            path: path.to_string(),
            source,
        };

        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(invalid);
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };
        Url::parse(&joined).map_err(invalid)
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: &ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send {
        async move {
            let url = self.url_for(request.path())?;
            let mut builder = self
                .client
                .request(request.method().clone(), url)
                .headers(request.headers().clone());

            if !request.query_pairs().is_empty() {
                builder = builder.query(request.query_pairs());
            }
            if let Some(body) = request.body() {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?.to_vec();

            tracing::trace!("{} {} -> {}", request.method(), request.path(), status);
            Ok(ApiResponse::new(status, headers, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> ReqwestTransport {
        ReqwestTransport::new(base, Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_url_for_joins_paths() {
        let transport = transport("http://api.example.com");
        assert_eq!(
            transport.url_for("/auth/login").unwrap().as_str(),
            "http://api.example.com/auth/login"
        );
        assert_eq!(
            transport.url_for("menu/3").unwrap().as_str(),
            "http://api.example.com/menu/3"
        );
    }

    #[test]
    fn test_url_for_keeps_base_path_prefix() {
        let transport = transport("https://example.com/api/v1/");
        assert_eq!(
            transport.url_for("/users/me").unwrap().as_str(),
            "https://example.com/api/v1/users/me"
        );
    }

    #[test]
    fn test_url_for_absolute_url() {
        let transport = transport("http://api.example.com");
        assert_eq!(
            transport.url_for("https://cdn.example.com/doc.pdf").unwrap().as_str(),
            "https://cdn.example.com/doc.pdf"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ReqwestTransport::new("::not a url::", Duration::from_secs(1)),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_from_config() {
        let transport = ReqwestTransport::from_config(&Config::default()).unwrap();
        assert_eq!(transport.base_url().as_str(), "http://practicas.teclab.edu.ar/");
    }
}
