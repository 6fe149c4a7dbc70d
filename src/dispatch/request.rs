use crate::errors::{DispatchError, extract_detail};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Outbound API call.
///
/// The request carries its own "already retried" marker so that each logical
/// request is retried at most once after a credential renewal.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn json<B: Serialize>(self, body: &B) -> Result<Self, DispatchError> {
        Ok(self.with_body(serde_json::to_value(body)?))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    /// Sets `Authorization: Bearer <token>`; returns false if the token cannot
    /// be carried in a header.
    pub(crate) fn set_bearer(&mut self, token: &SecretString) -> bool {
        match bearer_header(token) {
            Some(value) => {
                self.headers.insert(AUTHORIZATION, value);
                true
            }
            None => {
                tracing::warn!("Access token contains characters not allowed in a header");
                false
            }
        }
    }

    /// Token currently carried in the `Authorization` header, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }
}

/// `Bearer <token>` as a sensitive header value, if the token fits in a header.
pub(crate) fn bearer_header(token: &SecretString) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret())).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Response received from the backend, body fully buffered.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Vec::new())
    }

    pub fn from_json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self::new(status, HeaderMap::new(), body.to_string().into_bytes())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Backend error message carried in the body, if any.
    pub fn detail(&self) -> Option<String> {
        extract_detail(&self.text())
    }

    /// Success and redirection pass through, every other status becomes
    /// [`DispatchError::Status`] with the body preserved.
    pub fn into_result(self) -> Result<Self, DispatchError> {
        if self.status.is_success() || self.status.is_redirection() {
            Ok(self)
        } else {
            Err(DispatchError::Status {
                status: self.status,
                body: self.text(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::get("/menu")
            .query("page", "2")
            .header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("abc"),
            );

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.path(), "/menu");
        assert_eq!(request.query_pairs(), &[("page".to_string(), "2".to_string())]);
        assert_eq!(request.headers().get("x-trace").unwrap(), "abc");
        assert!(request.body().is_none());
        assert!(!request.is_retried());
        assert!(request.bearer_token().is_none());
    }

    #[test]
    fn test_set_bearer_is_sensitive() {
        let mut request = ApiRequest::post("/menu").with_body(json!({"name": "Home"}));
        assert!(request.set_bearer(&SecretString::new("T1".to_string())));

        assert_eq!(request.bearer_token(), Some("T1"));
        assert!(request.headers().get(AUTHORIZATION).unwrap().is_sensitive());
        assert!(!format!("{:?}", request).contains("T1"));
    }

    #[test]
    fn test_set_bearer_rejects_invalid_header_value() {
        let mut request = ApiRequest::get("/menu");
        assert!(!request.set_bearer(&SecretString::new("bad\ntoken".to_string())));
        assert!(request.bearer_token().is_none());
    }

    #[test]
    fn test_json_body() {
        #[derive(Serialize)]
        struct Menu {
            name: String,
        }

        let request = ApiRequest::put("/menu/1")
            .json(&Menu {
                name: "Docs".to_string(),
            })
            .unwrap();
        assert_eq!(request.body(), Some(&json!({"name": "Docs"})));
    }

    #[test]
    fn test_into_result() {
        assert!(ApiResponse::empty(StatusCode::OK).into_result().is_ok());
        assert!(
            ApiResponse::empty(StatusCode::NOT_MODIFIED)
                .into_result()
                .is_ok()
        );

        let error = ApiResponse::from_json(StatusCode::NOT_FOUND, &json!({"detail": "missing"}))
            .into_result()
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(error.detail().as_deref(), Some("missing"));
    }

    #[test]
    fn test_response_json() {
        let response = ApiResponse::from_json(StatusCode::OK, &json!({"valid": true}));
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["valid"], true);

        let broken = ApiResponse::new(StatusCode::OK, HeaderMap::new(), b"nope".to_vec());
        assert!(matches!(
            broken.json::<serde_json::Value>(),
            Err(DispatchError::Decode { .. })
        ));
    }
}
