use super::request::{ApiRequest, ApiResponse};
use super::transport::Transport;
use crate::errors::TransportError;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;

type Reply = Result<ApiResponse, TransportError>;

/// Transport answering from per-path scripts, recording what it was sent.
/// Unscripted paths get an empty 404.
#[derive(Default)]
pub(crate) struct StubTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    sent: Mutex<Vec<ApiRequest>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, path: &str, status: u16, body: serde_json::Value) -> Self {
        let status = StatusCode::from_u16(status).unwrap();
        self.push(path, Ok(ApiResponse::from_json(status, &body)))
    }

    pub fn fail(self, path: &str) -> Self {
        self.push(
            path,
            Err(TransportError::Generic {
                message: "connection refused".to_string(),
            }),
        )
    }

    fn push(self, path: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn sent_to(&self, path: &str) -> Vec<ApiRequest> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.path() == path)
            .cloned()
            .collect()
    }
}

impl Transport for StubTransport {
    fn send(&self, request: &ApiRequest) -> impl Future<Output = Reply> + Send {
        self.sent.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(request.path())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(ApiResponse::empty(StatusCode::NOT_FOUND)));
        async move { reply }
    }
}
