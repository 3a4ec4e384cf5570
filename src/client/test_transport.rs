use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    StatusCode,
};

use super::transport::{Transport, TransportError, TransportRequest, TransportResponse};

const TOKEN_PATH: &str = "/api/token";

type Scripted = Result<TransportResponse, TransportError>;

/// Replays queued responses in order. Requests to the token endpoint and to the API have separate queues so tests
/// don't depend on how token and API calls interleave.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    token_responses: Mutex<VecDeque<Scripted>>,
    api_responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<TransportRequest>>,
    yielding: bool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport that yields to the runtime before every response, like a real network call would.
    pub fn yielding() -> Arc<Self> {
        Arc::new(Self {
            yielding: true,
            ..Default::default()
        })
    }

    pub fn push_token_json(&self, status: u16, body: &str) {
        push(&self.token_responses, Ok(response(status, &[], body)));
    }

    pub fn push_token_network_error(&self, message: &str) {
        push(&self.token_responses, Err(TransportError::new(message)));
    }

    pub fn push_json(&self, status: u16, body: &str) {
        self.push_response(status, &[], body);
    }

    pub fn push_response(&self, status: u16, headers: &[(&str, &str)], body: &str) {
        push(&self.api_responses, Ok(response(status, headers, body)));
    }

    pub fn push_network_error(&self, message: &str) {
        push(&self.api_responses, Err(TransportError::new(message)));
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn token_requests(&self) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.path() == TOKEN_PATH)
            .collect()
    }

    pub fn api_requests(&self) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.path() != TOKEN_PATH)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let queue = if request.url.path() == TOKEN_PATH {
            &self.token_responses
        } else {
            &self.api_responses
        };

        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        if self.yielding {
            tokio::task::yield_now().await;
        }

        let next = queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| panic!("no scripted response left for {url}"))
    }
}

fn push(queue: &Mutex<VecDeque<Scripted>>, scripted: Scripted) {
    queue.lock().unwrap().push_back(scripted);
}

fn response(status: u16, headers: &[(&str, &str)], body: &str) -> TransportResponse {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        header_map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    TransportResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: header_map,
        body: body.as_bytes().to_vec(),
    }
}
