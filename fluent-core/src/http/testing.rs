//! In-memory transport for exercising policies without a network.

use crate::common::HttpError;
use crate::http::request::{HttpRequest, HttpResponse};
use crate::http::transport::HttpClient;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

type Handler = dyn Fn(&HttpRequest, usize) -> Result<HttpResponse, HttpError> + Send + Sync;

/// Transport answering from a closure and recording every request it sees.
///
/// The closure receives the request and the zero-based index of the call.
pub struct MockTransport {
    handler: Box<Handler>,
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest, usize) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer with `responses` in order, repeating the last one
    pub fn sequence(responses: Vec<HttpResponse>) -> Self {
        Self::new(move |_, index| {
            responses
                .get(index)
                .or_else(|| responses.last())
                .cloned()
                .ok_or_else(|| HttpError::InvalidResponse {
                    expected: "scripted response".to_string(),
                    actual: "empty script".to_string(),
                })
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HttpClient for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        (self.handler)(request, index)
    }
}

