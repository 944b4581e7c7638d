// 🧪 Scripted transport for unit tests
//
// Responses are queued per (method, path). The last queued response for a
// route keeps answering once the queue is drained. Unknown routes get a 404.

use crate::client::{ApiError, ApiResponse, Query, Transport};
use reqwest::Method;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RecordedCall {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct Route {
    method: Method,
    path: String,
    responses: VecDeque<Result<ApiResponse, ApiError>>,
}

#[derive(Default)]
pub struct MockTransport {
    routes: RefCell<Vec<Route>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON response for a route
    pub fn on(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        self.push(method, path, Ok(ApiResponse::new(status, body.to_string())))
    }

    /// Queue a raw text response for a route
    pub fn on_text(&self, method: Method, path: &str, status: u16, body: &str) -> &Self {
        self.push(method, path, Ok(ApiResponse::new(status, body)))
    }

    /// Queue a transport-level failure for a route
    pub fn on_error(&self, method: Method, path: &str, error: ApiError) -> &Self {
        self.push(method, path, Err(error))
    }

    fn push(&self, method: Method, path: &str, response: Result<ApiResponse, ApiError>) -> &Self {
        let mut routes = self.routes.borrow_mut();
        match routes.iter_mut().find(|r| r.method == method && r.path == path) {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method,
                path: path.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<RecordedCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .cloned()
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        method: Method,
        endpoint: &str,
        query: &Query<'_>,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiError> {
        self.calls.borrow_mut().push(RecordedCall {
            method: method.clone(),
            path: endpoint.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            body: body.cloned(),
        });

        let mut routes = self.routes.borrow_mut();
        let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.path == endpoint)
        else {
            return Ok(ApiResponse::new(404, "{}"));
        };

        if route.responses.len() > 1 {
            route
                .responses
                .pop_front()
                .unwrap_or_else(|| Ok(ApiResponse::new(404, "{}")))
        } else {
            route
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(ApiResponse::new(404, "{}")))
        }
    }
}
