use std::time::Duration;

use log::{debug, error, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use chronicle::api::{Error, Result};
use chronicle::context::FetchContext;

use crate::limiter::{read_header, RateLimiter};
use crate::payload::GraphqlResponse;

const GRAPHQL_PATH: &str = "graphql";
const RATE_LIMITED: &str = "RATE_LIMITED";

/// One call to the API and how its outcome should be treated.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Relative to the API root.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub parse_json: bool,
    pub raise_on_rate_limit: bool,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        ApiRequest {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
            parse_json: true,
            raise_on_rate_limit: false,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        ApiRequest {
            method: Method::POST,
            body: Some(body),
            ..ApiRequest::get(path)
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn queries(mut self, pairs: &[(String, String)]) -> Self {
        self.query.extend(pairs.iter().cloned());
        self
    }

    pub fn text(mut self) -> Self {
        self.parse_json = false;
        self
    }

    pub fn raise_on_rate_limit(mut self) -> Self {
        self.raise_on_rate_limit = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

/// Single entry point for every API call: retries, rate limit classification and body parsing.
pub struct Gateway {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    context: FetchContext,
    max_retries: u32,
    backoff: Duration,
}

impl Gateway {
    pub(crate) fn new(
        client: reqwest::Client,
        base_url: String,
        context: FetchContext,
        max_retries: u32,
        backoff: Duration,
    ) -> Self {
        Gateway {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::default(),
            context,
            max_retries,
            backoff,
        }
    }

    pub fn context(&self) -> &FetchContext {
        &self.context
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// `None` when the call was given up: transient failures outlived the retries, or the quota ran out and the
    /// request did not ask to raise.
    pub async fn call(&self, request: &ApiRequest) -> Result<Option<Payload>> {
        let mut attempt = 0;
        loop {
            match self.attempt(request).await {
                Ok(payload) => return Ok(Some(payload)),
                Err(Error::Transient(message)) if attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        "{} {} failed: {}. Retry {}/{} in {:?}",
                        request.method, request.path, message, attempt + 1, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Error::Transient(message)) => {
                    error!(
                        "{} {} failed after {} attempts: {}",
                        request.method,
                        request.path,
                        attempt + 1,
                        message
                    );
                    return Ok(None);
                }
                Err(Error::RateLimitExceeded) if !request.raise_on_rate_limit => {
                    warn!("Rate limit exceeded on {}, skipping", request.path);
                    self.context.mark_rate_limit_hit();
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Deserializes the JSON body of a call.
    pub async fn call_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<Option<T>> {
        match self.call(request).await? {
            Some(Payload::Json(json)) => serde_json::from_value(json)
                .map(Some)
                .map_err(|err| Error::MalformedResponse(format!("{}: {}", request.path, err))),
            Some(Payload::Text(_)) => Err(Error::MalformedResponse(format!(
                "{}: body is not JSON",
                request.path
            ))),
            None => Ok(None),
        }
    }

    /// Runs a GraphQL query and returns its `data`. Errors next to data are logged, errors without data fail.
    pub async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<Option<T>> {
        let request = ApiRequest::post(GRAPHQL_PATH, json!({ "query": query, "variables": variables }));
        let response: Option<GraphqlResponse<T>> = self.call_json(&request).await?;
        let response = match response {
            Some(response) => response,
            None => return Ok(None),
        };
        let messages: Vec<&str> = response.errors.iter().map(|err| err.message.as_str()).collect();
        match response.data {
            Some(data) => {
                if !messages.is_empty() {
                    warn!("GraphQL returned partial data: {}", messages.join("; "));
                }
                Ok(Some(data))
            }
            None => Err(Error::RequestFailed(format!("GraphQL errors: {}", messages.join("; ")))),
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<Payload> {
        let url = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));
        debug!("{} {} {:?}", request.method, url, request.query);
        let mut builder = self.client.request(request.method.clone(), &url).query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(classify_transport)?;
        self.limiter.update(response.headers()).await;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &headers, &body));
        }
        if !request.parse_json {
            return Ok(Payload::Text(body));
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(json) if is_graphql_rate_limited(&json) => Err(Error::RateLimitExceeded),
            Ok(json) => Ok(Payload::Json(json)),
            Err(err) => {
                debug!("Body of {} is not JSON ({}), returning text", request.path, err);
                Ok(Payload::Text(body))
            }
        }
    }
}

fn classify_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::Transient(err.to_string())
    } else {
        Error::RequestFailed(err.to_string())
    }
}

fn classify_status(status: StatusCode, headers: &HeaderMap<HeaderValue>, body: &str) -> Error {
    let quota_spent = read_header::<u32>(headers, "x-ratelimit-remaining").map_or(false, |remaining| remaining == 0);
    let rate_limit_message = body.to_lowercase().contains("rate limit");
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimitExceeded,
        StatusCode::FORBIDDEN if quota_spent || rate_limit_message => Error::RateLimitExceeded,
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Error::Transient(format!("HTTP {}", status)),
        _ => Error::RequestFailed(format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>())),
    }
}

fn is_graphql_rate_limited(json: &Value) -> bool {
    json.get("errors")
        .and_then(Value::as_array)
        .map_or(false, |errors| {
            errors
                .iter()
                .any(|err| err.get("type").and_then(Value::as_str) == Some(RATE_LIMITED))
        })
}
