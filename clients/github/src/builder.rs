use std::time::Duration;

use chronicle::api::{Error, Result};
use chronicle::context::FetchContext;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::ClientBuilder;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::gateway::Gateway;
use crate::GithubClient;

pub const DEFAULT_GITHUB_URL: &str = "https://api.github.com";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GithubClientBuilder {
    client_builder: ClientBuilder,
    github_url: String,
    headers: HeaderMap,
    max_retries: u32,
    backoff: Duration,
    timeout: Duration,
    context: FetchContext,
}

impl Default for GithubClientBuilder {
    fn default() -> Self {
        let mut headers = HeaderMap::default();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("activity-chronicle"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        Self {
            client_builder: ClientBuilder::default(),
            github_url: DEFAULT_GITHUB_URL.to_string(),
            headers,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
            timeout: DEFAULT_TIMEOUT,
            context: FetchContext::default(),
        }
    }
}

impl GithubClientBuilder {
    pub fn try_with_token(self, token: SecretString) -> Result<GithubClientBuilder> {
        let mut builder = self.try_with_header(header::AUTHORIZATION, format!("Bearer {}", token.expose_secret()))?;
        if let Some(value) = builder.headers.get_mut(header::AUTHORIZATION) {
            value.set_sensitive(true);
        }
        Ok(builder)
    }

    pub fn try_with_user_agent<STR: AsRef<str>>(self, user_agent: STR) -> Result<GithubClientBuilder> {
        Ok(self.try_with_header(header::USER_AGENT, user_agent)?)
    }

    pub fn with_github_url<STR: AsRef<str>>(mut self, url: STR) -> GithubClientBuilder {
        self.github_url = url.as_ref().to_string();
        self
    }

    /// Extra attempts after a transient failure.
    pub fn with_max_retries(mut self, max_retries: u32) -> GithubClientBuilder {
        self.max_retries = max_retries;
        self
    }

    /// Base delay, doubled on every retry.
    pub fn with_backoff(mut self, backoff: Duration) -> GithubClientBuilder {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> GithubClientBuilder {
        self.timeout = timeout;
        self
    }

    pub fn with_context(mut self, context: FetchContext) -> GithubClientBuilder {
        self.context = context;
        self
    }

    fn try_with_header(mut self, key: HeaderName, val: impl AsRef<str>) -> anyhow::Result<GithubClientBuilder> {
        let val = HeaderValue::from_str(val.as_ref())?;
        self.headers.insert(key, val);
        Ok(self)
    }

    pub fn build(self) -> Result<GithubClient> {
        let github_url = Url::parse(&self.github_url)
            .map_err(|err| Error::Configuration(format!("invalid API URL {}: {}", self.github_url, err)))?;
        let client = self
            .client_builder
            .default_headers(self.headers)
            .timeout(self.timeout)
            .build()
            .map_err(|err| Error::Configuration(err.to_string()))?;
        let gateway = Gateway::new(
            client,
            github_url.as_str().to_string(),
            self.context,
            self.max_retries,
            self.backoff,
        );
        Ok(GithubClient::new(gateway))
    }
}

#[test]
fn invalid_url_rejected() {
    let result = GithubClientBuilder::default().with_github_url("not a url").build();
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn invalid_token_rejected() {
    let result = GithubClientBuilder::default().try_with_token(SecretString::new("bad\ntoken".to_string()));
    assert!(matches!(result, Err(Error::Other(_))));
}

#[test]
fn context_shared_with_caller() {
    use chronicle::api::Client;

    let context = FetchContext::new();
    let client = GithubClientBuilder::default()
        .with_context(context.clone())
        .build()
        .unwrap();
    context.mark_rate_limit_hit();
    assert!(client.context().rate_limit_hit());
}
