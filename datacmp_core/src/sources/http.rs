use super::{rows_from_json, SourceDescriptor};
use async_trait::async_trait;
use datacmp_common::{
    AccessError, ConfigurationError, DataSource, Row, SourceBase, ValidationError,
};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct HttpOptions {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    rows_pointer: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// JSON endpoint returning an array of row objects, either as the whole body
/// or at a JSON pointer inside it
#[derive(Debug, Clone)]
pub struct HttpSource {
    base: SourceBase,
    url: String,
    method: Method,
    headers: BTreeMap<String, String>,
    body: Option<String>,
    rows_pointer: Option<String>,
}

impl HttpSource {
    pub const KIND: &'static str = "http";

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            base: SourceBase::default(),
            url: url.into(),
            method: Method::GET,
            headers: BTreeMap::new(),
            body: None,
            rows_pointer: None,
        }
    }

    pub fn with_base(mut self, base: SourceBase) -> Self {
        self.base = base;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_rows_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.rows_pointer = Some(pointer.into());
        self
    }

    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Result<Self, ConfigurationError> {
        let options: HttpOptions = descriptor.options()?;
        let method = match options.method.to_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            other => {
                return Err(ConfigurationError::InvalidSourceOptions {
                    kind: Self::KIND.to_string(),
                    reason: format!("unsupported method '{}'", other),
                })
            }
        };

        Ok(Self {
            base: descriptor.base(),
            url: options.url,
            method,
            headers: options.headers,
            body: options.body,
            rows_pointer: options.rows_pointer,
        })
    }

    fn parsed_url(&self) -> Result<Url, String> {
        if self.url.trim().is_empty() {
            return Err("no URL configured".to_string());
        }
        let url = Url::parse(&self.url).map_err(|e| format!("invalid URL '{}': {}", self.url, e))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(format!("unsupported URL scheme '{}'", other)),
        }
    }

    // A fresh client per call keeps each operation self-contained
    fn create_client() -> reqwest::Result<Client> {
        Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
    }

    fn request(&self, client: &Client, method: Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = client.request(method.clone(), url);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if method == Method::POST {
            if let Some(body) = &self.body {
                builder = builder
                    .header("Content-Type", "application/json")
                    .body(body.clone());
            }
        }
        builder
    }

    fn extract_rows(&self, document: serde_json::Value) -> Result<Vec<Row>, AccessError> {
        let rows = match &self.rows_pointer {
            Some(pointer) => document
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| AccessError::new(format!("response has nothing at '{}'", pointer)))?,
            None => document,
        };
        rows_from_json(rows, &self.url)
    }
}

#[async_trait]
impl DataSource for HttpSource {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn describe(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    fn base(&self) -> &SourceBase {
        &self.base
    }

    async fn validate(&self) -> Result<(), ValidationError> {
        let url = self.parsed_url().map_err(ValidationError::new)?;
        let client = Self::create_client()
            .map_err(|e| ValidationError::new(format!("failed to create HTTP client: {}", e)))?;

        let mut status = self
            .request(&client, Method::HEAD, url.clone())
            .send()
            .await
            .map_err(|e| ValidationError::new(format!("{} is unreachable: {}", self.url, e)))?
            .status();

        // Endpoints that refuse HEAD are retried with the configured method
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
            status = self
                .request(&client, self.method.clone(), url)
                .send()
                .await
                .map_err(|e| ValidationError::new(format!("{} is unreachable: {}", self.url, e)))?
                .status();
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ValidationError::new(format!("{} denied access ({})", self.url, status)));
        }
        if status.is_server_error() || status == StatusCode::NOT_FOUND {
            return Err(ValidationError::new(format!("{} answered {}", self.url, status)));
        }
        Ok(())
    }

    async fn fetch_rows(&self) -> Result<Vec<Row>, AccessError> {
        let url = self.parsed_url().map_err(AccessError::new)?;
        let client = Self::create_client()
            .map_err(|e| AccessError::with_cause("failed to create HTTP client", e))?;

        let response = self
            .request(&client, self.method.clone(), url)
            .send()
            .await
            .map_err(|e| AccessError::with_cause(format!("request to {} failed", self.url), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AccessError::new(format!("{} answered {}", self.url, status)));
        }

        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AccessError::with_cause(format!("{} did not return JSON", self.url), e))?;

        let rows = self.extract_rows(document)?;
        debug!("Fetched {} rows from {}", rows.len(), self.url);
        Ok(rows)
    }
}
