//! `reqwest`-backed [`HttpClient`].

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;

use crate::traits::{FetchError, HttpClient, HttpResponse};

pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Connection setup is bounded; slow bodies are left to the server.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map_err(|e| FetchError::Body(e.to_string()))
            .boxed();
        Ok(HttpResponse { status, body })
    }
}
