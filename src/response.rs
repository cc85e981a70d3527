use bytes::Bytes;
use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::{ResilientClient, ResilientError, Result};

impl ResilientClient {
    /// Reads the whole response body.
    pub async fn read_body(&self, response: Response) -> Result<Bytes> {
        response.bytes().await.map_err(ResilientError::Transport)
    }

    /// Reads the body and decodes it as JSON.
    pub async fn decode_json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let body = self.read_body(response).await?;
        serde_json::from_slice(&body).map_err(|err| {
            ResilientError::Decode(format!(
                "invalid JSON response: {err}; body: {}",
                String::from_utf8_lossy(&body)
            ))
        })
    }

    /// `true` for 2xx statuses.
    pub fn is_success(&self, response: &Response) -> bool {
        response.status().is_success()
    }

    /// Case-insensitive header lookup. `None` when absent or not valid UTF-8.
    pub fn header<'a>(&self, response: &'a Response, name: &str) -> Option<&'a str> {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Releases the response and its connection. Accepts `None` for symmetry
    /// with call sites that may not hold a response.
    pub fn close_response(&self, response: Option<Response>) {
        drop(response);
    }
}
