use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::{FetchError, SnapshotSource};

/// Reads snapshots with `GET` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
	client: reqwest::Client,
	url: String,
	bearer_token: Option<String>,
}

impl HttpSnapshotSource {
	/// Source reading `url`, failing requests that take longer than `timeout`.
	pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|err| FetchError::Transport(err.to_string()))?;
		Ok(Self {
			client,
			url: url.into(),
			bearer_token: None,
		})
	}

	/// Sends `Authorization: Bearer <token>` with every request.
	pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
		self.bearer_token = Some(token.into());
		self
	}

	/// Endpoint being read.
	pub fn url(&self) -> &str {
		&self.url
	}
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
	async fn fetch(&self) -> Result<Value, FetchError> {
		let mut request = self.client.get(&self.url).header(reqwest::header::ACCEPT, "application/json");
		if let Some(token) = &self.bearer_token {
			request = request.bearer_auth(token);
		}

		let response = request.send().await.map_err(request_error)?;
		let status = response.status();
		trace!(target: "kettle::sync", url = %self.url, status = status.as_u16(), "Snapshot response");
		if !status.is_success() {
			return Err(FetchError::Status(status.as_u16()));
		}
		response
			.json::<Value>()
			.await
			.map_err(|err| FetchError::Malformed(err.to_string()))
	}
}

fn request_error(err: reqwest::Error) -> FetchError {
	if err.is_timeout() {
		FetchError::Timeout
	} else {
		FetchError::Transport(err.to_string())
	}
}
