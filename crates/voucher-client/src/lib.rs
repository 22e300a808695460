//! HTTP client for the voucher issuer.
//!
//! Used by whatever submits the on-chain transaction: it requests a voucher,
//! optionally checks it locally before spending gas, and reports the nonce as
//! consumed once the transaction lands. Consumption reports are best effort
//! and run as a background task with bounded retries, so a flaky issuer never
//! blocks the caller's own success path.

use backoff::ExponentialBackoffBuilder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use voucher_account::verify_voucher;
use voucher_types::{
	current_timestamp, format_address, format_nonce, truncate_id, Address, ErrorResponse,
	GetSignatureRequest, HealthResponse, MarkOutcome, MarkUsedRequest, MarkUsedResponse, Nonce,
	Voucher, VoucherDomain, VoucherResponse,
};

/// Default issuer address used by local deployments.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8787";

/// Errors returned by [`VoucherClient`].
#[derive(Debug, Error)]
pub enum ClientError {
	#[error("Configuration error: {0}")]
	Config(String),
	/// The request never produced a response (connect failure, timeout).
	#[error("HTTP error: {0}")]
	Http(String),
	/// The issuer answered with an error status.
	#[error("Issuer returned {status}: {error}")]
	Api { status: u16, error: String },
	/// The issuer answered 2xx with a body that does not parse.
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	/// The voucher failed local verification.
	#[error("Voucher rejected: {0}")]
	Rejected(String),
}

impl ClientError {
	/// Whether retrying the same request may succeed.
	pub fn is_transient(&self) -> bool {
		match self {
			ClientError::Http(_) => true,
			ClientError::Api { status, .. } => *status >= 500,
			_ => false,
		}
	}
}

/// Exponential backoff applied to idempotent requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub initial_interval: Duration,
	pub max_interval: Duration,
	pub multiplier: f64,
	/// Total time budget across all attempts.
	pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			initial_interval: Duration::from_millis(200),
			max_interval: Duration::from_secs(5),
			multiplier: 2.0,
			max_elapsed: Duration::from_secs(30),
		}
	}
}

impl RetryPolicy {
	fn backoff(&self) -> backoff::ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.initial_interval)
			.with_max_interval(self.max_interval)
			.with_multiplier(self.multiplier)
			.with_max_elapsed_time(Some(self.max_elapsed))
			.build()
	}
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub base_url: String,
	/// Timeout of a single HTTP request.
	pub request_timeout: Duration,
	pub retry: RetryPolicy,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			base_url: DEFAULT_BASE_URL.to_string(),
			request_timeout: Duration::from_secs(10),
			retry: RetryPolicy::default(),
		}
	}
}

/// Client for the issuer's HTTP API.
#[derive(Debug, Clone)]
pub struct VoucherClient {
	http: reqwest::Client,
	base_url: String,
	request_timeout: Duration,
	retry: RetryPolicy,
}

impl VoucherClient {
	/// Creates a client for `base_url` with default timeouts and retries.
	pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
		Self::with_config(ClientConfig {
			base_url: base_url.into(),
			..ClientConfig::default()
		})
	}

	pub fn with_config(config: ClientConfig) -> Result<Self, ClientError> {
		let base_url = config.base_url.trim_end_matches('/').to_string();
		if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
			return Err(ClientError::Config(format!(
				"Base URL must start with http:// or https://: {}",
				base_url
			)));
		}

		let http = reqwest::Client::builder()
			.timeout(config.request_timeout)
			.build()
			.map_err(|e| ClientError::Config(format!("Failed to build client: {}", e)))?;

		Ok(Self {
			http,
			base_url,
			request_timeout: config.request_timeout,
			retry: config.retry,
		})
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	/// `GET /health`.
	pub async fn health(&self) -> Result<HealthResponse, ClientError> {
		let response = self
			.http
			.get(self.url("/health"))
			.send()
			.await
			.map_err(|e| ClientError::Http(format!("GET /health failed: {}", e)))?;
		decode(response).await
	}

	/// `POST /get-signature`.
	///
	/// Issuance is not idempotent, so this makes exactly one attempt.
	pub async fn request_voucher(&self, to: &Address) -> Result<Voucher, ClientError> {
		let body = GetSignatureRequest {
			to: format_address(to),
		};
		let response: VoucherResponse = self.post("/get-signature", &body).await?;
		response
			.to_voucher()
			.map_err(|e| ClientError::InvalidResponse(e.to_string()))
	}

	/// Requests a voucher and checks it the way the consuming contract will.
	pub async fn request_verified_voucher(
		&self,
		to: &Address,
		domain: &VoucherDomain,
		expected_signer: Address,
	) -> Result<Voucher, ClientError> {
		let voucher = self.request_voucher(to).await?;
		if voucher.recipient != *to {
			return Err(ClientError::Rejected(format!(
				"issued for {}, requested for {}",
				voucher.recipient, to
			)));
		}
		verify_voucher(&voucher, domain, expected_signer, current_timestamp())
			.map_err(|e| ClientError::Rejected(e.to_string()))?;
		Ok(voucher)
	}

	/// `POST /mark-used`, retried with backoff on transient failures.
	///
	/// An unknown nonce is an outcome, not an error.
	pub async fn mark_used(&self, nonce: &Nonce) -> Result<MarkOutcome, ClientError> {
		let body = MarkUsedRequest {
			nonce: format_nonce(nonce),
		};

		let (this, body) = (self, &body);
		let result = backoff::future::retry_notify(
			self.retry.backoff(),
			move || async move {
				this.post::<_, MarkUsedResponse>("/mark-used", body)
					.await
					.map_err(|e| {
						if e.is_transient() {
							backoff::Error::transient(e)
						} else {
							backoff::Error::permanent(e)
						}
					})
			},
			|e: ClientError, wait: Duration| {
				tracing::debug!(error = %e, retry_in_ms = wait.as_millis() as u64, "Retrying mark-used");
			},
		)
		.await;

		match result {
			Ok(response) if response.already == Some(true) => Ok(MarkOutcome::AlreadyConsumed),
			Ok(_) => Ok(MarkOutcome::Consumed),
			Err(ClientError::Api { status: 404, .. }) => Ok(MarkOutcome::NotFound),
			Err(e) => Err(e),
		}
	}

	/// Reports `nonce` as consumed without making the caller wait.
	///
	/// The returned handle can be awaited or dropped; the outcome is only
	/// logged. The task stops once the retry budget plus one request timeout
	/// has elapsed.
	pub fn report_used_in_background(&self, nonce: Nonce) -> JoinHandle<()> {
		let client = self.clone();
		let deadline = self.retry.max_elapsed + self.request_timeout;

		tokio::spawn(async move {
			let id = truncate_id(&nonce.to_string());
			match tokio::time::timeout(deadline, client.mark_used(&nonce)).await {
				Ok(Ok(MarkOutcome::NotFound)) => {
					tracing::warn!(nonce = %id, "Issuer does not know nonce")
				}
				Ok(Ok(outcome)) => tracing::debug!(nonce = %id, ?outcome, "Reported nonce used"),
				Ok(Err(e)) => tracing::warn!(nonce = %id, error = %e, "Failed to report nonce used"),
				Err(_) => tracing::warn!(nonce = %id, "Timed out reporting nonce used"),
			}
		})
	}

	async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
	where
		B: Serialize + ?Sized,
		R: DeserializeOwned,
	{
		let response = self
			.http
			.post(self.url(path))
			.json(body)
			.send()
			.await
			.map_err(|e| ClientError::Http(format!("POST {} failed: {}", path, e)))?;
		decode(response).await
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}
}

/// Decodes a 2xx body as `R`, anything else as [`ClientError::Api`].
async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ClientError> {
	let status = response.status();
	if status.is_success() {
		return response
			.json()
			.await
			.map_err(|e| ClientError::InvalidResponse(e.to_string()));
	}

	let error = match response.json::<ErrorResponse>().await {
		Ok(body) => body.error,
		Err(_) => status
			.canonical_reason()
			.unwrap_or("unknown error")
			.to_string(),
	};
	Err(ClientError::Api {
		status: status.as_u16(),
		error,
	})
}
