//! HTTP server for the voucher issuer API.
//!
//! Routes:
//! - `GET /health`
//! - `POST /get-signature`
//! - `POST /mark-used`
//!
//! Every error body is `{"error": "<code>"}` with a stable code, including
//! unknown routes, wrong methods and timed-out requests.

use axum::{
	error_handling::HandleErrorLayer,
	extract::{rejection::JsonRejection, DefaultBodyLimit, State},
	response::Json,
	routing::{get, post},
	BoxError, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::{timeout::error::Elapsed, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use voucher_config::ApiConfig;
use voucher_core::VoucherEngine;
use voucher_types::{
	format_address, APIError, GetSignatureRequest, HealthResponse, MarkUsedRequest,
	MarkUsedResponse, VoucherResponse,
};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the voucher engine for processing requests.
	pub engine: Arc<VoucherEngine>,
}

/// Builds the router with all routes and middleware.
pub fn router(engine: Arc<VoucherEngine>, api_config: &ApiConfig) -> Router {
	let routes = Router::new()
		.route("/health", get(handle_health))
		.route("/get-signature", post(handle_get_signature))
		.route("/mark-used", post(handle_mark_used));

	with_middleware(routes, api_config).with_state(AppState { engine })
}

/// Applies fallbacks, body limit, tracing, timeout and CORS to `routes`.
///
/// Must run after every route is registered so the 405 fallback reaches them.
fn with_middleware<S>(routes: Router<S>, api_config: &ApiConfig) -> Router<S>
where
	S: Clone + Send + Sync + 'static,
{
	routes
		.fallback(handle_unknown_route)
		.method_not_allowed_fallback(handle_method_not_allowed)
		.layer(DefaultBodyLimit::max(api_config.max_request_size))
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(HandleErrorLayer::new(handle_middleware_error))
				.layer(TimeoutLayer::new(Duration::from_secs(
					api_config.timeout_seconds,
				)))
				.layer(CorsLayer::permissive()),
		)
}

/// Starts the HTTP server for the API.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<VoucherEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Voucher issuer API listening on http://{}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

async fn handle_unknown_route() -> APIError {
	APIError::RouteNotFound
}

async fn handle_method_not_allowed() -> APIError {
	APIError::MethodNotAllowed
}

/// Turns errors raised by the middleware stack into JSON error responses.
async fn handle_middleware_error(error: BoxError) -> APIError {
	if error.is::<Elapsed>() {
		tracing::warn!("Request exceeded the API timeout");
		APIError::Timeout
	} else {
		tracing::error!(error = %error, "Middleware failure");
		APIError::Internal
	}
}

/// Handles GET /health requests.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
	Json(HealthResponse {
		ok: true,
		signer: format_address(&state.engine.signer()),
	})
}

/// Handles POST /get-signature requests.
///
/// A body that is not JSON, lacks `to`, or has a non-string `to` is treated
/// like a malformed address.
async fn handle_get_signature(
	State(state): State<AppState>,
	payload: Result<Json<GetSignatureRequest>, JsonRejection>,
) -> Result<Json<VoucherResponse>, APIError> {
	let Json(request) = payload.map_err(|e| {
		tracing::debug!(error = %e, "Rejected get-signature body");
		APIError::InvalidRecipient
	})?;

	crate::apis::signature::process_signature_request(request, &state.engine)
		.await
		.map(Json)
}

/// Handles POST /mark-used requests.
async fn handle_mark_used(
	State(state): State<AppState>,
	payload: Result<Json<MarkUsedRequest>, JsonRejection>,
) -> Result<Json<MarkUsedResponse>, APIError> {
	let Json(request) = payload.map_err(|e| {
		tracing::debug!(error = %e, "Rejected mark-used body");
		APIError::InvalidNonce
	})?;

	crate::apis::consumption::process_mark_used(request, &state.engine)
		.await
		.map(Json)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::factory_registry::build_engine_from_config;
	use axum::{
		body::{to_bytes, Body},
		http::{header, Request, StatusCode},
	};
	use serde_json::{json, Value};
	use tower::ServiceExt;
	use voucher_account::verify_voucher;
	use voucher_client::VoucherClient;
	use voucher_config::builders::{ConfigBuilder, DEV_SIGNER_ADDRESS};
	use voucher_types::{
		current_timestamp, format_nonce, parse_nonce, IssuancePolicy, MarkOutcome, B256,
	};

	const TO: &str = "0xABCDEF0000000000000000000000000000001234";

	async fn engine(builder: ConfigBuilder) -> Arc<VoucherEngine> {
		Arc::new(build_engine_from_config(builder.build()).await.unwrap())
	}

	fn app(engine: &Arc<VoucherEngine>) -> Router {
		router(Arc::clone(engine), &ApiConfig::default())
	}

	async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
		let response = app.oneshot(request).await.unwrap();
		let status = response.status();
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		(status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
	}

	fn post_json(uri: &str, body: Value) -> Request<Body> {
		post_raw(uri, body.to_string())
	}

	fn post_raw(uri: &str, body: String) -> Request<Body> {
		Request::builder()
			.method("POST")
			.uri(uri)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body))
			.unwrap()
	}

	#[tokio::test]
	async fn test_health_reports_signer() {
		let engine = engine(ConfigBuilder::new()).await;
		let request = Request::get("/health").body(Body::empty()).unwrap();

		let (status, body) = call(app(&engine), request).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(
			body,
			json!({ "ok": true, "signer": DEV_SIGNER_ADDRESS.to_lowercase() })
		);
	}

	#[tokio::test]
	async fn test_get_signature_end_to_end() {
		let engine = engine(ConfigBuilder::new()).await;

		let before = current_timestamp();
		let (status, body) = call(app(&engine), post_json("/get-signature", json!({ "to": TO }))).await;
		assert_eq!(status, StatusCode::OK);

		assert_eq!(body["to"], TO.to_lowercase());
		assert_eq!(body["signer"], DEV_SIGNER_ADDRESS.to_lowercase());
		assert_eq!(body["nonce"].as_str().unwrap().len(), 2 + 64);
		assert_eq!(body["signature"].as_str().unwrap().len(), 2 + 130);
		assert_eq!(body["algorithm"], voucher_types::SIGNATURE_ALGORITHM);
		let expiry = body["expiry"].as_u64().unwrap();
		assert!(expiry >= before + 300 && expiry <= current_timestamp() + 300);

		let response: VoucherResponse = serde_json::from_value(body).unwrap();
		let voucher = response.to_voucher().unwrap();
		let signer = DEV_SIGNER_ADDRESS.parse().unwrap();
		assert_eq!(
			verify_voucher(&voucher, engine.domain(), signer, before),
			Ok(())
		);
		assert_eq!(engine.ledger().count().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_get_signature_rejects_malformed_recipient() {
		let engine = engine(ConfigBuilder::new()).await;

		let bodies = [
			json!({ "to": "not-an-address" }).to_string(),
			json!({ "to": "0x1234" }).to_string(),
			json!({ "to": 42 }).to_string(),
			json!({}).to_string(),
			"{not json".to_string(),
		];
		for body in bodies {
			let (status, response) = call(app(&engine), post_raw("/get-signature", body)).await;
			assert_eq!(status, StatusCode::BAD_REQUEST);
			assert_eq!(response, json!({ "error": "invalid to" }));
		}
		assert_eq!(engine.ledger().count().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_mark_used_replay() {
		let engine = engine(ConfigBuilder::new()).await;
		let (_, body) = call(app(&engine), post_json("/get-signature", json!({ "to": TO }))).await;
		let nonce = body["nonce"].as_str().unwrap().to_string();

		let (status, first) =
			call(app(&engine), post_json("/mark-used", json!({ "nonce": nonce }))).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(first, json!({ "ok": true }));

		let (status, second) =
			call(app(&engine), post_json("/mark-used", json!({ "nonce": nonce }))).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(second, json!({ "ok": true, "already": true }));

		let record = engine
			.ledger()
			.get(&parse_nonce(&nonce).unwrap())
			.await
			.unwrap()
			.unwrap();
		assert!(record.used);
		assert_eq!(engine.ledger().count().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_mark_used_unknown_and_malformed() {
		let engine = engine(ConfigBuilder::new()).await;

		let unknown = format_nonce(&B256::repeat_byte(0x11));
		let (status, body) =
			call(app(&engine), post_json("/mark-used", json!({ "nonce": unknown }))).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body, json!({ "error": "not found" }));

		for payload in [json!({ "nonce": "0x1234" }), json!({ "nonce": 7 }), json!({})] {
			let (status, body) = call(app(&engine), post_json("/mark-used", payload)).await;
			assert_eq!(status, StatusCode::BAD_REQUEST);
			assert_eq!(body, json!({ "error": "invalid nonce" }));
		}
	}

	#[tokio::test]
	async fn test_single_live_policy_conflict() {
		let engine = engine(ConfigBuilder::new().recipient_policy(IssuancePolicy::SingleLive)).await;

		let (status, _) = call(app(&engine), post_json("/get-signature", json!({ "to": TO }))).await;
		assert_eq!(status, StatusCode::OK);

		let (status, body) = call(app(&engine), post_json("/get-signature", json!({ "to": TO }))).await;
		assert_eq!(status, StatusCode::CONFLICT);
		assert_eq!(body, json!({ "error": "voucher already issued" }));
	}

	#[tokio::test]
	async fn test_router_errors_are_json() {
		let engine = engine(ConfigBuilder::new()).await;

		let request = Request::get("/nope").body(Body::empty()).unwrap();
		let (status, body) = call(app(&engine), request).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body, json!({ "error": "route not found" }));

		let request = Request::get("/get-signature").body(Body::empty()).unwrap();
		let (status, body) = call(app(&engine), request).await;
		assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
		assert_eq!(body, json!({ "error": "method not allowed" }));

		let (status, body) = call(app(&engine), post_json("/health", json!({}))).await;
		assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
		assert_eq!(body, json!({ "error": "method not allowed" }));
	}

	#[tokio::test(start_paused = true)]
	async fn test_slow_request_times_out_with_json() {
		let api_config = ApiConfig {
			timeout_seconds: 1,
			..ApiConfig::default()
		};
		let routes = Router::new().route(
			"/slow",
			get(|| async {
				tokio::time::sleep(Duration::from_secs(60)).await;
				"done"
			}),
		);
		let app = with_middleware(routes, &api_config);

		let request = Request::get("/slow").body(Body::empty()).unwrap();
		let (status, body) = call(app, request).await;
		assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
		assert_eq!(body, json!({ "error": "request timeout" }));
	}

	#[tokio::test]
	async fn test_cors_is_permissive() {
		let engine = engine(ConfigBuilder::new()).await;
		let request = Request::get("/health")
			.header(header::ORIGIN, "https://mint.example")
			.body(Body::empty())
			.unwrap();

		let response = app(&engine).oneshot(request).await.unwrap();
		assert_eq!(
			response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
			"*"
		);
	}

	#[tokio::test]
	async fn test_client_against_live_server() {
		let engine = engine(ConfigBuilder::new()).await;
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let app = app(&engine);
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});

		let client = VoucherClient::new(format!("http://{}", addr)).unwrap();
		let health = client.health().await.unwrap();
		assert!(health.ok);

		let signer = DEV_SIGNER_ADDRESS.parse().unwrap();
		let to = TO.parse().unwrap();
		let voucher = client
			.request_verified_voucher(&to, engine.domain(), signer)
			.await
			.unwrap();

		assert_eq!(
			client.mark_used(&voucher.nonce).await.unwrap(),
			MarkOutcome::Consumed
		);
		assert_eq!(
			client.mark_used(&voucher.nonce).await.unwrap(),
			MarkOutcome::AlreadyConsumed
		);
		assert_eq!(
			client.mark_used(&B256::repeat_byte(0x22)).await.unwrap(),
			MarkOutcome::NotFound
		);

		let second = client.request_voucher(&to).await.unwrap();
		client
			.report_used_in_background(second.nonce)
			.await
			.unwrap();
		let record = engine.ledger().get(&second.nonce).await.unwrap().unwrap();
		assert!(record.used);
	}
}
