//! HTTP JSON-RPC Server
//!
//! Provides HTTP endpoint for JSON-RPC methods.

use crate::methods::{
    handle_claim_unstake, handle_finalize_record, handle_get_balance, handle_get_claimable,
    handle_get_health, handle_get_ledger, handle_get_oracle_record, handle_get_outbox_message,
    handle_get_pause_status, handle_get_request_info, handle_relay_message, parse_domain, to_json,
    RelayMessageRequest, RpcContext, RpcError,
};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stake_types::Domain;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// HTTP RPC Server
pub struct HttpRpcServer {
    context: Arc<RpcContext>,
}

impl HttpRpcServer {
    /// Create a new HTTP RPC server
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", post(handle_rpc))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP RPC server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Handle JSON-RPC request
async fn handle_rpc(
    State(context): State<Arc<RpcContext>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let result = dispatch_method(&context, &request.method, request.params);

    let response = match result {
        Ok(value) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(e) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: None,
            error: Some(JsonRpcError {
                code: e.code(),
                message: e.to_string(),
            }),
        },
    };

    (StatusCode::OK, Json(response))
}

/// Positional params of one call
struct Params(Vec<Value>);

impl Params {
    fn new(params: Value) -> Self {
        Self(serde_json::from_value(params).unwrap_or_default())
    }

    fn str(&self, index: usize, name: &str) -> Result<&str, RpcError> {
        self.0
            .get(index)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::InvalidParams(format!("Missing {}", name)))
    }

    fn u64(&self, index: usize, name: &str) -> Result<u64, RpcError> {
        self.0
            .get(index)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RpcError::InvalidParams(format!("Missing {}", name)))
    }

    /// Every domain-scoped method takes the domain first
    fn domain(&self) -> Result<Domain, RpcError> {
        parse_domain(self.str(0, "domain")?)
    }
}

/// Dispatch to appropriate method handler
fn dispatch_method(ctx: &RpcContext, method: &str, params: Value) -> Result<Value, RpcError> {
    tracing::debug!("RPC method called: {}", method);
    let params = Params::new(params);
    match method {
        "getLedger" => to_json(handle_get_ledger(ctx, params.domain()?)?),

        "getHeight" => Ok(json!(ctx.engine(params.domain()?).height())),

        "getBalance" => {
            let holder = params.str(1, "holder")?;
            Ok(json!(handle_get_balance(ctx, params.domain()?, holder)?))
        }

        "getClaimable" => {
            let stream = params.str(1, "stream")?;
            let account = params.str(2, "account")?;
            Ok(json!(handle_get_claimable(ctx, params.domain()?, stream, account)?))
        }

        "getRequestInfo" => {
            let id = params.u64(1, "request id")?;
            to_json(handle_get_request_info(ctx, params.domain()?, id)?)
        }

        "getOracleRecord" => {
            let id = params.u64(1, "record id")?;
            to_json(handle_get_oracle_record(ctx, params.domain()?, id)?)
        }

        "getPauseStatus" => to_json(handle_get_pause_status(ctx, params.domain()?)?),

        "getOutboxMessage" => {
            let nonce = params.u64(1, "nonce")?;
            to_json(handle_get_outbox_message(ctx, params.domain()?, nonce)?)
        }

        "getEpoch" => {
            let id = params.u64(1, "epoch id")?;
            to_json(ctx.engine(params.domain()?).epoch(id))
        }

        "finalizeRecord" => {
            let id = params.u64(1, "record id")?;
            to_json(handle_finalize_record(ctx, params.domain()?, id)?)
        }

        "claimUnstake" => {
            let id = params.u64(1, "request id")?;
            to_json(handle_claim_unstake(ctx, params.domain()?, id)?)
        }

        "relayMessage" => {
            let request = RelayMessageRequest {
                origin: params.domain()?,
                nonce: params.u64(1, "nonce")?,
                payload: params.str(2, "payload")?.to_string(),
                proof: params.str(3, "proof")?.to_string(),
            };
            to_json(handle_relay_message(ctx, request)?)
        }

        "getHealth" => Ok(json!(handle_get_health()?)),

        "getVersion" => Ok(json!({
            "l2-stake-version": env!("CARGO_PKG_VERSION"),
        })),

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}
