use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    BillInput, BillStatement, BillingConfig, BillingError, Consumer, DeficitPolicy,
    FixedComponent, Slab, default_consumers, run_bill,
};

const MAX_DEFAULT_CONSUMERS: usize = 1_000;

#[derive(Parser, Debug)]
#[command(
    name = "slabsplit",
    about = "Split a tiered utility bill across consumers by metered consumption"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute one bill and print it as JSON
    Compute(ComputeArgs),
    /// Serve the billing API over HTTP
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug)]
pub struct ComputeArgs {
    #[arg(
        long = "consumer",
        value_parser = parse_consumer,
        help = "Consumer reading as ID=UNITS, repeat per consumer; defaults to 401=550 402=650 403=150"
    )]
    consumers: Vec<Consumer>,
    #[arg(
        long = "consumers",
        help = "Number of default consumers to bill when no --consumer is given"
    )]
    consumer_count: Option<usize>,
    #[arg(
        long = "slab",
        value_parser = parse_slab,
        help = "Tier as UNITS:RATE:SURCHARGE_PERCENT, repeat in tier order; defaults to the standard tariff"
    )]
    slabs: Vec<Slab>,
    #[arg(
        long = "fixed",
        value_parser = parse_fixed_component,
        help = "Fixed charge as NAME=AMOUNT, repeat per charge; defaults to the standard components"
    )]
    fixed_components: Vec<FixedComponent>,
    #[arg(long, help = "Total rebate or subsidy to share out")]
    rebate: Option<Decimal>,
    #[arg(
        long,
        help = "Fail when tier capacity cannot cover total consumption instead of billing what fits"
    )]
    reject_deficit: bool,
    #[arg(long, help = "Pretty-print the JSON statement")]
    pretty: bool,
}

/// Every field is optional; anything left out falls back to the configured
/// defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BillPayload {
    slabs: Option<Vec<Slab>>,
    fixed_components: Option<Vec<FixedComponent>>,
    consumers: Option<Vec<Consumer>>,
    consumer_count: Option<usize>,
    rebate: Option<Decimal>,
    deficit_policy: Option<DeficitPolicy>,
}

/// The scalar subset of [`BillPayload`] that fits in a query string.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BillQuery {
    consumer_count: Option<usize>,
    rebate: Option<Decimal>,
    deficit_policy: Option<DeficitPolicy>,
}

impl From<BillQuery> for BillPayload {
    fn from(query: BillQuery) -> Self {
        Self {
            consumer_count: query.consumer_count,
            rebate: query.rebate,
            deficit_policy: query.deficit_policy,
            ..Self::default()
        }
    }
}

impl From<ComputeArgs> for BillPayload {
    fn from(args: ComputeArgs) -> Self {
        Self {
            slabs: non_empty(args.slabs),
            fixed_components: non_empty(args.fixed_components),
            consumers: non_empty(args.consumers),
            consumer_count: args.consumer_count,
            rebate: args.rebate,
            deficit_policy: args.reject_deficit.then_some(DeficitPolicy::Reject),
        }
    }
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    if values.is_empty() { None } else { Some(values) }
}

#[derive(Debug)]
struct BillRequest {
    input: BillInput,
    policy: DeficitPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BillResponse {
    deficit_policy: DeficitPolicy,
    #[serde(flatten)]
    statement: BillStatement,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
struct AppState {
    config: Arc<BillingConfig>,
}

pub async fn run(cli: Cli) -> Result<(), String> {
    let config = BillingConfig::default();
    match cli.command {
        Command::Compute(args) => {
            let pretty = args.pretty;
            let request = bill_request_from_payload(args.into(), &config)?;
            let response = build_bill_response(&request).map_err(|e| e.to_string())?;
            let json = if pretty {
                serde_json::to_string_pretty(&response)
            } else {
                serde_json::to_string(&response)
            }
            .map_err(|e| format!("failed to encode bill: {e}"))?;
            println!("{json}");
            Ok(())
        }
        Command::Serve { port } => run_http_server(port, config)
            .await
            .map_err(|e| format!("server error: {e}")),
    }
}

pub async fn run_http_server(port: u16, config: BillingConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = AppState {
        config: Arc::new(config),
    };
    let app = Router::new()
        .route("/api/defaults", get(defaults_handler))
        .route("/api/bill", get(bill_get_handler).post(bill_post_handler))
        .fallback(not_found_handler)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "billing API listening");
    info!("local access: http://127.0.0.1:{port}/api/bill");

    axum::serve(listener, app).await
}

async fn defaults_handler(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, state.config.as_ref())
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn bill_get_handler(
    State(state): State<AppState>,
    Query(query): Query<BillQuery>,
) -> Response {
    bill_handler_impl(query.into(), &state.config)
}

async fn bill_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<BillPayload>,
) -> Response {
    bill_handler_impl(payload, &state.config)
}

fn bill_handler_impl(payload: BillPayload, config: &BillingConfig) -> Response {
    let request = match bill_request_from_payload(payload, config) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match build_bill_response(&request) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => error_response(status_for(&err), &err.to_string()),
    }
}

fn status_for(err: &BillingError) -> StatusCode {
    match err {
        BillingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        BillingError::CapacityDeficit { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn bill_request_from_json(json: &str, config: &BillingConfig) -> Result<BillRequest, String> {
    let payload = serde_json::from_str::<BillPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    bill_request_from_payload(payload, config)
}

fn bill_request_from_payload(
    payload: BillPayload,
    config: &BillingConfig,
) -> Result<BillRequest, String> {
    let mut input = config.bill_input();
    let mut policy = config.deficit_policy;

    if let Some(v) = payload.slabs {
        input.slabs = v;
    }
    if let Some(v) = payload.fixed_components {
        input.fixed_components = v;
    }
    match (payload.consumers, payload.consumer_count) {
        (Some(_), Some(_)) => {
            return Err("consumers and consumerCount are mutually exclusive".to_string());
        }
        (Some(v), None) => input.consumers = v,
        (None, Some(count)) if count == 0 || count > MAX_DEFAULT_CONSUMERS => {
            return Err(format!(
                "consumerCount must be between 1 and {MAX_DEFAULT_CONSUMERS}"
            ));
        }
        (None, Some(count)) => input.consumers = default_consumers(count),
        (None, None) => {}
    }
    if let Some(v) = payload.rebate {
        input.rebate = v;
    }
    if let Some(v) = payload.deficit_policy {
        policy = v;
    }

    Ok(BillRequest { input, policy })
}

fn build_bill_response(request: &BillRequest) -> Result<BillResponse, BillingError> {
    let statement = run_bill(&request.input, request.policy)?;
    Ok(BillResponse {
        deficit_policy: request.policy,
        statement,
    })
}

fn parse_consumer(raw: &str) -> Result<Consumer, String> {
    let (id, units) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=UNITS, got {raw:?}"))?;
    let units = units
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid units for consumer {id:?}: {e}"))?;
    Ok(Consumer::new(id.trim(), units))
}

fn parse_slab(raw: &str) -> Result<Slab, String> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    let [units, rate, surcharge] = parts.as_slice() else {
        return Err(format!("expected UNITS:RATE:SURCHARGE_PERCENT, got {raw:?}"));
    };
    let units = units
        .parse::<u64>()
        .map_err(|e| format!("invalid slab units {units:?}: {e}"))?;
    let rate = rate
        .parse::<Decimal>()
        .map_err(|e| format!("invalid slab rate {rate:?}: {e}"))?;
    let surcharge = surcharge
        .parse::<Decimal>()
        .map_err(|e| format!("invalid slab surcharge {surcharge:?}: {e}"))?;
    Ok(Slab::new(units, rate, surcharge))
}

fn parse_fixed_component(raw: &str) -> Result<FixedComponent, String> {
    let (name, amount) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=AMOUNT, got {raw:?}"))?;
    let amount = amount
        .trim()
        .parse::<Decimal>()
        .map_err(|e| format!("invalid amount for component {name:?}: {e}"))?;
    Ok(FixedComponent::new(name.trim(), amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::default_slabs;
    use rust_decimal_macros::dec;

    async fn response_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&body).expect("body should be JSON")
    }

    fn payload(json: &str) -> BillPayload {
        serde_json::from_str(json).expect("payload should parse")
    }

    fn compute_args(argv: &[&str]) -> ComputeArgs {
        let mut full = vec!["slabsplit", "compute"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).expect("arguments should parse").command {
            Command::Compute(args) => args,
            Command::Serve { .. } => panic!("expected compute"),
        }
    }

    #[test]
    fn empty_payload_uses_configured_defaults() {
        let config = BillingConfig::default();
        let request = bill_request_from_json("{}", &config).expect("valid payload");
        assert_eq!(request.input, config.bill_input());
        assert_eq!(request.policy, DeficitPolicy::Truncate);
    }

    #[test]
    fn bill_request_from_json_parses_web_keys() {
        let json = r#"{
            "slabs": [{"unitCount": 100, "ratePerUnit": 3, "surchargePercent": "35.83"}],
            "fixedComponents": [{"name": "E", "amount": "705.34"}],
            "consumers": [{"id": "A1", "rawConsumption": 40}, {"id": "A2", "rawConsumption": 60}],
            "rebate": "12.5",
            "deficitPolicy": "reject"
        }"#;
        let request =
            bill_request_from_json(json, &BillingConfig::default()).expect("valid payload");
        assert_eq!(
            request.input.slabs,
            [Slab::new(100, dec!(3), dec!(35.83))]
        );
        assert_eq!(
            request.input.fixed_components,
            [FixedComponent::new("E", dec!(705.34))]
        );
        assert_eq!(request.input.consumers[1], Consumer::new("A2", 60));
        assert_eq!(request.input.rebate, dec!(12.5));
        assert_eq!(request.policy, DeficitPolicy::Reject);
    }

    #[test]
    fn consumer_count_expands_default_consumers() {
        let request = bill_request_from_json(r#"{"consumerCount": 4}"#, &BillingConfig::default())
            .expect("valid payload");
        let ids: Vec<&str> = request.input.consumers.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["401", "402", "403", "404"]);
    }

    #[test]
    fn consumer_count_out_of_range_is_rejected() {
        let config = BillingConfig::default();
        assert!(bill_request_from_json(r#"{"consumerCount": 0}"#, &config).is_err());
        assert!(bill_request_from_json(r#"{"consumerCount": 1001}"#, &config).is_err());
    }

    #[test]
    fn consumer_count_and_consumers_conflict() {
        let json = r#"{"consumerCount": 2, "consumers": [{"id": "x", "rawConsumption": 1}]}"#;
        let err = bill_request_from_json(json, &BillingConfig::default())
            .expect_err("must reject both");
        assert!(err.contains("mutually exclusive"));
    }

    #[test]
    fn negative_consumption_in_payload_is_rejected() {
        let json = r#"{"consumers": [{"id": "x", "rawConsumption": -5}]}"#;
        let err = bill_request_from_json(json, &BillingConfig::default())
            .expect_err("negative units");
        assert!(err.contains("Invalid API JSON payload"));
    }

    #[test]
    fn compute_args_override_defaults() {
        let args = compute_args(&[
            "--consumer",
            "101=120",
            "--consumer",
            "102=80",
            "--slab",
            "150:4.5:10",
            "--slab",
            "100:6:10",
            "--fixed",
            "A=50",
            "--rebate",
            "20",
            "--reject-deficit",
        ]);
        let request =
            bill_request_from_payload(args.into(), &BillingConfig::default()).expect("valid");
        assert_eq!(
            request.input.consumers,
            [Consumer::new("101", 120), Consumer::new("102", 80)]
        );
        assert_eq!(request.input.slabs[0], Slab::new(150, dec!(4.5), dec!(10)));
        assert_eq!(request.input.fixed_components.len(), 1);
        assert_eq!(request.input.rebate, dec!(20));
        assert_eq!(request.policy, DeficitPolicy::Reject);
    }

    #[test]
    fn compute_args_without_flags_keep_defaults() {
        let request = bill_request_from_payload(compute_args(&[]).into(), &BillingConfig::default())
            .expect("valid");
        assert_eq!(request.input.slabs, default_slabs());
        assert_eq!(request.policy, DeficitPolicy::Truncate);
    }

    #[test]
    fn malformed_cli_values_are_rejected() {
        assert!(parse_slab("198:3").is_err());
        assert!(parse_slab("x:3:1").is_err());
        assert!(parse_consumer("401").is_err());
        assert!(parse_consumer("401=-2").is_err());
        assert!(parse_fixed_component("A=abc").is_err());
        assert!(Cli::try_parse_from(["slabsplit", "compute", "--slab", "1:2"]).is_err());
    }

    #[test]
    fn billing_errors_map_to_http_statuses() {
        assert_eq!(
            status_for(&BillingError::invalid("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&BillingError::CapacityDeficit {
                demand: 2,
                capacity: 1
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn deficit_response_is_unprocessable_when_rejecting() {
        let json = r#"{
            "slabs": [{"unitCount": 5, "ratePerUnit": 1, "surchargePercent": 0}],
            "deficitPolicy": "reject"
        }"#;
        let request =
            bill_request_from_json(json, &BillingConfig::default()).expect("valid payload");
        let err = build_bill_response(&request).expect_err("capacity is short");
        assert_eq!(status_for(&err), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn bill_response_serialization_contains_expected_fields() {
        let mut config = BillingConfig::default();
        config.rebate = dec!(300);
        let request = bill_request_from_json("{}", &config).expect("valid payload");
        let response = build_bill_response(&request).expect("default bill computes");
        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"deficitPolicy\":\"truncate\""));
        assert!(json.contains("\"consumers\""));
        assert!(json.contains("\"unitsConsumedInTier\""));
        assert!(json.contains("\"netPayable\""));
        assert!(json.contains("\"totalNetPayable\""));
        assert!(json.contains("\"capacityDeficit\":null"));
        assert!(json.contains("\"fixedTotal\":\"2213.94\""));
    }

    #[tokio::test]
    async fn bill_handler_returns_statement_with_no_store() {
        let response = bill_handler_impl(payload(r#"{"rebate": "300"}"#), &BillingConfig::default());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );
        let body = response_json(response).await;
        assert_eq!(body["totalUnits"], 1350);
        assert_eq!(body["consumers"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn bill_handler_maps_bad_payload_to_bad_request() {
        let response =
            bill_handler_impl(payload(r#"{"consumerCount": 0}"#), &BillingConfig::default());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(header::CACHE_CONTROL));
        let body = response_json(response).await;
        assert!(body["error"].as_str().is_some_and(|e| e.contains("consumerCount")));
    }

    #[tokio::test]
    async fn bill_handler_maps_invalid_input_and_deficit() {
        let config = BillingConfig::default();
        let invalid = bill_handler_impl(
            payload(r#"{"consumers": [{"id": "x", "rawConsumption": 0}]}"#),
            &config,
        );
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let deficit = bill_handler_impl(
            payload(
                r#"{"slabs": [{"unitCount": 5, "ratePerUnit": 1, "surchargePercent": 0}],
                    "deficitPolicy": "reject"}"#,
            ),
            &config,
        );
        assert_eq!(deficit.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn unknown_routes_get_json_not_found() {
        let response = not_found_handler().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );
        let body = response_json(response).await;
        assert_eq!(body["error"], "Not found");
    }
}
