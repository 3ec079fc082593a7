use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    AnnualSummary, CancellationToken, DepletionSearch, DepletionSolveResult, GrowthTable,
    PensionConfig, RawSimulationParams, SimulationOptions, SimulationParams, SimulationResult,
    find_fire_month_with_cancel, find_withdrawal_rate_with_cancel, fire_month, growth_table_from,
    monthly_pension, normalize_params, perform_fire_simulation, start_age_adjustment_rate,
    summarize_years,
};
use crate::error::SimulationError;
use crate::worker::{MonteCarloWorker, WorkerRequest, WorkerResponse};

#[derive(Clone)]
pub struct AppState {
    worker: Arc<MonteCarloWorker>,
}

impl AppState {
    pub fn new() -> Result<Self, SimulationError> {
        Ok(Self {
            worker: Arc::new(MonteCarloWorker::spawn()?),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    simulation_params: RawSimulationParams,
    #[serde(with = "fire_month")]
    force_fire_month: Option<usize>,
    returns: Option<Vec<f64>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    #[serde(flatten)]
    result: SimulationResult,
    annual: Vec<AnnualSummary>,
    growth_table: GrowthTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SolvePayload {
    simulation_params: RawSimulationParams,
    search: DepletionSearch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PensionQuery {
    age: f64,
    fire_age: f64,
    user_start_age: Option<f64>,
    include_spouse: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PensionResponse {
    monthly: f64,
    annual: f64,
    adjustment_rate: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Cancels the run if the request future is dropped before it finishes.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .route("/api/solve/withdrawal-rate", post(solve_withdrawal_rate_handler))
        .route("/api/solve/fire-month", post(solve_fire_month_handler))
        .route("/api/pension", get(pension_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(bind: IpAddr, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::new(bind, port);
    let state = AppState::new().map_err(std::io::Error::other)?;
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "firecast HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(Json(payload): Json<SimulatePayload>) -> Response {
    match run_blocking(move || Ok(simulate(payload))).await {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(err) => simulation_error_response(&err),
    }
}

fn simulate(payload: SimulatePayload) -> SimulateResponse {
    let params = normalize_params(&payload.simulation_params);
    let result = perform_fire_simulation(
        &params,
        &SimulationOptions {
            force_fire_month: payload.force_fire_month,
            returns: payload.returns,
            record_monthly: true,
        },
    );
    let annual = summarize_years(&result.monthly_data, result.fire_reached_month);
    let growth_table = growth_table_from(&result);
    SimulateResponse {
        result,
        annual,
        growth_table,
    }
}

async fn monte_carlo_handler(
    State(state): State<AppState>,
    Json(request): Json<WorkerRequest>,
) -> Response {
    let pending = match state.worker.submit(request) {
        Ok(pending) => pending,
        Err(err) => return simulation_error_response(&err),
    };
    let _guard = CancelOnDrop(pending.token());

    match run_blocking(move || pending.wait()).await {
        Ok(response @ WorkerResponse::Success { .. }) => json_response(StatusCode::OK, response),
        Ok(response @ WorkerResponse::Error { .. }) => {
            json_response(StatusCode::INTERNAL_SERVER_ERROR, response)
        }
        Err(err) => simulation_error_response(&err),
    }
}

async fn solve_withdrawal_rate_handler(Json(payload): Json<SolvePayload>) -> Response {
    solve(payload, find_withdrawal_rate_with_cancel).await
}

async fn solve_fire_month_handler(Json(payload): Json<SolvePayload>) -> Response {
    solve(payload, find_fire_month_with_cancel).await
}

async fn solve<T, F>(payload: SolvePayload, solver: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&SimulationParams, &DepletionSearch, &CancellationToken) -> Result<DepletionSolveResult<T>, SimulationError>
        + Send
        + 'static,
{
    let token = CancellationToken::new();
    let _guard = CancelOnDrop(token.clone());
    let outcome = run_blocking(move || {
        let params = normalize_params(&payload.simulation_params);
        solver(&params, &payload.search, &token)
    })
    .await;

    match outcome {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(err) => simulation_error_response(&err),
    }
}

async fn pension_handler(Query(query): Query<PensionQuery>) -> Response {
    json_response(StatusCode::OK, pension_estimate(&query))
}

fn pension_estimate(query: &PensionQuery) -> PensionResponse {
    let mut config = PensionConfig::default();
    if let Some(age) = query.user_start_age {
        config.user_start_age = age;
    }
    if let Some(include_spouse) = query.include_spouse {
        config.include_spouse = include_spouse;
    }

    let monthly = monthly_pension(query.age, query.fire_age, &config);
    PensionResponse {
        monthly,
        annual: monthly * 12.0,
        adjustment_rate: start_age_adjustment_rate(config.user_start_age),
    }
}

/// Run CPU-bound work off the async executor.
async fn run_blocking<T, F>(work: F) -> Result<T, SimulationError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SimulationError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SimulationError::Worker(format!("blocking task failed: {e}")))?
}

fn status_for(err: &SimulationError) -> StatusCode {
    match err {
        SimulationError::InvalidPayload(_) | SimulationError::InvalidSolverConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        SimulationError::Cancelled | SimulationError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn simulation_error_response(err: &SimulationError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    error_response(status, &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
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
mod tests {
    use super::*;
    use serde_json::{Value, json};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn saver_params() -> Value {
        json!({
            "initialAssets": 20_000_000,
            "riskAssets": 10_000_000,
            "annualReturnRate": 0.03,
            "monthlyExpense": 200_000,
            "monthlyIncome": 450_000,
            "monthlyInvestment": 100_000,
            "currentAge": 55,
            "maxMonths": 60,
            "startMonth": "2025-01"
        })
    }

    #[test]
    fn simulate_payload_accepts_sentinel_and_missing_fields() {
        let payload: SimulatePayload =
            serde_json::from_value(json!({ "forceFireMonth": -1 })).expect("valid payload");
        assert_eq!(payload.force_fire_month, None);
        assert!(payload.returns.is_none());

        let payload: SimulatePayload = serde_json::from_value(json!({
            "simulationParams": saver_params(),
            "forceFireMonth": 24,
            "returns": [0.01, 0.02]
        }))
        .expect("valid payload");
        assert_eq!(payload.force_fire_month, Some(24));
        assert_eq!(payload.returns.as_deref(), Some(&[0.01, 0.02][..]));
    }

    #[test]
    fn simulate_response_flattens_result_and_caps_recorded_months() {
        let payload: SimulatePayload = serde_json::from_value(json!({
            "simulationParams": saver_params(),
            "forceFireMonth": 24
        }))
        .expect("valid payload");
        let response = simulate(payload);
        let json = serde_json::to_value(&response).expect("serializes");

        assert_eq!(json["fireReachedMonth"], 24);
        assert_eq!(json["monthlyData"].as_array().map(Vec::len), Some(61));
        assert_eq!(json["annual"].as_array().map(Vec::len), Some(6));
        assert!(json["growthTable"]["table"].is_array());
        assert!(json.get("survived").is_some());
        assert!(json.get("finalAssets").is_some());
    }

    #[test]
    fn growth_table_follows_forced_month_and_supplied_returns() {
        let mut params = saver_params();
        params["initialAssets"] = json!(500_000_000);
        let payload: SimulatePayload = serde_json::from_value(json!({
            "simulationParams": params,
            "forceFireMonth": 24,
            "returns": [0.01, 0.01, 0.01]
        }))
        .expect("valid payload");
        let response = simulate(payload);

        assert_eq!(response.result.fire_reached_month, Some(24));
        assert_eq!(response.growth_table.fire_reached_month, Some(24));
        assert_eq!(response.growth_table.table.len(), response.result.monthly_data.len());
        for (row, state) in response.growth_table.table.iter().zip(&response.result.monthly_data) {
            assert_eq!(row.month, state.month);
            assert_eq!(row.is_fire, state.is_fire);
            assert_approx(row.assets, state.assets);
        }
        assert!(!response.growth_table.table[23].is_fire);
        assert!(response.growth_table.table[24].is_fire);
    }

    #[test]
    fn solve_payload_reads_nested_search_options() {
        let payload: SolvePayload = serde_json::from_value(json!({
            "simulationParams": saver_params(),
            "search": {
                "target": 1_000_000,
                "searchMax": 0.1,
                "maxIterations": 5,
                "monteCarlo": { "trials": 10, "seed": 9 }
            }
        }))
        .expect("valid payload");

        assert_approx(payload.search.target, 1_000_000.0);
        assert_eq!(payload.search.search_min, None);
        assert_eq!(payload.search.search_max, Some(0.1));
        assert_eq!(payload.search.max_iterations, 5);
        assert_eq!(payload.search.monte_carlo.trials, 10);
        assert_eq!(payload.search.monte_carlo.seed, 9);
    }

    #[test]
    fn pension_estimate_uses_default_household() {
        let query = PensionQuery {
            age: 70.0,
            fire_age: 50.0,
            user_start_age: None,
            include_spouse: None,
        };
        let estimate = pension_estimate(&query);
        let config = PensionConfig::default();
        assert_approx(estimate.monthly, monthly_pension(70.0, 50.0, &config));
        assert_approx(estimate.annual, estimate.monthly * 12.0);
        assert_approx(estimate.adjustment_rate, 1.0);

        let before_start = pension_estimate(&PensionQuery {
            age: 60.0,
            fire_age: 50.0,
            user_start_age: None,
            include_spouse: Some(false),
        });
        assert_approx(before_start.monthly, 0.0);
    }

    #[test]
    fn errors_map_to_client_or_server_status() {
        assert_eq!(
            status_for(&SimulationError::InvalidSolverConfig("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SimulationError::Worker("gone".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn error_response_is_json_and_not_cached() {
        let response = error_response(StatusCode::BAD_REQUEST, "nope");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(&b"no-store"[..])
        );
        assert_eq!(body_json(response).await, json!({ "error": "nope" }));
    }

    #[tokio::test]
    async fn invalid_solver_bounds_are_rejected() {
        let payload: SolvePayload = serde_json::from_value(json!({
            "simulationParams": saver_params(),
            "search": { "searchMin": 0.2, "searchMax": 0.1 }
        }))
        .expect("valid payload");
        let response = solve_withdrawal_rate_handler(Json(payload)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .is_some_and(|msg| msg.starts_with("Invalid solver configuration"))
        );
    }

    #[tokio::test]
    async fn monte_carlo_route_returns_tagged_success() {
        let state = AppState::new().expect("worker starts");
        let request: WorkerRequest = serde_json::from_value(json!({
            "simulationParams": saver_params(),
            "options": { "trials": 10, "annualVolatility": 0.1, "seed": 3 }
        }))
        .expect("valid request");

        let response = monte_carlo_handler(State(state), Json(request)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["type"], "success");
        assert_eq!(body["result"]["trials"], 10);
    }
}
