//! API Service - Work order dashboard API
//!
//! Endpoints:
//! - GET /health - Health check
//! - POST /etl/refresh - Reload the star schema from the wide workbook
//! - GET|POST /aggregations/sum - Filtered, grouped work order counts
//! - GET /metrics/sum - Filtered total (0 = no constraint)
//! - GET /locations, /project-types, /statuses, /years, /months - Filter options

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::Query;
use etl::{run_refresh, EtlConfig, EtlError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warehouse::dimension::{
    DimensionTable, DATE_TABLE, LOCATION_TABLE, PROJECT_TYPE_TABLE, STATUS_TABLE,
};
use warehouse::{
    aggregate, AggregationFilters, AggregationRequest, PgWarehouse, RefreshGate, Warehouse,
    WarehouseError,
};

// ============================================================================
// State
// ============================================================================

struct AppState {
    gate: RefreshGate<dyn Warehouse>,
    config: EtlConfig,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalid_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed: Option<Vec<String>>,
}

enum ApiError {
    Warehouse(WarehouseError),
    Etl(EtlError),
}

impl From<WarehouseError> for ApiError {
    fn from(e: WarehouseError) -> Self {
        ApiError::Warehouse(e)
    }
}

impl From<EtlError> for ApiError {
    fn from(e: EtlError) -> Self {
        match e {
            EtlError::Warehouse(inner) => ApiError::Warehouse(inner),
            other => ApiError::Etl(other),
        }
    }
}

fn plain_error(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message,
            invalid_fields: None,
            allowed: None,
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Warehouse(WarehouseError::InvalidAggregation {
                parameter,
                invalid,
                allowed,
            }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: format!("Unsupported {} values", parameter),
                    invalid_fields: Some(invalid),
                    allowed: Some(allowed),
                }),
            )
                .into_response(),
            ApiError::Warehouse(e @ WarehouseError::RefreshIncomplete) => {
                plain_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            ApiError::Warehouse(e) => {
                error!(error = %e, "store failure");
                plain_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Etl(e @ EtlError::MalformedSource(_)) => {
                plain_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            ApiError::Etl(e) => {
                error!(error = %e, "refresh failed");
                plain_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
    generation: u64,
}

/// Query-string form of an aggregation request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SumQuery {
    location_id: Option<i32>,
    project_type_id: Option<i32>,
    status_id: Option<i32>,
    year: Option<i32>,
    month: Option<i32>,
    /// Repeated (`group_by=location&group_by=status`) or comma separated
    group_by: Vec<String>,
    order_by: Option<String>,
    order_dir: Option<String>,
}

impl From<SumQuery> for AggregationRequest {
    fn from(q: SumQuery) -> Self {
        AggregationRequest {
            filters: AggregationFilters {
                location_id: q.location_id,
                project_type_id: q.project_type_id,
                status_id: q.status_id,
                year: q.year,
                month: q.month,
            },
            group_by: q
                .group_by
                .iter()
                .flat_map(|g| g.split(','))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            order_by: q.order_by,
            order_dir: q.order_dir,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetricsQuery {
    location_id: i32,
    project_type_id: i32,
    status_id: i32,
    year: i32,
    month: i32,
}

#[derive(Serialize)]
struct MetricsResponse {
    total_sum: i64,
}

#[derive(Serialize)]
struct OptionItem {
    id: i32,
    name: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
        generation: state.gate.generation().await,
    })
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let summary = run_refresh(&state.gate, &state.config).await?;
    Ok(Json(summary).into_response())
}

async fn run_aggregation(state: &AppState, request: AggregationRequest) -> Result<Response, ApiError> {
    let plan = request.validate()?;
    let access = state.gate.read().await?;
    let result = aggregate(access.warehouse(), &plan).await?;
    Ok(Json(result).into_response())
}

async fn sum_query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SumQuery>,
) -> Result<Response, ApiError> {
    run_aggregation(&state, params.into()).await
}

async fn sum_body_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AggregationRequest>,
) -> Result<Response, ApiError> {
    run_aggregation(&state, request).await
}

async fn metrics_sum_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let request = AggregationRequest {
        filters: AggregationFilters::from_zero_defaults(
            params.location_id,
            params.project_type_id,
            params.status_id,
            params.year,
            params.month,
        ),
        ..Default::default()
    };
    let plan = request.validate()?;
    let access = state.gate.read().await?;
    let result = aggregate(access.warehouse(), &plan).await?;
    Ok(Json(MetricsResponse {
        total_sum: result.total_count,
    }))
}

/// `{id, name}` for every row of a single-column or location dimension.
async fn list_options(state: &AppState, table: &'static DimensionTable) -> Result<Vec<OptionItem>, ApiError> {
    let access = state.gate.read().await?;
    let rows = access.warehouse().load_dimension(table).await?;
    Ok(rows
        .into_iter()
        .map(|row| OptionItem {
            id: row.id,
            name: row.parts.first().and_then(|p| p.as_text()).map(str::to_string),
        })
        .collect())
}

/// Distinct non-null values of one `dim_date` column, ascending.
async fn list_date_part(state: &AppState, index: usize) -> Result<Vec<i32>, ApiError> {
    let access = state.gate.read().await?;
    let rows = access.warehouse().load_dimension(&DATE_TABLE).await?;
    let values: BTreeSet<i32> = rows
        .iter()
        .filter_map(|row| row.parts.get(index).and_then(|p| p.as_int()))
        .collect();
    Ok(values.into_iter().collect())
}

async fn locations_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<OptionItem>>, ApiError> {
    list_options(&state, &LOCATION_TABLE).await.map(Json)
}

async fn project_types_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OptionItem>>, ApiError> {
    list_options(&state, &PROJECT_TYPE_TABLE).await.map(Json)
}

async fn statuses_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<OptionItem>>, ApiError> {
    list_options(&state, &STATUS_TABLE).await.map(Json)
}

async fn years_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<i32>>, ApiError> {
    list_date_part(&state, 0).await.map(Json)
}

async fn months_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<i32>>, ApiError> {
    list_date_part(&state, 1).await.map(Json)
}

// ============================================================================
// Router
// ============================================================================

fn build_router(state: Arc<AppState>) -> Router {
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/etl/refresh", post(refresh_handler))
        .route("/aggregations/sum", get(sum_query_handler).post(sum_body_handler))
        .route("/metrics/sum", get(metrics_sum_handler))
        .route("/locations", get(locations_handler))
        .route("/project-types", get(project_types_handler))
        .route("/statuses", get(statuses_handler))
        .route("/years", get(years_handler))
        .route("/months", get(months_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("api=info,etl=info,warehouse=info,tower_http=info")),
        )
        .init();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let config = EtlConfig::from_env().context("Invalid ETL configuration")?;

    info!("connecting to database");
    let warehouse = PgWarehouse::connect(&db_url, 10)
        .await
        .context("Failed to connect to database")?;
    warehouse.ensure_schema().await.context("Failed to create schema")?;

    let warehouse: Arc<dyn Warehouse> = Arc::new(warehouse);
    let state = Arc::new(AppState {
        gate: RefreshGate::new(warehouse),
        config,
    });
    let app = build_router(state);

    info!(%bind, "API listening");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;
    use warehouse::{LongRecord, MemoryWarehouse};

    fn record(unit: &str, code: &str, substate: &str, measure: i64) -> LongRecord {
        LongRecord {
            unit_name: unit.to_string(),
            unit_code: Some(code.to_string()),
            year: Some(2024),
            month: Some(1),
            category: "Test1".to_string(),
            substate: substate.to_string(),
            measure,
        }
    }

    async fn loaded_state(config: EtlConfig) -> Arc<AppState> {
        let warehouse: Arc<dyn Warehouse> = Arc::new(MemoryWarehouse::new());
        let state = Arc::new(AppState {
            gate: RefreshGate::new(warehouse),
            config,
        });
        let records = vec![
            record("CityA", "001", "Open", 5),
            record("CityA", "001", "Closed", 3),
            record("CityB", "002", "Open", 7),
        ];
        let access = state.gate.refresh().await;
        etl::load(access.warehouse(), &records).await.unwrap();
        access.commit();
        state
    }

    async fn json_body(resp: Response) -> (StatusCode, JsonValue) {
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let json: JsonValue = serde_json::from_slice(&bytes).expect("valid JSON response");
        (status, json)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, JsonValue) {
        let resp = app
            .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        json_body(resp).await
    }

    async fn post_json(app: Router, uri: &str, body: JsonValue) -> (StatusCode, JsonValue) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        json_body(resp).await
    }

    fn expected_by_location() -> JsonValue {
        json!({
            "total_count": 15,
            "chart_data": [
                {"city_name": "CityA", "count": 8},
                {"city_name": "CityB", "count": 7}
            ]
        })
    }

    #[tokio::test]
    async fn health_reports_generation() {
        let app = build_router(loaded_state(EtlConfig::default()).await);
        let (status, json) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], json!(true));
        assert_eq!(json["generation"], json!(1));
    }

    #[tokio::test]
    async fn aggregation_by_location_post() {
        let app = build_router(loaded_state(EtlConfig::default()).await);
        let (status, json) = post_json(
            app,
            "/aggregations/sum",
            json!({"filters": {"year": 2024}, "group_by": ["location"]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, expected_by_location());
    }

    #[tokio::test]
    async fn aggregation_by_location_query_string() {
        let app = build_router(loaded_state(EtlConfig::default()).await);
        let (status, json) = get_json(app, "/aggregations/sum?year=2024&group_by=location").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, expected_by_location());
    }

    #[tokio::test]
    async fn ungrouped_aggregation_is_single_row() {
        let app = build_router(loaded_state(EtlConfig::default()).await);
        let (status, json) = get_json(app, "/aggregations/sum?status_id=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"total_count": 12, "chart_data": [{"count": 12}]}));
    }

    #[tokio::test]
    async fn repeated_and_comma_separated_group_by_agree() {
        let expected = json!({
            "total_count": 15,
            "chart_data": [
                {"city_name": "CityB", "status": "Open", "count": 7},
                {"city_name": "CityA", "status": "Open", "count": 5},
                {"city_name": "CityA", "status": "Closed", "count": 3}
            ]
        });
        for uri in [
            "/aggregations/sum?group_by=location&group_by=status&order_by=count",
            "/aggregations/sum?group_by=location,status&order_by=count",
            "/aggregations/sum?group_by=location&group_by=status,&order_by=count",
        ] {
            let app = build_router(loaded_state(EtlConfig::default()).await);
            let (status, json) = get_json(app, uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(json, expected, "{}", uri);
        }
    }

    #[tokio::test]
    async fn bogus_group_by_is_unprocessable() {
        let app = build_router(loaded_state(EtlConfig::default()).await);
        let (status, json) = get_json(app, "/aggregations/sum?group_by=location,bogus_field").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["invalid_fields"], json!(["bogus_field"]));
        assert_eq!(
            json["allowed"],
            json!(["location", "project_type", "status", "year", "month"])
        );
    }

    #[tokio::test]
    async fn metrics_sum_treats_zero_as_unconstrained() {
        let state = loaded_state(EtlConfig::default()).await;
        let (status, json) = get_json(build_router(Arc::clone(&state)), "/metrics/sum?year=0&month=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"total_sum": 15}));

        let (_, json) = get_json(build_router(state), "/metrics/sum?location_id=2").await;
        assert_eq!(json, json!({"total_sum": 7}));
    }

    #[tokio::test]
    async fn filter_options() {
        let state = loaded_state(EtlConfig::default()).await;
        let (status, json) = get_json(build_router(Arc::clone(&state)), "/locations").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!([{"id": 1, "name": "CityA"}, {"id": 2, "name": "CityB"}]));

        let (_, json) = get_json(build_router(Arc::clone(&state)), "/statuses").await;
        assert_eq!(json, json!([{"id": 1, "name": "Open"}, {"id": 2, "name": "Closed"}]));

        let (_, json) = get_json(build_router(Arc::clone(&state)), "/years").await;
        assert_eq!(json, json!([2024]));

        let (_, json) = get_json(build_router(state), "/months").await;
        assert_eq!(json, json!([1]));
    }

    #[tokio::test]
    async fn malformed_refresh_is_unprocessable_and_blocks_reads() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("wide.csv");
        std::fs::write(&source, "title\nCity,Code\n").unwrap();
        let config = EtlConfig {
            wide_file_path: source,
            export: etl::ExportPaths::default(),
            ..Default::default()
        };
        let state = loaded_state(config).await;

        let (status, json) = post_json(build_router(Arc::clone(&state)), "/etl/refresh", json!({})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].as_str().unwrap().contains("Malformed source"));

        let (status, _) = get_json(build_router(state), "/aggregations/sum").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
