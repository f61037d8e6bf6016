// Dealer Reconciliation - Web Server
// Read-only REST API over committed facts, rollups and the registry

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use dealer_recon::aggregate::{high_value_buckets, monthly_kpis, HighValueBucket, Metrics, MonthlyKpis};
use dealer_recon::rollup::{FundedByMonth, StateYtd, YearlyDealerRollup};
use dealer_recon::{
    CanonicalDealer, DealerRegistry, FactStore, MonthlyDealerFact, ReconConfig, SqliteStore,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<SqliteStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }

    fn err(status: StatusCode, message: String) -> Response {
        eprintln!("API error: {}", message);
        (
            status,
            Json(Self {
                success: false,
                data: None,
                error: Some(message),
            }),
        )
            .into_response()
    }
}

/// Year response: totals, state YTD, FI and dealer rollups
#[derive(Serialize)]
struct YearResponse {
    year: i32,
    totals: Metrics,
    funded_by_month: FundedByMonth,
    states: Vec<StateYtd>,
    financing_types: Vec<FiResponse>,
    dealers: Vec<YearlyDealerRollup>,
    digest: String,
}

#[derive(Serialize)]
struct FiResponse {
    financing_type: String,
    metrics: Metrics,
}

/// Month response: facts plus KPIs derived from raw records
#[derive(Serialize)]
struct MonthResponse {
    year: i32,
    month: u32,
    totals: Metrics,
    kpis: MonthlyKpis,
    high_value: Vec<HighValueBucket>,
    dealers: Vec<DealerMonthResponse>,
}

#[derive(Serialize)]
struct DealerMonthResponse {
    dealer: String,
    state: String,
    financing_type: String,
    metrics: Metrics,
}

impl From<MonthlyDealerFact> for DealerMonthResponse {
    fn from(fact: MonthlyDealerFact) -> Self {
        Self {
            dealer: fact.dealer,
            state: fact.state,
            financing_type: fact.financing_type.as_str().to_string(),
            metrics: Metrics::from(fact.counts),
        }
    }
}

fn lock_error() -> Response {
    ApiResponse::<()>::err(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned".to_string())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/dealers - Canonical dealer registry
async fn get_dealers(State(state): State<AppState>) -> Response {
    let Ok(store) = state.store.lock() else {
        return lock_error();
    };

    match store.list_dealers() {
        Ok(dealers) => ApiResponse::<Vec<CanonicalDealer>>::ok(dealers),
        Err(e) => ApiResponse::<()>::err(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// GET /api/years - Years with committed data
async fn get_years(State(state): State<AppState>) -> Response {
    let Ok(store) = state.store.lock() else {
        return lock_error();
    };

    match store.list_years() {
        Ok(years) => ApiResponse::ok(years),
        Err(e) => ApiResponse::<()>::err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/years/:year - Yearly rollups and read models
async fn get_year(State(state): State<AppState>, Path(year): Path<i32>) -> Response {
    let Ok(store) = state.store.lock() else {
        return lock_error();
    };

    let rollups = match store.query_rollups(year) {
        Ok(r) if r.is_empty() => {
            return ApiResponse::<()>::err(StatusCode::NOT_FOUND, format!("no rollups for {}", year))
        }
        Ok(r) => r,
        Err(e) => return ApiResponse::<()>::err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let digest = match rollups.digest() {
        Ok(d) => d,
        Err(e) => return ApiResponse::<()>::err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    ApiResponse::ok(YearResponse {
        year,
        totals: Metrics::from(rollups.totals()),
        funded_by_month: rollups.funded_by_month(),
        states: rollups.state_ytd(),
        financing_types: rollups
            .financing_types
            .iter()
            .map(|fi| FiResponse {
                financing_type: fi.financing_type.as_str().to_string(),
                metrics: Metrics::from(fi.counts),
            })
            .collect(),
        digest,
        dealers: rollups.dealers,
    })
}

/// GET /api/months/:year/:month - One committed month
async fn get_month(State(state): State<AppState>, Path((year, month)): Path<(i32, u32)>) -> Response {
    let Ok(store) = state.store.lock() else {
        return lock_error();
    };

    let records = match store.query_month(year, month) {
        Ok(r) if r.facts.is_empty() => {
            return ApiResponse::<()>::err(
                StatusCode::NOT_FOUND,
                format!("no committed data for {}-{:02}", year, month),
            )
        }
        Ok(r) => r,
        Err(e) => return ApiResponse::<()>::err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let totals = dealer_recon::aggregate::totals(&records.facts);
    ApiResponse::ok(MonthResponse {
        year,
        month,
        totals: Metrics::from(totals),
        kpis: monthly_kpis(&records.funded, &records.approved),
        high_value: high_value_buckets(&records.funded),
        dealers: records.facts.into_iter().map(DealerMonthResponse::from).collect(),
    })
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("🌐 Dealer Reconciliation - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = std::path::Path::new("dealer_recon.toml");
    let config = if config_path.exists() {
        match ReconConfig::load(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ Invalid config {:?}: {}", config_path, e);
                std::process::exit(1);
            }
        }
    } else {
        ReconConfig::default()
    };

    let db_path = std::path::PathBuf::from(&config.database.path);
    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: dealer-recon reconcile --apps <csv> --year Y --month M");
        eprintln!("   to commit a month first.");
        std::process::exit(1);
    }

    let store = match SqliteStore::open(&db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to open database: {}", e);
            std::process::exit(1);
        }
    };
    println!("✓ Database opened: {:?}", db_path);

    // Create shared state
    let state = AppState {
        store: Arc::new(Mutex::new(store)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/dealers", get(get_dealers))
        .route("/years", get(get_years))
        .route("/years/:year", get(get_year))
        .route("/months/:year/:month", get(get_month))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/years");
    println!("\n   Press Ctrl+C to stop\n");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("❌ Server error: {}", e);
    }
}
