//! HTTP request handlers.

use super::AppState;
use crate::db::{Candidate, DbError, Selection, SelectionMode, ServiceRecord};
use crate::engine::{AsSample, ComparisonPlan, EngineError, SampleResult, Target};
use crate::parser::{
    extract_domain, format_candidate, parse_candidates, parse_subscription, subscription_candidates,
    DNS_TIMEOUT,
};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
        DbError::Invalid(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn engine_error(e: EngineError) -> Response {
    match e {
        EngineError::InvalidTarget(_) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        e => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Best-effort: a failed write is logged and does not fail the run.
fn record_selection(state: &AppState, mode: SelectionMode, best: Option<&SampleResult>) {
    let Some(mut selection) = best.and_then(|b| Selection::from_sample(mode, b)) else {
        return;
    };
    if let Err(e) = state.store.record_selection(&mut selection) {
        tracing::error!("Failed to record {} selection: {}", mode, e);
    }
}

// ============================================================================
// API: Candidates
// ============================================================================

pub async fn handle_get_candidates(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_candidates() {
        Ok(candidates) => Json(candidates).into_response(),
        Err(e) => db_error(e),
    }
}

/// Candidates as explicit records, free text in `ip[:port][#label]` form, or
/// proxy subscription links. Any combination is merged.
#[derive(Debug, Default, Deserialize)]
pub struct CandidatesRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
    /// `vless://`, `trojan://` or `vmess://` links, one per line.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Drop domain nodes of a subscription instead of resolving them.
    #[serde(default)]
    pub skip_dns: bool,
    /// Replace the stored list instead of appending to it.
    #[serde(default)]
    pub replace: bool,
}

impl CandidatesRequest {
    async fn into_candidates(self) -> Result<Vec<Candidate>, String> {
        let mut candidates = self.candidates.unwrap_or_default();
        if let Some(text) = &self.text {
            let parsed = parse_candidates(text);
            if parsed.is_empty() {
                return Err("No valid candidates in text".to_string());
            }
            candidates.extend(parsed);
        }
        if let Some(content) = &self.subscription {
            let nodes = parse_subscription(content);
            if nodes.is_empty() {
                return Err("No proxy links in subscription".to_string());
            }
            let imported = subscription_candidates(&nodes, !self.skip_dns, DNS_TIMEOUT).await;
            if imported.is_empty() {
                return Err("Subscription yielded no IPv4 addresses".to_string());
            }
            tracing::info!(
                "Imported {} addresses from {} proxy nodes",
                imported.len(),
                nodes.len()
            );
            candidates.extend(imported);
        }
        Ok(candidates)
    }
}

pub async fn handle_create_candidates(
    State(state): State<AppState>,
    Json(req): Json<CandidatesRequest>,
) -> impl IntoResponse {
    let replace = req.replace;
    let mut candidates = match req.into_candidates().await {
        Ok(c) if !c.is_empty() => c,
        Ok(_) => return (StatusCode::BAD_REQUEST, "No candidates given").into_response(),
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    let stored = if replace {
        state.store.replace_candidates(&candidates)
    } else {
        candidates
            .iter_mut()
            .try_for_each(|c| state.store.add_candidate(c).map(|_| ()))
    };
    if let Err(e) = stored {
        return db_error(e);
    }

    let listed: Vec<String> = candidates.iter().map(format_candidate).collect();
    tracing::info!("Stored candidates (replace={}): {}", replace, listed.join(", "));
    match state.store.get_candidates() {
        Ok(all) => (StatusCode::CREATED, Json(all)).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_candidate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.delete_candidate(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Comparison services
// ============================================================================

pub async fn handle_get_services(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_services() {
        Ok(services) => Json(services).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_create_service(
    State(state): State<AppState>,
    Json(mut service): Json<ServiceRecord>,
) -> impl IntoResponse {
    match state.store.add_service(&mut service) {
        Ok(_) => (StatusCode::CREATED, Json(service)).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.delete_service(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Runs
// ============================================================================

/// Speed test over the given candidates, or the stored list when none are given.
#[derive(Debug, Default, Deserialize)]
pub struct SpeedTestRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub skip_dns: bool,
}

impl SpeedTestRequest {
    fn is_empty(&self) -> bool {
        self.text.is_none() && self.candidates.is_none() && self.subscription.is_none()
    }
}

pub async fn handle_speed_test(
    State(state): State<AppState>,
    Json(req): Json<SpeedTestRequest>,
) -> impl IntoResponse {
    let candidates = if req.is_empty() {
        match state.store.get_candidates() {
            Ok(c) => c,
            Err(e) => return db_error(e),
        }
    } else {
        let request = CandidatesRequest {
            text: req.text,
            candidates: req.candidates,
            subscription: req.subscription,
            skip_dns: req.skip_dns,
            replace: false,
        };
        match request.into_candidates().await {
            Ok(c) => c,
            Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
        }
    };

    let targets: Result<Vec<Target>, _> = candidates.iter().map(Candidate::to_target).collect();
    let targets = match targets {
        Ok(t) => t,
        Err(e) => return engine_error(e),
    };

    tracing::info!("Starting speed test over {} candidates", targets.len());
    let report = state
        .speed
        .speed_test(targets, |done, total, result| {
            tracing::info!(
                "Speed test progress {}/{}: {} avg={:?}ms loss={}%",
                done,
                total,
                result.target().name(),
                result.average_latency_ms(),
                result.loss_ratio()
            );
        })
        .await;

    match report {
        Ok(report) => {
            record_selection(&state, SelectionMode::Speed, report.best.as_ref());
            Json(report).into_response()
        }
        Err(e) => engine_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub user_domain: String,
    #[serde(default)]
    pub override_address: Option<String>,
}

pub async fn handle_compare(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> impl IntoResponse {
    let user_domain = extract_domain(&req.user_domain);
    if user_domain.is_empty() {
        return (StatusCode::BAD_REQUEST, "user_domain is required").into_response();
    }

    let services = match state.store.get_services() {
        Ok(s) => s.iter().map(ServiceRecord::to_service).collect(),
        Err(e) => return db_error(e),
    };
    let plan = ComparisonPlan {
        user_domain,
        override_address: req.override_address,
        services,
    };

    let report = state
        .compare
        .compare(&plan, |done, total, result| {
            let target = result.sample().target();
            tracing::info!(
                "Comparison progress {}/{}: {} [{}] avg={:?}ms",
                done,
                total,
                target.name(),
                target.description(),
                result.sample().average_latency_ms()
            );
        })
        .await;

    match report {
        Ok(report) => {
            let best = report.best.as_ref().map(AsSample::sample);
            record_selection(&state, SelectionMode::Compare, best);
            Json(report).into_response()
        }
        Err(e) => engine_error(e),
    }
}

// ============================================================================
// API: Selections
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SelectionQuery {
    #[serde(default)]
    pub mode: Option<String>,
}

pub async fn handle_get_selection(
    State(state): State<AppState>,
    Query(query): Query<SelectionQuery>,
) -> impl IntoResponse {
    let mode = match query.mode.as_deref().unwrap_or("speed").parse::<SelectionMode>() {
        Ok(m) => m,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };

    match state.store.latest_selection(mode) {
        Ok(Some(selection)) => Json(selection).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No selection recorded").into_response(),
        Err(e) => db_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::Store;
    use crate::engine::testing::ScriptedProber;
    use crate::engine::{Orchestrator, ProbePool, Sampler};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn orchestrator(prober: Arc<ScriptedProber>) -> Arc<Orchestrator> {
        let pool = ProbePool::new(4).unwrap();
        Arc::new(Orchestrator::new(pool, Sampler::new(prober), 2, Duration::from_secs(1)).unwrap())
    }

    fn app(prober: ScriptedProber) -> (NamedTempFile, AppState) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let prober = Arc::new(prober);
        let state = AppState {
            config: ServerConfig::default(),
            store,
            speed: orchestrator(prober.clone()),
            compare: orchestrator(prober),
        };
        (tmp, state)
    }

    #[tokio::test]
    async fn test_create_candidates_from_text() {
        let (_tmp, state) = app(ScriptedProber::new());

        let req = CandidatesRequest {
            text: Some("1.1.1.1#one, 2.2.2.2:80".to_string()),
            ..Default::default()
        };
        let resp = handle_create_candidates(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(state.store.get_candidates().unwrap().len(), 2);

        let bad = CandidatesRequest {
            text: Some("not an ip".to_string()),
            ..Default::default()
        };
        let resp = handle_create_candidates(State(state.clone()), Json(bad)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_candidates_from_subscription() {
        let (_tmp, state) = app(ScriptedProber::new());

        let req = CandidatesRequest {
            subscription: Some(
                "vless://id@104.21.52.82:443#Frankfurt\n\
                 trojan://pw@edge.example.org:443#Edge"
                    .to_string(),
            ),
            skip_dns: true,
            replace: true,
            ..Default::default()
        };
        let resp = handle_create_candidates(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let stored = state.store.get_candidates().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].address, "104.21.52.82");
        assert_eq!(stored[0].label, "Frankfurt");

        let empty = CandidatesRequest {
            subscription: Some("ss://not-supported".to_string()),
            ..Default::default()
        };
        let resp = handle_create_candidates(State(state), Json(empty)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_missing_candidate() {
        let (_tmp, state) = app(ScriptedProber::new());
        let resp = handle_delete_candidate(State(state), Path(42)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_speed_test_records_selection() {
        let prober = ScriptedProber::new()
            .script("1.1.1.1", 443, &[Some(40.0), Some(40.0)])
            .script("2.2.2.2", 443, &[Some(10.0), Some(10.0)]);
        let (_tmp, state) = app(prober);
        state
            .store
            .replace_candidates(&[Candidate::new("1.1.1.1", 443), Candidate::new("2.2.2.2", 443)])
            .unwrap();

        let resp = handle_speed_test(State(state.clone()), Json(SpeedTestRequest::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let selection = state.store.latest_selection(SelectionMode::Speed).unwrap().unwrap();
        assert_eq!(selection.address, "2.2.2.2");
        assert_eq!(selection.latency_ms, 10.0);

        let resp = handle_get_selection(State(state), Query(SelectionQuery { mode: None }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_speed_test_without_success_records_nothing() {
        let (_tmp, state) = app(ScriptedProber::new());
        let req = SpeedTestRequest {
            text: Some("9.9.9.9".to_string()),
            ..Default::default()
        };
        let resp = handle_speed_test(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.store.latest_selection(SelectionMode::Speed).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_requires_domain() {
        let (_tmp, state) = app(ScriptedProber::new());
        let req = CompareRequest {
            user_domain: "  ".to_string(),
            override_address: None,
        };
        let resp = handle_compare(State(state), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_selection_query_validation() {
        let (_tmp, state) = app(ScriptedProber::new());

        let bad = SelectionQuery {
            mode: Some("weekly".to_string()),
        };
        let resp = handle_get_selection(State(state.clone()), Query(bad)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let empty = SelectionQuery {
            mode: Some("compare".to_string()),
        };
        let resp = handle_get_selection(State(state), Query(empty)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
