//! Best-regions API
//!
//! `POST /` takes a Prometheus instant-query result mapping regions to
//! request counts, normalizes it into a weight vector, and returns the best
//! K-region subset under the current latency matrix. `compare` parameters
//! price caller-supplied subsets under the same weights.

use std::collections::HashMap;
use std::fmt::Display;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::warn;

use sink_selector::Solver;

use crate::model::SolverPair;
use crate::AppState;

/// K at or above which the ILP beats enumerating subsets.
const ILP_CUTOVER: usize = 4;

const INDEX: &str = "\
best regions
============

Every instance measures HTTP round trips to every peer region and publishes
what it sees:

  GET /latency.json     this region's latency to each peer (ms)
  GET /latencies.json   the full region-by-region matrix
  GET /stats.json       request counters

To find where your users' traffic should land, POST a Prometheus instant
query result of per-region request counts:

  query=sum(increase(fly_edge_http_responses_count)) by (region)

  POST /?k=3                  best 3-region subset for those weights
  POST /?compare=dfw,ams      price a specific subset (repeatable)

Responses look like {\"results\": [{\"regions\": [...], \"cost\": 12.3}]}; cost is
the traffic-weighted average latency to the nearest chosen region.
";

#[derive(Serialize, Default)]
pub struct Results {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<SubsetResult>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Serialize)]
pub struct SubsetResult {
    pub regions: Vec<String>,
    pub cost: f64,
}

pub async fn index() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        INDEX,
    )
}

pub async fn solve(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    body: String,
) -> Response {
    let pair = state.model.snapshot();
    handle_solve(&pair, &params, &body)
}

fn handle_solve(pair: &SolverPair, params: &[(String, String)], body: &str) -> Response {
    let counts = match parse_prom_body(body) {
        Ok(counts) => counts,
        Err(err) => return error_json("decoding request body", &err),
    };

    let vertices = &pair.brute.vertices;
    let weights = weights(&counts, vertices);

    let mut results = Results::default();

    let unknown = unknown_regions(&counts, vertices);
    if !unknown.is_empty() {
        results.error = format!("unknown regions: {}", unknown.join(", "));
    }

    if let Some((_, raw)) = params.iter().find(|(key, _)| key == "k") {
        // k never needs more than 8 bits; anything larger is a bad request
        let k = match raw.parse::<i8>() {
            Ok(k) => k as i64,
            Err(err) => return error_json("parsing k", &err),
        };

        let n = vertices.len();
        if k < 1 || k as usize > n {
            return error_json("", &format!("k must be in [1 {n}]"));
        }
        let k = k as usize;

        let solved = if k < ILP_CUTOVER {
            pair.brute.solve(k, &weights)
        } else {
            pair.ilp.solve(k, &weights)
        };

        match solved {
            Ok((cost, regions)) => results.results.push(SubsetResult { regions, cost }),
            Err(err) => return error_json("solving", &err),
        }
    }

    for (_, raw) in params.iter().filter(|(key, _)| key == "compare") {
        let combo: Vec<String> = raw
            .split(',')
            .map(|region| region.trim().to_string())
            .filter(|region| !region.is_empty())
            .collect();
        if combo.is_empty() {
            continue;
        }

        match pair.brute.combination_cost(&combo, &weights) {
            Ok(cost) => results.results.push(SubsetResult {
                regions: combo,
                cost,
            }),
            Err(err) => return error_json("pricing comparison", &err),
        }
    }

    match serde_json::to_vec_pretty(&results) {
        Ok(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(err) => error_json("writing results", &err),
    }
}

fn error_json(context: &str, err: &dyn Display) -> Response {
    if !context.is_empty() {
        warn!("{context}: {err}");
    }

    let body = serde_json::json!({ "error": err.to_string() });

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

// Prometheus instant-query shape; everything beyond region and value is
// ignored.
#[derive(Deserialize, Default)]
struct PromPayload {
    #[serde(default)]
    data: PromData,
}

#[derive(Deserialize, Default)]
struct PromData {
    #[serde(default)]
    result: Vec<PromSeries>,
}

#[derive(Deserialize)]
struct PromSeries {
    #[serde(default)]
    metric: PromMetric,
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

#[derive(Deserialize, Default)]
struct PromMetric {
    #[serde(default)]
    region: String,
}

/// Decodes the request body into region -> count. Only a body that isn't
/// JSON at all is fatal; malformed rows are skipped with a warning.
fn parse_prom_body(body: &str) -> serde_json::Result<HashMap<String, i64>> {
    let payload: PromPayload = serde_json::from_str(body)?;

    let mut counts = HashMap::with_capacity(payload.data.result.len());
    for series in payload.data.result {
        if series.metric.region.is_empty() {
            warn!("bad prom data: no region");
            continue;
        }
        if series.value.len() != 2 {
            warn!(fields = series.value.len(), "bad prom data: value arity");
            continue;
        }
        let Some(raw) = series.value[1].as_str() else {
            warn!("bad prom data: non-string value");
            continue;
        };
        match raw.parse::<i64>() {
            Ok(count) => {
                counts.insert(series.metric.region, count);
            }
            Err(err) => warn!(%err, "bad prom data: parsing value"),
        }
    }

    Ok(counts)
}

/// Normalizes counts into per-vertex weights summing to 1, or all zeros when
/// no known region carries traffic.
fn weights(counts: &HashMap<String, i64>, vertices: &[String]) -> Vec<f64> {
    let sum: i64 = vertices
        .iter()
        .map(|v| counts.get(v).copied().unwrap_or(0))
        .sum();

    let mut out = vec![0.0; vertices.len()];
    if sum > 0 {
        for (i, vertex) in vertices.iter().enumerate() {
            out[i] = counts.get(vertex).copied().unwrap_or(0) as f64 / sum as f64;
        }
    }

    out
}

fn unknown_regions(counts: &HashMap<String, i64>, vertices: &[String]) -> Vec<String> {
    let mut unknown: Vec<String> = counts
        .keys()
        .filter(|region| !vertices.contains(region))
        .cloned()
        .collect();
    unknown.sort();
    unknown
}
