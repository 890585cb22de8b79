use crate::{domain::matching::{Thresholds, DEFAULT_MAX_CENTER_DIST}, model::ModelController, server, Result};
use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};


pub fn routes(mc: ModelController) -> Router {
	Router::new()
		.route("/algorithm/run", post(handler_run))
		.with_state(mc)
}

#[derive(Deserialize)]
struct FullAnalysisParams {
	min_iou: Option<f64>,
	max_center_dist: Option<f64>,
	#[serde(default)]
	refresh: bool,
}

async fn handler_run(
	State(mc): State<ModelController>,
	Json(params): Json<FullAnalysisParams>,
) -> Result<Json<Value>> {
	let settings = server::get_settings().await;
	let thresholds = Thresholds {
		min_iou: params.min_iou.unwrap_or(settings.min_overlap_score),
		max_center_dist: params.max_center_dist.unwrap_or(DEFAULT_MAX_CENTER_DIST),
	};
	let bundle = mc.run_full_analysis(thresholds, params.refresh).await?;
	Ok(Json(json!(bundle)))
}
