use crate::{model::ModelController, server, Result};
use axum::{extract::State, routing::{get, post}, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};


pub fn routes(mc: ModelController) -> Router {
	Router::new()
		.route("/status", get(handler_status))
		.route("/stats", get(handler_stats))
		.route("/config", get(handler_config))
		.route("/config/source-db", post(handler_config_source_db))
		.route("/config/target-api", post(handler_config_target_api))
		.route("/config/target-db", post(handler_config_target_db))
		.route("/diagnostics/orphan-people", get(handler_orphan_people))
		.with_state(mc)
}

async fn handler_status(State(mc): State<ModelController>) -> Result<Json<Value>> {
	let body = Json(json!({
		"source_db": mc.source_status().await,
		"target_db": mc.target_status().await,
		"target_api": mc.api_status().await,
	}));
	Ok(body)
}

async fn handler_stats(State(mc): State<ModelController>) -> Result<Json<Value>> {
	let source = mc.source_status().await;
	let target = mc.target_status().await;
	let body = Json(json!({
		"source": if source["connected"] == true { source } else { Value::Null },
		"target": if target["connected"] == true { target } else { Value::Null },
	}));
	Ok(body)
}

async fn handler_config() -> Result<Json<Value>> {
	Ok(Json(server::current_config().await))
}

/// Named source persons with zero face rectangles: label data that cannot
/// be migrated, surfaced so the user knows what was lost.
async fn handler_orphan_people(State(mc): State<ModelController>) -> Result<Json<Value>> {
	let snapshot = mc.snapshot(false).await?;
	let body = Json(json!({
		"orphan_people": snapshot.source.orphans,
		"people_with_faces": snapshot.source.persons.len(),
		"stats": {
			"orphan_count": snapshot.source.orphans.len(),
			"total_historical_items_lost": snapshot.source.orphans
				.iter()
				.map(|o| o.historical_item_count)
				.sum::<i64>(),
		}
	}));
	Ok(body)
}

#[derive(Deserialize)]
struct SourceDbConfig {
	path: String,
}

async fn handler_config_source_db(
	State(mc): State<ModelController>,
	Json(config): Json<SourceDbConfig>,
) -> Result<Json<Value>> {
	server::update_source_db(config.path).await;
	mc.reset_source().await;
	let status = mc.source_status().await;
	Ok(Json(json!({
		"success": status["connected"] == true,
		"status": status,
		"config": server::current_config().await,
	})))
}

#[derive(Deserialize)]
struct TargetApiConfig {
	url: Option<String>,
	api_key: Option<String>,
}

async fn handler_config_target_api(
	State(mc): State<ModelController>,
	Json(config): Json<TargetApiConfig>,
) -> Result<Json<Value>> {
	server::update_target_api(config.url, config.api_key).await;
	let status = mc.api_status().await;
	Ok(Json(json!({
		"success": status["connected"] == true,
		"status": status,
		"config": server::current_config().await,
	})))
}

#[derive(Deserialize)]
struct TargetDbConfigBody {
	host: Option<String>,
	port: Option<u16>,
	name: Option<String>,
	user: Option<String>,
	password: Option<String>,
}

async fn handler_config_target_db(
	State(mc): State<ModelController>,
	Json(config): Json<TargetDbConfigBody>,
) -> Result<Json<Value>> {
	server::update_target_db(config.host, config.port, config.name, config.user, config.password).await;
	mc.reset_target().await;
	let status = mc.target_status().await;
	Ok(Json(json!({
		"success": status["connected"] == true,
		"status": status,
		"config": server::current_config().await,
	})))
}
