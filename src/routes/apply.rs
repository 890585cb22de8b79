use crate::{
	model::{
		executor::{AckItem, AssignItem, CreateFaceItem, RenameItem},
		ModelController,
	},
	Result,
};
use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::Value;


pub fn routes(mc: ModelController) -> Router {
	Router::new()
		.route("/apply", post(handler_apply))
		.route("/apply/unclustered", post(handler_apply_unclustered))
		.route("/apply/merge", post(handler_apply_merge))
		.route("/apply/fix", post(handler_apply_fix))
		.route("/create-faces/apply", post(handler_create_faces))
		.with_state(mc)
}

fn default_dry_run() -> bool {
	true
}

#[derive(Deserialize)]
struct ApplyParams {
	matches: Vec<RenameItem>,
	#[serde(default = "default_dry_run")]
	dry_run: bool,
}

async fn handler_apply(
	State(mc): State<ModelController>,
	Json(params): Json<ApplyParams>,
) -> Result<Json<Value>> {
	let report = mc.apply_renames(params.matches, params.dry_run).await;
	Ok(Json(report.to_response()))
}

#[derive(Deserialize)]
struct ApplyUnclusteredParams {
	items: Vec<AssignItem>,
	#[serde(default = "default_dry_run")]
	dry_run: bool,
}

async fn handler_apply_unclustered(
	State(mc): State<ModelController>,
	Json(params): Json<ApplyUnclusteredParams>,
) -> Result<Json<Value>> {
	let report = mc.apply_unclustered(params.items, params.dry_run).await;
	Ok(Json(report.to_response()))
}

#[derive(Deserialize)]
struct CreateFacesParams {
	src_person_id: i64,
	src_person_name: String,
	faces: Vec<CreateFaceItem>,
	#[serde(default = "default_dry_run")]
	dry_run: bool,
}

async fn handler_create_faces(
	State(mc): State<ModelController>,
	Json(params): Json<CreateFacesParams>,
) -> Result<Json<Value>> {
	let report = mc
		.apply_create_faces(&params.src_person_name, params.faces, params.dry_run)
		.await;
	Ok(Json(report.to_response()))
}

#[derive(Deserialize)]
struct MergeAckItem {
	src_person_id: i64,
	src_person_name: String,
	cluster_ids: Vec<String>,
}

#[derive(Deserialize)]
struct MergeAckParams {
	items: Vec<MergeAckItem>,
}

async fn handler_apply_merge(
	State(mc): State<ModelController>,
	Json(params): Json<MergeAckParams>,
) -> Result<Json<Value>> {
	let items = params
		.items
		.into_iter()
		.map(|i| AckItem {
			label: format!("merge {}: {}", i.src_person_name, i.cluster_ids.join(" + ")),
		})
		.collect();
	let report = mc.acknowledge(items).await;
	Ok(Json(report.to_response()))
}

#[derive(Deserialize)]
struct FixAckItem {
	cluster_id: String,
	cluster_name: Option<String>,
}

#[derive(Deserialize)]
struct FixAckParams {
	items: Vec<FixAckItem>,
}

async fn handler_apply_fix(
	State(mc): State<ModelController>,
	Json(params): Json<FixAckParams>,
) -> Result<Json<Value>> {
	let items = params
		.items
		.into_iter()
		.map(|i| AckItem {
			label: format!(
				"fix cluster {}",
				i.cluster_name.unwrap_or(i.cluster_id)
			),
		})
		.collect();
	let report = mc.acknowledge(items).await;
	Ok(Json(report.to_response()))
}
