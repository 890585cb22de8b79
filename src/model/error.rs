use derive_more::From;
use http::StatusCode;
use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr};

use crate::error::ClientError;

pub type Result<T> = core::result::Result<T, Error>;

#[serde_as]
#[derive(Debug, Serialize, From, strum_macros::AsRefStr)]
pub enum Error {
	Other(String),

	ServiceError(String, Option<String>),

	// -- Source store.
	SourceUnreachable(String),
	SchemaUnexpected(String),
	IdentifierCollision(String),

	// -- Target store.
	TargetUnreachable(String),

	// -- Target API.
	TargetApiNotConfigured,
	TargetApiStatus(u16, String),

	NotFound(String),
	ClusterNotFound(String),
	ClusterAlreadyNamed(String, String),
	PersonNotFound(String),

	InvalidThreshold(String),

	// -- Externals
	#[from]
	TokioRusqlite(#[serde_as(as = "DisplayFromStr")] tokio_rusqlite::Error),

	#[from]
	Rusqlite(#[serde_as(as = "DisplayFromStr")] rusqlite::Error),

	#[from]
	Postgres(#[serde_as(as = "DisplayFromStr")] tokio_postgres::Error),

	#[from]
	TokioIo(#[serde_as(as = "DisplayFromStr")] tokio::io::Error),

	#[from]
	Serde(#[serde_as(as = "DisplayFromStr")] serde_json::Error),

	#[from]
	Reqwest(#[serde_as(as = "DisplayFromStr")] reqwest::Error),
}

// region:    --- Error Boilerplate

impl core::fmt::Display for Error {
	fn fmt(
		&self,
		fmt: &mut core::fmt::Formatter,
	) -> core::result::Result<(), core::fmt::Error> {
		write!(fmt, "{self:?}")
	}
}

impl std::error::Error for Error {}

// endregion: --- Error Boilerplate

impl Error {
	pub fn client_status_and_error(&self) -> (StatusCode, ClientError) {
		match self {
			Error::NotFound(_) => (StatusCode::NOT_FOUND, ClientError::NOT_FOUND),
			Error::ClusterNotFound(_) => (StatusCode::NOT_FOUND, ClientError::NOT_FOUND),
			Error::PersonNotFound(_) => (StatusCode::NOT_FOUND, ClientError::NOT_FOUND),

			Error::InvalidThreshold(message) => (StatusCode::BAD_REQUEST, ClientError::Custom(message.clone())),
			Error::ClusterAlreadyNamed(id, name) => (StatusCode::CONFLICT, ClientError::Custom(format!("Cluster {} is already named {}", id, name))),

			Error::SourceUnreachable(message) => (StatusCode::SERVICE_UNAVAILABLE, ClientError::Custom(message.clone())),
			Error::TargetUnreachable(message) => (StatusCode::SERVICE_UNAVAILABLE, ClientError::Custom(message.clone())),
			Error::TargetApiNotConfigured => (StatusCode::SERVICE_UNAVAILABLE, ClientError::Custom("Target API is not configured".to_string())),

			_ => (StatusCode::INTERNAL_SERVER_ERROR, ClientError::SERVICE_ERROR),
		}
	}
}
