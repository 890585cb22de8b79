use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use derive_more::From;
use serde_json::json;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Serialize, From, strum_macros::AsRefStr)]
#[serde(tag = "type", content = "data")]
pub enum Error {
	Error { message: String},

    // -- Servers errors.
	ServerMalformatedConfigFile,
	ServerUnableToAccessServerLocalFolder,
	ServerFileNotFound,

	// -- Externals

	#[from]
	Model(crate::model::error::Error),
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

#[derive(Debug, Clone, Serialize, strum_macros::AsRefStr)]
#[serde(tag = "error", content = "detail")]
#[allow(non_camel_case_types)]
pub enum ClientError {
	NOT_FOUND,
	SERVICE_ERROR,
	Custom(String),
}

impl Error {
	pub fn client_status_and_error(&self) -> (StatusCode, ClientError) {
		match self {
			Error::Model(error) => error.client_status_and_error(),
			Error::ServerFileNotFound => (StatusCode::NOT_FOUND, ClientError::NOT_FOUND),
			_ => (StatusCode::INTERNAL_SERVER_ERROR, ClientError::SERVICE_ERROR),
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let (status, client_error) = self.client_status_and_error();
		let body = Json(json!({
			"error": {
				"type": client_error.as_ref(),
				"detail": client_error,
				"message": self.to_string(),
			}
		}));

		(status, body).into_response()
	}
}
