use std::fmt::{Debug, Display};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use shared_album_api::ErrorResponse;

/// Request-level error: an [`anyhow::Error`] chain paired with the HTTP
/// status it should surface as. Defaults to 500 when converted via `?`.
pub struct Error(anyhow::Error, StatusCode);

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}
impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error(value, StatusCode::INTERNAL_SERVER_ERROR)
    }
}
impl std::error::Error for Error {}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        self.1
    }

    fn error_response(&self) -> HttpResponse {
        // Internal errors get logged with the full context chain and reported
        // with a generic message; everything else surfaces its top context.
        let error = if self.1 == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Internal error while handling a request: {:?}", self.0);
            "Internal server error".to_owned()
        } else {
            format!("{}", self.0)
        };
        HttpResponse::build(self.1).json(ErrorResponse { error })
    }
}

impl Error {
    pub fn new(err: anyhow::Error, status: StatusCode) -> Self {
        Error(err, status)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
