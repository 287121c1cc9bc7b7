use log::error;
use rouille::Response;
use serde::Serialize;

use crate::pipeline::error::{ErrorKind, PipelineError};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err.kind() {
            ErrorKind::Validation | ErrorKind::Extraction => ApiError::BadRequest(err.to_string()),

            // a stream that failed before the response started looks like a missing track
            ErrorKind::NotFound | ErrorKind::StreamTermination => {
                ApiError::NotFound(err.to_string())
            }

            ErrorKind::UpstreamStore => {
                error!("{err}");
                ApiError::Internal("internal server error".into())
            }
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::BadRequest(_) => 400,
            ApiError::Internal(_) => 500,
        }
    }

    pub fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg,
        };
        Response::json(&ErrorBody { message }).with_status_code(status)
    }
}
