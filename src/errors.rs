use crate::detector::DetectError;
use crate::models::ErrorBody;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("No output image generated")]
    NoOutputImage,
    #[error("Missing multipart field `{0}`")]
    MissingUpload(String),
    #[error("Unsupported image format")]
    UnsupportedFormat,
    #[error("Invalid multipart body: {0}")]
    Multipart(String),
    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("Inference task was cancelled")]
    Cancelled,
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::MissingUpload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PredictError::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            PredictError::Multipart(_) => StatusCode::BAD_REQUEST,
            PredictError::NoOutputImage
            | PredictError::Storage(_)
            | PredictError::Detect(_)
            | PredictError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::new(self.to_string()))
    }
}
