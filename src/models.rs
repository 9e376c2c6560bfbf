use serde::{Deserialize, Serialize};

/// Body of a successful `POST /predict2`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PredictResponse {
    pub output_url: String,
    /// One label per detected box.
    pub scratches: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorBody { error: error.into() }
    }
}
