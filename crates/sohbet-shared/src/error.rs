use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed message: expected a JSON object")]
    NotAnObject,
}
