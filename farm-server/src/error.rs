use axum::http::StatusCode;
use farm_core::error::FarmError;

/// Maps the `farm-core` error taxonomy onto HTTP status, per §4.4's transport
/// contract. Handlers turn a `FarmResult<T>` into `Result<Json<T>, ApiError>`
/// with `.map_err(ApiError)?` rather than duplicating this match everywhere.
pub struct ApiError(pub FarmError);

impl From<FarmError> for ApiError {
    fn from(e: FarmError) -> Self {
        ApiError(e)
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            FarmError::NotFound(_) => StatusCode::NOT_FOUND,
            FarmError::Conflict(_) => StatusCode::CONFLICT,
            FarmError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            FarmError::Contention(_) | FarmError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FarmError::ConverterFailed(_) | FarmError::ConverterTimedOut(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FarmError::Sql(_) | FarmError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}
