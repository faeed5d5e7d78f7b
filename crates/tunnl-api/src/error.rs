use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use tunnl_registry::RegistryError;

/// Error surfaced to HTTP clients as a status code and a plain text body.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::Unauthorized => StatusCode::UNAUTHORIZED,
            RegistryError::Forbidden(_) => StatusCode::FORBIDDEN,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::Conflict(_) => StatusCode::CONFLICT,
            RegistryError::InvalidSlug(_) | RegistryError::Policy(_) => StatusCode::BAD_REQUEST,
            RegistryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tunnl_policy::PolicyError;

    #[test]
    fn test_registry_error_status_mapping() {
        let cases = [
            (RegistryError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                RegistryError::Forbidden("nope".to_string()),
                StatusCode::FORBIDDEN,
            ),
            (
                RegistryError::NotFound("session sgp/ghost".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                RegistryError::Conflict("slug taken".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                RegistryError::Policy(PolicyError::UnknownNode("mars".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (
                RegistryError::Unavailable("database error".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_message_is_display_form() {
        let err = RegistryError::NotFound("session sgp/ghost".to_string());
        assert_eq!(ApiError::from(err).message, "Not found: session sgp/ghost");
    }
}
