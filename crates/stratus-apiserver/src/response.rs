use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// API response wrapper
pub struct ApiResponse<T: Serialize> {
    status: StatusCode,
    body: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a new response with 200 OK
    pub fn ok(body: T) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    /// Create a new response with 201 Created
    pub fn created(body: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            body,
        }
    }

    /// 202 Accepted, for requests completed asynchronously
    pub fn accepted(body: T) -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            body,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// List body with an item count
#[derive(Serialize)]
pub struct ListResponse<T: Serialize> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// Create a deletion Status response
pub fn status_deleted(name: &str, kind: &str) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "kind": "Status",
            "status": "Success",
            "message": format!("{} {} deleted", kind, name),
            "code": 200
        })),
    )
        .into_response()
}
