// rest/routes/admin.rs — Admin password gate.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::rest::ApiResult;
use crate::AppContext;

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: Option<String>,
}

pub async fn login(State(ctx): State<Arc<AppContext>>, Json(body): Json<LoginRequest>) -> ApiResult {
    if body.password.as_deref() == Some(ctx.config.admin_password.as_str()) {
        Ok(Json(json!({
            "success": true,
            "message": "Login successful",
        })))
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "success": false,
                "message": "Invalid password",
            })),
        ))
    }
}
