use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::{AppState, error::AppError, utils::success_to_api_response};

use super::model::GenerateCaptchaResponse;

/// 生成验证码挑战，返回挑战ID和图片
#[axum::debug_handler]
pub async fn generate(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let issued = state.captcha.generate().await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(GenerateCaptchaResponse::from(issued)),
    ))
}
