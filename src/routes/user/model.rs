use serde::{Deserialize, Serialize};

use crate::auth::Role;

#[derive(Debug, Deserialize)]
pub struct CreateRegisteredUserRequest {
    pub user_id: String,
    pub password: String,
    pub nickname: String,
    pub captcha_id: String,
    pub captcha_answer: String,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user_id: String,
    pub nickname: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
    pub captcha_id: String,
    pub captcha_answer: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: String,
    pub nickname: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNicknameRequest {
    pub nickname: String,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RefreshTokenResponse {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckTokenResponse {
    pub user_id: String,
    pub role: Role,
}
