use axum::{
    extract::{Extension, Json, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};

use crate::{
    AppState,
    auth::{Claims, TokenFault},
    error::AppError,
    response_cache::ResponseCache,
    utils::success_to_api_response,
};

use super::directory::UserDirectory;
use super::model::{
    CheckTokenResponse, CreateRegisteredUserRequest, CreateUserResponse, LoginRequest,
    LoginResponse, ProfileQuery, ProfileResponse, RefreshTokenResponse, SetRoleRequest,
    UpdateNicknameRequest,
};

/// 用户资料缓存的键前缀，路由装配与写处理器共用
pub const PROFILE_CACHE_PREFIX: &str = "user_profile";

const PROFILE_PATH: &str = "/users/profile";

// 写操作按这里的规则枚举受影响的缓存键；
// 资料读取路由的查询串必须恰好是 user_id=<id> 才能命中
fn profile_cache_key(user_id: &str) -> String {
    ResponseCache::key_for(
        PROFILE_CACHE_PREFIX,
        "GET",
        PROFILE_PATH,
        Some(&format!("user_id={}", user_id)),
    )
}

/// 注册，需携带有效的验证码挑战与答案
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CreateRegisteredUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    // 检查用户ID格式
    if req.user_id.is_empty() || !req.user_id.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(AppError::Validation(
            "用户ID格式无效，只允许使用字母、数字和下划线".to_string(),
        ));
    }

    // 验证码一次性消费，失败原因对客户端不区分
    if !state.captcha.verify(&req.captcha_id, &req.captcha_answer).await {
        return Err(AppError::CaptchaInvalid);
    }

    let user = state
        .users
        .create(&req.user_id, &req.nickname, &req.password)
        .await?;

    let (token, _) = state.tokens.issue(
        &user.user_id,
        user.role,
        state.config.jwt_expiration(),
    )?;

    Ok((
        StatusCode::OK,
        success_to_api_response(CreateUserResponse {
            user_id: user.user_id,
            nickname: user.nickname,
            token,
        }),
    ))
}

/// 登录，同样由验证码门禁保护
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state.captcha.verify(&req.captcha_id, &req.captcha_answer).await {
        return Err(AppError::CaptchaInvalid);
    }

    let user = state.users.verify_login(&req.user_id, &req.password).await?;

    let (token, _) = state.tokens.issue(
        &user.user_id,
        user.role,
        state.config.jwt_expiration(),
    )?;

    Ok((
        StatusCode::OK,
        success_to_api_response(LoginResponse {
            user_id: user.user_id,
            token,
        }),
    ))
}

/// 公开的用户资料读取，响应由缓存管道记忆
#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AppState>,
    Query(query): Query<ProfileQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .users
        .find(&query.user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok((
        StatusCode::OK,
        success_to_api_response(ProfileResponse {
            user_id: user.user_id,
            nickname: user.nickname,
            role: user.role,
        }),
    ))
}

/// 用仍然有效的令牌换取新令牌，旧令牌自然过期
#[axum::debug_handler]
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidToken(TokenFault::Malformed))?;

    let (token, expires_at) = state.tokens.refresh(token)?;

    Ok((
        StatusCode::OK,
        success_to_api_response(RefreshTokenResponse { token, expires_at }),
    ))
}

/// 检查token是否有效，认证中间件通过即成功
#[axum::debug_handler]
pub async fn check_token(
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    Ok((
        StatusCode::OK,
        success_to_api_response(CheckTokenResponse {
            user_id: claims.sub,
            role: claims.role,
        }),
    ))
}

/// 修改昵称；写操作负责删掉自己影响到的缓存键
#[axum::debug_handler]
pub async fn update_nickname(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<UpdateNicknameRequest>,
) -> Result<impl IntoResponse, AppError> {
    // 验证昵称长度
    if req.nickname.len() < 2 || req.nickname.len() > 24 {
        return Err(AppError::Validation(
            "昵称长度必须在2到24个字符之间".to_string(),
        ));
    }

    let user = state
        .users
        .update_nickname(&claims.sub, &req.nickname)
        .await?;

    // 资料已变更，立即失效对应的缓存条目
    state
        .cache
        .invalidate(&[profile_cache_key(&user.user_id)])
        .await;

    Ok((
        StatusCode::OK,
        success_to_api_response(ProfileResponse {
            user_id: user.user_id,
            nickname: user.nickname,
            role: user.role,
        }),
    ))
}

/// 调整用户角色，仅管理员路由组可达
#[axum::debug_handler]
pub async fn set_role(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<SetRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.users.set_role(&req.user_id, req.role).await?;
    tracing::info!("{} set role of {} to {:?}", claims.sub, user.user_id, user.role);

    state
        .cache
        .invalidate(&[profile_cache_key(&user.user_id)])
        .await;

    Ok((
        StatusCode::OK,
        success_to_api_response(ProfileResponse {
            user_id: user.user_id,
            nickname: user.nickname,
            role: user.role,
        }),
    ))
}
