use std::collections::HashMap;

use axum::{
    http::{StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};

use crate::auth::TokenFault;
use crate::utils::{error_codes, error_to_api_response};

/// 管道与处理器的失败出口，统一在边界翻译为 HTTP 响应
#[derive(Debug)]
pub enum AppError {
    /// 令牌缺失、格式错误、签名错误或已过期，401
    InvalidToken(TokenFault),
    /// 令牌有效但角色不足，403
    Forbidden,
    /// 用户名或密码错误，401
    BadCredentials,
    /// 验证码错误、过期或已被消费，对外不区分，400
    CaptchaInvalid,
    /// 超出限流窗口配额，429
    RateLimitExceeded { retry_after_secs: u64 },
    /// 请求参数不合法，422
    Validation(String),
    /// 用户已存在，409
    UserExists,
    /// 资源不存在，404
    NotFound,
    /// 未预期的内部失败，细节只进日志，对外一律 500
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppErrorKind {
    InvalidToken,
    Forbidden,
    BadCredentials,
    CaptchaInvalid,
    RateLimited,
    Validation,
    UserExists,
    NotFound,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> AppErrorKind {
        match self {
            AppError::InvalidToken(_) => AppErrorKind::InvalidToken,
            AppError::Forbidden => AppErrorKind::Forbidden,
            AppError::BadCredentials => AppErrorKind::BadCredentials,
            AppError::CaptchaInvalid => AppErrorKind::CaptchaInvalid,
            AppError::RateLimitExceeded { .. } => AppErrorKind::RateLimited,
            AppError::Validation(_) => AppErrorKind::Validation,
            AppError::UserExists => AppErrorKind::UserExists,
            AppError::NotFound => AppErrorKind::NotFound,
            AppError::Internal(_) => AppErrorKind::Internal,
        }
    }

    fn default_translation(&self) -> (StatusCode, i32, String) {
        match self {
            AppError::InvalidToken(TokenFault::Expired) => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "令牌已过期".to_string(),
            ),
            AppError::InvalidToken(_) => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "令牌无效".to_string(),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                error_codes::PERMISSION_DENIED,
                "权限不足".to_string(),
            ),
            AppError::BadCredentials => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "用户名或密码错误".to_string(),
            ),
            AppError::CaptchaInvalid => (
                StatusCode::BAD_REQUEST,
                error_codes::CAPTCHA_INVALID,
                "验证码错误或已过期".to_string(),
            ),
            AppError::RateLimitExceeded { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                error_codes::RATE_LIMIT,
                format!("请求过于频繁，请在{}秒后重试", retry_after_secs),
            ),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                error_codes::VALIDATION_ERROR,
                msg.clone(),
            ),
            AppError::UserExists => (
                StatusCode::CONFLICT,
                error_codes::USER_EXISTS,
                "用户已存在".to_string(),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                error_codes::NOT_FOUND,
                "资源不存在".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
                "内部服务器错误".to_string(),
            ),
        }
    }
}

/// 错误种类到 HTTP 结果的翻译表，默认映射可按路由组覆盖
#[derive(Default)]
pub struct ErrorTranslator {
    overrides: HashMap<AppErrorKind, (StatusCode, String)>,
}

impl ErrorTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, kind: AppErrorKind, status: StatusCode, message: &str) -> Self {
        self.overrides.insert(kind, (status, message.to_string()));
        self
    }

    pub fn translate(&self, error: &AppError) -> Response {
        if let AppError::Internal(detail) = error {
            tracing::error!("internal error: {}", detail);
        }

        let (status, code, msg) = error.default_translation();
        let (status, msg) = match self.overrides.get(&error.kind()) {
            Some((status, msg)) => (*status, msg.clone()),
            None => (status, msg),
        };

        let mut response = (status, error_to_api_response::<()>(code, msg)).into_response();
        if let AppError::RateLimitExceeded { retry_after_secs } = error {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ErrorTranslator::new().translate(&self)
    }
}
