// 令牌模块
// 无状态签名令牌：签发、校验、续签，不依赖共享存储，不做服务端吊销

use chrono::Utc;
use jsonwebtoken::{
    DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AppError;

/// 角色等级，顺序即权限高低
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    User,
    Moderator,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_at_least(&self, required: Role) -> bool {
        *self >= required
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    pub role: Role,  // 角色等级
    pub iat: i64,    // 签发时间
    pub exp: i64,    // 过期时间
}

/// 校验失败的具体原因，统一映射为 401
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFault {
    Malformed,
    BadSignature,
    Expired,
}

pub struct TokenService {
    secret: String,
    default_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: String, default_ttl: Duration) -> Self {
        Self {
            secret,
            default_ttl,
        }
    }

    /// 签发令牌，返回 (token, 过期时间戳)
    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        ttl: Duration,
    ) -> Result<(String, i64), AppError> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::seconds(ttl.as_secs() as i64))
            .expect("valid timestamp")
            .timestamp();

        let claims = Claims {
            sub: subject.to_string(),
            role,
            iat: now.timestamp(),
            exp: expiration,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token encoding failed: {}", e)))?;

        Ok((token, expiration))
    }

    /// 校验令牌：结构、签名、过期时间，三者全部通过才返回声明
    pub fn verify(&self, token: &str) -> Result<Claims, TokenFault> {
        // 不留余量，now < exp 严格成立
        let mut validation = Validation::default();
        validation.leeway = 0;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenFault::Expired,
            ErrorKind::InvalidSignature => TokenFault::BadSignature,
            _ => TokenFault::Malformed,
        })?;

        Ok(token_data.claims)
    }

    /// 用仍然有效的旧令牌换取新令牌；旧令牌不吊销，自然过期
    pub fn refresh(&self, old_token: &str) -> Result<(String, i64), AppError> {
        let claims = self.verify(old_token).map_err(AppError::InvalidToken)?;
        self.issue(&claims.sub, claims.role, self.default_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(ttl_secs: u64) -> TokenService {
        TokenService::new("test-secret".to_string(), Duration::from_secs(ttl_secs))
    }

    #[test]
    fn issue_then_verify_returns_the_claims() {
        let tokens = service(3600);
        let (token, expires_at) = tokens
            .issue("alice", Role::User, Duration::from_secs(3600))
            .unwrap();

        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, Role::User);
        assert_eq!(claims.exp, expires_at);
        assert!(claims.iat <= claims.exp);
    }

    #[test]
    fn tampered_claims_fail_with_bad_signature() {
        let tokens = service(3600);
        let (token, _) = tokens
            .issue("alice", Role::User, Duration::from_secs(3600))
            .unwrap();

        // 改动载荷段里的一个字符，签名校验必须失败
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        assert_eq!(parts.len(), 3);
        let payload = &mut parts[1];
        let flipped = if payload.as_bytes()[0] == b'A' { 'B' } else { 'A' };
        payload.replace_range(0..1, &flipped.to_string());
        let tampered = parts.join(".");

        assert!(matches!(
            tokens.verify(&tampered),
            Err(TokenFault::BadSignature)
        ));
    }

    #[test]
    fn wrong_secret_fails_with_bad_signature() {
        let tokens = service(3600);
        let other = TokenService::new("other-secret".to_string(), Duration::from_secs(3600));
        let (token, _) = other
            .issue("alice", Role::User, Duration::from_secs(3600))
            .unwrap();

        assert!(matches!(
            tokens.verify(&token),
            Err(TokenFault::BadSignature)
        ));
    }

    #[test]
    fn expired_token_fails_with_expired() {
        let tokens = service(3600);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "alice".to_string(),
            role: Role::User,
            iat: now - 120,
            exp: now - 60,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret("test-secret".as_bytes()),
        )
        .unwrap();

        assert!(matches!(tokens.verify(&token), Err(TokenFault::Expired)));
    }

    #[test]
    fn garbage_fails_with_malformed() {
        let tokens = service(3600);
        assert!(matches!(
            tokens.verify("not-a-token"),
            Err(TokenFault::Malformed)
        ));
        assert!(matches!(tokens.verify(""), Err(TokenFault::Malformed)));
    }

    #[test]
    fn refresh_keeps_subject_and_role() {
        let tokens = service(3600);
        let (token, _) = tokens
            .issue("mod-1", Role::Moderator, Duration::from_secs(3600))
            .unwrap();

        let (refreshed, _) = tokens.refresh(&token).unwrap();
        let claims = tokens.verify(&refreshed).unwrap();
        assert_eq!(claims.sub, "mod-1");
        assert_eq!(claims.role, Role::Moderator);

        // 旧令牌不吊销，仍然有效
        assert!(tokens.verify(&token).is_ok());
    }

    #[test]
    fn refresh_of_invalid_token_is_rejected() {
        let tokens = service(3600);
        assert!(matches!(
            tokens.refresh("not-a-token"),
            Err(AppError::InvalidToken(TokenFault::Malformed))
        ));
    }

    #[test]
    fn role_order_matches_privilege() {
        assert!(Role::SuperAdmin.is_at_least(Role::Admin));
        assert!(Role::Moderator.is_at_least(Role::User));
        assert!(Role::User.is_at_least(Role::User));
        assert!(!Role::Guest.is_at_least(Role::User));
        assert!(!Role::Admin.is_at_least(Role::SuperAdmin));
    }
}
