use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::auth::Role;
use crate::error::AppError;
use crate::utils::{hash_password, verify_password};

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: String,
    pub nickname: String,
    pub role: Role,
    pub password_hash: String,
}

/// 用户目录：信任层之外的持久化协作方。
/// 注册、登录、资料读写都经由它完成；生产部署换成数据库实现。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn create(
        &self,
        user_id: &str,
        nickname: &str,
        password: &str,
    ) -> Result<UserRecord, AppError>;

    async fn verify_login(&self, user_id: &str, password: &str) -> Result<UserRecord, AppError>;

    async fn find(&self, user_id: &str) -> Result<Option<UserRecord>, AppError>;

    async fn update_nickname(&self, user_id: &str, nickname: &str)
    -> Result<UserRecord, AppError>;

    async fn set_role(&self, user_id: &str, role: Role) -> Result<UserRecord, AppError>;
}

/// 内存实现，单进程演示与测试用
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn create(
        &self,
        user_id: &str,
        nickname: &str,
        password: &str,
    ) -> Result<UserRecord, AppError> {
        let password_hash = hash_password(password)
            .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))?;

        let mut users = self.users.write().await;
        if users.contains_key(user_id) {
            return Err(AppError::UserExists);
        }

        let user = UserRecord {
            user_id: user_id.to_string(),
            nickname: nickname.to_string(),
            role: Role::User,
            password_hash,
        };
        users.insert(user_id.to_string(), user.clone());
        Ok(user)
    }

    async fn verify_login(&self, user_id: &str, password: &str) -> Result<UserRecord, AppError> {
        let users = self.users.read().await;
        let user = users.get(user_id).ok_or(AppError::NotFound)?;

        match verify_password(password, &user.password_hash) {
            Ok(true) => Ok(user.clone()),
            Ok(false) => Err(AppError::BadCredentials),
            Err(e) => Err(AppError::Internal(format!(
                "password verification failed: {}",
                e
            ))),
        }
    }

    async fn find(&self, user_id: &str) -> Result<Option<UserRecord>, AppError> {
        let users = self.users.read().await;
        Ok(users.get(user_id).cloned())
    }

    async fn update_nickname(
        &self,
        user_id: &str,
        nickname: &str,
    ) -> Result<UserRecord, AppError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or(AppError::NotFound)?;
        user.nickname = nickname.to_string();
        Ok(user.clone())
    }

    async fn set_role(&self, user_id: &str, role: Role) -> Result<UserRecord, AppError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or(AppError::NotFound)?;
        user.role = role;
        Ok(user.clone())
    }
}
