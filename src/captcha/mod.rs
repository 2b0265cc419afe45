// 验证码模块
// 生成图形验证码并写入共享存储，校验时原子读删，消费后不可重放

use std::sync::Arc;
use std::time::Duration;

use ::captcha::{Difficulty, r#gen};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{KeyValueStore, keys};

/// 存储里的挑战记录
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredChallenge {
    /// 期望答案，写入前统一转小写
    pub answer: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// 返回给调用方的挑战
#[derive(Debug, Serialize)]
pub struct CaptchaIssued {
    pub captcha_id: String,
    pub image_base64: String,
    pub expires_in_secs: u64,
}

pub struct CaptchaService {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl CaptchaService {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// 生成验证码：随机图形挑战，记录写入存储并返回不可猜测的挑战ID
    pub async fn generate(&self) -> Result<CaptchaIssued, AppError> {
        let (answer, image_base64) = {
            let challenge = r#gen(Difficulty::Easy);
            let answer = challenge.chars_as_string().to_lowercase();
            let image = challenge
                .as_base64()
                .ok_or_else(|| AppError::Internal("captcha image rendering failed".to_string()))?;
            (answer, image)
        };

        let captcha_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let record = StoredChallenge {
            answer,
            created_at: now,
            expires_at: now + self.ttl.as_secs() as i64,
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| AppError::Internal(format!("captcha record serialization failed: {}", e)))?;

        self.store
            .set_ex(&keys::captcha_key(&captcha_id), &json, self.ttl)
            .await
            .map_err(|e| AppError::Internal(format!("captcha store write failed: {}", e)))?;

        Ok(CaptchaIssued {
            captcha_id,
            image_base64,
            expires_in_secs: self.ttl.as_secs(),
        })
    }

    /// 校验并消费挑战
    ///
    /// 读删是原子的：同一挑战ID无论提交多少次、并发多少路，
    /// 只有一次能看到记录；没拿到记录（未签发、已消费、已过期）一律失败。
    /// 答案比较忽略大小写。存储超时按未通过处理。
    pub async fn verify(&self, captcha_id: &str, submitted: &str) -> bool {
        let json = match self.store.take(&keys::captcha_key(captcha_id)).await {
            Ok(Some(json)) => json,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!("captcha store read failed, treating as unverified: {}", e);
                return false;
            }
        };

        match serde_json::from_str::<StoredChallenge>(&json) {
            Ok(challenge) => challenge.answer.eq_ignore_ascii_case(submitted.trim()),
            Err(e) => {
                tracing::warn!("captcha record deserialization failed: {}", e);
                false
            }
        }
    }
}
