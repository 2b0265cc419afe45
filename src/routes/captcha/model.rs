use serde::Serialize;

use crate::captcha::CaptchaIssued;

#[derive(Debug, Serialize)]
pub struct GenerateCaptchaResponse {
    pub captcha_id: String,
    /// PNG 图片的 base64 编码
    pub image_base64: String,
    pub expires_in_secs: u64,
}

impl From<CaptchaIssued> for GenerateCaptchaResponse {
    fn from(issued: CaptchaIssued) -> Self {
        Self {
            captcha_id: issued.captcha_id,
            image_base64: issued.image_base64,
            expires_in_secs: issued.expires_in_secs,
        }
    }
}
