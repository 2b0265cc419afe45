/// 验证码记录键前缀
const CAPTCHA_PREFIX: &str = "captcha:";

/// 限流计数器键前缀
const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// 响应缓存键前缀
const RESP_CACHE_PREFIX: &str = "resp_cache:";

/// 生成验证码记录键
pub fn captcha_key(captcha_id: &str) -> String {
    format!("{}{}", CAPTCHA_PREFIX, captcha_id)
}

/// 生成限流计数器键
pub fn rate_limit_key(prefix: &str, client: &str, path: &str) -> String {
    format!("{}{}:{}:{}", RATE_LIMIT_PREFIX, prefix, client, path)
}

/// 生成响应缓存键
pub fn response_cache_key(prefix: &str, digest: &str) -> String {
    format!("{}{}:{}", RESP_CACHE_PREFIX, prefix, digest)
}

/// 某个缓存前缀下所有键的匹配模式
pub fn response_cache_pattern(prefix: &str) -> String {
    format!("{}{}:*", RESP_CACHE_PREFIX, prefix)
}
