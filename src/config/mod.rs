use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub captcha_ttl_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub cache_ttl_secs: u64,
    pub store_timeout_millis: u64,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = env::var("JWT_EXPIRATION")?
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(24);
        Ok(Config {
            redis_url: env::var("REDIS_URL")?,
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            captcha_ttl_secs: env::var("CAPTCHA_TTL")?.parse().unwrap_or(300),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")?.parse().unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")?.parse().unwrap_or(100),
            cache_ttl_secs: env::var("CACHE_TTL")?.parse().unwrap_or(60),
            store_timeout_millis: env::var("STORE_TIMEOUT_MS")?.parse().unwrap_or(500),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn captcha_ttl(&self) -> Duration {
        Duration::from_secs(self.captcha_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_millis)
    }

    /// 测试用配置，不读取环境变量
    pub fn for_tests(jwt_expiration_secs: u64) -> Self {
        Config {
            redis_url: "redis://127.0.0.1/".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expiration_secs,
            captcha_ttl_secs: 300,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            cache_ttl_secs: 60,
            store_timeout_millis: 500,
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
        }
    }
}
