use std::sync::Arc;

pub mod auth;
pub mod captcha;
pub mod config;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod rate_limit;
pub mod response_cache;
pub mod routes;
pub mod store;
pub mod utils;

use config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn routes::user::UserDirectory>,
    pub tokens: Arc<auth::TokenService>,
    pub captcha: Arc<self::captcha::CaptchaService>,
    pub cache: Arc<response_cache::ResponseCache>,
}
