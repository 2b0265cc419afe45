use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use forum_backend::{
    AppState,
    auth::{Role, TokenService},
    captcha::CaptchaService,
    config::Config,
    middleware::{log_errors, run_pipeline},
    pipeline::RequestPipeline,
    rate_limit::{RateLimitOptions, RateLimiter},
    response_cache::{CacheOptions, ResponseCache},
    routes,
    routes::user::{MemoryUserDirectory, PROFILE_CACHE_PREFIX},
    store::{KeyValueStore, SharedStore},
};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 进程级唯一的共享存储客户端
    let store: Arc<dyn KeyValueStore> = Arc::new(
        SharedStore::connect(&config.redis_url, config.store_timeout())
            .expect("Failed to create Redis client"),
    );

    // 信任层各组件，全部注入同一个存储
    let tokens = Arc::new(TokenService::new(
        config.jwt_secret.clone(),
        config.jwt_expiration(),
    ));
    let captcha = Arc::new(CaptchaService::new(store.clone(), config.captcha_ttl()));
    let limiter = Arc::new(RateLimiter::new(store.clone()));
    let cache = Arc::new(ResponseCache::new(store.clone()));
    let users = Arc::new(MemoryUserDirectory::new());

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        users,
        tokens: tokens.clone(),
        captcha,
        cache: cache.clone(),
    };

    // 每个路由组一条管道：限流 → 缓存查询 → 认证，按需选装
    let public_pipeline = Arc::new(RequestPipeline::new().with_rate_limit(
        limiter.clone(),
        RateLimitOptions {
            limit: config.rate_limit_requests,
            window_seconds: config.rate_limit_window_secs,
            key_prefix: Some("public".to_string()),
        },
    ));
    let profile_pipeline = Arc::new(
        RequestPipeline::new()
            .with_rate_limit(
                limiter.clone(),
                RateLimitOptions {
                    limit: config.rate_limit_requests,
                    window_seconds: config.rate_limit_window_secs,
                    key_prefix: Some("read".to_string()),
                },
            )
            .with_cache(
                cache.clone(),
                CacheOptions {
                    ttl_seconds: config.cache_ttl_secs,
                    key_prefix: PROFILE_CACHE_PREFIX.to_string(),
                    skip_cache: false,
                },
            ),
    );
    let protected_pipeline = Arc::new(
        RequestPipeline::new()
            .with_rate_limit(
                limiter.clone(),
                RateLimitOptions {
                    limit: config.rate_limit_requests,
                    window_seconds: config.rate_limit_window_secs,
                    key_prefix: Some("user".to_string()),
                },
            )
            .with_auth(tokens.clone(), Role::User),
    );
    let admin_pipeline = Arc::new(
        RequestPipeline::new()
            .with_rate_limit(
                limiter,
                RateLimitOptions {
                    limit: config.rate_limit_requests,
                    window_seconds: config.rate_limit_window_secs,
                    key_prefix: Some("admin".to_string()),
                },
            )
            .with_auth(tokens, Role::Admin),
    );

    // 公开路由：验证码与验证码门禁下的注册、登录
    let public_routes = Router::new()
        .route("/captcha/generate", post(routes::captcha::generate))
        .route("/users/register", post(routes::user::register))
        .route("/users/login", post(routes::user::login))
        .layer(axum::middleware::from_fn_with_state(
            public_pipeline,
            run_pipeline,
        ));

    // 公开只读路由，带响应缓存
    let read_routes = Router::new()
        .route("/users/profile", get(routes::user::get_profile))
        .layer(axum::middleware::from_fn_with_state(
            profile_pipeline,
            run_pipeline,
        ));

    // 需要认证的用户路由
    let protected_routes = Router::new()
        .route("/users/refresh-token", post(routes::user::refresh_token))
        .route("/users/check-token", get(routes::user::check_token))
        .route("/users/update-nickname", put(routes::user::update_nickname))
        .layer(axum::middleware::from_fn_with_state(
            protected_pipeline,
            run_pipeline,
        ));

    // 管理员路由
    let admin_routes = Router::new()
        .route("/users/set-role", put(routes::user::set_role))
        .layer(axum::middleware::from_fn_with_state(
            admin_pipeline,
            run_pipeline,
        ));

    // 添加日志中间件
    let router = Router::new()
        .merge(public_routes)
        .merge(read_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn(log_errors));

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        let cors = CorsLayer::permissive();
        router.layer(cors)
    };

    // 添加应用状态
    let app = router.with_state(state.clone());

    // 启动服务器
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
