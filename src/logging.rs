//! 日志初始化：默认 info 级别，可由 RUST_LOG 覆盖。

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Outbound HTTP client crates are noisy at debug; keep them at warn unless asked.
const DEFAULT_DIRECTIVES: &str = "info,reqwest=warn,hyper_util=warn";

/// 初始化 tracing 日志订阅；`RUST_LOG` 优先于默认过滤规则。
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
