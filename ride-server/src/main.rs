use anyhow::Context;
use ride_server::{Config, Server, ServerState, init_logger_with_file};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. .env + 日志
    let _ = dotenv::dotenv();
    let config = Config::from_env();
    std::fs::create_dir_all(config.log_dir())
        .with_context(|| format!("creating {}", config.log_dir().display()))?;
    let log_dir = config.log_dir();
    init_logger_with_file(
        std::env::var("LOG_LEVEL").ok().as_deref(),
        std::env::var("LOG_JSON").ok().map(|v| v == "true"),
        log_dir.to_str(),
    );

    tracing::info!(work_dir = %config.work_dir, http_port = config.http_port, "Ride server starting...");

    // 2. 初始化服务器状态
    let state = ServerState::initialize(&config)
        .await
        .context("initializing server state")?;

    // 3. 预热 + 后台任务 + HTTP
    Server::with_state(config, state)
        .run()
        .await
        .context("server stopped with an error")?;

    Ok(())
}
