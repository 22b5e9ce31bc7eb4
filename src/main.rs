use apisync_lib::logging::init_logging;
use apisync_lib::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    init_logging();

    let state = AppState::new().await?;

    let connections = state.registry.connections().await;
    tracing::info!("同步引擎已启动，共 {} 个连接", connections.len());

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到退出信号");

    state.cleanup().await;
    Ok(())
}
