//! tutor - 对话式辅导客户端
//!
//! 入口：初始化日志、创建编排器，并运行行式交互循环。第一个参数可指定额外的配置文件。

use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tutor::core::{create_tutor, Command};
use tutor::repl::run_repl;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖；写到 stderr，不与对话输出混在一起
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let handle = create_tutor(config_path)
        .await
        .context("Failed to create tutor")?;

    // 读取偏好、刷新目录、自动进入上次的概念
    handle.send(Command::Initialize);

    run_repl(handle).await.context("REPL failed")?;
    Ok(())
}
