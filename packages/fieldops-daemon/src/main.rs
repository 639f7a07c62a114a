//! Boots the Planner HTTP surface: loads config, builds the `Daemon`
//! (registry, pool, handlers, worker fleet), and runs until a shutdown
//! signal arrives (§5, §11).

use fieldops_daemon::{shutdown, Config, Daemon};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let daemon = Daemon::build(config).await?;

    let shutdown_token = CancellationToken::new();
    let signal_task = tokio::spawn(shutdown::wait_for_signal(shutdown_token.clone()));

    daemon.run(shutdown_token).await?;
    signal_task.abort();
    Ok(())
}
