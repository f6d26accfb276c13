// Demo: drive a pipelined keel client against an in-process stub application.
use anyhow::{Context, Result};
use bytes::Bytes;
use keel_client::Client;
use keel_test_harness::{AppBehavior, StubApp};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let app = StubApp::spawn(AppBehavior::Normal)
        .await
        .context("spawn stub application")?;
    info!(addr = %app.addr(), "stub application listening");

    let client = Client::new(&app.addr(), true).context("build client")?;
    client.start().await.context("start client")?;
    info!("client connected");

    // Pipeline a few requests, then force them out with one flush.
    let first = client.echo_async("one").await?;
    let second = client.echo_async("two").await?;
    client.flush().await?;
    info!(first = ?first.response(), second = ?second.response(), "pipelined echoes answered");

    // Synchronous forms flush for you and return the typed payload.
    let echoed = client.echo("hello keel").await?;
    info!(%echoed, "sync echo");

    let delivered = client.deliver_tx(Bytes::from_static(b"demo-tx")).await?;
    info!(code = delivered.code, "transaction delivered");

    let committed = client.commit().await?;
    info!(code = committed.code, "state committed");

    client.stop();
    info!("client stopped");
    Ok(())
}
