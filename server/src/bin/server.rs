//! Availability relay server.
//!
//! Subscribes to the availability channel on Redis and fans updates out to
//! browsers over server-sent events.
//!
//! # Usage
//!
//! ```bash
//! docker run -d -p 6379:6379 redis:7
//! cargo run --bin availability-relay
//! curl -N http://localhost:8080/api/v1/availability/stream/event-1
//! ```

use availability_relay_server::{Application, Config, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env();
    tracing::info!(
        address = %config.bind_address(),
        redis = %config.redis.url,
        channel = %config.hub.channel,
        retry_max_attempts = config.hub.retry_max_attempts,
        metrics_enabled = config.metrics_enabled,
        "Configuration loaded"
    );

    let app = Application::build(config).await?;
    app.run().await
}
