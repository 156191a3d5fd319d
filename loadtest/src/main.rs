use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the imagegate image gateway.
///
/// Simulates traffic against a running gateway:
/// - Randomized widths and qualities (durable/transformation misses)
/// - A fixed request (edge hits after warmup)
/// - The same image behind varying URLs (edge misses, durable hits)
/// - Health monitoring
///
/// The gateway must allow `SOURCE_HOST` and point at a live
/// transformation service.
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:8080 --users 10 --hatch-rate 2 --run-time 60s
/// ```
const SOURCE_HOST: &str = "picsum.photos";

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("ImageDelivery")
                .register_transaction(transaction!(uncached_image).set_weight(5)?)
                .register_transaction(transaction!(edge_cached_image).set_weight(15)?)
                .register_transaction(transaction!(durable_cached_image).set_weight(10)?)
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .execute()
        .await?;

    Ok(())
}

fn src(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("https://{}/{}", SOURCE_HOST, path))
}

/// Unique parameters force a transformation call on every request.
async fn uncached_image(user: &mut GooseUser) -> TransactionResult {
    // Generate random parameters before await to satisfy Send bounds
    let url = {
        let mut rng = rand::thread_rng();
        format!(
            "/?src={}&w={}&h={}&q={}",
            src("id/237/2000/2000.jpg"),
            rng.gen_range(100..1000),
            rng.gen_range(100..1000),
            rng.gen_range(40..95),
        )
    };

    let _goose = user.get(&url).await?;
    Ok(())
}

/// Identical URL every time: served from the edge tier after warmup.
async fn edge_cached_image(user: &mut GooseUser) -> TransactionResult {
    let url = format!("/?src={}&w=500&h=500&fit=cover", src("id/237/2000/2000.jpg"));
    let _goose = user.get(&url).await?;
    Ok(())
}

/// Same options behind a changing URL: edge miss, durable hit.
async fn durable_cached_image(user: &mut GooseUser) -> TransactionResult {
    let url = format!(
        "/?src={}&w=400&q=80&cb={}",
        src("id/10/2000/2000.jpg"),
        chrono::Utc::now().timestamp_millis()
    );
    let _goose = user.get(&url).await?;
    Ok(())
}

/// Baseline infrastructure latency.
async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
