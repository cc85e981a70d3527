use std::time::Duration;

use resilient_http::{Context, OptionsOverride, ResilientClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("TARGET_URL")
        .unwrap_or_else(|_| "https://httpbin.org/status/503".to_owned());

    let client = ResilientClient::with_override(&OptionsOverride {
        max_retries: 3,
        initial_wait: Duration::from_millis(200),
        max_wait: Duration::from_secs(2),
        force_http2: true,
        ..OptionsOverride::default()
    })?;

    client.set_retry_hook(|attempt, response, error| {
        let status = response.map(|r| r.status().as_u16());
        println!("attempt {} failed: status={status:?} error={error:?}", attempt + 1);
    });

    let ctx = Context::with_timeout(Duration::from_secs(30));
    match client.get(&ctx, &url, &[("accept", "application/json")]).await {
        Ok(response) => {
            let status = response.status();
            let body = client.read_body(response).await?;
            println!("{status}: {} bytes", body.len());
        }
        Err(err) => println!("request failed: {err}"),
    }

    Ok(())
}
