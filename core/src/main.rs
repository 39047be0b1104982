/// MarketLink chat - interactive realtime conversation
use marketlink_core::cli_app;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn"))
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(conversation_id) = args.get(1).and_then(|raw| raw.parse::<u64>().ok()) else {
        eprintln!("Usage: {} <conversation_id> [display_name]", args.first().map(|s| s.as_str()).unwrap_or("core"));
        return Ok(());
    };
    let display_name = args.get(2).cloned().unwrap_or_else(|| "me".to_string());

    cli_app::chat(conversation_id, display_name).await
}
