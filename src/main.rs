use hemmer_provider_otc::{init_logging, serve, OtcProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let provider = OtcProvider::new()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        resources = provider.catalog().len(),
        "starting Open Telekom Cloud provider"
    );
    serve(provider).await
}
