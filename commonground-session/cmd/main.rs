use commonground_core::load_config;
use commonground_core::tracing::init_tracing_from_config;
use commonground_session::service::CoordinationServiceApp;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = load_config(std::env::var("COMMONGROUND_CONFIG").ok().as_deref());
    init_tracing_from_config(app_config.logging.as_ref());

    let app = CoordinationServiceApp::new(&app_config).await?;

    info!(
        session_prefix = %app.session_config().key_prefix,
        "Starting commonground coordination node"
    );

    app.run().await
}
