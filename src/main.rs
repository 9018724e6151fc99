use mathgen_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    AppState,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    init_config()?;
    let config = get_config();

    let pool = create_pool()?;

    // Lazy pool: migrations are best-effort at startup, the service can
    // come up before the database does.
    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::warn!(error = %e, "migrations not applied at startup");
    }

    let app_state = AppState::new(pool);
    let app = mathgen_backend::app(app_state);

    let listener = TcpListener::bind(&config.server_address).await?;
    info!("Listening on {}", config.server_address);
    axum::serve(listener, app).await?;

    Ok(())
}
