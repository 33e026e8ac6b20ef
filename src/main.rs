use anyhow::Result;
use axum::Router;
use chunkyard::{config, routes, services::upload_service::UploadService};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting chunkyard with config: {:?}", cfg);

    // --- Initialize core service ---
    let service = UploadService::new(&cfg.temp_dir, &cfg.output_dir, cfg.final_chunk_factor);

    // The chunk root is never created here; the probe reports it when missing.
    if service.assembler.prepare().await? {
        tracing::info!("Created output directory at {}", cfg.output_dir);
    }

    // The outcome is cached; a broken root keeps failing requests until restart.
    if let Err(err) = service.probe.check().await {
        tracing::error!(
            "chunk root {} is unusable ({}); uploads will be refused",
            cfg.temp_dir,
            err
        );
    }

    // --- Background reaper ---
    let reaper = service
        .reaper(cfg.session_timeout(), cfg.reap_interval())
        .spawn();

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_request_bytes).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let served = axum::serve(listener, app).await;
    reaper.abort();
    served?;

    Ok(())
}
