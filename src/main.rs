use crate::config::Args;
use crate::orchestrator::Orchestrator;
use clap::Parser;
use tracing::{Level, event};
use tracing_subscriber::prelude::*;

mod config;
mod cpu_throttle;
mod dispatcher;
mod error;
mod handlers;
mod hash;
mod janitor;
mod logger;
mod model;
mod objectstore;
mod orchestrator;
mod queues;
mod recovery;
mod store;
mod tempfile_arena;
mod transcoder;
mod workers;
mod ytresolve;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod test_support;

// Wait to observe the ctrl+c signal and cause everything to shut down properly
// by dropping the sender half of a broadcast channel (all receivers will close
// upon this event).
async fn shutdown_upon_signal(send_shutdown: tokio::sync::broadcast::Sender<()>) {
    let _ = tokio::signal::ctrl_c().await;
    event!(Level::INFO, "Received signal to shut down gracefully");
    drop(send_shutdown);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .compact();
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(format_layer)
        .init();
    event!(Level::DEBUG, "Launching...");

    // Error out early if `ffmpeg`/`ffprobe` can't be called: the Convert
    // worker depends on both being present.
    if std::process::Command::new(&args.ffmpeg_path)
        .env_clear()
        .arg("-version")
        .output()
        .is_err()
    {
        return Err(anyhow::anyhow!(
            "No '{}' executable found, make sure ffmpeg is installed",
            args.ffmpeg_path
        ));
    }

    // Error out early if `yt-dlp` can't be called: the Youtube worker
    // depends on it.
    if std::process::Command::new(&args.ytdlp_path)
        .env_clear()
        .arg("--version")
        .output()
        .is_err()
    {
        return Err(anyhow::anyhow!(
            "No '{}' executable found, make sure yt-dlp is installed",
            args.ytdlp_path
        ));
    }

    let orchestrator = std::sync::Arc::new(Orchestrator::start(&args).await?);

    let (send_shutdown, _) = tokio::sync::broadcast::channel::<()>(1);

    let handler_state = handlers::HTTPHandlerState::new(orchestrator.clone());
    let router = axum::Router::new()
        .without_v07_checks()
        .route("/submit", axum::routing::post(handlers::post_submit))
        .route("/status/{job_id}", axum::routing::get(handlers::get_status))
        .with_state(handler_state);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", args.listen_ip, args.listen_port)).await?;
    event!(
        Level::INFO,
        "Listening for HTTP requests on {}:{}...",
        args.listen_ip,
        args.listen_port
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_upon_signal(send_shutdown))
        .await?;

    // Once the HTTP handler has stopped accepting new requests, wait for the
    // orchestrator's worker pools and background loops to drain and exit.
    match std::sync::Arc::try_unwrap(orchestrator) {
        Ok(orchestrator) => orchestrator.shutdown().await,
        Err(_) => {
            event!(
                Level::WARN,
                "orchestrator still has outstanding references at shutdown; skipping drain"
            );
        }
    }

    Ok(())
}
