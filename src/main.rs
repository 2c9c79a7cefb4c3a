mod config;
mod history;
mod messages;
mod presence;
mod server;
mod session;
mod tls;

use std::net::SocketAddr;
use log::{error, info, warn};
use serde_json::json;
use warp::Filter;
use config::Config;
use server::Server;

const ALLOWED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "OPTIONS"];
const ALLOWED_HEADERS: [&str; 5] = [
    "content-type",
    "authorization",
    "x-requested-with",
    "x-role",
    "x-username",
];

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutting down chat server...");
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    info!(
        "History bound {} messages, allowed origins: {}",
        config.session.max_messages,
        config.allowed_origins.join(", ")
    );

    let server = Server::start(config.session.clone());

    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let server = server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket).await;
            })
        });

    let status = warp::get().map(move || {
        warp::reply::json(&json!({ "status": "Chat server running", "port": port }))
    });

    let cors = warp::cors()
        .allow_origins(config.allowed_origins.iter().map(String::as_str))
        .allow_credentials(true)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(ALLOWED_HEADERS);

    let routes = ws_route.or(status).with(cors);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    if let Some(paths) = &config.tls {
        match tls::check_identity(paths) {
            Ok(()) => {
                let bound = warp::serve(routes.clone())
                    .tls()
                    .cert_path(&paths.cert)
                    .key_path(&paths.key)
                    .try_bind_with_graceful_shutdown(addr, shutdown_signal());
                match bound {
                    Ok((bound, serving)) => {
                        info!("Secure chat server (HTTPS/WSS) listening on {}", bound);
                        serving.await;
                        return;
                    }
                    Err(e) => error!("Failed to start TLS server: {}", e),
                }
            }
            Err(e) => error!("Failed to load TLS identity: {}", e),
        }
        warn!("Falling back to HTTP/WS on port {}", port);
    }

    match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal()) {
        Ok((bound, serving)) => {
            info!("Chat server listening on http://{}", bound);
            serving.await;
        }
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}
