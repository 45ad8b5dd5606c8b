use std::sync::Arc;

use chat_relay::config::Config;
use chat_relay::{routes, DocumentStore, Server};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let store = match DocumentStore::new(&config.store) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to create document store client: {e}");
            std::process::exit(1);
        }
    };
    log::info!(
        "Using document store {} ({}/{})",
        config.store.url,
        config.store.database,
        config.store.collection
    );

    let server = Arc::new(Server::new(Arc::new(store)));
    let routes = routes(server);

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
        }
    };

    match &config.tls {
        Some(tls) => {
            // warp's TLS bind panics on failure, so check what it needs first.
            if let Err(e) = tls.check() {
                log::error!("Invalid TLS configuration: {e}");
                std::process::exit(1);
            }
            if let Err(e) = std::net::TcpListener::bind(config.socket_addr()) {
                log::error!("Failed to bind to {}: {e}", config.socket_addr());
                std::process::exit(1);
            }

            let (addr, serving) = warp::serve(routes)
                .tls()
                .cert_path(&tls.cert_path)
                .key_path(&tls.key_path)
                .bind_with_graceful_shutdown(config.socket_addr(), shutdown);
            log::info!("Server running on port {} (WSS)", addr.port());
            serving.await;
        }
        None => match warp::serve(routes).try_bind_with_graceful_shutdown(config.socket_addr(), shutdown) {
            Ok((addr, serving)) => {
                log::info!("Server running on port {}", addr.port());
                serving.await;
            }
            Err(e) => {
                log::error!("Failed to bind to {}: {e}", config.socket_addr());
                std::process::exit(1);
            }
        },
    }
}
