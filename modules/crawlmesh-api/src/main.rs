use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tracing_subscriber::EnvFilter;

use crawlmesh_api::rpc::RpcServer;
use crawlmesh_api::token::HmacTokenIssuer;
use crawlmesh_api::{ws, AppState};
use crawlmesh_broker::{Broker, Exchange, RpcEndpoint};
use crawlmesh_common::Config;
use crawlmesh_eventstream::Hub;
use crawlmesh_store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crawlmesh=info".parse()?))
        .init();

    let config = Config::api_from_env();
    config.log_redacted();

    let broker = Broker::connect(
        &config.broker.uri,
        Duration::from_secs(config.broker.connection_timeout_secs),
    )
    .await?;
    let store = Store::new(broker.pool().clone());
    crawlmesh_store::migrate(store.pool()).await?;

    let hub = Arc::new(Hub::new());
    let issuer: Arc<dyn crawlmesh_api::token::TokenIssuer> =
        Arc::new(HmacTokenIssuer::new(&config.web.jwt_secret, config.web.jwt_issuer.clone()));
    let rpc = Arc::new(RpcServer::new(store, issuer.clone()));

    tokio::spawn(crawlmesh_eventstream::dispatch::run(hub.clone(), broker.clone()));

    {
        let rpc = rpc.clone();
        let endpoint = RpcEndpoint::new(broker.clone(), Exchange::ControllerRpc);
        tokio::spawn(async move {
            let result = endpoint
                .run(move |method, params| {
                    let rpc = rpc.clone();
                    async move {
                        match rpc.dispatch(&method, params).await {
                            Ok(result) => result,
                            Err(e) => serde_json::json!({ "error": e.to_string() }),
                        }
                    }
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "controller_rpc endpoint exited");
            }
        });
    }

    let state = AppState { hub, issuer, rpc };

    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/ws", get(ws::handler))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        );

    let addr = format!("{}:{}", config.web.host, config.web.port);
    tracing::info!(addr, "crawlmesh api starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
