use std::net::SocketAddr;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    handler::{dicom::dicom_router, AppState},
    proxy,
};

pub(crate) fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(dicom_router())
        .layer(middleware::from_fn_with_state(
            state.trusted_proxies.clone(),
            proxy::client_ip_layer,
        ))
        .with_state(state)
}

pub(crate) fn start_api_server(addr: SocketAddr, state: AppState) {
    tokio::spawn(async move {
        let cancel = state.cancel.clone();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("Error binding API server to {}: {}", addr, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", addr);
        if let Err(e) = serve(listener, state).await {
            log::error!("Error running API server: {}", e);
            cancel.cancel();
        }
    });
}

/// Serves until the state's token is cancelled.
pub(crate) async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let cancel = state.cancel.clone();
    axum::serve(
        listener,
        app_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel))
    .await
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}
