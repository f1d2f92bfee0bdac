use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{handler::AppState, media::types::PipeConfig, storage::Storage};

mod api;
mod config;
mod handler;
mod media;
mod proxy;
mod storage;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("dicom_serve", log::LevelFilter::Debug)
        .filter_module("dicom_stream", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();
    let storage = Storage::open_root(config.storage_root()).unwrap_or_else(|e| {
        eprintln!("Error opening storage {}: {}", config.storage_root().display(), e);
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();

    let state = AppState {
        storage,
        pipe: PipeConfig {
            late_failure: config.late_failure(),
            ..PipeConfig::default()
        },
        image_timeout: config.image_timeout(),
        trusted_proxies: Arc::new(config.trusted_proxies().clone()),
        cancel: cancel.clone(),
    };
    api::start_api_server(config.addr(), state);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    std::process::exit(0);
}
