use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::LazyLock,
    time::Duration,
};

use crate::{media::types::LateFailurePolicy, proxy::TrustedProxies};

const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServeConfig {
    addr: SocketAddr,
    storage_root: PathBuf,
    trusted_proxies: TrustedProxies,
    image_timeout: Duration,
    late_failure: LateFailurePolicy,
}

impl ServeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a key lookup. Values that do not parse
    /// are reported and replaced by their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_root = lookup("DICOM_SERVE_STORAGE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::temp_dir().join(format!("dicomserving-{}", std::process::id()))
            });

        Self {
            addr: parsed(&lookup, "DICOM_SERVE_ADDR").unwrap_or_else(default_addr),
            storage_root,
            trusted_proxies: parsed(&lookup, "DICOM_SERVE_TRUSTED_PROXIES")
                .unwrap_or_else(TrustedProxies::loopback),
            image_timeout: parsed::<u64, _>(&lookup, "DICOM_SERVE_IMAGE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_IMAGE_TIMEOUT),
            late_failure: parsed(&lookup, "DICOM_SERVE_LATE_FAILURE").unwrap_or_default(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn trusted_proxies(&self) -> &TrustedProxies {
        &self.trusted_proxies
    }

    pub fn image_timeout(&self) -> Duration {
        self.image_timeout
    }

    pub fn late_failure(&self) -> LateFailurePolicy {
        self.late_failure
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

pub fn config() -> &'static ServeConfig {
    static CONFIG: LazyLock<ServeConfig> = LazyLock::new(ServeConfig::from_env);
    &CONFIG
}
