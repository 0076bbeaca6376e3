//! Kubernetes client construction
//!
//! A kubeconfig file wins when one exists (`$KUBECONFIG`, else
//! `~/.kube/config`); otherwise the pod's service account is used.

use crate::error::ClusterError;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

/// Pick the kubeconfig file to use, if any exists
pub fn resolve_kubeconfig(env_value: Option<OsString>, home: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(paths) = env_value {
        if let Some(path) = std::env::split_paths(&paths).find(|p| p.is_file()) {
            return Some(path);
        }
    }
    home.map(|h| h.join(".kube").join("config"))
        .filter(|p| p.is_file())
}

pub fn kubeconfig_path() -> Option<PathBuf> {
    resolve_kubeconfig(std::env::var_os("KUBECONFIG"), dirs_next::home_dir())
}

async fn config_from_file(path: &Path) -> Result<Config, ClusterError> {
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| ClusterError::Config(format!("{}: {}", path.display(), e)))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ClusterError::Config(format!("{}: {}", path.display(), e)))
}

pub async fn client_config() -> Result<Config, ClusterError> {
    match kubeconfig_path() {
        Some(path) => {
            info!(path = %path.display(), "Using kubeconfig file");
            config_from_file(&path).await
        }
        None => {
            info!("No kubeconfig found, using in-cluster credentials");
            Config::incluster().map_err(|e| ClusterError::Config(e.to_string()))
        }
    }
}

pub async fn connect() -> Result<Client, ClusterError> {
    let config = client_config().await?;
    Client::try_from(config).map_err(ClusterError::Client)
}
