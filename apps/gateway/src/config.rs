use std::net::SocketAddr;

use anyhow::{Context, Result, bail};
use membrane_core::WorkerConfig;

pub const DEFAULT_BIND: &str = "0.0.0.0:9001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    /// Pull events from the function runtime API.
    Lambda,
    /// Serve HTTP directly.
    Http,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    pub bind: SocketAddr,
    pub stack_id: Option<String>,
    /// `host:port` of the function runtime API, required in lambda mode.
    pub runtime_api: Option<String>,
    pub worker: WorkerConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let runtime_api = non_empty("AWS_LAMBDA_RUNTIME_API");
        let mode = match non_empty("MEMBRANE_MODE").as_deref() {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "lambda" => GatewayMode::Lambda,
                "http" => GatewayMode::Http,
                other => bail!("unknown MEMBRANE_MODE {other:?} (expected lambda or http)"),
            },
            None if runtime_api.is_some() => GatewayMode::Lambda,
            None => GatewayMode::Http,
        };
        if mode == GatewayMode::Lambda && runtime_api.is_none() {
            bail!("lambda mode requires AWS_LAMBDA_RUNTIME_API");
        }

        let bind = non_empty("MEMBRANE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind
            .parse()
            .with_context(|| format!("invalid MEMBRANE_BIND {bind:?}"))?;

        Ok(Self {
            mode,
            bind,
            stack_id: non_empty("MEMBRANE_STACK_ID"),
            runtime_api,
            worker: WorkerConfig::from_lookup(&lookup),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<GatewayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_http_outside_the_function_runtime() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.mode, GatewayMode::Http);
        assert_eq!(cfg.bind, DEFAULT_BIND.parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.stack_id, None);
        assert_eq!(cfg.worker, WorkerConfig::default());
    }

    #[test]
    fn runtime_api_switches_to_lambda() {
        let cfg = config(&[
            ("AWS_LAMBDA_RUNTIME_API", "127.0.0.1:9009"),
            ("MEMBRANE_STACK_ID", "prod"),
            ("MEMBRANE_WORKER_URL", "http://worker:8080"),
        ])
        .unwrap();
        assert_eq!(cfg.mode, GatewayMode::Lambda);
        assert_eq!(cfg.runtime_api.as_deref(), Some("127.0.0.1:9009"));
        assert_eq!(cfg.stack_id.as_deref(), Some("prod"));
        assert_eq!(cfg.worker.base_url, "http://worker:8080");
    }

    #[test]
    fn rejects_inconsistent_settings() {
        assert!(config(&[("MEMBRANE_MODE", "lambda")]).is_err());
        assert!(config(&[("MEMBRANE_MODE", "grpc")]).is_err());
        assert!(config(&[("MEMBRANE_BIND", "not-an-addr")]).is_err());
        let cfg = config(&[
            ("MEMBRANE_MODE", "HTTP"),
            ("AWS_LAMBDA_RUNTIME_API", "127.0.0.1:9009"),
        ])
        .unwrap();
        assert_eq!(cfg.mode, GatewayMode::Http);
    }
}
