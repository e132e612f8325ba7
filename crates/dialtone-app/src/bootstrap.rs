//! Environment loading and service wiring.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use dialtone_api::ApiServer;
use dialtone_data::DeviceStore;
use dialtone_telemetry::{LoggingConfig, Metrics};
use tracing::info;

use crate::error::{AppError, AppResult};

const DEFAULT_BIND_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const DEFAULT_HTTP_PORT: u16 = 3000;

/// Runtime configuration resolved from the environment.
pub(crate) struct BootstrapConfig {
    database_url: String,
    bind_addr: IpAddr,
    http_port: u16,
}

impl BootstrapConfig {
    /// Resolve configuration from the process environment.
    pub(crate) fn from_env() -> AppResult<Self> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| AppError::MissingEnv {
            name: "DATABASE_URL",
        })?;
        let bind_addr = parse_bind_addr(std::env::var("DIALTONE_BIND_ADDR").ok().as_deref())?;
        let http_port = parse_port(std::env::var("DIALTONE_HTTP_PORT").ok().as_deref())?;
        Ok(Self {
            database_url,
            bind_addr,
            http_port,
        })
    }
}

/// Entry point for the dialtone application boot sequence.
///
/// # Errors
///
/// Returns an error if environment resolution or application startup fails.
pub async fn run_app() -> AppResult<()> {
    let config = BootstrapConfig::from_env()?;
    run_app_with(config).await
}

/// Boot sequence over resolved configuration to simplify testing.
pub(crate) async fn run_app_with(config: BootstrapConfig) -> AppResult<()> {
    dialtone_telemetry::init_logging(&LoggingConfig::default())
        .map_err(|err| AppError::telemetry("telemetry.init", &err))?;

    info!("dialtone application bootstrap starting");

    let telemetry =
        Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", &err))?;
    let store = DeviceStore::connect(&config.database_url)
        .await
        .map_err(|err| AppError::data("device_store.connect", err))?;
    info!("Connected to the Asterisk configuration database");

    let api = ApiServer::new(store, telemetry);
    let addr = SocketAddr::new(config.bind_addr, config.http_port);
    info!(addr = %addr, "Launching API listener");

    api.serve(addr)
        .await
        .map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("API server shutdown complete");
    Ok(())
}

fn parse_bind_addr(value: Option<&str>) -> AppResult<IpAddr> {
    value.map_or(Ok(DEFAULT_BIND_ADDR), |raw| {
        raw.trim()
            .parse()
            .map_err(|_| AppError::InvalidConfig {
                field: "DIALTONE_BIND_ADDR",
                reason: "not_an_ip_address",
                value: Some(raw.to_string()),
            })
    })
}

fn parse_port(value: Option<&str>) -> AppResult<u16> {
    let port = match value {
        None => DEFAULT_HTTP_PORT,
        Some(raw) => raw.trim().parse().map_err(|_| AppError::InvalidConfig {
            field: "DIALTONE_HTTP_PORT",
            reason: "not_a_port",
            value: Some(raw.to_string()),
        })?,
    };
    if port == 0 {
        return Err(AppError::InvalidConfig {
            field: "DIALTONE_HTTP_PORT",
            reason: "zero",
            value: Some("0".to_string()),
        });
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_defaults_to_loopback() -> AppResult<()> {
        assert_eq!(parse_bind_addr(None)?, DEFAULT_BIND_ADDR);
        assert_eq!(
            parse_bind_addr(Some("0.0.0.0"))?,
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
        Ok(())
    }

    #[test]
    fn bind_addr_rejects_garbage() {
        let err = parse_bind_addr(Some("not-an-ip")).expect_err("invalid address");
        assert!(matches!(
            err,
            AppError::InvalidConfig {
                field: "DIALTONE_BIND_ADDR",
                ..
            }
        ));
    }

    #[test]
    fn port_defaults_and_rejects_zero() -> AppResult<()> {
        assert_eq!(parse_port(None)?, DEFAULT_HTTP_PORT);
        assert_eq!(parse_port(Some("8088"))?, 8088);

        let err = parse_port(Some("0")).expect_err("zero port");
        assert!(matches!(
            err,
            AppError::InvalidConfig { reason: "zero", .. }
        ));

        let err = parse_port(Some("seventy")).expect_err("non-numeric port");
        assert!(matches!(
            err,
            AppError::InvalidConfig {
                reason: "not_a_port",
                ..
            }
        ));
        Ok(())
    }
}
