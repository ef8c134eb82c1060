//! Command line and environment configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use concord_api::server::DEFAULT_LISTEN_ADDR;
use concord_api::{ClientCertIssuer, IssuerConfig, ServerConfig, TlsConfig};
use concord_common::telemetry::{LogFormat, TelemetryConfig};
use concord_common::CONCORD_SYSTEM_NAMESPACE;
use concord_controller::ControllerConfig;

/// Concord - Kubernetes identity broker exchanging tokens for cluster credentials
#[derive(Parser, Debug)]
#[command(name = "concord-operator", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand; defaults to `run`
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Broker settings
    #[command(flatten)]
    pub run: RunArgs,
}

/// Subcommands; running the broker is the default
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the controllers and the credential request server
    Run,
    /// Print all CRD manifests as YAML and exit
    Crds,
}

/// Settings for the running broker
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Namespace holding OIDCProvider resources and their JWKS Secrets
    #[arg(long, env = "CONCORD_NAMESPACE", default_value = CONCORD_SYSTEM_NAMESPACE)]
    pub namespace: String,

    /// Address the credential request server listens on
    #[arg(long, env = "CONCORD_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: SocketAddr,

    /// Serving certificate; plain HTTP is served when unset
    #[arg(long, env = "CONCORD_TLS_CERT_FILE", requires = "tls_key_file")]
    pub tls_cert_file: Option<PathBuf>,

    /// Serving private key
    #[arg(long, env = "CONCORD_TLS_KEY_FILE", requires = "tls_cert_file")]
    pub tls_key_file: Option<PathBuf>,

    /// CA certificate used to sign client credentials; an ephemeral CA is generated when unset
    #[arg(long, env = "CONCORD_CA_CERT_FILE", requires = "ca_key_file")]
    pub ca_cert_file: Option<PathBuf>,

    /// CA private key used to sign client credentials
    #[arg(long, env = "CONCORD_CA_KEY_FILE", requires = "ca_cert_file")]
    pub ca_key_file: Option<PathBuf>,

    /// Where to write the ephemeral CA certificate for the apiserver's client CA bundle
    #[arg(long, env = "CONCORD_EPHEMERAL_CA_CERT_OUT", conflicts_with = "ca_cert_file")]
    pub ephemeral_ca_cert_out: Option<PathBuf>,

    /// Lifetime of issued client certificates, in seconds
    #[arg(long, env = "CONCORD_CREDENTIAL_TTL_SECS", default_value_t = 300)]
    pub credential_ttl_secs: u64,

    /// Workers per controller
    #[arg(long, env = "CONCORD_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Interval between full controller resyncs, in seconds
    #[arg(long, env = "CONCORD_RESYNC_SECS", default_value_t = 180)]
    pub resync_secs: u64,

    /// Timeout for one TokenReview webhook call, in seconds
    #[arg(long, env = "CONCORD_WEBHOOK_TIMEOUT_SECS", default_value_t = 10)]
    pub webhook_timeout_secs: u64,

    /// Skip installing CRDs on startup
    #[arg(long, env = "CONCORD_SKIP_CRD_INSTALL")]
    pub skip_crd_install: bool,

    /// Log line encoding: json or text
    #[arg(long, env = "CONCORD_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl RunArgs {
    /// Engine settings shared by every controller
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers.max(1),
            resync_period: Duration::from_secs(self.resync_secs),
            ..Default::default()
        }
    }

    /// Telemetry settings describing this replica and its controllers
    pub fn telemetry_config(&self, controllers: &[&str]) -> TelemetryConfig {
        TelemetryConfig::for_operator(self.namespace.clone())
            .with_controllers(controllers.iter().copied())
            .with_log_format(self.log_format)
    }

    /// Webhook call timeout
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Client certificate issuer settings
    pub fn issuer_config(&self) -> IssuerConfig {
        IssuerConfig {
            ttl: Duration::from_secs(self.credential_ttl_secs),
        }
    }

    /// Load the signing CA, or generate an ephemeral one
    pub fn load_issuer(&self) -> anyhow::Result<ClientCertIssuer> {
        match (&self.ca_cert_file, &self.ca_key_file) {
            (Some(cert), Some(key)) => {
                let cert = read_to_string(cert)?;
                let key = read_to_string(key)?;
                ClientCertIssuer::from_pem(&cert, &key, self.issuer_config())
                    .context("failed to load client signing CA")
            }
            _ => {
                tracing::warn!(
                    "No signing CA configured; generating an ephemeral CA. \
                     Issued certificates are only trusted if its certificate is given to the apiserver"
                );
                let issuer = ClientCertIssuer::ephemeral(self.issuer_config())
                    .context("failed to generate ephemeral signing CA")?;
                self.publish_ephemeral_ca(&issuer)?;
                Ok(issuer)
            }
        }
    }

    fn publish_ephemeral_ca(&self, issuer: &ClientCertIssuer) -> anyhow::Result<()> {
        tracing::info!(
            ca_certificate = %issuer.ca_cert_pem(),
            "Ephemeral client signing CA certificate"
        );
        if let Some(path) = &self.ephemeral_ca_cert_out {
            std::fs::write(path, issuer.ca_cert_pem())
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Wrote ephemeral CA certificate");
        }
        Ok(())
    }

    /// Server settings, reading TLS material when configured
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let tls = match (&self.tls_cert_file, &self.tls_key_file) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_pem: read(cert)?,
                key_pem: read(key)?,
            }),
            _ => None,
        };
        Ok(ServerConfig {
            addr: self.listen_addr,
            tls,
        })
    }
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_to_string(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["concord-operator"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.run.namespace, "concord-system");
        assert_eq!(cli.run.listen_addr, "0.0.0.0:8443".parse().unwrap());
        assert_eq!(cli.run.credential_ttl_secs, 300);

        let config = cli.run.controller_config();
        assert_eq!(config.workers, 2);
        assert_eq!(config.resync_period, Duration::from_secs(180));
        assert_eq!(cli.run.webhook_timeout(), Duration::from_secs(10));
        assert!(cli.run.server_config().unwrap().tls.is_none());
    }

    #[test]
    fn telemetry_config_names_namespace_and_controllers() {
        let cli = Cli::try_parse_from([
            "concord-operator",
            "--namespace",
            "auth",
            "--log-format",
            "text",
        ])
        .unwrap();

        let telemetry = cli.run.telemetry_config(&["jwks-observer-controller"]);
        assert_eq!(telemetry.service_name, "concord-operator");
        assert_eq!(telemetry.watch_namespace.as_deref(), Some("auth"));
        assert_eq!(telemetry.controllers, vec!["jwks-observer-controller"]);
        assert_eq!(telemetry.log_format, LogFormat::Text);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["concord-operator", "--log-format", "yaml"]).is_err());
    }

    #[test]
    fn crds_subcommand() {
        let cli = Cli::try_parse_from(["concord-operator", "crds"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Crds));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "concord-operator",
            "--namespace",
            "auth",
            "--workers",
            "0",
            "--resync-secs",
            "30",
            "--credential-ttl-secs",
            "60",
        ])
        .unwrap();
        assert_eq!(cli.run.namespace, "auth");
        assert_eq!(cli.run.controller_config().workers, 1);
        assert_eq!(
            cli.run.controller_config().resync_period,
            Duration::from_secs(30)
        );
        assert_eq!(cli.run.issuer_config().ttl, Duration::from_secs(60));
    }

    #[test]
    fn tls_cert_requires_key() {
        let err = Cli::try_parse_from(["concord-operator", "--tls-cert-file", "/tmp/cert.pem"]);
        assert!(err.is_err());
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let cli = Cli::try_parse_from([
            "concord-operator",
            "--ca-cert-file",
            "/nonexistent/ca.crt",
            "--ca-key-file",
            "/nonexistent/ca.key",
        ])
        .unwrap();
        let err = cli.run.load_issuer().err().unwrap();
        assert!(err.to_string().contains("/nonexistent/ca.crt"));
    }

    #[test]
    fn ephemeral_ca_certificate_is_written_out() {
        let path = std::env::temp_dir().join(format!(
            "concord-ephemeral-ca-{}.pem",
            std::process::id()
        ));
        let cli = Cli::try_parse_from([
            "concord-operator",
            "--ephemeral-ca-cert-out",
            path.to_str().unwrap(),
        ])
        .unwrap();

        let issuer = cli.run.load_issuer().unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(written, issuer.ca_cert_pem());
    }

    #[test]
    fn ephemeral_ca_output_conflicts_with_configured_ca() {
        let result = Cli::try_parse_from([
            "concord-operator",
            "--ca-cert-file",
            "/etc/concord/ca.crt",
            "--ca-key-file",
            "/etc/concord/ca.key",
            "--ephemeral-ca-cert-out",
            "/tmp/ca.pem",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn ephemeral_issuer_without_ca_files() {
        let cli = Cli::try_parse_from(["concord-operator"]).unwrap();
        let issuer = cli.run.load_issuer().unwrap();
        assert!(issuer.ca_cert_pem().starts_with("-----BEGIN CERTIFICATE-----"));
    }
}
