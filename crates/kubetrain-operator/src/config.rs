//! Command-line configuration for the operator
//!
//! Every controller flag can also be set through the environment, and is
//! accepted before or after the `controller` subcommand.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// kubetrain - per-replica endpoints for distributed training jobs
#[derive(Parser, Debug)]
#[command(name = "kubetrain-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the TrainingJob CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    #[command(flatten)]
    pub controller: ControllerArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the endpoint controller (default mode)
    Controller,
}

/// Settings for the endpoint controller
#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
    /// Path to a kubeconfig; in-cluster or default config when unset
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Only watch this namespace; all namespaces when unset
    #[arg(long, env = "KUBETRAIN_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Maximum number of jobs reconciled at once
    #[arg(long, env = "KUBETRAIN_CONCURRENCY", default_value_t = 4, global = true)]
    pub concurrency: u16,

    /// Seconds an unobserved endpoint creation blocks its role
    #[arg(
        long,
        env = "KUBETRAIN_EXPECTATIONS_TIMEOUT_SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub expectations_timeout_secs: u64,

    /// Seconds between passes over an unchanged job
    #[arg(
        long,
        env = "KUBETRAIN_RESYNC_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub resync_secs: u64,

    /// OTLP collector endpoint for trace export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    pub otlp_endpoint: Option<String>,

    /// Don't install the TrainingJob CRD on startup
    #[arg(long, global = true)]
    pub skip_crd_install: bool,
}

impl ControllerArgs {
    pub fn expectations_timeout(&self) -> Duration {
        Duration::from_secs(self.expectations_timeout_secs)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        let cli = Cli::try_parse_from(["kubetrain-operator"]).unwrap();
        assert!(!cli.crd);
        assert!(cli.command.is_none());
        assert_eq!(cli.controller.concurrency, 4);
        assert_eq!(cli.controller.expectations_timeout(), Duration::from_secs(300));
        assert_eq!(cli.controller.resync(), Duration::from_secs(30));
        assert!(!cli.controller.skip_crd_install);
    }

    #[test]
    fn flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kubetrain-operator",
            "controller",
            "--namespace",
            "ml",
            "--concurrency",
            "8",
            "--expectations-timeout-secs",
            "60",
            "--skip-crd-install",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Commands::Controller));
        assert_eq!(cli.controller.namespace.as_deref(), Some("ml"));
        assert_eq!(cli.controller.concurrency, 8);
        assert_eq!(cli.controller.expectations_timeout(), Duration::from_secs(60));
        assert!(cli.controller.skip_crd_install);
    }

    #[test]
    fn crd_flag() {
        let cli = Cli::try_parse_from(["kubetrain-operator", "--crd"]).unwrap();
        assert!(cli.crd);
    }

    #[test]
    fn zero_durations_are_rejected() {
        for flag in ["--expectations-timeout-secs", "--resync-secs"] {
            assert!(
                Cli::try_parse_from(["kubetrain-operator", flag, "0"]).is_err(),
                "expected {flag} 0 to be rejected"
            );
        }
        let cli = Cli::try_parse_from(["kubetrain-operator", "--resync-secs", "1"]).unwrap();
        assert_eq!(cli.controller.resync(), Duration::from_secs(1));
    }

    #[test]
    fn invalid_concurrency_is_rejected() {
        assert!(Cli::try_parse_from(["kubetrain-operator", "--concurrency", "-1"]).is_err());
    }
}
