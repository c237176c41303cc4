use clap::{Parser, Subcommand};

use std::path::PathBuf;

pub const ENV_VAR_SILENT: &str = "SPLITROUTE_SILENT";
pub const ENV_VAR_VERBOSE: &str = "SPLITROUTE_VERBOSE";
pub const ENV_VAR_ROUTE_FILE: &str = "SPLITROUTE_ROUTE_FILE";
pub const ENV_VAR_DNS_FILE: &str = "SPLITROUTE_DNS_FILE";

/// Split-tunnel routing policy daemon.
#[derive(Clone, Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Suppress info/warn log output; errors still reach the configured sink
    #[arg(long, global = true, env = ENV_VAR_SILENT)]
    pub silent: bool,

    /// Enable debug-level log output
    #[arg(long, global = true, env = ENV_VAR_VERBOSE)]
    pub verbose: bool,

    /// External managed-prefix file; embedded defaults are used when absent
    #[arg(long, global = true, env = ENV_VAR_ROUTE_FILE)]
    pub route_file: Option<PathBuf>,

    /// External DNS host-address file; embedded defaults are used when absent
    #[arg(long, global = true, env = ENV_VAR_DNS_FILE)]
    pub dns_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run one-shot reconciliation and exit
    Run,
    /// Run the supervisor event loop until signalled to stop
    Daemon,
    /// Install the service-manager unit
    Install,
    /// Remove the service-manager unit
    Uninstall,
    /// Report whether the service-manager unit is installed and running
    Status,
}

impl Cli {
    /// Defaults to `run` when no subcommand is given, matching the contract
    /// that a bare invocation performs one-shot reconciliation.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run_with_no_subcommand() {
        let cli = Cli::try_parse_from(["splitrouted"]).unwrap();
        assert!(matches!(cli.command(), Command::Run));
        assert!(!cli.silent);
        assert!(!cli.verbose);
    }

    #[test]
    fn parses_daemon_with_flags_and_files() {
        let cli = Cli::try_parse_from([
            "splitrouted",
            "--verbose",
            "--route-file",
            "/etc/splitroute/routes.txt",
            "daemon",
        ])
        .unwrap();
        assert!(matches!(cli.command(), Command::Daemon));
        assert!(cli.verbose);
        assert_eq!(cli.route_file, Some(PathBuf::from("/etc/splitroute/routes.txt")));
    }

    #[test]
    fn parses_install_uninstall_status() {
        for (args, expect_install) in [
            (vec!["splitrouted", "install"], true),
            (vec!["splitrouted", "uninstall"], false),
            (vec!["splitrouted", "status"], false),
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            let is_install = matches!(cli.command(), Command::Install);
            assert_eq!(is_install, expect_install);
        }
    }
}
