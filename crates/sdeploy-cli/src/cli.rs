use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sdeploy",
    about = "Local secure deploy: versioned releases, HTTPS serving, API proxy, hot swap",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Project root (build runs here; state lives under it)
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Config file (default: <root>/sdeploy.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build the frontend and activate it as a new release
    Build,
    /// Point the active release back N deploys
    Rollback(RollbackArgs),
    /// Serve the active release over HTTPS (builds first if none is active)
    Serve(ServeArgs),
    /// Build, then serve
    Full(ServeArgs),
    /// Show deploy history
    Releases,
    /// Re-hash a release and compare it with its integrity manifest
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct RollbackArgs {
    /// How many releases back
    #[arg(long, default_value = "1")]
    pub steps: usize,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Release id (default: the active release)
    pub release: Option<String>,
}

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Start the backend process and proxy the API to it
    #[arg(long)]
    pub with_api: bool,
    /// Run the started backend over HTTPS
    #[arg(long)]
    pub api_https: bool,
    /// Proxy the API to an already running origin, e.g. https://localhost:4000
    #[arg(long)]
    pub api_origin: Option<String>,
    #[arg(long)]
    pub api_port: Option<u16>,
    #[arg(long)]
    pub frontend_https_port: Option<u16>,
    /// Also listen on plain HTTP and redirect to HTTPS
    #[arg(long)]
    pub enable_http_redirect: bool,
    #[arg(long)]
    pub frontend_http_port: Option<u16>,
    /// Rebuild and redeploy when sources change
    #[arg(long)]
    pub watch: bool,
    /// Watch poll interval in seconds (minimum 1)
    #[arg(long)]
    pub watch_interval: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_build() {
        let cli = Cli::try_parse_from(["sdeploy", "build"]).unwrap();
        assert!(matches!(cli.command, Command::Build));
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_rollback_default_steps() {
        let cli = Cli::try_parse_from(["sdeploy", "rollback"]).unwrap();
        if let Command::Rollback(args) = cli.command {
            assert_eq!(args.steps, 1);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_rollback_steps() {
        let cli = Cli::try_parse_from(["sdeploy", "rollback", "--steps", "3"]).unwrap();
        if let Command::Rollback(args) = cli.command {
            assert_eq!(args.steps, 3);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_serve_flags() {
        let cli = Cli::try_parse_from([
            "sdeploy",
            "serve",
            "--with-api",
            "--api-https",
            "--api-port",
            "4100",
            "--frontend-https-port",
            "8443",
            "--enable-http-redirect",
            "--frontend-http-port",
            "8080",
            "--watch",
            "--watch-interval",
            "5",
        ])
        .unwrap();
        if let Command::Serve(args) = cli.command {
            assert!(args.with_api && args.api_https && args.enable_http_redirect && args.watch);
            assert_eq!(args.api_port, Some(4100));
            assert_eq!(args.frontend_https_port, Some(8443));
            assert_eq!(args.frontend_http_port, Some(8080));
            assert_eq!(args.watch_interval, Some(5));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_full_with_origin() {
        let cli = Cli::try_parse_from(["sdeploy", "full", "--api-origin", "https://localhost:4000"]).unwrap();
        if let Command::Full(args) = cli.command {
            assert_eq!(args.api_origin.as_deref(), Some("https://localhost:4000"));
            assert!(!args.with_api);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_verify_named() {
        let cli = Cli::try_parse_from(["sdeploy", "verify", "release-20240101-000000"]).unwrap();
        if let Command::Verify(args) = cli.command {
            assert_eq!(args.release.as_deref(), Some("release-20240101-000000"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "sdeploy", "releases", "--root", "/srv/app", "-c", "/etc/sdeploy.toml", "-v", "--format", "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Releases));
        assert_eq!(cli.root, PathBuf::from("/srv/app"));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/sdeploy.toml")));
        assert!(cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Cli::try_parse_from(["sdeploy", "deploy"]).is_err());
    }
}
