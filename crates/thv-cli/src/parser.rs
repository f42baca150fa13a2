//! Command-line arguments of `thv-proxy`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thv_core::{LOCALHOST_IPV4, TransportType};
use thv_runtime::ProcessRuntime;
use thv_transport::{BearerAuth, Config, Middleware, RequestLogger};

/// Expose a local MCP server on an HTTP+SSE endpoint.
///
/// The command after `--` is started as the backend. With `--transport stdio`
/// it speaks JSON-RPC over stdin/stdout; with `--transport sse` it serves
/// HTTP itself on the target address.
#[derive(Debug, Parser)]
#[command(name = "thv-proxy")]
#[command(version)]
pub struct Cli {
    /// How the backend speaks MCP (stdio or sse)
    #[arg(short, long, default_value = "stdio")]
    pub transport: TransportType,

    /// Local listen host
    #[arg(long, default_value = LOCALHOST_IPV4)]
    pub host: String,

    /// Local listen port (0 picks a free port)
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,

    /// Host the backend serves on (sse only)
    #[arg(long, default_value = LOCALHOST_IPV4)]
    pub target_host: String,

    /// Port the backend serves on (sse only)
    #[arg(long, default_value_t = 0)]
    pub target_port: u16,

    /// Require `Authorization: Bearer <token>` on every request
    #[arg(long, env = "THV_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Seconds the backend gets to exit after SIGTERM
    #[arg(long, default_value_t = 5)]
    pub grace_secs: u64,

    /// Server name used in the published URL (defaults to the command name)
    #[arg(long)]
    pub name: Option<String>,

    /// Verbose logging, including backend stderr
    #[arg(short, long)]
    pub debug: bool,

    /// Backend command and its arguments
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Name shown in the published URL.
    pub fn server_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.command
            .first()
            .and_then(|program| Path::new(program).file_name())
            .map_or_else(|| "mcp".to_string(), |name| name.to_string_lossy().into_owned())
    }

    pub fn runtime(&self) -> anyhow::Result<ProcessRuntime> {
        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("no backend command given");
        };
        let mut runtime = ProcessRuntime::new(program.as_str()).with_args(args.iter().cloned());
        if self.transport == TransportType::Sse && self.target_port != 0 {
            runtime = runtime.with_address(self.target_host.as_str(), self.target_port);
        }
        Ok(runtime)
    }

    /// Request logging outermost, then authentication.
    pub fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        vec![
            Arc::new(RequestLogger::new()),
            Arc::new(BearerAuth::new(self.auth_token.clone())),
        ]
    }

    pub fn config(&self) -> anyhow::Result<Config> {
        Ok(Config::new(self.transport, Arc::new(self.runtime()?))
            .with_host(self.host.as_str())
            .with_port(self.port)
            .with_target_host(self.target_host.as_str())
            .with_target_port(self.target_port)
            .with_debug(self.debug)
            .with_middlewares(self.middlewares())
            .with_grace_period(Duration::from_secs(self.grace_secs)))
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["thv-proxy", "--", "npx", "server-fetch"]);
        assert_eq!(cli.transport, TransportType::Stdio);
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 0);
        assert_eq!(cli.grace_secs, 5);
        assert!(!cli.debug);
        assert_eq!(cli.command, ["npx", "server-fetch"]);
        assert_eq!(cli.server_name(), "npx");
    }

    #[test]
    fn full_flags() {
        let cli = Cli::parse_from([
            "thv-proxy",
            "--transport",
            "SSE",
            "--port",
            "8080",
            "--target-port",
            "9090",
            "--auth-token",
            "t0k3n",
            "--grace-secs",
            "1",
            "--name",
            "fetch",
            "--debug",
            "--",
            "/usr/local/bin/fetch-server",
            "--listen",
            "9090",
        ]);
        assert_eq!(cli.transport, TransportType::Sse);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.target_port, 9090);
        assert_eq!(cli.auth_token.as_deref(), Some("t0k3n"));
        assert_eq!(cli.server_name(), "fetch");
        assert_eq!(cli.command, ["/usr/local/bin/fetch-server", "--listen", "9090"]);

        let config = cli.config().unwrap();
        assert_eq!(config.transport_type, TransportType::Sse);
        assert_eq!(config.grace_period, Duration::from_secs(1));
        let names: Vec<&str> = config.middlewares.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["request-logger", "bearer-auth"]);
    }

    #[test]
    fn server_name_uses_program_file_name() {
        let cli = Cli::parse_from(["thv-proxy", "--", "/opt/mcp/bin/github-server"]);
        assert_eq!(cli.server_name(), "github-server");
    }

    #[test]
    fn rejects_unknown_transport() {
        let err = Cli::try_parse_from(["thv-proxy", "--transport", "websocket", "--", "cat"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn requires_a_command() {
        assert!(Cli::try_parse_from(["thv-proxy"]).is_err());
    }
}
