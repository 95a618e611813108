//! dockhand API server

use clap::Parser;
use dockhand_api::{AppState, routes};
use dockhand_config::{GitHubCredentials, ServerConfig, StoreBackend};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dockhand-server")]
#[command(about = "Commit-to-deploy build server", long_about = None)]
struct Args {
    /// Docker endpoint (unix socket path or tcp:// address)
    #[arg(long, env = "DOCKER_HOST", default_value = "unix:///var/run/docker.sock")]
    docker: String,

    /// Directory holding cert.pem, key.pem and ca.pem for Docker TLS
    #[arg(long, env = "DOCKER_CERT_PATH")]
    docker_cert_path: Option<PathBuf>,

    /// Job database path, or :memory: for a non-durable store
    #[arg(long, env = "DOCKHAND_DB", default_value = "dockhand.db")]
    db: String,

    /// GitHub application client ID
    #[arg(long, env = "DOCKHAND_GITHUB_ID")]
    github_id: Option<String>,

    /// GitHub application client secret
    #[arg(long, env = "DOCKHAND_GITHUB_SECRET")]
    github_secret: Option<String>,

    /// GitHub API base URL
    #[arg(long, env = "DOCKHAND_GITHUB_API", default_value = "https://api.github.com")]
    github_api: String,

    /// Address to listen on
    #[arg(long, env = "DOCKHAND_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let github = match (self.github_id, self.github_secret) {
            (Some(client_id), Some(client_secret)) => Some(GitHubCredentials {
                client_id,
                client_secret,
            }),
            _ => None,
        };

        ServerConfig {
            docker_endpoint: self.docker,
            docker_cert_path: self.docker_cert_path,
            store: StoreBackend::from_location(&self.db),
            github,
            github_api_url: self.github_api,
            listen_addr: self.listen,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config();

    let state = AppState::from_config(&config).await?;
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", config.listen_addr);
    let listener = TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_config() {
        let config = Args::try_parse_from(["dockhand-server"])
            .unwrap()
            .into_config();
        let defaults = ServerConfig::default();

        assert_eq!(config.docker_endpoint, defaults.docker_endpoint);
        assert_eq!(config.store, defaults.store);
        assert_eq!(config.listen_addr, defaults.listen_addr);
        assert_eq!(config.github_api_url, defaults.github_api_url);
    }

    #[test]
    fn test_flags_map_to_config() {
        let config = Args::try_parse_from([
            "dockhand-server",
            "--docker",
            "tcp://10.0.0.5:2376",
            "--docker-cert-path",
            "/etc/docker",
            "--db",
            ":memory:",
            "--github-id",
            "id",
            "--github-secret",
            "secret",
            "--listen",
            "127.0.0.1:8080",
        ])
        .unwrap()
        .into_config();

        assert_eq!(config.docker_endpoint, "tcp://10.0.0.5:2376");
        assert_eq!(config.docker_cert_path, Some(PathBuf::from("/etc/docker")));
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.github.unwrap().client_secret, "secret");
        assert_eq!(config.listen_addr.port(), 8080);
    }

    #[test]
    fn test_partial_github_credentials_are_ignored() {
        let config = Args::try_parse_from(["dockhand-server", "--github-id", "id"])
            .unwrap()
            .into_config();
        assert!(config.github.is_none());
    }
}
