//! Command line interface for operating the blob server. Supports
//! initialization, serving the HTTP API, managing role assignments, and
//! verifying stored provenance.

mod blobs;
mod config;
mod delegation;
mod error;
mod event;
mod keys;
mod policy;
mod provenance;
mod roles;
mod server;
#[cfg(test)]
mod testutil;
mod token;
mod verify;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blobs::FileBlobStore;
use config::Settings;
use keys::Keys;
use provenance::ProvenanceWriter;
use roles::{FileRoleStore, Role, RoleStore};
use server::AppState;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "blobr",
    author,
    version,
    about = "Content-addressed file store authorized by signed Nostr events"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long)]
    verbose: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the directory tree at `STORE_ROOT`.
    Init,
    /// Serve the HTTP API until interrupted.
    Serve,
    /// Manage role assignments.
    Role {
        #[command(subcommand)]
        action: RoleAction,
    },
    /// Verify a random sample of stored provenance events.
    Verify {
        #[arg(long, default_value_t = 1000)]
        sample: usize,
    },
}

/// Operations available under `blobr role`.
#[derive(Subcommand)]
enum RoleAction {
    /// Assign `admin`, `user` or `banned` to a public key.
    Set { pubkey: String, role: Role },
    /// Drop the assignment of a public key.
    Remove { pubkey: String },
    /// Print every assignment.
    List,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let blobs = FileBlobStore::new(cfg.store_root.clone());
    let roles = FileRoleStore::new(cfg.store_root.clone());
    match cli.command {
        Commands::Init => {
            blobs.init().context("creating store directories")?;
            fs::create_dir_all(cfg.store_root.join("roles"))?;
        }
        Commands::Serve => {
            blobs.init().context("creating store directories")?;
            let secret = cfg
                .service_key
                .as_deref()
                .context("SERVICE_KEY is required to serve")?;
            let keys = Keys::from_secret_hex(secret).context("SERVICE_KEY")?;
            for pubkey in &cfg.admin_pubkeys {
                roles
                    .set(pubkey, Role::Admin)
                    .await
                    .with_context(|| format!("seeding admin {pubkey}"))?;
            }
            let addr: SocketAddr = cfg.bind_http.as_str().parse().context("BIND_HTTP")?;
            let blobs = Arc::new(blobs);
            info!(pubkey = %keys.public_key(), root = %cfg.store_root.display(), "starting");
            let state = AppState {
                blobs: blobs.clone(),
                roles: Arc::new(roles),
                provenance: ProvenanceWriter::new(blobs, Arc::new(keys)),
                auth_window: cfg.auth_window_secs,
                public_url: cfg.public_url.clone(),
                cache_control: cfg.cache_control.clone(),
                max_upload_bytes: cfg.max_upload_bytes,
            };
            server::serve_http(addr, state, shutdown_signal()).await?;
        }
        Commands::Role { action } => handle_role(action, &roles).await?,
        Commands::Verify { sample } => {
            let checked = provenance::verify_sample(&blobs, sample).await?;
            println!("verified {checked} provenance events");
        }
    }
    Ok(())
}

async fn handle_role(action: RoleAction, roles: &dyn RoleStore) -> anyhow::Result<()> {
    match action {
        RoleAction::Set { pubkey, role } => {
            roles.set(&pubkey, role).await?;
            info!(%pubkey, %role, "role assigned");
        }
        RoleAction::Remove { pubkey } => {
            if !roles.remove(&pubkey).await? {
                bail!("no role assigned to {pubkey}");
            }
        }
        RoleAction::List => {
            for (pubkey, role) in roles.list().await? {
                println!("{pubkey} {role}");
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("listening for shutdown signal failed: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Create a default `.env` file if one is not already present at `path`.
///
/// A fresh `SERVICE_KEY` is generated for provenance signing.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("blobr-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str("PUBLIC_URL=\n");
    content.push_str(&format!("SERVICE_KEY={}\n", Keys::generate().secret_hex()));
    content.push_str(&format!(
        "AUTH_WINDOW_SECS={}\n",
        config::DEFAULT_AUTH_WINDOW_SECS
    ));
    content.push_str(&format!("CACHE_CONTROL={}\n", config::DEFAULT_CACHE_CONTROL));
    content.push_str(&format!(
        "MAX_UPLOAD_BYTES={}\n",
        config::DEFAULT_MAX_UPLOAD_BYTES
    ));
    content.push_str("ADMIN_PUBKEYS=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "blobr=debug" } else { "blobr=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{clear_env, ENV_MUTEX};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::{net::TcpListener, task};

    const SERVICE_KEY: &str = "0909090909090909090909090909090909090909090909090909090909090909";

    fn write_env(dir: &TempDir) -> String {
        let env_path = dir.path().join(".env");
        let content = format!(
            "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:0\nSERVICE_KEY={SERVICE_KEY}\n",
            dir.path().to_str().unwrap(),
        );
        fs::write(&env_path, content).unwrap();
        env_path.to_str().unwrap().into()
    }

    fn cli(env: &str, command: Commands) -> Cli {
        Cli {
            env: env.to_string(),
            verbose: false,
            command,
        }
    }

    #[tokio::test]
    async fn init_creates_default_env() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        run(cli(&env_path.to_string_lossy(), Commands::Init))
            .await
            .unwrap();

        let data = fs::read_to_string(&env_path).unwrap();
        let expected_root = dir.path().join("blobr-data");
        assert!(data.contains(&format!("STORE_ROOT={}", expected_root.to_string_lossy())));
        assert!(data.contains("BIND_HTTP=127.0.0.1:7777"));
        let key_line = data
            .lines()
            .find_map(|l| l.strip_prefix("SERVICE_KEY="))
            .unwrap();
        assert!(Keys::from_secret_hex(key_line).is_ok());
        assert!(expected_root.join("objects").exists());
        assert!(expected_root.join("roles").exists());
    }

    #[tokio::test]
    async fn role_commands_round_trip() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir);
        let pubkey = "ab".repeat(32);

        run(cli(
            &env_file,
            Commands::Role {
                action: RoleAction::Set {
                    pubkey: pubkey.clone(),
                    role: Role::User,
                },
            },
        ))
        .await
        .unwrap();
        let roles = FileRoleStore::new(dir.path().to_path_buf());
        assert_eq!(roles.get(&pubkey).await.unwrap(), Some(Role::User));

        run(cli(
            &env_file,
            Commands::Role {
                action: RoleAction::List,
            },
        ))
        .await
        .unwrap();

        run(cli(
            &env_file,
            Commands::Role {
                action: RoleAction::Remove {
                    pubkey: pubkey.clone(),
                },
            },
        ))
        .await
        .unwrap();
        assert_eq!(roles.get(&pubkey).await.unwrap(), None);

        // removing again reports the missing assignment
        assert!(run(cli(
            &env_file,
            Commands::Role {
                action: RoleAction::Remove { pubkey },
            },
        ))
        .await
        .is_err());
    }

    #[tokio::test]
    async fn role_set_rejects_malformed_key() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir);
        let result = run(cli(
            &env_file,
            Commands::Role {
                action: RoleAction::Set {
                    pubkey: "npub-not-hex".into(),
                    role: Role::Admin,
                },
            },
        ))
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn verify_with_empty_store() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir);
        run(cli(&env_file, Commands::Init)).await.unwrap();
        run(cli(&env_file, Commands::Verify { sample: 10 }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn serve_requires_service_key() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!(
                "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:0\n",
                dir.path().to_str().unwrap()
            ),
        )
        .unwrap();
        let result = run(cli(env_path.to_str().unwrap(), Commands::Serve)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_serve_starts_http_and_seeds_admins() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let dir = TempDir::new().unwrap();
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_port = http_listener.local_addr().unwrap().port();
        drop(http_listener);
        let admin = "cd".repeat(32);
        let env_path = dir.path().join(".env");
        let content = format!(
            "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:{}\n\
             SERVICE_KEY={SERVICE_KEY}\nADMIN_PUBKEYS={admin}\n",
            dir.path().to_str().unwrap(),
            http_port,
        );
        fs::write(&env_path, content).unwrap();
        let env_str = env_path.to_str().unwrap().to_string();

        let handle = task::spawn(run(cli(&env_str, Commands::Serve)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let url = format!("http://127.0.0.1:{}/healthz", http_port);
        let resp = reqwest::get(url).await.unwrap();
        assert!(resp.status().is_success());
        handle.abort();

        let roles = FileRoleStore::new(dir.path().to_path_buf());
        assert_eq!(roles.get(&admin).await.unwrap(), Some(Role::Admin));
    }
}
