use std::sync::Arc;

use clap::{Parser, Subcommand};
use rustytime_web::config::{ClientConfig, ConfigError};
use rustytime_web::net::api::{ApiClient, ApiError};
use rustytime_web::net::auth_api::{AuthApi, AuthBackend};
use rustytime_web::net::http::{ReqwestTransport, TransportError};
use rustytime_web::state::auth::AuthState;
use rustytime_web::state::controller::{
    AuthPorts, AuthSessionController, ControllerSettings, Navigator, SESSION_COOKIE_NAME,
};
use rustytime_web::util::cookie_store::{CookieOptions, KeyValueStore, MemoryStore, StoreError};
use rustytime_web::util::refresh::mount_visibility_refresh;
use rustytime_web::util::visibility::VisibilityWatch;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("http client setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("request failed: {0}")]
    Api(#[from] ApiError),
    #[error("session store failed: {0}")]
    Store(#[from] StoreError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session is not valid")]
    InvalidSession,
}

#[derive(Parser, Debug)]
#[command(name = "rustytime-web", about = "rustytime auth session tools")]
struct Cli {
    /// Overrides `BACKEND_API_URL` from the environment.
    #[arg(long)]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify one session and print the resulting auth state.
    Verify {
        #[arg(long, env = "RUSTYTIME_SESSION")]
        session: String,
    },
    /// Print the GitHub authorization URL.
    LoginUrl,
    /// Keep a session verified on the refresh interval until Ctrl-C.
    Watch {
        #[arg(long, env = "RUSTYTIME_SESSION")]
        session: String,
    },
}

/// Stands in for the browser: navigation is printed, invalidation logged.
struct StdoutNavigator;

#[async_trait::async_trait]
impl Navigator for StdoutNavigator {
    fn navigate(&self, url: &str) {
        println!("{url}");
    }

    async fn invalidate_all(&self) {
        tracing::info!("session-dependent data invalidated");
    }
}

struct Context {
    config: ClientConfig,
    api: AuthApi,
    errors: mpsc::UnboundedReceiver<ApiError>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.backend_url {
        config.backend_api_url = url.trim_end_matches('/').to_owned();
    }

    let transport = Arc::new(ReqwestTransport::new(config.timeouts)?);
    let (tx, errors) = mpsc::unbounded_channel();
    let client = ApiClient::new(config.backend_api_url.clone(), transport).with_error_reporter(tx);
    let ctx = Context { config, api: AuthApi::new(client), errors };

    match cli.command {
        Command::Verify { session } => run_verify(ctx, &session).await,
        Command::LoginUrl => run_login_url(&ctx).await,
        Command::Watch { session } => run_watch(ctx, &session).await,
    }
}

fn controller_for(ctx: &Context, session: &str) -> Result<Arc<AuthSessionController>, CliError> {
    let store = Arc::new(MemoryStore::new());
    store.set(SESSION_COOKIE_NAME, session, CookieOptions::persistent(ctx.config.cookie_secure))?;
    let api = Arc::new(ctx.api.clone());
    let ports = AuthPorts { store, verifier: api.clone(), backend: api, navigator: Arc::new(StdoutNavigator) };
    Ok(Arc::new(AuthSessionController::new(ports, ControllerSettings::from(&ctx.config))))
}

async fn run_verify(ctx: Context, session: &str) -> Result<(), CliError> {
    let controller = controller_for(&ctx, session)?;
    controller.verify().await;
    let state = controller.state();
    print_state(&state)?;
    if state.is_authenticated() { Ok(()) } else { Err(CliError::InvalidSession) }
}

async fn run_login_url(ctx: &Context) -> Result<(), CliError> {
    let url = ctx.api.login_url().await?;
    println!("{url}");
    Ok(())
}

async fn run_watch(ctx: Context, session: &str) -> Result<(), CliError> {
    let controller = controller_for(&ctx, session)?;
    controller.spawn_error_listener(ctx.errors);
    let mut states = controller.subscribe();

    controller.resolve().await;
    log_state(&states.borrow_and_update());

    let guard = mount_visibility_refresh(controller.refresh_options(), Arc::new(VisibilityWatch::default()), true);
    tracing::info!(interval_secs = ctx.config.refresh_interval.as_secs(), "watching session");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                log_state(&states.borrow_and_update());
            }
            _ = &mut shutdown => break,
        }
    }

    drop(guard);
    controller.dispose();
    Ok(())
}

fn print_state(state: &AuthState) -> Result<(), CliError> {
    let mut out = serde_json::to_value(state.snapshot())?;
    out["status"] = serde_json::Value::String(format!("{:?}", state.status()).to_lowercase());
    if let Some(error) = &state.error {
        out["error"] = serde_json::json!({"kind": error.kind.as_str(), "message": error.message});
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn log_state(state: &AuthState) {
    let user = state.user.as_ref().and_then(|u| u.name.as_deref()).unwrap_or("-");
    match &state.error {
        Some(error) => tracing::warn!(status = ?state.status(), user, kind = %error.kind, message = %error.message, "auth state"),
        None => tracing::info!(status = ?state.status(), user, "auth state"),
    }
}
