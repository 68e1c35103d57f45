use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use kollab_backend::auth::password;
use kollab_backend::config::Config;
use kollab_backend::ledger::ALLOWANCE_PERIOD_DAYS;
use kollab_backend::models::user::{normalize_email, NewUser, UserRole};
use kollab_backend::store::{ResetScope, Store};
use kollab_backend::{app, AppState};

#[derive(Parser)]
#[command(about = "Kollab creator network backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Create an admin account, prompting for the password.
    CreateAdmin {
        #[arg(long)]
        email: String,
    },
    /// Restore invite allowances. Without --creator, resets every creator
    /// whose reset date has passed.
    ResetInvites {
        #[arg(long)]
        creator: Option<Uuid>,
    },
}

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env();
    let store = Store::connect(&config.database_url).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(store, config).await,
        Command::CreateAdmin { email } => create_admin(&store, &email).await,
        Command::ResetInvites { creator } => reset_invites(&store, &config, creator).await,
    }
}

async fn serve(store: Store, config: Config) -> Result<(), BoxError> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = app(AppState::new(store, config));

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn create_admin(store: &Store, email: &str) -> Result<(), BoxError> {
    let email = normalize_email(email);
    let password = rpassword::prompt_password("Password: ")?;
    if password.len() < password::MIN_PASSWORD_LEN {
        return Err(format!(
            "password must be at least {} characters",
            password::MIN_PASSWORD_LEN
        )
        .into());
    }

    let user = store
        .create_user(&NewUser {
            email,
            password_hash: password::hash_password(&password)?,
            role: UserRole::Admin,
        })
        .await?;

    tracing::info!(user_id = %user.id, email = %user.email, "admin account created");
    Ok(())
}

async fn reset_invites(
    store: &Store,
    config: &Config,
    creator: Option<Uuid>,
) -> Result<(), BoxError> {
    let now = Utc::now();
    let scope = creator.map_or(ResetScope::Due(now), ResetScope::Creator);
    let touched = store
        .reset_invite_allowance(
            scope,
            config.invite_allowance,
            now + Duration::days(ALLOWANCE_PERIOD_DAYS),
        )
        .await?;

    tracing::info!(
        creators = touched,
        allowance = config.invite_allowance,
        "invite allowances reset"
    );
    Ok(())
}
