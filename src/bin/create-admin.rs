//! Seeds the first admin account.
//!
//! Usage: `ADMIN_PASSWORD=... cargo run --bin create-admin`
//!
//! Reads `DATABASE_URL`, `ADMIN_EMAIL` (default `admin@blog.com`), `ADMIN_NAME`
//! (default `Admin`) and `ADMIN_PASSWORD` (required). Exits successfully without
//! changes when an account with that email already exists.

use std::{env, process::ExitCode, sync::Arc};

use blog_cms::{
    auth::{AuthError, PASSWORD_MIN_CHARS, is_valid_email, normalize_email},
    models::{NewUser, Role, User},
    password::hash_password,
    repository::{PostgresRepository, RepoError, Repository},
};
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

const DEFAULT_ADMIN_EMAIL: &str = "admin@blog.com";
const DEFAULT_ADMIN_NAME: &str = "Admin";

#[derive(Debug, Error)]
enum SeedError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("database unavailable: {0}")]
    Connect(#[from] sqlx::Error),
    #[error("migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Store(#[from] RepoError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

enum Outcome {
    Created(User),
    AlreadyExists(User),
}

fn var(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn run() -> Result<Outcome, SeedError> {
    let db_url = var("DATABASE_URL").ok_or(SeedError::Missing("DATABASE_URL"))?;
    let email = normalize_email(&var("ADMIN_EMAIL").unwrap_or_else(|| DEFAULT_ADMIN_EMAIL.to_string()));
    let name = var("ADMIN_NAME").unwrap_or_else(|| DEFAULT_ADMIN_NAME.to_string());

    if !is_valid_email(&email) {
        return Err(SeedError::Invalid(format!("ADMIN_EMAIL is not a valid email: {}", email)));
    }

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let repo: Arc<dyn Repository> = Arc::new(PostgresRepository::new(pool));

    if let Some(existing) = repo.find_credentials_by_email(&email).await? {
        return Ok(Outcome::AlreadyExists(existing.user));
    }

    // Only demanded once we know an account will be created.
    let password = env::var("ADMIN_PASSWORD").map_err(|_| SeedError::Missing("ADMIN_PASSWORD"))?;
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(SeedError::Invalid(format!(
            "ADMIN_PASSWORD must be at least {} characters",
            PASSWORD_MIN_CHARS
        )));
    }

    let admin = repo
        .create_user(NewUser {
            name,
            email,
            password_hash: hash_password(password).await?,
            role: Role::Admin,
        })
        .await?;

    Ok(Outcome::Created(admin))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "create_admin=info,blog_cms=info".into()),
        )
        .init();

    match run().await {
        Ok(Outcome::Created(admin)) => {
            tracing::info!(
                user_id = %admin.id,
                email = %admin.email,
                name = %admin.name,
                role = admin.role.as_str(),
                "Admin user created"
            );
            ExitCode::SUCCESS
        }
        Ok(Outcome::AlreadyExists(existing)) => {
            tracing::warn!(
                email = %existing.email,
                name = %existing.name,
                "Admin user already exists; nothing to do"
            );
            ExitCode::SUCCESS
        }
        Err(SeedError::Store(RepoError::Duplicate { .. })) => {
            tracing::warn!("An account with this email was created concurrently; nothing to do");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Failed to create admin user: {}", e);
            ExitCode::FAILURE
        }
    }
}
