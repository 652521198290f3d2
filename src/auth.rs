use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::ApiError,
    models::{NewUser, RegisterRequest, Role, User},
    password::{hash_password, verify_password},
    repository::{RepoError, Repository, RepositoryState},
};

/// Minimum accepted password length at registration.
pub const PASSWORD_MIN_CHARS: usize = 6;

/// AuthError
///
/// Everything that can go wrong while registering, logging in, or resolving a
/// bearer token. Translated to the HTTP taxonomy by `ApiError`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no bearer token provided")]
    MissingToken,
    #[error("token is malformed or its signature does not verify")]
    TokenInvalid,
    #[error("token has expired")]
    TokenExpired,
    #[error("token subject no longer resolves to a user")]
    UserNotFound,
    #[error("email or password is incorrect")]
    InvalidCredentials,
    #[error("a user with this email already exists")]
    DuplicateCredential,
    #[error("registration input is invalid: {0:?}")]
    Validation(Vec<String>),
    #[error("{0}")]
    Hashing(String),
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error(transparent)]
    Store(#[from] RepoError),
}

/// Claims
///
/// The signed payload of a bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id.
    pub sub: Uuid,
    /// Expiry, seconds since the Unix epoch. The token is rejected at or after this instant.
    pub exp: usize,
    /// Issued at, seconds since the Unix epoch.
    pub iat: usize,
}

/// AuthUser
///
/// The resolved identity of an authenticated request. Re-read from the store on
/// every request, so role changes apply immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
        }
    }
}

/// Current time in whole seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

// --- Token issuance and verification ---

/// issue_token
///
/// Signs an HS256 token for `user_id` valid from `now` until `now + ttl_secs`.
pub fn issue_token(user_id: Uuid, secret: &str, ttl_secs: u64, now: u64) -> Result<String, AuthError> {
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: now.saturating_add(ttl_secs) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Signing(e.to_string()))
}

/// decode_token
///
/// Verifies the signature and then checks expiry against `now` explicitly: a token
/// expiring at `t` is valid strictly before `t`, with no leeway.
pub fn decode_token(token: &str, secret: &str, now: u64) -> Result<Claims, AuthError> {
    let mut validation = Validation::default();
    // Expiry is compared below against the caller's clock.
    validation.validate_exp = false;
    validation.leeway = 0;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::TokenInvalid,
    })?;

    if now >= data.claims.exp as u64 {
        return Err(AuthError::TokenExpired);
    }

    Ok(data.claims)
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: Option<&str>) -> Result<&str, AuthError> {
    let value = header_value.ok_or(AuthError::MissingToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MissingToken)?
        .trim();

    // Clients serializing an empty JS variable send these literally.
    if token.is_empty() || token == "null" || token == "undefined" {
        return Err(AuthError::TokenInvalid);
    }
    Ok(token)
}

// --- Authenticator operations ---

/// register
///
/// Validates the payload, hashes the password and creates a `user`-role account.
/// A duplicate email is reported as `DuplicateCredential`, whether caught by the
/// pre-check or by the store's unique index under a concurrent registration.
pub async fn register(repo: &dyn Repository, req: RegisterRequest) -> Result<User, AuthError> {
    let name = req.name.as_deref().map(str::trim).unwrap_or_default().to_string();
    let email = normalize_email(req.email.as_deref().unwrap_or_default());
    let password = req.password.unwrap_or_default();

    let mut errors = Vec::new();
    if name.is_empty() {
        errors.push("Please provide a name".to_string());
    }
    if email.is_empty() {
        errors.push("Please provide an email".to_string());
    } else if !is_valid_email(&email) {
        errors.push("Please provide a valid email".to_string());
    }
    if password.is_empty() {
        errors.push("Please provide a password".to_string());
    } else if password.chars().count() < PASSWORD_MIN_CHARS {
        errors.push(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_CHARS
        ));
    }
    if !errors.is_empty() {
        return Err(AuthError::Validation(errors));
    }

    if repo.find_credentials_by_email(&email).await?.is_some() {
        return Err(AuthError::DuplicateCredential);
    }

    let password_hash = hash_password(password).await?;
    let new_user = NewUser {
        name,
        email,
        password_hash,
        role: Role::User,
    };

    match repo.create_user(new_user).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "User registered");
            Ok(user)
        }
        Err(RepoError::Duplicate { .. }) => Err(AuthError::DuplicateCredential),
        Err(e) => Err(AuthError::Store(e)),
    }
}

/// login
///
/// Verifies the credentials and issues a token. Unknown email and wrong password
/// produce the same `InvalidCredentials` error.
pub async fn login(
    repo: &dyn Repository,
    config: &AppConfig,
    email: &str,
    password: &str,
    now: u64,
) -> Result<(String, User), AuthError> {
    let email = normalize_email(email);
    let credentials = repo
        .find_credentials_by_email(&email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if !verify_password(password.to_string(), credentials.password_hash).await? {
        return Err(AuthError::InvalidCredentials);
    }

    let token = issue_token(
        credentials.user.id,
        &config.jwt_secret,
        config.jwt_expires_in.as_secs(),
        now,
    )?;
    Ok((token, credentials.user))
}

/// verify
///
/// Decodes the token and resolves its subject to a live user.
pub async fn verify(
    repo: &dyn Repository,
    secret: &str,
    token: &str,
    now: u64,
) -> Result<AuthUser, AuthError> {
    let claims = decode_token(token, secret, now)?;
    let user = repo
        .get_user(claims.sub)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(AuthUser::from(user))
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A deliberately small shape check: one `@`, a non-empty local part, and a
/// domain containing a dot that is neither first nor last.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// AuthUser Extractor
///
/// Makes `AuthUser` usable as a handler argument on every protected route:
/// 1. Resolves the repository and config from state.
/// 2. Extracts the bearer token.
/// 3. Verifies signature and expiry.
/// 4. Re-reads the user so deleted accounts lose access immediately.
///
/// When `auth_middleware` has already run, the identity it stored in the request
/// extensions is reused instead of verifying the token twice.
///
/// Rejection: `ApiError::Unauthenticated` (401) on any failure.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Already resolved by `auth_middleware` for this request.
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = bearer_token(header_value)?;

        match verify(repo.as_ref(), &config.jwt_secret, token, unix_now()).await {
            Ok(user) => Ok(user),
            Err(e) => {
                tracing::warn!(reason = %e, "Authentication failed");
                Err(e.into())
            }
        }
    }
}
