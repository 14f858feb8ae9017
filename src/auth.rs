#[cfg(feature = "web")]
use crate::app::SharedState;
#[cfg(feature = "web")]
use crate::error::AppError;
use crate::mailer::{Notifier, generate_code};
use crate::store::{Database, Record, StoreError};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{
    Extension, Json,
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

const MIN_PASSWORD_LEN: usize = 6;
const CONFIRMATION_CODE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Supervisor,
    Vendor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::Vendor => "vendor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "supervisor" => Some(Role::Supervisor),
            "vendor" => Some(Role::Vendor),
            _ => None,
        }
    }

    /// Roles allowed to move material requests through their lifecycle.
    pub fn can_manage_requests(&self) -> bool {
        matches!(self, Role::Admin | Role::Supervisor)
    }
}

/// Row of the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub employee_id: String,
    pub email: String,
    pub role: Role,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    pub email_confirmed: bool,
    pub confirmation_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for UserRecord {
    const TABLE: &'static str = "users";

    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![
            ("users_email_key", self.email.clone()),
            ("users_employee_id_key", self.employee_id.clone()),
        ]
    }
}

/// The profile fields a signed-in client may see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub employee_id: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for UserProfile {
    fn from(user: &UserRecord) -> Self {
        UserProfile {
            id: user.id,
            employee_id: user.employee_id.clone(),
            email: user.email.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUpForm {
    #[serde(alias = "id")]
    pub employee_id: String,
    pub email: String,
    pub password: String,
    #[serde(alias = "confirmPassword")]
    pub confirm_password: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmEmailForm {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResendConfirmationForm {
    pub email: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("An account with this employee ID already exists")]
    EmployeeIdTaken,

    #[error("Invalid email or password. Please check your credentials and try again.")]
    InvalidCredentials,

    #[error("Please check your email and click the confirmation link before signing in.")]
    EmailNotConfirmed,

    #[error("Invalid confirmation code")]
    InvalidConfirmationCode,

    #[error("Account created, but the confirmation email could not be sent. Please request a new code.")]
    ConfirmationNotSent,

    #[error("Password hashing failed")]
    Hashing,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where a sign-in came from, recorded in the session log.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// An authenticated session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    #[serde(skip_serializing)]
    pub token: String,
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub employee_id: String,

    /// Row written by `log_user_login`, if that call succeeded.
    pub session_log_id: Option<Uuid>,

    #[serde(skip_serializing)]
    pub expires_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn { user_id: Uuid, email: String },
    SignedOut { user_id: Uuid },
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

/// Check a signup form; the first failing rule wins.
pub fn validate_signup(form: &SignUpForm) -> Result<Role, AuthError> {
    if form.employee_id.trim().is_empty() {
        return Err(AuthError::Validation("Employee ID is required"));
    }
    if form.email.trim().is_empty() {
        return Err(AuthError::Validation("Email address is required"));
    }
    if !is_valid_email(form.email.trim()) {
        return Err(AuthError::Validation("Please enter a valid email address"));
    }
    if form.password.is_empty() {
        return Err(AuthError::Validation("Password is required"));
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(
            "Password must be at least 6 characters long",
        ));
    }
    if form.password != form.confirm_password {
        return Err(AuthError::Validation("Passwords do not match"));
    }
    Role::parse(&form.role).ok_or(AuthError::Validation("Please select a role"))
}

/// Register a new, unconfirmed account and mail its confirmation code.
pub fn register_user(
    db: &Database,
    notifier: &dyn Notifier,
    form: &SignUpForm,
) -> Result<UserProfile, AuthError> {
    let role = validate_signup(form)?;
    let employee_id = form.employee_id.trim().to_string();
    let email = form.email.trim().to_lowercase();

    if let Some(existing) = db
        .users
        .find(|u| u.email == email || u.employee_id == employee_id)?
    {
        return Err(if existing.email == email {
            AuthError::EmailTaken
        } else {
            AuthError::EmployeeIdTaken
        });
    }

    let code = generate_code(CONFIRMATION_CODE_LEN);
    let user = UserRecord {
        id: Uuid::new_v4(),
        employee_id,
        email,
        role,
        password_hash: hash_password(&form.password)?,
        email_confirmed: false,
        confirmation_code: Some(code.clone()),
        created_at: Utc::now(),
    };

    // A concurrent signup can still win the race; the constraint decides.
    let user = db.users.insert(user).map_err(|e| {
        if e.is_duplicate_of("users_email_key") {
            AuthError::EmailTaken
        } else if e.is_duplicate_of("users_employee_id_key") {
            AuthError::EmployeeIdTaken
        } else {
            AuthError::Store(e)
        }
    })?;
    info!("registered {} as {}", user.email, user.role.as_str());

    if let Err(e) = notifier.send_email_confirmation(&user.email, &code) {
        error!("confirmation email for {} failed: {}", user.email, e);
        return Err(AuthError::ConfirmationNotSent);
    }

    Ok(UserProfile::from(&user))
}

/// Mark an account confirmed when `code` matches the one that was mailed.
pub fn confirm_email(db: &Database, email: &str, code: &str) -> Result<(), AuthError> {
    let email = email.trim().to_lowercase();
    let user = db
        .users
        .find(|u| u.email == email)?
        .ok_or(AuthError::InvalidConfirmationCode)?;

    if user.email_confirmed {
        return Ok(());
    }
    match &user.confirmation_code {
        Some(stored) if stored.eq_ignore_ascii_case(code.trim()) => {}
        _ => return Err(AuthError::InvalidConfirmationCode),
    }

    db.users.update(user.id, |u| {
        u.email_confirmed = true;
        u.confirmation_code = None;
    })?;
    info!("confirmed {}", email);
    Ok(())
}

/// Issue a fresh confirmation code for an unconfirmed account.
///
/// Unknown or already-confirmed addresses succeed silently so the endpoint
/// does not reveal which emails are registered.
pub fn resend_confirmation(
    db: &Database,
    notifier: &dyn Notifier,
    email: &str,
) -> Result<(), AuthError> {
    let email = email.trim().to_lowercase();
    let Some(user) = db.users.find(|u| u.email == email)? else {
        return Ok(());
    };
    if user.email_confirmed {
        return Ok(());
    }

    let code = generate_code(CONFIRMATION_CODE_LEN);
    db.users.update(user.id, |u| u.confirmation_code = Some(code.clone()))?;
    notifier
        .send_email_confirmation(&email, &code)
        .map_err(|e| {
            error!("confirmation email for {} failed: {}", email, e);
            AuthError::ConfirmationNotSent
        })
}

/// Load the profile row for a user id.
pub fn fetch_profile(db: &Database, user_id: Uuid) -> Option<UserProfile> {
    match db.users.get(user_id) {
        Ok(Some(user)) => Some(UserProfile::from(&user)),
        Ok(None) => {
            warn!("no profile row for user {}", user_id);
            None
        }
        Err(e) => {
            error!("error fetching profile for {}: {}", user_id, e);
            None
        }
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err(AuthError::Hashing),
    }
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::Hashing)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Process-wide authentication state, owned by the application state.
///
/// Holds the live sessions and the list of subscribers to sign-in and
/// sign-out events. Created once at startup; [`AuthState::shutdown`] ends
/// every session when the server stops.
pub struct AuthState {
    sessions: RwLock<HashMap<String, Session>>,
    subscribers: Mutex<Vec<Sender<AuthEvent>>>,
    ttl: Duration,
}

impl AuthState {
    pub fn new(ttl: Duration) -> Self {
        AuthState {
            sessions: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            ttl,
        }
    }

    pub fn subscribe(&self) -> Receiver<AuthEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn publish(&self, event: AuthEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Verify credentials and open a session.
    pub fn sign_in(
        &self,
        db: &Database,
        email: &str,
        password: &str,
        client: ClientInfo,
    ) -> Result<Session, AuthError> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(AuthError::Validation("Please enter a valid email address"));
        }
        if password.is_empty() {
            return Err(AuthError::Validation("Please enter your password"));
        }

        let user = db
            .users
            .find(|u| u.email == email)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.email_confirmed {
            return Err(AuthError::EmailNotConfirmed);
        }

        let session_log_id = match db.log_user_login(
            user.id,
            user.role.as_str(),
            client.ip_address,
            client.user_agent,
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                error!("error logging login for {}: {}", user.email, e);
                None
            }
        };

        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            employee_id: user.employee_id.clone(),
            session_log_id,
            expires_at: SystemTime::now() + self.ttl,
        };

        self.sweep_expired(db);
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.token.clone(), session.clone());
        info!("signed in {}", user.email);
        self.publish(AuthEvent::SignedIn {
            user_id: user.id,
            email: user.email,
        });

        Ok(session)
    }

    /// The live session for `token`. Expired sessions stay in the table
    /// until [`AuthState::sweep_expired`] closes them.
    pub fn current(&self, token: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(token)
            .filter(|session| session.expires_at > SystemTime::now())
            .cloned()
    }

    /// Whether `user_id` still has an unexpired session.
    pub fn has_session(&self, user_id: Uuid) -> bool {
        let now = SystemTime::now();
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|s| s.user_id == user_id && s.expires_at > now)
    }

    /// End the session for `token`. Unknown tokens are a no-op.
    pub fn sign_out(&self, db: &Database, token: &str) -> Option<Session> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token)?;
        self.close(db, &removed);
        info!("signed out {}", removed.email);
        Some(removed)
    }

    /// Close every expired session, stamping its logout time. Returns the
    /// sessions that were closed.
    pub fn sweep_expired(&self, db: &Database) -> Vec<Session> {
        let now = SystemTime::now();
        let expired: Vec<Session> = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            let tokens: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.expires_at <= now)
                .map(|(token, _)| token.clone())
                .collect();
            tokens
                .iter()
                .filter_map(|token| sessions.remove(token))
                .collect()
        };

        for session in &expired {
            self.close(db, session);
            info!("session for {} expired", session.email);
        }
        expired
    }

    fn close(&self, db: &Database, session: &Session) {
        if let Some(log_id) = session.session_log_id {
            if let Err(e) = db.log_user_logout(log_id) {
                error!("error logging logout for {}: {}", session.email, e);
            }
        }
        self.publish(AuthEvent::SignedOut {
            user_id: session.user_id,
        });
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Close every session. Called once when the server stops.
    pub fn shutdown(&self, db: &Database) {
        let tokens: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for token in tokens {
            self.sign_out(db, &token);
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub user: Session,
    pub profile: Option<UserProfile>,
}

#[cfg(feature = "web")]
fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };
    ClientInfo {
        ip_address: header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: header_str(header::USER_AGENT.as_str()),
    }
}

/// The live session named by the request's `session` cookie.
#[cfg(feature = "web")]
pub fn session_from_cookies(auth: &AuthState, jar: &CookieJar) -> Option<Session> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| auth.current(cookie.value()))
}

#[cfg(feature = "web")]
fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

#[cfg(feature = "web")]
pub async fn handle_signup(
    State(state): State<SharedState>,
    Json(form): Json<SignUpForm>,
) -> Result<Json<UserProfile>, AppError> {
    let profile = register_user(&state.db, state.notifier.as_ref(), &form)?;
    Ok(Json(profile))
}

#[cfg(feature = "web")]
pub async fn handle_confirm(
    State(state): State<SharedState>,
    Json(form): Json<ConfirmEmailForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    confirm_email(&state.db, &form.email, &form.code)?;
    Ok(Json(serde_json::json!({ "confirmed": true })))
}

#[cfg(feature = "web")]
pub async fn handle_resend_confirmation(
    State(state): State<SharedState>,
    Json(form): Json<ResendConfirmationForm>,
) -> Result<Json<serde_json::Value>, AppError> {
    resend_confirmation(&state.db, state.notifier.as_ref(), &form.email)?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<SharedState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(form): Json<SignInForm>,
) -> Result<Response, AppError> {
    let session = state
        .auth
        .sign_in(&state.db, &form.email, &form.password, client_info(&headers))?;
    let profile = fetch_profile(&state.db, session.user_id);
    let jar = jar.add(session_cookie(session.token.clone()));

    Ok((
        jar,
        Json(SessionView {
            user: session,
            profile,
        }),
    )
        .into_response())
}

#[cfg(feature = "web")]
pub async fn handle_logout(State(state): State<SharedState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = state.auth.sign_out(&state.db, cookie.value()) {
            if !state.auth.has_session(session.user_id) {
                state.end_checkout(session.user_id);
            }
        }
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/").build());

    (jar, Json(serde_json::json!({ "signed_out": true }))).into_response()
}

#[cfg(feature = "web")]
pub async fn handle_session(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Json<Option<SessionView>> {
    let view = session_from_cookies(&state.auth, &jar).map(|session| SessionView {
        profile: fetch_profile(&state.db, session.user_id),
        user: session,
    });
    Json(view)
}

/// Authentication middleware
///
/// Resolves the `session` cookie and stores the [`Session`] in the request
/// extensions. Requests without a live session are rejected with 401.
#[cfg(feature = "web")]
pub async fn require_auth(
    State(state): State<SharedState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = session_from_cookies(&state.auth, &jar).ok_or(AppError::Unauthenticated)?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Shorthand for handlers behind [`require_auth`].
#[cfg(feature = "web")]
pub type CurrentSession = Extension<Session>;
