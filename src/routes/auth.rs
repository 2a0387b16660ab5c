use std::sync::Arc;

use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_json, result_json};
use crate::db::DbPool;
use crate::email::dispatch::EmailDispatcher;
use crate::email::templates;
use crate::models::auth_token::{AuthToken, TokenPurpose};
use crate::models::notification::{NewNotification, NotificationKind};
use crate::models::settings::Setting;
use crate::models::user::{NewUser, RoleProfile, User, UserStatus};
use crate::notify::Notifier;
use crate::rate_limit::{Bucket, RateLimiter};
use crate::security::auth::{self, AuthenticatedUser, ClientIp};

const TOO_MANY: &str = "Too many requests. Please try again later.";

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    pub profile: RoleProfile,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailForm {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetForm {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileForm {
    pub name: String,
    pub profile: RoleProfile,
}

#[derive(Debug, Deserialize)]
pub struct SetupForm {
    pub email: String,
    pub name: String,
    pub password: String,
}

// ── First-run setup ──

/// Create the first administrator. Closed once any admin exists.
pub(crate) fn create_first_admin(pool: &DbPool, form: &SetupForm) -> Result<i64, String> {
    if User::count_filtered(pool, Some("admin"), None) > 0 {
        return Err("Setup has already been completed".into());
    }
    if form.name.trim().is_empty() {
        return Err("Name is required".into());
    }
    auth::validate_password_strength(&form.password)?;
    let hash = auth::hash_password(&form.password)?;
    let id = User::create(
        pool,
        &NewUser {
            email: &form.email,
            name: &form.name,
            password_hash: Some(&hash),
            profile: &RoleProfile::Admin,
        },
    )?;

    let email = form.email.trim().to_lowercase();
    if let Err(e) = User::mark_verified(pool, &email) {
        log::warn!("[auth] Could not mark first administrator verified: {}", e);
    }
    if let Err(e) = Setting::set(pool, "admin_email", &email) {
        log::warn!("[auth] Could not record admin email: {}", e);
    }
    log::info!("[auth] First administrator {} created", id);
    Ok(id)
}

#[post("/setup", format = "json", data = "<form>")]
pub fn setup(pool: &State<DbPool>, form: Json<SetupForm>) -> Json<Value> {
    Json(result_json(create_first_admin(pool, &form), |id| {
        json!({"success": true, "id": id})
    }))
}

// ── Signup ──

#[post("/signup", format = "json", data = "<form>")]
pub fn signup(
    pool: &State<DbPool>,
    mailer: &State<Arc<EmailDispatcher>>,
    notifier: &State<Notifier>,
    limiter: &State<Arc<RateLimiter>>,
    client_ip: ClientIp,
    form: Json<SignupForm>,
) -> Json<Value> {
    if !limiter.allow(Bucket::Signup, &auth::hash_ip(&client_ip.0)) {
        return Json(error_json(TOO_MANY));
    }
    if matches!(form.profile, RoleProfile::Admin) {
        return Json(error_json("Admin accounts cannot be created by signup"));
    }
    if form.name.trim().is_empty() {
        return Json(error_json("Name is required"));
    }

    let hash = match form.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => {
            if let Err(e) = auth::validate_password_strength(password) {
                return Json(error_json(e));
            }
            match auth::hash_password(password) {
                Ok(h) => Some(h),
                Err(e) => return Json(error_json(e)),
            }
        }
        None => None,
    };

    let new = NewUser {
        email: &form.email,
        name: &form.name,
        password_hash: hash.as_deref(),
        profile: &form.profile,
    };
    let user_id = match User::create(pool, &new) {
        Ok(id) => id,
        Err(e) => return Json(error_json(e)),
    };
    let email = form.email.trim().to_lowercase();
    log::info!("[auth] New {} account {} awaiting approval", form.profile.role(), user_id);

    match AuthToken::create(pool, &email, TokenPurpose::EmailVerification) {
        Ok(token) => {
            let settings = Setting::all(pool);
            mailer.queue(templates::auth_link_email(
                &settings,
                TokenPurpose::EmailVerification,
                &email,
                &token,
            ));
        }
        Err(e) => log::error!("[auth] Failed to create verification token for {}: {}", user_id, e),
    }

    let body = format!("{} ({}) signed up as {}", form.name.trim(), email, form.profile.role());
    notifier.notify_users(
        &User::active_ids(pool, Some("admin")),
        &NewNotification {
            user_id: 0,
            kind: NotificationKind::Account,
            title: "New account awaiting approval",
            body: &body,
            link: Some("/admin/users?status=inactive"),
            expires_at: None,
        },
    );

    Json(json!({
        "success": true,
        "id": user_id,
        "message": "Account created. Verify your email; an administrator will activate your account.",
    }))
}

// ── Password login ──

fn login_refusal(user: &User) -> Option<&'static str> {
    match user.status {
        UserStatus::Active => None,
        UserStatus::Inactive => Some("Your account is awaiting approval"),
        UserStatus::Banned => Some("Your account has been suspended"),
    }
}

fn start_session(pool: &DbPool, cookies: &CookieJar<'_>, user: &User, ip: &str) -> Json<Value> {
    match auth::create_session(pool, user.id, Some(ip)) {
        Ok(session_id) => {
            auth::set_session_cookie(cookies, &session_id, pool);
            if let Err(e) = User::touch_last_login(pool, user.id) {
                log::warn!("[auth] Failed to record login for {}: {}", user.id, e);
            }
            Json(json!({"success": true, "user": user.safe_json()}))
        }
        Err(e) => {
            log::error!("[auth] Session creation failed for {}: {}", user.id, e);
            Json(error_json("Session creation failed"))
        }
    }
}

#[post("/login", format = "json", data = "<form>")]
pub fn login(
    pool: &State<DbPool>,
    limiter: &State<Arc<RateLimiter>>,
    client_ip: ClientIp,
    cookies: &CookieJar<'_>,
    form: Json<LoginForm>,
) -> Json<Value> {
    if !limiter.allow(Bucket::Login, &auth::hash_ip(&client_ip.0)) {
        return Json(error_json("Too many login attempts. Please try again in 15 minutes."));
    }

    let user = match User::get_by_email(pool, form.email.trim()) {
        Some(u) => u,
        None => return Json(error_json("Invalid credentials")),
    };
    let valid = user
        .password_hash
        .as_deref()
        .map(|hash| auth::verify_password(&form.password, hash))
        .unwrap_or(false);
    if !valid {
        return Json(error_json("Invalid credentials"));
    }
    if let Some(reason) = login_refusal(&user) {
        return Json(error_json(reason));
    }

    start_session(pool, cookies, &user, &client_ip.0)
}

#[post("/logout")]
pub fn logout(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Json<Value> {
    if let Some(session_id) = auth::session_id_from_cookies(cookies) {
        if let Err(e) = auth::destroy_session(pool, &session_id) {
            log::warn!("[auth] Failed to destroy session on logout: {}", e);
        }
    }
    auth::clear_session_cookie(cookies);
    Json(json!({"success": true}))
}

// ── Emailed links ──

/// Queue a link email if the address belongs to an eligible account. The
/// answer never reveals whether it did.
pub(crate) fn request_link(
    pool: &DbPool,
    mailer: &Arc<EmailDispatcher>,
    limiter: &RateLimiter,
    client_ip: &ClientIp,
    email: &str,
    purpose: TokenPurpose,
    bucket: Bucket,
) -> Json<Value> {
    if !limiter.allow(bucket, &auth::hash_ip(&client_ip.0)) {
        return Json(error_json(TOO_MANY));
    }

    let eligible = User::get_by_email(pool, email.trim()).filter(|user| match purpose {
        TokenPurpose::Login => user.is_active(),
        TokenPurpose::EmailVerification => !user.verified && user.status != UserStatus::Banned,
        TokenPurpose::PasswordReset | TokenPurpose::AccountRecovery => user.status != UserStatus::Banned,
    });

    if let Some(user) = eligible {
        match AuthToken::create(pool, &user.email, purpose) {
            Ok(token) => {
                let settings = Setting::all(pool);
                mailer.queue(templates::auth_link_email(&settings, purpose, &user.email, &token));
            }
            Err(e) => log::error!("[auth] Failed to create {} token: {}", purpose.as_str(), e),
        }
    }

    Json(json!({"success": true, "status": "queued"}))
}

#[post("/magic-link", format = "json", data = "<form>")]
pub fn magic_link_request(
    pool: &State<DbPool>,
    mailer: &State<Arc<EmailDispatcher>>,
    limiter: &State<Arc<RateLimiter>>,
    client_ip: ClientIp,
    form: Json<EmailForm>,
) -> Json<Value> {
    request_link(pool, mailer, limiter, &client_ip, &form.email, TokenPurpose::Login, Bucket::MagicLink)
}

#[post("/magic-link/verify", format = "json", data = "<form>")]
pub fn magic_link_verify(
    pool: &State<DbPool>,
    client_ip: ClientIp,
    cookies: &CookieJar<'_>,
    form: Json<TokenForm>,
) -> Json<Value> {
    let email = match AuthToken::consume(pool, &form.token, TokenPurpose::Login) {
        Ok(email) => email,
        Err(e) => return Json(error_json(e)),
    };
    let user = match User::get_by_email(pool, &email) {
        Some(u) => u,
        None => return Json(error_json("Invalid or expired link")),
    };
    if let Some(reason) = login_refusal(&user) {
        return Json(error_json(reason));
    }
    start_session(pool, cookies, &user, &client_ip.0)
}

#[post("/password-reset", format = "json", data = "<form>")]
pub fn password_reset_request(
    pool: &State<DbPool>,
    mailer: &State<Arc<EmailDispatcher>>,
    limiter: &State<Arc<RateLimiter>>,
    client_ip: ClientIp,
    form: Json<EmailForm>,
) -> Json<Value> {
    request_link(
        pool,
        mailer,
        limiter,
        &client_ip,
        &form.email,
        TokenPurpose::PasswordReset,
        Bucket::PasswordReset,
    )
}

#[post("/password-reset/confirm", format = "json", data = "<form>")]
pub fn password_reset_confirm(pool: &State<DbPool>, form: Json<ResetForm>) -> Json<Value> {
    if let Err(e) = auth::validate_password_strength(&form.password) {
        return Json(error_json(e));
    }
    let email = match AuthToken::consume(pool, &form.token, TokenPurpose::PasswordReset) {
        Ok(email) => email,
        Err(e) => return Json(error_json(e)),
    };
    let user = match User::get_by_email(pool, &email) {
        Some(u) => u,
        None => return Json(error_json("Invalid or expired link")),
    };
    let hash = match auth::hash_password(&form.password) {
        Ok(h) => h,
        Err(e) => return Json(error_json(e)),
    };
    match User::update_password(pool, user.id, &hash) {
        Ok(()) => {
            log::info!("[auth] Password reset for user {}", user.id);
            Json(json!({"success": true}))
        }
        Err(e) => Json(error_json(e)),
    }
}

#[post("/verify-email/resend", format = "json", data = "<form>")]
pub fn verify_email_resend(
    pool: &State<DbPool>,
    mailer: &State<Arc<EmailDispatcher>>,
    limiter: &State<Arc<RateLimiter>>,
    client_ip: ClientIp,
    form: Json<EmailForm>,
) -> Json<Value> {
    request_link(
        pool,
        mailer,
        limiter,
        &client_ip,
        &form.email,
        TokenPurpose::EmailVerification,
        Bucket::MagicLink,
    )
}

#[post("/verify-email", format = "json", data = "<form>")]
pub fn verify_email(pool: &State<DbPool>, form: Json<TokenForm>) -> Json<Value> {
    let email = match AuthToken::consume(pool, &form.token, TokenPurpose::EmailVerification) {
        Ok(email) => email,
        Err(e) => return Json(error_json(e)),
    };
    match User::mark_verified(pool, &email) {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => Json(error_json(e)),
    }
}

#[post("/recover", format = "json", data = "<form>")]
pub fn recover_request(
    pool: &State<DbPool>,
    mailer: &State<Arc<EmailDispatcher>>,
    limiter: &State<Arc<RateLimiter>>,
    client_ip: ClientIp,
    form: Json<EmailForm>,
) -> Json<Value> {
    request_link(
        pool,
        mailer,
        limiter,
        &client_ip,
        &form.email,
        TokenPurpose::AccountRecovery,
        Bucket::PasswordReset,
    )
}

/// Recovery proves ownership of the address: it verifies the email and,
/// for an active account, signs the user in.
#[post("/recover/confirm", format = "json", data = "<form>")]
pub fn recover_confirm(
    pool: &State<DbPool>,
    client_ip: ClientIp,
    cookies: &CookieJar<'_>,
    form: Json<TokenForm>,
) -> Json<Value> {
    let email = match AuthToken::consume(pool, &form.token, TokenPurpose::AccountRecovery) {
        Ok(email) => email,
        Err(e) => return Json(error_json(e)),
    };
    if let Err(e) = User::mark_verified(pool, &email) {
        return Json(error_json(e));
    }
    let user = match User::get_by_email(pool, &email) {
        Some(u) => u,
        None => return Json(error_json("Invalid or expired link")),
    };
    if let Some(reason) = login_refusal(&user) {
        return Json(json!({"success": true, "signed_in": false, "message": reason}));
    }
    start_session(pool, cookies, &user, &client_ip.0)
}

// ── Current user ──

#[get("/me")]
pub fn me(current: AuthenticatedUser) -> Json<Value> {
    Json(json!({"success": true, "user": current.user.safe_json()}))
}

#[put("/me", format = "json", data = "<form>")]
pub fn update_me(pool: &State<DbPool>, current: AuthenticatedUser, form: Json<ProfileForm>) -> Json<Value> {
    if form.profile.role() != current.user.role() {
        return Json(error_json("Role changes require an administrator"));
    }
    if form.name.trim().is_empty() {
        return Json(error_json("Name is required"));
    }
    match User::update_profile(pool, current.user.id, &form.name, &form.profile) {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => Json(error_json(e)),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        setup,
        signup,
        login,
        logout,
        magic_link_request,
        magic_link_verify,
        password_reset_request,
        password_reset_confirm,
        verify_email_resend,
        verify_email,
        recover_request,
        recover_confirm,
        me,
        update_me
    ]
}
