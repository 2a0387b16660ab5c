#![cfg(test)]

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};

use crate::db::{run_migrations, seed_defaults, DbPool};
use crate::email::dispatch::{BatchPolicy, EmailDispatcher, RetrySchedule};
use crate::email::{MailTransport, OutgoingEmail};
use crate::models::auth_token::{AuthToken, TokenPurpose};
use crate::models::invitation::Invitation;
use crate::models::notification::{NewNotification, Notification, NotificationKind};
use crate::models::push_subscription::{PushSubscription, SubscriptionKeys};
use crate::models::round::{Debate, DebateForm, LiveSession, Round, RoundType};
use crate::models::school::{Location, School, SchoolForm};
use crate::models::settings::Setting;
use crate::models::team::{PaymentStatus, Team, TeamForm};
use crate::models::tournament::{DebateFormat, Tournament, TournamentForm, TournamentStatus};
use crate::models::user::{NewUser, RoleProfile, User, UserStatus};
use crate::models::waiver::WaiverCode;
use crate::notify::Notifier;
use crate::offline::cache::CacheEntry;
use crate::offline::sync::{SyncHub, SyncMessage, SyncSession, SyncState};
use crate::offline::OfflineCache;
use crate::push::{self, HttpPushSender, PushOutcome, PushPayload, PushSender, VapidKeys};
use crate::security::auth;

/// Atomic counter for unique shared-cache DB names so parallel tests don't collide.
static TEST_DB_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Fresh in-memory SQLite pool with migrations and seed defaults applied.
/// Named shared-cache DB so every pooled connection sees the same data
/// (get_session_user holds one conn while calling User::get_by_id).
fn test_pool() -> DbPool {
    let id = TEST_DB_COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let uri = format!("file:testdb_{}?mode=memory&cache=shared", id);
    let manager = SqliteConnectionManager::file(uri);
    let pool = Pool::builder()
        .max_size(2)
        .build(manager)
        .expect("Failed to create test pool");
    {
        let conn = pool.get().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    }
    run_migrations(&pool).expect("Failed to run migrations");
    seed_defaults(&pool).expect("Failed to seed defaults");
    pool
}

/// Fast bcrypt hash for tests (cost=4 instead of DEFAULT_COST=12).
fn fast_hash(password: &str) -> String {
    bcrypt::hash(password, 4).unwrap()
}

fn make_user(pool: &DbPool, email: &str, profile: RoleProfile) -> i64 {
    let hash = fast_hash("secret123");
    User::create(
        pool,
        &NewUser {
            email,
            name: "Test User",
            password_hash: Some(&hash),
            profile: &profile,
        },
    )
    .unwrap()
}

fn make_admin(pool: &DbPool) -> i64 {
    make_user(pool, "admin@irankhub.test", RoleProfile::Admin)
}

fn student() -> RoleProfile {
    RoleProfile::Student {
        grade: Some("S4".into()),
        school_id: None,
    }
}

fn make_school(pool: &DbPool, name: &str, created_by: i64) -> i64 {
    let form = SchoolForm {
        name: name.to_string(),
        location: Location {
            country: "Rwanda".into(),
            province: "Kigali".into(),
            district: "Gasabo".into(),
            sector: Some("Kimironko".into()),
            cell: None,
            village: None,
        },
        contact_email: format!("{}@schools.test", slug::slugify(name)),
    };
    School::create(pool, &form, created_by).unwrap()
}

fn tournament_form(name: &str) -> TournamentForm {
    TournamentForm {
        name: name.to_string(),
        start_date: NaiveDate::from_ymd_opt(2026, 11, 7).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 11, 8).unwrap(),
        format: DebateFormat::WorldSchools,
        speaking_times: None,
        league_id: None,
        location: "Kigali".into(),
        fee: 25.0,
    }
}

fn make_tournament(pool: &DbPool, name: &str, created_by: i64) -> i64 {
    Tournament::create(pool, &tournament_form(name), created_by).unwrap()
}

fn make_team(pool: &DbPool, tournament_id: i64, name: &str) -> i64 {
    Team::create(
        pool,
        tournament_id,
        &TeamForm {
            name: name.to_string(),
            school_id: None,
            members: vec![],
        },
    )
    .unwrap()
}

// ═══════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════

#[test]
fn settings_set_and_get() {
    let pool = test_pool();
    Setting::set(&pool, "test_key", "hello").unwrap();
    assert_eq!(Setting::get(&pool, "test_key"), Some("hello".to_string()));
    Setting::set(&pool, "test_key", "again").unwrap();
    assert_eq!(Setting::get_or(&pool, "test_key", "x"), "again");
    assert_eq!(Setting::get_or(&pool, "missing", "fallback"), "fallback");
}

#[test]
fn settings_seeded_defaults() {
    let pool = test_pool();
    assert_eq!(Setting::get_i64(&pool, "session_expiry_hours"), 24);
    assert_eq!(Setting::get_i64(&pool, "push_ttl_secs"), 86400);
    assert!(Setting::get_bool(&pool, "notifications_email_enabled"));
    assert_eq!(Setting::get_or(&pool, "email_provider", ""), "log");
}

#[test]
fn settings_redacted_masks_secrets_only_when_set() {
    let pool = test_pool();
    Setting::set(&pool, "email_resend_api_key", "re_live_123").unwrap();
    let redacted = Setting::redacted(&pool);
    assert_eq!(redacted["email_resend_api_key"], "********");
    assert_eq!(redacted["email_smtp_password"], "");
    assert_eq!(redacted["site_name"], "iRankHub");
}

#[test]
fn settings_set_many() {
    let pool = test_pool();
    let mut map = HashMap::new();
    map.insert("site_name".to_string(), "Nationals Hub".to_string());
    map.insert("email_provider".to_string(), "smtp".to_string());
    Setting::set_many(&pool, &map).unwrap();
    assert_eq!(Setting::get_or(&pool, "site_name", ""), "Nationals Hub");
    assert_eq!(Setting::get_group(&pool, "email_provider").len(), 1);
}

// ═══════════════════════════════════════════════════════════
// Users
// ═══════════════════════════════════════════════════════════

#[test]
fn user_signup_starts_inactive_admin_starts_active() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let s = make_user(&pool, "Student@School.test", student());

    let admin = User::get_by_id(&pool, admin).unwrap();
    assert_eq!(admin.status, UserStatus::Active);
    assert!(admin.is_admin());

    let s = User::get_by_id(&pool, s).unwrap();
    assert_eq!(s.email, "student@school.test");
    assert_eq!(s.status, UserStatus::Inactive);
    assert!(!s.verified);
    assert_eq!(s.role(), "student");
}

#[test]
fn user_duplicate_email_is_case_insensitive() {
    let pool = test_pool();
    make_user(&pool, "dup@x.test", student());
    let hash = fast_hash("secret123");
    let err = User::create(
        &pool,
        &NewUser {
            email: "DUP@x.test",
            name: "Other",
            password_hash: Some(&hash),
            profile: &student(),
        },
    )
    .unwrap_err();
    assert!(err.contains("already exists"));
}

#[test]
fn user_rejects_invalid_email() {
    let pool = test_pool();
    let err = User::create(
        &pool,
        &NewUser {
            email: "not-an-email",
            name: "X",
            password_hash: None,
            profile: &student(),
        },
    )
    .unwrap_err();
    assert!(err.contains("valid email"));
}

#[test]
fn user_profile_round_trips_role_fields() {
    let pool = test_pool();
    let profile = RoleProfile::Volunteer {
        safeguarding_certificate: Some("SG-2026-118".into()),
        national_id: Some("1199880012345678".into()),
    };
    let id = make_user(&pool, "vol@x.test", profile.clone());
    let user = User::get_by_email(&pool, "VOL@x.test").unwrap();
    assert_eq!(user.id, id);
    assert_eq!(user.profile, profile);
    assert_eq!(user.role(), "volunteer");
}

#[test]
fn user_profile_json_is_role_tagged() {
    let json = serde_json::to_value(RoleProfile::SchoolAdmin {
        position: "Debate coach".into(),
        school_id: Some(4),
    })
    .unwrap();
    assert_eq!(json["role"], "school_admin");
    assert_eq!(json["school_id"], 4);

    let parsed: RoleProfile = serde_json::from_str(r#"{"role":"student"}"#).unwrap();
    assert_eq!(parsed, RoleProfile::Student { grade: None, school_id: None });
}

#[test]
fn user_approve_ban_unban() {
    let pool = test_pool();
    let id = make_user(&pool, "s@x.test", student());

    User::approve(&pool, id).unwrap();
    assert!(User::get_by_id(&pool, id).unwrap().is_active());
    assert!(User::approve(&pool, id).is_err(), "already active");

    let session = auth::create_session(&pool, id, None).unwrap();
    User::ban(&pool, id).unwrap();
    assert_eq!(User::get_by_id(&pool, id).unwrap().status, UserStatus::Banned);
    assert!(auth::get_session_user(&pool, &session).is_none(), "ban drops sessions");
    assert!(User::approve(&pool, id).is_err(), "banned needs unban");

    User::unban(&pool, id).unwrap();
    assert!(User::get_by_id(&pool, id).unwrap().is_active());
}

#[test]
fn user_active_ids_filters_role_and_status() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let s1 = make_user(&pool, "s1@x.test", student());
    let s2 = make_user(&pool, "s2@x.test", student());
    User::approve(&pool, s1).unwrap();

    assert_eq!(User::active_ids(&pool, Some("student")), vec![s1]);
    assert_eq!(User::active_ids(&pool, None), vec![admin, s1]);
    assert!(!User::active_ids(&pool, None).contains(&s2));
    assert_eq!(User::count_filtered(&pool, Some("student"), None), 2);
    assert_eq!(User::count_filtered(&pool, None, Some("inactive")), 1);
}

#[test]
fn user_school_admin_ids_by_school() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let school = make_school(&pool, "Green Hills Academy", admin);
    let other = make_school(&pool, "Riviera High", admin);

    let sa = make_user(
        &pool,
        "coach@gha.test",
        RoleProfile::SchoolAdmin {
            position: "Coach".into(),
            school_id: Some(school),
        },
    );
    let pending = make_user(
        &pool,
        "coach2@gha.test",
        RoleProfile::SchoolAdmin {
            position: "Coach".into(),
            school_id: Some(school),
        },
    );
    User::approve(&pool, sa).unwrap();

    assert_eq!(User::school_admin_ids(&pool, school), vec![sa]);
    assert!(!User::school_admin_ids(&pool, school).contains(&pending));
    assert!(User::school_admin_ids(&pool, other).is_empty());
}

#[test]
fn user_update_profile_and_password() {
    let pool = test_pool();
    let id = make_user(&pool, "s@x.test", student());
    let profile = RoleProfile::Student {
        grade: Some("S6".into()),
        school_id: Some(3),
    };
    User::update_profile(&pool, id, "  Renamed  ", &profile).unwrap();
    let user = User::get_by_id(&pool, id).unwrap();
    assert_eq!(user.name, "Renamed");
    assert_eq!(user.profile.school_id(), Some(3));

    let hash = fast_hash("newpass99");
    User::update_password(&pool, id, &hash).unwrap();
    let user = User::get_by_id(&pool, id).unwrap();
    assert!(auth::verify_password("newpass99", user.password_hash.as_deref().unwrap()));
    assert!(User::update_profile(&pool, 9999, "X", &profile).is_err());
}

#[test]
fn user_safe_json_omits_password() {
    let pool = test_pool();
    let id = make_user(&pool, "s@x.test", student());
    let user = User::get_by_id(&pool, id).unwrap();
    let json = user.safe_json();
    assert!(json.get("password_hash").is_none());
    assert_eq!(json["email"], "s@x.test");
}

// ═══════════════════════════════════════════════════════════
// Auth: passwords, sessions
// ═══════════════════════════════════════════════════════════

#[test]
fn password_strength_rules() {
    assert!(auth::validate_password_strength("short1").is_err());
    assert!(auth::validate_password_strength("allletters").is_err());
    assert!(auth::validate_password_strength("12345678").is_err());
    assert!(auth::validate_password_strength("debate2026").is_ok());
}

#[test]
fn password_verify_rejects_wrong_and_garbage() {
    let hash = fast_hash("correct1");
    assert!(auth::verify_password("correct1", &hash));
    assert!(!auth::verify_password("wrong123", &hash));
    assert!(!auth::verify_password("correct1", "not-a-bcrypt-hash"));
}

#[test]
fn session_create_lookup_destroy() {
    let pool = test_pool();
    let id = make_admin(&pool);
    let session = auth::create_session(&pool, id, Some("10.0.0.5")).unwrap();
    assert_eq!(auth::get_session_user(&pool, &session).map(|u| u.id), Some(id));

    auth::destroy_session(&pool, &session).unwrap();
    assert!(auth::get_session_user(&pool, &session).is_none());
    assert!(auth::get_session_user(&pool, "no-such-session").is_none());
}

#[test]
fn session_stores_hashed_ip() {
    let pool = test_pool();
    let id = make_admin(&pool);
    let session = auth::create_session(&pool, id, Some("10.0.0.5")).unwrap();
    let conn = pool.get().unwrap();
    let stored: String = conn
        .query_row(
            "SELECT ip_address FROM sessions WHERE id = ?1",
            rusqlite::params![session],
            |row| row.get(0),
        )
        .unwrap();
    assert_ne!(stored, "10.0.0.5");
    assert_eq!(stored, auth::hash_ip("10.0.0.5"));
}

#[test]
fn session_cleanup_removes_expired_only() {
    let pool = test_pool();
    let id = make_admin(&pool);
    let live = auth::create_session(&pool, id, None).unwrap();
    {
        let conn = pool.get().unwrap();
        let past = Utc::now().naive_utc() - ChronoDuration::hours(1);
        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES ('old', ?1, ?2, ?2)",
            rusqlite::params![id, past],
        )
        .unwrap();
    }
    assert!(auth::get_session_user(&pool, "old").is_none());
    assert_eq!(auth::cleanup_expired_sessions(&pool).unwrap(), 1);
    assert!(auth::get_session_user(&pool, &live).is_some());
}

// ═══════════════════════════════════════════════════════════
// Auth tokens
// ═══════════════════════════════════════════════════════════

#[test]
fn auth_token_is_single_use() {
    let pool = test_pool();
    let token = AuthToken::create(&pool, "Student@X.test", TokenPurpose::Login).unwrap();
    assert_eq!(
        AuthToken::consume(&pool, &token, TokenPurpose::Login).unwrap(),
        "student@x.test"
    );
    let err = AuthToken::consume(&pool, &token, TokenPurpose::Login).unwrap_err();
    assert!(err.contains("already been used"));
}

#[test]
fn auth_token_expires_after_fifteen_minutes() {
    let pool = test_pool();
    let issued = Utc::now().naive_utc();
    let early = AuthToken::create_at(&pool, "a@x.test", TokenPurpose::PasswordReset, issued).unwrap();
    let late = AuthToken::create_at(&pool, "a@x.test", TokenPurpose::PasswordReset, issued).unwrap();

    let at_14 = issued + ChronoDuration::minutes(14);
    assert!(AuthToken::consume_at(&pool, &early, TokenPurpose::PasswordReset, at_14).is_ok());

    let at_16 = issued + ChronoDuration::minutes(16);
    let err = AuthToken::consume_at(&pool, &late, TokenPurpose::PasswordReset, at_16).unwrap_err();
    assert!(err.contains("expired"));
}

#[test]
fn auth_token_purpose_must_match() {
    let pool = test_pool();
    let token = AuthToken::create(&pool, "a@x.test", TokenPurpose::EmailVerification).unwrap();
    assert!(AuthToken::consume(&pool, &token, TokenPurpose::Login).is_err());
    assert!(AuthToken::consume(&pool, &token, TokenPurpose::EmailVerification).is_ok());
}

#[test]
fn auth_token_cleanup_drops_used_and_expired() {
    let pool = test_pool();
    let old = Utc::now().naive_utc() - ChronoDuration::hours(2);
    AuthToken::create_at(&pool, "a@x.test", TokenPurpose::Login, old).unwrap();
    let used = AuthToken::create(&pool, "b@x.test", TokenPurpose::Login).unwrap();
    AuthToken::consume(&pool, &used, TokenPurpose::Login).unwrap();
    let live = AuthToken::create(&pool, "c@x.test", TokenPurpose::Login).unwrap();

    assert_eq!(AuthToken::cleanup_expired(&pool).unwrap(), 2);
    assert!(AuthToken::consume(&pool, &live, TokenPurpose::Login).is_ok());
}

// ═══════════════════════════════════════════════════════════
// Schools
// ═══════════════════════════════════════════════════════════

#[test]
fn school_create_list_and_verify() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let a = make_school(&pool, "Green Hills Academy", admin);
    make_school(&pool, "Lycee de Kigali", admin);

    assert_eq!(School::list(&pool, Some("Rwanda"), false).len(), 2);
    assert!(School::list(&pool, Some("Kenya"), false).is_empty());
    assert!(School::list(&pool, None, true).is_empty());

    School::verify(&pool, a).unwrap();
    let verified = School::list(&pool, None, true);
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].location.sector.as_deref(), Some("Kimironko"));
}

#[test]
fn school_duplicate_name_rejected() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    make_school(&pool, "Riviera High", admin);
    let form = SchoolForm {
        name: "Riviera High".into(),
        location: Location {
            country: "Rwanda".into(),
            ..Location::default()
        },
        contact_email: "x@y.test".into(),
    };
    assert!(School::create(&pool, &form, admin).unwrap_err().contains("already exists"));
}

#[test]
fn school_owner_edits_until_verified() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let owner = make_user(
        &pool,
        "coach@x.test",
        RoleProfile::SchoolAdmin {
            position: "Coach".into(),
            school_id: None,
        },
    );
    let id = make_school(&pool, "Owner School", owner);
    let mut form = SchoolForm {
        name: "Owner School Renamed".into(),
        location: Location {
            country: "Rwanda".into(),
            ..Location::default()
        },
        contact_email: "c@x.test".into(),
    };
    School::update(&pool, id, &form, owner, false).unwrap();
    assert!(School::update(&pool, id, &form, admin + 1000, false).is_err());

    School::verify(&pool, id).unwrap();
    form.name = "Again".into();
    assert!(School::update(&pool, id, &form, owner, false).is_err());
    School::update(&pool, id, &form, admin, true).unwrap();
    assert_eq!(School::find_by_id(&pool, id).unwrap().name, "Again");
}

// ═══════════════════════════════════════════════════════════
// Tournaments
// ═══════════════════════════════════════════════════════════

#[test]
fn tournament_create_defaults() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let id = make_tournament(&pool, "Kigali Open 2026", admin);
    let t = Tournament::find_by_id(&pool, id).unwrap();
    assert_eq!(t.slug, "kigali-open-2026");
    assert_eq!(t.status, TournamentStatus::Draft);
    assert_eq!(t.speaking_times, DebateFormat::WorldSchools.default_speaking_times());
    assert_eq!(Tournament::find_by_slug(&pool, "kigali-open-2026").map(|t| t.id), Some(id));
}

#[test]
fn tournament_slug_dedup() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let a = make_tournament(&pool, "Nationals", admin);
    let b = make_tournament(&pool, "Nationals", admin);
    let c = make_tournament(&pool, "Nationals", admin);
    assert_eq!(Tournament::find_by_id(&pool, a).unwrap().slug, "nationals");
    assert_eq!(Tournament::find_by_id(&pool, b).unwrap().slug, "nationals-2");
    assert_eq!(Tournament::find_by_id(&pool, c).unwrap().slug, "nationals-3");
}

#[test]
fn tournament_validation() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let mut form = tournament_form("Backwards");
    form.end_date = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
    assert!(Tournament::create(&pool, &form, admin).is_err());

    let mut form = tournament_form("Negative fee");
    form.fee = -1.0;
    assert!(Tournament::create(&pool, &form, admin).is_err());
}

#[test]
fn tournament_transition_rules() {
    use TournamentStatus::*;
    assert!(Draft.can_transition_to(Published));
    assert!(Published.can_transition_to(InProgress));
    assert!(InProgress.can_transition_to(Completed));
    assert!(Draft.can_transition_to(Cancelled));
    assert!(InProgress.can_transition_to(Cancelled));
    assert!(!Completed.can_transition_to(Cancelled));
    assert!(!Cancelled.can_transition_to(Draft));
    assert!(!Draft.can_transition_to(InProgress));
    assert!(!Published.can_transition_to(Draft));
}

#[test]
fn tournament_lifecycle_in_db() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let id = make_tournament(&pool, "Lifecycle Cup", admin);

    assert_eq!(Tournament::transition(&pool, id, TournamentStatus::Published).unwrap(), TournamentStatus::Draft);
    Tournament::transition(&pool, id, TournamentStatus::InProgress).unwrap();

    let err = Tournament::update(&pool, id, &tournament_form("Too late")).unwrap_err();
    assert!(err.contains("in_progress"));

    Tournament::transition(&pool, id, TournamentStatus::Completed).unwrap();
    assert!(Tournament::transition(&pool, id, TournamentStatus::Cancelled).is_err());
    assert_eq!(Tournament::find_by_id(&pool, id).unwrap().status, TournamentStatus::Completed);
}

#[test]
fn tournament_list_hides_drafts_from_public() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let draft = make_tournament(&pool, "Draft Cup", admin);
    let public = make_tournament(&pool, "Public Cup", admin);
    Tournament::transition(&pool, public, TournamentStatus::Published).unwrap();

    let visible: Vec<i64> = Tournament::list(&pool, None, false, 20, 0).iter().map(|t| t.id).collect();
    assert_eq!(visible, vec![public]);
    let all = Tournament::list(&pool, None, true, 20, 0);
    assert!(all.iter().any(|t| t.id == draft));
    assert_eq!(Tournament::list(&pool, Some("draft"), true, 20, 0).len(), 1);
}

// ═══════════════════════════════════════════════════════════
// Invitations
// ═══════════════════════════════════════════════════════════

#[test]
fn invitation_once_per_school_and_single_answer() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Invitational", admin);
    let school = make_school(&pool, "Invited School", admin);

    let inv = Invitation::create(&pool, t, school).unwrap();
    assert!(Invitation::create(&pool, t, school).unwrap_err().contains("already been invited"));

    let listed = Invitation::for_school(&pool, school);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].school_name, "Invited School");
    assert_eq!(listed[0].status, "pending");

    Invitation::respond(&pool, inv, true).unwrap();
    assert_eq!(Invitation::find_by_id(&pool, inv).unwrap().status, "accepted");
    assert!(Invitation::respond(&pool, inv, false).is_err());
    assert_eq!(Invitation::for_tournament(&pool, t).len(), 1);
}

// ═══════════════════════════════════════════════════════════
// Teams, rounds, debates, standings
// ═══════════════════════════════════════════════════════════

#[test]
fn team_names_unique_per_tournament() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t1 = make_tournament(&pool, "Cup A", admin);
    let t2 = make_tournament(&pool, "Cup B", admin);
    make_team(&pool, t1, "Eagles");
    let err = Team::create(
        &pool,
        t1,
        &TeamForm {
            name: "Eagles".into(),
            school_id: None,
            members: vec![],
        },
    )
    .unwrap_err();
    assert!(err.contains("already registered"));
    make_team(&pool, t2, "Eagles");
}

#[test]
fn team_members_must_be_distinct() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let err = Team::create(
        &pool,
        t,
        &TeamForm {
            name: "Dupes".into(),
            school_id: None,
            members: vec![4, 4],
        },
    )
    .unwrap_err();
    assert!(err.contains("twice"));
}

#[test]
fn team_confirm_and_payment() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let team = make_team(&pool, t, "Lions");
    Team::update_members(&pool, team, &[7, 3]).unwrap();
    Team::set_confirmed(&pool, team, true).unwrap();
    Team::set_payment_status(&pool, team, PaymentStatus::Paid).unwrap();

    let loaded = Team::find_by_id(&pool, team).unwrap();
    assert_eq!(loaded.members, vec![7, 3]);
    assert!(loaded.confirmed);
    assert_eq!(loaded.payment_status, PaymentStatus::Paid);
    assert!(Team::set_confirmed(&pool, 9999, true).is_err());
}

#[test]
fn rounds_number_sequentially() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    Round::create(&pool, t, RoundType::Preliminary, "THW ban homework").unwrap();
    Round::create(&pool, t, RoundType::Final, "THBT cities should be car-free").unwrap();
    let rounds = Round::for_tournament(&pool, t);
    assert_eq!(rounds.iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(rounds[1].round_type, RoundType::Final);
}

#[test]
fn debate_pairing_rules() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let other = make_tournament(&pool, "Other", admin);
    let a = make_team(&pool, t, "A");
    let b = make_team(&pool, t, "B");
    let outsider = make_team(&pool, other, "X");
    let round = Round::create(&pool, t, RoundType::Preliminary, "Motion").unwrap();

    let pair = |p, o| DebateForm {
        proposition_team_id: p,
        opposition_team_id: o,
        judges: vec![admin],
        room: "B12".into(),
    };
    assert!(Debate::create(&pool, round, &pair(a, a)).is_err());
    assert!(Debate::create(&pool, round, &pair(a, outsider)).is_err());

    let d = Debate::create(&pool, round, &pair(a, b)).unwrap();
    let debate = Debate::find_by_id(&pool, d).unwrap();
    assert!(debate.is_judge(admin));
    assert!(Debate::record_winner(&pool, d, outsider).is_err());
    Debate::record_winner(&pool, d, b).unwrap();
    assert_eq!(Debate::find_by_id(&pool, d).unwrap().winner_team_id, Some(b));
}

#[test]
fn debate_live_session_is_stored() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let a = make_team(&pool, t, "A");
    let b = make_team(&pool, t, "B");
    let round = Round::create(&pool, t, RoundType::Preliminary, "Motion").unwrap();
    let d = Debate::create(
        &pool,
        round,
        &DebateForm {
            proposition_team_id: a,
            opposition_team_id: b,
            judges: vec![],
            room: String::new(),
        },
    )
    .unwrap();
    let live = LiveSession {
        current_speaker: Some("first_speaker".into()),
        time_remaining: Some(312),
        argument_flow: vec![serde_json::json!({"speaker": "first_speaker", "point": "framing"})],
        fact_checks: vec![],
    };
    Debate::update_live(&pool, d, &live).unwrap();
    assert_eq!(Debate::find_by_id(&pool, d).unwrap().live, live);
    assert!(Debate::update_live(&pool, 9999, &live).is_err());
}

#[test]
fn standings_rank_by_wins() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let a = make_team(&pool, t, "Alpha");
    let b = make_team(&pool, t, "Bravo");
    let c = make_team(&pool, t, "Charlie");
    let round = Round::create(&pool, t, RoundType::Preliminary, "Motion").unwrap();

    let play = |p, o, winner| {
        let d = Debate::create(
            &pool,
            round,
            &DebateForm {
                proposition_team_id: p,
                opposition_team_id: o,
                judges: vec![],
                room: String::new(),
            },
        )
        .unwrap();
        Debate::record_winner(&pool, d, winner).unwrap();
    };
    play(a, b, b);
    play(b, c, b);
    play(a, c, a);

    let table = Team::standings(&pool, t);
    let order: Vec<(i64, i64)> = table.iter().map(|s| (s.team_id, s.wins)).collect();
    assert_eq!(order, vec![(b, 2), (a, 1), (c, 0)]);
    assert_eq!(table[0].rank, 1);
    assert_eq!(table[2].debates, 2);
}

// ═══════════════════════════════════════════════════════════
// Waiver codes
// ═══════════════════════════════════════════════════════════

#[test]
fn waiver_codes_are_normalized() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let w = WaiverCode::create(&pool, t, Some("  free-entry "), 2, None).unwrap();
    assert_eq!(w.code, "FREE-ENTRY");
    assert!(WaiverCode::find_by_code(&pool, "free-entry").is_some());
    assert!(WaiverCode::create(&pool, t, Some("FREE-ENTRY"), 1, None).is_err());
    assert!(WaiverCode::create(&pool, t, None, 0, None).is_err());

    let generated = WaiverCode::generate_code();
    assert_eq!(generated.len(), 8);
    assert!(!generated.contains('O') && !generated.contains('0'));
}

#[test]
fn waiver_redeem_marks_team_waived() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let team = make_team(&pool, t, "Lions");
    WaiverCode::create(&pool, t, Some("SCHOLAR"), 3, None).unwrap();

    let w = WaiverCode::redeem(&pool, "scholar", team).unwrap();
    assert_eq!(w.usage_count, 1);
    assert_eq!(Team::find_by_id(&pool, team).unwrap().payment_status, PaymentStatus::Waived);
    assert!(WaiverCode::redeem(&pool, "SCHOLAR", team).unwrap_err().contains("already waived"));
}

#[test]
fn waiver_usage_limit_is_enforced() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let first = make_team(&pool, t, "First");
    let second = make_team(&pool, t, "Second");
    WaiverCode::create(&pool, t, Some("ONCE"), 1, None).unwrap();

    WaiverCode::redeem(&pool, "ONCE", first).unwrap();
    let err = WaiverCode::redeem(&pool, "ONCE", second).unwrap_err();
    assert!(err.contains("usage limit"));
    assert_eq!(WaiverCode::find_by_code(&pool, "ONCE").unwrap().usage_count, 1);
    assert_eq!(Team::find_by_id(&pool, second).unwrap().payment_status, PaymentStatus::Pending);
}

#[test]
fn waiver_expiry_and_wrong_tournament() {
    let pool = test_pool();
    let admin = make_admin(&pool);
    let t = make_tournament(&pool, "Cup", admin);
    let other = make_tournament(&pool, "Other", admin);
    let team = make_team(&pool, t, "Lions");
    let outsider = make_team(&pool, other, "Tigers");
    let expires = Utc::now().naive_utc() + ChronoDuration::days(1);
    WaiverCode::create(&pool, t, Some("EARLY"), 5, Some(expires)).unwrap();

    let err = WaiverCode::redeem(&pool, "EARLY", outsider).unwrap_err();
    assert!(err.contains("not valid for this tournament"));

    let after = expires + ChronoDuration::minutes(1);
    let err = WaiverCode::redeem_at(&pool, "EARLY", team, after).unwrap_err();
    assert!(err.contains("expired"));
    assert_eq!(WaiverCode::find_by_code(&pool, "EARLY").unwrap().usage_count, 0);

    assert!(WaiverCode::redeem(&pool, "NOPE", team).unwrap_err().contains("Invalid"));
    assert_eq!(WaiverCode::for_tournament(&pool, t).len(), 1);
}

// ═══════════════════════════════════════════════════════════
// Notifications
// ═══════════════════════════════════════════════════════════

fn notice(user_id: i64, title: &str) -> NewNotification<'_> {
    NewNotification {
        user_id,
        kind: NotificationKind::Tournament,
        title,
        body: "Round 1 draw is out",
        link: Some("/tournaments/cup"),
        expires_at: None,
    }
}

#[test]
fn notifications_list_excludes_expired() {
    let pool = test_pool();
    let user = make_admin(&pool);
    Notification::create(&pool, &notice(user, "Live")).unwrap();
    let mut old = notice(user, "Expired");
    old.expires_at = Some(Utc::now().naive_utc() - ChronoDuration::minutes(5));
    Notification::create(&pool, &old).unwrap();

    let list = Notification::for_user(&pool, user, false, 20, 0);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].title, "Live");
    assert_eq!(Notification::unread_count(&pool, user), 1);
    assert_eq!(Notification::cleanup_expired(&pool).unwrap(), 1);
}

#[test]
fn notifications_mark_read_is_owner_scoped() {
    let pool = test_pool();
    let owner = make_admin(&pool);
    let other = make_user(&pool, "s@x.test", student());
    let id = Notification::create(&pool, &notice(owner, "Mine")).unwrap();
    Notification::create(&pool, &notice(owner, "Also mine")).unwrap();

    assert!(Notification::mark_read(&pool, id, other).is_err());
    Notification::mark_read(&pool, id, owner).unwrap();
    assert!(Notification::find_by_id(&pool, id).unwrap().is_read);
    assert_eq!(Notification::for_user(&pool, owner, true, 20, 0).len(), 1);
    assert_eq!(Notification::mark_all_read(&pool, owner).unwrap(), 1);
    assert_eq!(Notification::unread_count(&pool, owner), 0);
}

/// Records every email handed to it.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[rocket::async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), String> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Push sender that answers per endpoint from a fixed table.
struct ScriptedPush {
    outcomes: HashMap<String, PushOutcome>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedPush {
    fn new(outcomes: &[(&str, PushOutcome)]) -> Self {
        ScriptedPush {
            outcomes: outcomes.iter().map(|(e, o)| (e.to_string(), o.clone())).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[rocket::async_trait]
impl PushSender for ScriptedPush {
    async fn send(&self, subscription: &PushSubscription, _payload: &PushPayload) -> PushOutcome {
        self.calls.lock().unwrap().push(subscription.endpoint.clone());
        self.outcomes
            .get(&subscription.endpoint)
            .cloned()
            .unwrap_or(PushOutcome::Delivered)
    }
}

fn keys() -> SubscriptionKeys {
    SubscriptionKeys {
        p256dh: "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA_0QTpQtUbVlUls0VJXg7A8u-Ts1XbjhazAkj7I99e8QcYP7DkM".into(),
        auth: "tBHItJI5svbpez7KI4CCXg".into(),
    }
}

#[test]
fn push_subscription_requires_https_and_upserts() {
    let pool = test_pool();
    let user = make_admin(&pool);
    assert!(PushSubscription::upsert(&pool, user, "http://push.test/x", &keys()).is_err());
    PushSubscription::upsert(&pool, user, "https://push.test/a", &keys()).unwrap();
    PushSubscription::upsert(&pool, user, "https://push.test/a", &keys()).unwrap();
    assert_eq!(PushSubscription::active_for_user(&pool, user).len(), 1);

    PushSubscription::deactivate(&pool, "https://push.test/a").unwrap();
    assert!(PushSubscription::active_for_user(&pool, user).is_empty());
    PushSubscription::upsert(&pool, user, "https://push.test/a", &keys()).unwrap();
    assert!(PushSubscription::find_by_endpoint(&pool, "https://push.test/a").unwrap().active);
}

#[tokio::test]
async fn push_gone_subscription_is_deactivated() {
    let pool = test_pool();
    let user = make_admin(&pool);
    PushSubscription::upsert(&pool, user, "https://push.test/live", &keys()).unwrap();
    PushSubscription::upsert(&pool, user, "https://push.test/gone", &keys()).unwrap();
    PushSubscription::upsert(&pool, user, "https://push.test/flaky", &keys()).unwrap();
    let sender = ScriptedPush::new(&[
        ("https://push.test/gone", PushOutcome::Gone),
        ("https://push.test/flaky", PushOutcome::Failed("503".into())),
    ]);

    let summary = push::send_to_user(&pool, &sender, user, &PushPayload::new("Hi", "there")).await;
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.gone, 1);
    assert_eq!(summary.failed, 1);

    let active: Vec<String> = PushSubscription::active_for_user(&pool, user)
        .into_iter()
        .map(|s| s.endpoint)
        .collect();
    assert_eq!(active, vec!["https://push.test/live".to_string(), "https://push.test/flaky".to_string()]);

    // A second send no longer reaches the gone endpoint.
    push::send_to_user(&pool, &sender, user, &PushPayload::new("Hi", "again")).await;
    let calls = sender.calls.lock().unwrap();
    assert_eq!(calls.iter().filter(|e| e.ends_with("/gone")).count(), 1);
}

fn notifier(pool: &DbPool, transport: Arc<RecordingTransport>, push: Arc<ScriptedPush>) -> Notifier {
    let mailer = Arc::new(EmailDispatcher::new(
        transport,
        RetrySchedule::new(1, vec![]),
        BatchPolicy {
            size: 10,
            pause: Duration::ZERO,
        },
    ));
    Notifier::new(pool.clone(), mailer, push)
}

#[tokio::test]
async fn notifier_fans_out_to_email_and_push() {
    let pool = test_pool();
    let user = make_admin(&pool);
    PushSubscription::upsert(&pool, user, "https://push.test/a", &keys()).unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let push = Arc::new(ScriptedPush::new(&[]));
    let notifier = notifier(&pool, Arc::clone(&transport), Arc::clone(&push));

    let id = notifier.notify_user(&notice(user, "Draw released")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = Notification::find_by_id(&pool, id).unwrap();
    assert!(stored.email_sent);
    assert!(stored.push_sent);
    assert!(!stored.sms_sent);

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "admin@irankhub.test");
    assert!(sent[0].subject.starts_with("Draw released"));
    assert_eq!(push.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn notifier_respects_channel_settings() {
    let pool = test_pool();
    let user = make_admin(&pool);
    Setting::set(&pool, "notifications_email_enabled", "false").unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let push = Arc::new(ScriptedPush::new(&[]));
    let notifier = notifier(&pool, Arc::clone(&transport), Arc::clone(&push));

    let id = notifier.notify_user(&notice(user, "Quiet")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = Notification::find_by_id(&pool, id).unwrap();
    assert!(!stored.email_sent);
    assert!(!stored.push_sent, "no subscription, no push");
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn notifier_bulk_skips_unknown_users() {
    let pool = test_pool();
    let a = make_admin(&pool);
    let b = make_user(&pool, "s@x.test", student());
    let transport = Arc::new(RecordingTransport::default());
    let notifier = notifier(&pool, Arc::clone(&transport), Arc::new(ScriptedPush::new(&[])));

    let created = notifier.notify_users(&[a, 9999, b], &notice(0, "Schedule change"));
    assert_eq!(created, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(Notification::unread_count(&pool, a), 1);
    assert_eq!(Notification::unread_count(&pool, b), 1);
    let mut to: Vec<String> = transport.sent.lock().unwrap().iter().map(|e| e.to.clone()).collect();
    to.sort();
    assert_eq!(to, vec!["admin@irankhub.test".to_string(), "s@x.test".to_string()]);
}

// ═══════════════════════════════════════════════════════════
// Offline cache
// ═══════════════════════════════════════════════════════════

const HOUR_MS: i64 = 3_600_000;

#[test]
fn cache_freshness_window() {
    let pool = test_pool();
    let cache = OfflineCache::new(pool, 24);
    let written = 1_800_000_000_000;
    cache.put_at("overview:k", &serde_json::json!({"teams": 12}), written).unwrap();

    let at_23h: Option<serde_json::Value> = cache.get_fresh_at("overview:k", written + 23 * HOUR_MS);
    assert_eq!(at_23h, Some(serde_json::json!({"teams": 12})));

    let at_25h: Option<serde_json::Value> = cache.get_fresh_at("overview:k", written + 25 * HOUR_MS);
    assert!(at_25h.is_none());
    assert!(cache.entry("overview:k").is_some(), "stale entries stay until cleanup");

    assert_eq!(cache.clean_expired_at(written + 25 * HOUR_MS).unwrap(), 1);
    assert!(cache.entry("overview:k").is_none());
}

#[test]
fn cache_read_falls_back_when_fetch_fails() {
    let pool = test_pool();
    let cache = OfflineCache::new(pool, 24);

    let fetched = cache.read(true, "standings:cup", || Ok::<_, String>(vec![3, 1, 2]));
    assert_eq!(fetched, Some(vec![3, 1, 2]));

    let fallback: Option<Vec<i32>> = cache.read(true, "standings:cup", || Err("server unreachable".to_string()));
    assert_eq!(fallback, Some(vec![3, 1, 2]));

    let offline: Option<Vec<i32>> = cache.read(false, "standings:cup", || panic!("must not fetch while offline"));
    assert_eq!(offline, Some(vec![3, 1, 2]));

    let missing: Option<Vec<i32>> = cache.read(false, "standings:other", || Ok(vec![]));
    assert!(missing.is_none());
}

#[test]
fn cache_merge_keeps_latest_writer() {
    let pool = test_pool();
    let cache = OfflineCache::new(pool, 24);
    cache.put_at("k", &"local", 2_000).unwrap();

    let older = CacheEntry {
        key: "k".into(),
        value_json: "\"remote-old\"".into(),
        written_at_ms: 1_000,
    };
    assert!(!cache.merge(&older).unwrap());
    assert_eq!(cache.entry("k").unwrap().value_json, "\"local\"");

    let newer = CacheEntry {
        written_at_ms: 3_000,
        value_json: "\"remote-new\"".into(),
        ..older
    };
    assert!(cache.merge(&newer).unwrap());
    assert_eq!(cache.entry("k").unwrap().written_at_ms, 3_000);
}

#[test]
fn cache_inventory_lists_fresh_entries() {
    let pool = test_pool();
    let cache = OfflineCache::new(pool, 24);
    let now = 1_800_000_000_000;
    cache.put_at("fresh", &1, now - HOUR_MS).unwrap();
    cache.put_at("stale", &2, now - 30 * HOUR_MS).unwrap();
    let inv = cache.fresh_inventory(now);
    assert_eq!(inv.len(), 1);
    assert_eq!(inv.get("fresh"), Some(&(now - HOUR_MS)));
}

// ═══════════════════════════════════════════════════════════
// Peer sync
// ═══════════════════════════════════════════════════════════

/// Pump messages between two sessions until neither has anything to say.
fn run_sync(a: &mut SyncSession, b: &mut SyncSession) {
    let mut queue: VecDeque<(bool, SyncMessage)> = VecDeque::new();
    for msg in a.start().unwrap() {
        queue.push_back((false, msg));
    }
    for msg in b.start().unwrap() {
        queue.push_back((true, msg));
    }
    // `true` means the message is addressed to `a`.
    while let Some((to_a, msg)) = queue.pop_front() {
        let target = if to_a { &mut *a } else { &mut *b };
        for reply in target.handle(msg).unwrap() {
            queue.push_back((!to_a, reply));
        }
    }
}

#[test]
fn sync_transfers_only_missing_or_newer_entries() {
    let now = 1_800_000_000_000;
    let cache_a = OfflineCache::new(test_pool(), 24);
    let cache_b = OfflineCache::new(test_pool(), 24);

    cache_a.put_at("shared-same", &"same", now - 10).unwrap();
    cache_b.put_at("shared-same", &"same", now - 10).unwrap();
    cache_a.put_at("a-newer", &"from-a", now - 5).unwrap();
    cache_b.put_at("a-newer", &"old-b", now - 50).unwrap();
    cache_a.put_at("only-a", &1, now - 20).unwrap();
    cache_b.put_at("only-b", &2, now - 20).unwrap();
    cache_b.put_at("b-stale", &3, now - 48 * HOUR_MS).unwrap();

    let mut a = SyncSession::new(cache_a.clone(), "hub-a", now);
    let mut b = SyncSession::new(cache_b.clone(), "hub-b", now);
    run_sync(&mut a, &mut b);

    assert_eq!(a.state(), &SyncState::Complete);
    assert_eq!(b.state(), &SyncState::Complete);
    assert_eq!(a.peer_id(), Some("hub-b"));

    // a received only-b; b received only-a and a-newer.
    assert_eq!(a.stats(), (1, 1, 2));
    assert_eq!(b.stats(), (2, 2, 1));

    assert_eq!(cache_b.entry("a-newer").unwrap().value_json, "\"from-a\"");
    assert!(cache_a.entry("only-b").is_some());
    assert!(cache_a.entry("b-stale").is_none(), "stale entries are not offered");
    assert_eq!(cache_b.entry("only-a").unwrap().written_at_ms, now - 20);
}

#[test]
fn sync_rejects_out_of_order_messages() {
    let cache = OfflineCache::new(test_pool(), 24);
    let mut s = SyncSession::new(cache.clone(), "hub-a", 0);
    s.start().unwrap();
    let err = s
        .handle(SyncMessage::Request {
            keys: vec!["x".into()],
        })
        .unwrap_err();
    assert!(err.contains("unexpected request"));
    assert!(matches!(s.state(), SyncState::Failed(_)));
    assert!(s.is_finished());

    let mut s = SyncSession::new(cache, "hub-a", 0);
    s.start().unwrap();
    let err = s
        .handle(SyncMessage::Hello {
            device_id: "hub-a".into(),
            version: 1,
        })
        .unwrap_err();
    assert!(err.contains("same device id"));
}

#[test]
fn sync_rejects_unrequested_chunks_and_bad_version() {
    let cache = OfflineCache::new(test_pool(), 24);
    let mut s = SyncSession::new(cache.clone(), "hub-a", 0);
    s.start().unwrap();
    s.handle(SyncMessage::Hello {
        device_id: "hub-b".into(),
        version: 1,
    })
    .unwrap();
    s.handle(SyncMessage::Inventory {
        entries: Default::default(),
    })
    .unwrap();
    let err = s
        .handle(SyncMessage::Chunk {
            entry: CacheEntry {
                key: "sneaky".into(),
                value_json: "1".into(),
                written_at_ms: 5,
            },
        })
        .unwrap_err();
    assert!(err.contains("unrequested"));
    assert!(cache.entry("sneaky").is_none());

    let mut s = SyncSession::new(cache, "hub-a", 0);
    s.start().unwrap();
    let err = s
        .handle(SyncMessage::Hello {
            device_id: "hub-b".into(),
            version: 99,
        })
        .unwrap_err();
    assert!(err.contains("version"));
}

#[test]
fn sync_hub_drives_session_over_exchanges() {
    let hub_cache = OfflineCache::new(test_pool(), 24);
    let peer_cache = OfflineCache::new(test_pool(), 24);
    let now = crate::offline::cache::now_ms();
    hub_cache.put_at("from-hub", &"h", now - 1_000).unwrap();
    peer_cache.put_at("from-peer", &"p", now - 1_000).unwrap();

    let hub = SyncHub::new(hub_cache.clone(), "hub");
    let mut peer = SyncSession::new(peer_cache.clone(), "peer", now);

    let mut outgoing = peer.start().unwrap();
    for _ in 0..10 {
        let (_, replies) = hub.exchange("s1", outgoing).unwrap();
        outgoing = Vec::new();
        for msg in replies {
            outgoing.extend(peer.handle(msg).unwrap());
        }
        if peer.is_finished() && outgoing.is_empty() {
            break;
        }
    }

    assert_eq!(peer.state(), &SyncState::Complete);
    assert_eq!(hub.active_sessions(), 0, "finished sessions are dropped");
    assert!(hub_cache.entry("from-peer").is_some());
    assert!(peer_cache.entry("from-hub").is_some());
}

#[test]
fn sync_hub_drops_failed_sessions() {
    let hub = SyncHub::new(OfflineCache::new(test_pool(), 24), "hub");
    let err = hub.exchange("bad", vec![SyncMessage::Done]).unwrap_err();
    assert!(err.contains("unexpected done"));
    assert_eq!(hub.active_sessions(), 0);
}

#[test]
fn sync_rejects_a_second_request() {
    let cache = OfflineCache::new(test_pool(), 24);
    let mut s = SyncSession::new(cache, "hub-a", 0);
    s.start().unwrap();
    s.handle(SyncMessage::Hello {
        device_id: "hub-b".into(),
        version: 1,
    })
    .unwrap();
    s.handle(SyncMessage::Inventory {
        entries: Default::default(),
    })
    .unwrap();
    assert_eq!(s.handle(SyncMessage::Request { keys: vec![] }).unwrap(), vec![SyncMessage::Done]);

    let err = s.handle(SyncMessage::Request { keys: vec![] }).unwrap_err();
    assert!(err.contains("duplicate request"));
    assert!(matches!(s.state(), SyncState::Failed(_)));
}

#[test]
fn sync_hub_expires_abandoned_sessions() {
    let hub = SyncHub::new(OfflineCache::new(test_pool(), 24), "hub");
    let t0 = Instant::now();
    let idle = Duration::from_secs(30 * 60);

    for i in 0..100 {
        hub.exchange_at(&format!("s{}", i), vec![], t0).unwrap();
    }
    hub.exchange_at("recent", vec![], t0 + Duration::from_secs(20 * 60)).unwrap();
    assert_eq!(hub.active_sessions(), 101);

    assert_eq!(hub.expire_idle_at(t0 + Duration::from_secs(10 * 60), idle), 0);
    assert_eq!(hub.expire_idle_at(t0 + Duration::from_secs(35 * 60), idle), 100);
    assert_eq!(hub.active_sessions(), 1);

    // Any exchange counts as activity.
    hub.exchange_at("recent", vec![], t0 + Duration::from_secs(45 * 60)).unwrap();
    assert_eq!(hub.expire_idle_at(t0 + Duration::from_secs(60 * 60), idle), 0);
    assert_eq!(hub.expire_idle_at(t0 + Duration::from_secs(80 * 60), idle), 1);
    assert_eq!(hub.active_sessions(), 0);
}

#[test]
fn vapid_keys_come_from_settings() {
    let pool = test_pool();
    assert!(VapidKeys::from_settings(&pool).is_none());

    Setting::set(&pool, "push_vapid_private_key", "BOmwwSlFfAQ118CJa136oi07JtaroEUG06OlVeDNITQ").unwrap();
    Setting::set(&pool, "admin_email", "ops@irankhub.test").unwrap();
    let keys = VapidKeys::from_settings(&pool).unwrap();
    assert_eq!(keys.subject, "mailto:ops@irankhub.test");

    Setting::set(&pool, "push_vapid_subject", "https://irankhub.test").unwrap();
    assert_eq!(VapidKeys::from_settings(&pool).unwrap().subject, "https://irankhub.test");
    assert_eq!(Setting::redacted(&pool)["push_vapid_private_key"], "********");
}

#[tokio::test]
async fn http_push_without_vapid_keys_fails_before_sending() {
    let pool = test_pool();
    let user = make_user(&pool, "pusher@x.test", student());
    let keys = SubscriptionKeys {
        p256dh: "BFufE90vbtl9kP4ZqE54xl1GZX4u58wYFAlopgv_lJSKVCoxSiX59htlXTU02qDNSfkldzM9GDVr7vpIWE_RcTE".into(),
        auth: "4uKpa5FaBiWqnCf6TiDnmQ".into(),
    };
    PushSubscription::upsert(&pool, user, "https://push.invalid/send/1", &keys).unwrap();
    let sub = PushSubscription::find_by_endpoint(&pool, "https://push.invalid/send/1").unwrap();

    let sender = HttpPushSender::new(pool.clone(), 60).unwrap();
    let outcome = sender.send(&sub, &PushPayload::new("t", "b")).await;
    assert!(matches!(outcome, PushOutcome::Failed(ref m) if m.contains("VAPID")));
}

#[tokio::test]
async fn link_requests_answer_alike_whoever_asks() {
    use crate::rate_limit::{Bucket, RateLimiter};
    use crate::routes::auth::request_link;
    use crate::security::auth::ClientIp;

    let pool = test_pool();
    make_admin(&pool);
    make_user(&pool, "pending@x.test", student());
    let banned = make_user(&pool, "banned@x.test", student());
    User::ban(&pool, banned).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let mailer = Arc::new(EmailDispatcher::new(
        transport.clone(),
        RetrySchedule::new(1, vec![]),
        BatchPolicy {
            size: 10,
            pause: Duration::ZERO,
        },
    ));
    let limiter = RateLimiter::new();
    let ip = ClientIp("203.0.113.9".into());

    let answers: Vec<serde_json::Value> = ["admin@irankhub.test", "pending@x.test", "banned@x.test", "nobody@x.test"]
        .iter()
        .map(|email| request_link(&pool, &mailer, &limiter, &ip, email, TokenPurpose::Login, Bucket::MagicLink).into_inner())
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    for answer in &answers {
        assert_eq!(answer, &serde_json::json!({"success": true, "status": "queued"}));
    }
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "only the active account gets a link");
    assert_eq!(sent[0].to, "admin@irankhub.test");
}

#[test]
fn first_admin_setup_runs_once() {
    use crate::routes::auth::{create_first_admin, SetupForm};

    let pool = test_pool();
    let weak = SetupForm {
        email: "Chair@IRankHub.test".into(),
        name: "Chair".into(),
        password: "short".into(),
    };
    assert!(create_first_admin(&pool, &weak).is_err());

    let form = SetupForm {
        password: "debate2024".into(),
        ..weak
    };
    let id = create_first_admin(&pool, &form).unwrap();
    let admin = User::get_by_email(&pool, "chair@irankhub.test").unwrap();
    assert_eq!(admin.id, id);
    assert!(admin.verified);
    assert!(admin.is_active());
    assert_eq!(Setting::get_or(&pool, "admin_email", ""), "chair@irankhub.test");

    let again = SetupForm {
        email: "second@irankhub.test".into(),
        name: "Second".into(),
        password: "debate2024".into(),
    };
    assert_eq!(create_first_admin(&pool, &again).unwrap_err(), "Setup has already been completed");
}
