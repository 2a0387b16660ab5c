use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_json, page_window, result_json};
use crate::db::DbPool;
use crate::email::dispatch::EmailDispatcher;
use crate::email::templates;
use crate::models::invitation::Invitation;
use crate::models::notification::{NewNotification, NotificationKind};
use crate::models::round::{Debate, DebateForm, LiveSession, Round, RoundType};
use crate::models::school::School;
use crate::models::settings::Setting;
use crate::models::team::Team;
use crate::models::tournament::{League, Tournament, TournamentForm, TournamentStatus};
use crate::models::user::User;
use crate::notify::Notifier;
use crate::offline::{ConnectivityDetector, OfflineCache};
use crate::security::auth::{AdminUser, AuthenticatedUser, SchoolManager};

/// Every user on a team in the tournament.
fn participant_ids(pool: &DbPool, tournament_id: i64) -> Vec<i64> {
    let mut ids: Vec<i64> = Team::for_tournament(pool, tournament_id)
        .into_iter()
        .flat_map(|t| t.members)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn visible(tournament: &Tournament, user: Option<&AuthenticatedUser>) -> bool {
    tournament.status != TournamentStatus::Draft || user.map(|u| u.user.is_admin()).unwrap_or(false)
}

// ── Tournaments ──

#[get("/tournaments?<status>&<page>")]
pub fn list(
    pool: &State<DbPool>,
    current: Option<AuthenticatedUser>,
    status: Option<String>,
    page: Option<i64>,
) -> Json<Value> {
    let (limit, offset) = page_window(page);
    let is_admin = current.map(|c| c.user.is_admin()).unwrap_or(false);
    let tournaments = Tournament::list(pool, status.as_deref(), is_admin, limit, offset);
    Json(json!({"success": true, "tournaments": tournaments, "page": page.unwrap_or(1).max(1)}))
}

#[get("/tournaments/<slug>")]
pub fn detail(pool: &State<DbPool>, current: Option<AuthenticatedUser>, slug: &str) -> Option<Json<Value>> {
    let tournament = Tournament::find_by_slug(pool, slug).filter(|t| visible(t, current.as_ref()))?;
    let rounds = Round::for_tournament(pool, tournament.id);
    let teams = Team::for_tournament(pool, tournament.id).len();
    Some(Json(json!({
        "success": true,
        "tournament": tournament,
        "rounds": rounds,
        "team_count": teams,
    })))
}

/// Rounds, pairings and standings in one read, served from the offline
/// cache when the hub has lost its uplink.
#[get("/tournaments/<slug>/overview")]
pub fn overview(
    pool: &State<DbPool>,
    cache: &State<OfflineCache>,
    detector: &State<Arc<ConnectivityDetector>>,
    current: Option<AuthenticatedUser>,
    slug: &str,
) -> Option<Json<Value>> {
    let key = OfflineCache::derive_key("tournament_overview", &json!({ "slug": slug }));
    let pool: &DbPool = pool;
    let overview: Value = cache.read(detector.is_online(), &key, || {
        let tournament = Tournament::find_by_slug(pool, slug).ok_or("Tournament not found")?;
        let rounds: Vec<Value> = Round::for_tournament(pool, tournament.id)
            .into_iter()
            .map(|r| {
                let debates = Debate::for_round(pool, r.id);
                json!({"round": r, "debates": debates})
            })
            .collect();
        Ok(json!({
            "tournament": tournament,
            "rounds": rounds,
            "teams": Team::for_tournament(pool, tournament.id),
            "standings": Team::standings(pool, tournament.id),
        }))
    })?;

    let status = overview["tournament"]["status"].as_str().and_then(TournamentStatus::parse)?;
    let is_admin = current.map(|c| c.user.is_admin()).unwrap_or(false);
    if status == TournamentStatus::Draft && !is_admin {
        return None;
    }
    Some(Json(json!({"success": true, "overview": overview, "online": detector.is_online()})))
}

#[post("/tournaments", format = "json", data = "<form>")]
pub fn create(pool: &State<DbPool>, admin: AdminUser, form: Json<TournamentForm>) -> Json<Value> {
    let result = Tournament::create(pool, &form, admin.user.id).and_then(|id| {
        Tournament::find_by_id(pool, id).ok_or_else(|| "Tournament vanished after insert".to_string())
    });
    Json(result_json(result, |t| {
        log::info!("[tournament] Created {} ({})", t.slug, t.id);
        json!({"success": true, "tournament": t})
    }))
}

#[put("/tournaments/<id>", format = "json", data = "<form>")]
pub fn update(pool: &State<DbPool>, _admin: AdminUser, id: i64, form: Json<TournamentForm>) -> Json<Value> {
    Json(result_json(Tournament::update(pool, id, &form), |_| json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct StatusForm {
    pub status: String,
}

#[post("/tournaments/<id>/status", format = "json", data = "<form>")]
pub fn change_status(
    pool: &State<DbPool>,
    notifier: &State<Notifier>,
    _admin: AdminUser,
    id: i64,
    form: Json<StatusForm>,
) -> Json<Value> {
    let next = match TournamentStatus::parse(&form.status) {
        Some(s) => s,
        None => return Json(error_json(format!("Unknown status '{}'", form.status))),
    };
    let previous = match Tournament::transition(pool, id, next) {
        Ok(p) => p,
        Err(e) => return Json(error_json(e)),
    };
    log::info!("[tournament] {} moved {} → {}", id, previous.as_str(), next.as_str());

    if let Some(t) = Tournament::find_by_id(pool, id) {
        let title = format!("{} is now {}", t.name, next.as_str().replace('_', " "));
        let link = format!("/tournaments/{}", t.slug);
        notifier.notify_users(
            &participant_ids(pool, id),
            &NewNotification {
                user_id: 0,
                kind: NotificationKind::Tournament,
                title: &title,
                body: "The tournament status has changed.",
                link: Some(&link),
                expires_at: None,
            },
        );
    }

    Json(json!({"success": true, "previous": previous, "status": next}))
}

// ── Leagues ──

#[get("/leagues")]
pub fn leagues(pool: &State<DbPool>) -> Json<Value> {
    Json(json!({"success": true, "leagues": League::list(pool)}))
}

#[derive(Debug, Deserialize)]
pub struct LeagueForm {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[post("/leagues", format = "json", data = "<form>")]
pub fn league_create(pool: &State<DbPool>, _admin: AdminUser, form: Json<LeagueForm>) -> Json<Value> {
    Json(result_json(League::create(pool, &form.name, &form.description), |id| {
        json!({"success": true, "id": id})
    }))
}

// ── Invitations ──

#[derive(Debug, Deserialize)]
pub struct InviteForm {
    pub school_id: i64,
}

#[post("/tournaments/<id>/invitations", format = "json", data = "<form>")]
pub fn invite(
    pool: &State<DbPool>,
    mailer: &State<Arc<EmailDispatcher>>,
    notifier: &State<Notifier>,
    _admin: AdminUser,
    id: i64,
    form: Json<InviteForm>,
) -> Json<Value> {
    let tournament = match Tournament::find_by_id(pool, id) {
        Some(t) => t,
        None => return Json(error_json("Tournament not found")),
    };
    let school = match School::find_by_id(pool, form.school_id) {
        Some(s) => s,
        None => return Json(error_json("School not found")),
    };
    let invitation_id = match Invitation::create(pool, tournament.id, school.id) {
        Ok(id) => id,
        Err(e) => return Json(error_json(e)),
    };

    let title = format!("Invitation to {}", tournament.name);
    let body = format!(
        "{} is invited to {} ({} to {}).",
        school.name, tournament.name, tournament.start_date, tournament.end_date
    );
    let settings = Setting::all(pool);
    mailer.queue(templates::notification_email(
        &settings,
        &school.contact_email,
        &title,
        &body,
        Some("/invitations"),
    ));
    notifier.notify_users(
        &User::school_admin_ids(pool, school.id),
        &NewNotification {
            user_id: 0,
            kind: NotificationKind::Tournament,
            title: &title,
            body: &body,
            link: Some("/invitations"),
            expires_at: None,
        },
    );

    Json(json!({"success": true, "id": invitation_id}))
}

#[get("/tournaments/<id>/invitations")]
pub fn tournament_invitations(pool: &State<DbPool>, _admin: AdminUser, id: i64) -> Json<Value> {
    Json(json!({"success": true, "invitations": Invitation::for_tournament(pool, id)}))
}

#[get("/schools/<school_id>/invitations")]
pub fn school_invitations(pool: &State<DbPool>, manager: SchoolManager, school_id: i64) -> Json<Value> {
    if !manager.can_manage(school_id) {
        return Json(error_json("You do not manage this school"));
    }
    Json(json!({"success": true, "invitations": Invitation::for_school(pool, school_id)}))
}

#[derive(Debug, Deserialize)]
pub struct RespondForm {
    pub accept: bool,
}

#[post("/invitations/<id>/respond", format = "json", data = "<form>")]
pub fn respond(pool: &State<DbPool>, manager: SchoolManager, id: i64, form: Json<RespondForm>) -> Option<Json<Value>> {
    let invitation = Invitation::find_by_id(pool, id)?;
    if !manager.can_manage(invitation.school_id) {
        return Some(Json(error_json("You do not manage this school")));
    }
    Some(Json(result_json(Invitation::respond(pool, id, form.accept), |_| {
        json!({"success": true})
    })))
}

// ── Rounds & debates ──

#[get("/tournaments/<id>/rounds")]
pub fn rounds(pool: &State<DbPool>, id: i64) -> Json<Value> {
    Json(json!({"success": true, "rounds": Round::for_tournament(pool, id)}))
}

#[derive(Debug, Deserialize)]
pub struct RoundForm {
    pub round_type: RoundType,
    #[serde(default)]
    pub motion: String,
}

#[post("/tournaments/<id>/rounds", format = "json", data = "<form>")]
pub fn round_create(pool: &State<DbPool>, _admin: AdminUser, id: i64, form: Json<RoundForm>) -> Json<Value> {
    match Tournament::find_by_id(pool, id) {
        Some(t) if t.status.is_terminal() => return Json(error_json("Tournament is closed")),
        Some(_) => {}
        None => return Json(error_json("Tournament not found")),
    }
    Json(result_json(Round::create(pool, id, form.round_type, &form.motion), |round_id| {
        json!({"success": true, "id": round_id})
    }))
}

#[get("/rounds/<id>/debates")]
pub fn debates(pool: &State<DbPool>, id: i64) -> Json<Value> {
    Json(json!({"success": true, "debates": Debate::for_round(pool, id)}))
}

#[post("/rounds/<id>/debates", format = "json", data = "<form>")]
pub fn debate_create(
    pool: &State<DbPool>,
    notifier: &State<Notifier>,
    _admin: AdminUser,
    id: i64,
    form: Json<DebateForm>,
) -> Json<Value> {
    let debate_id = match Debate::create(pool, id, &form) {
        Ok(id) => id,
        Err(e) => return Json(error_json(e)),
    };

    if let Some(round) = Round::find_by_id(pool, id) {
        let title = format!("Round {} pairing", round.number);
        let body = if form.room.is_empty() {
            "You have been assigned to judge a debate.".to_string()
        } else {
            format!("You have been assigned to judge a debate in {}.", form.room)
        };
        let link = format!("/debates/{}", debate_id);
        notifier.notify_users(
            &form.judges,
            &NewNotification {
                user_id: 0,
                kind: NotificationKind::Debate,
                title: &title,
                body: &body,
                link: Some(&link),
                expires_at: None,
            },
        );
    }

    Json(json!({"success": true, "id": debate_id}))
}

#[derive(Debug, Deserialize)]
pub struct WinnerForm {
    pub team_id: i64,
}

#[post("/debates/<id>/winner", format = "json", data = "<form>")]
pub fn record_winner(
    pool: &State<DbPool>,
    current: AuthenticatedUser,
    id: i64,
    form: Json<WinnerForm>,
) -> Option<Json<Value>> {
    let debate = Debate::find_by_id(pool, id)?;
    if !current.user.is_admin() && !debate.is_judge(current.user.id) {
        return Some(Json(error_json("Only the judging panel can record a result")));
    }
    Some(Json(result_json(Debate::record_winner(pool, id, form.team_id), |_| {
        json!({"success": true})
    })))
}

#[put("/debates/<id>/live", format = "json", data = "<form>")]
pub fn update_live(
    pool: &State<DbPool>,
    current: AuthenticatedUser,
    id: i64,
    form: Json<LiveSession>,
) -> Option<Json<Value>> {
    let debate = Debate::find_by_id(pool, id)?;
    if !current.user.is_admin() && !debate.is_judge(current.user.id) {
        return Some(Json(error_json("Only the judging panel can update a live debate")));
    }
    Some(Json(result_json(Debate::update_live(pool, id, &form), |_| json!({"success": true}))))
}

#[get("/tournaments/<id>/standings")]
pub fn standings(pool: &State<DbPool>, id: i64) -> Json<Value> {
    Json(json!({"success": true, "standings": Team::standings(pool, id)}))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        list,
        detail,
        overview,
        create,
        update,
        change_status,
        leagues,
        league_create,
        invite,
        tournament_invitations,
        school_invitations,
        respond,
        rounds,
        round_create,
        debates,
        debate_create,
        record_winner,
        update_live,
        standings
    ]
}
