use chrono::NaiveDateTime;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_json, result_json};
use crate::db::DbPool;
use crate::models::notification::{NewNotification, NotificationKind};
use crate::models::team::{PaymentStatus, Team, TeamForm};
use crate::models::tournament::{Tournament, TournamentStatus};
use crate::models::user::User;
use crate::models::waiver::WaiverCode;
use crate::notify::Notifier;
use crate::security::auth::{AdminUser, SchoolManager};

fn check_members(pool: &DbPool, members: &[i64]) -> Result<(), String> {
    match members.iter().find(|id| User::get_by_id(pool, **id).is_none()) {
        Some(missing) => Err(format!("User {} does not exist", missing)),
        None => Ok(()),
    }
}

/// Team lookup plus the manager's right to act for its school.
fn managed_team(pool: &DbPool, manager: &SchoolManager, id: i64) -> Result<Team, String> {
    let team = Team::find_by_id(pool, id).ok_or("Team not found")?;
    let allowed = manager.user.is_admin() || team.school_id.map(|s| manager.can_manage(s)).unwrap_or(false);
    if !allowed {
        return Err("You do not manage this team".into());
    }
    Ok(team)
}

#[get("/tournaments/<id>/teams")]
pub fn list(pool: &State<DbPool>, id: i64) -> Json<Value> {
    Json(json!({"success": true, "teams": Team::for_tournament(pool, id)}))
}

#[post("/tournaments/<id>/teams", format = "json", data = "<form>")]
pub fn register(
    pool: &State<DbPool>,
    notifier: &State<Notifier>,
    manager: SchoolManager,
    id: i64,
    form: Json<TeamForm>,
) -> Json<Value> {
    let tournament = match Tournament::find_by_id(pool, id) {
        Some(t) => t,
        None => return Json(error_json("Tournament not found")),
    };
    if tournament.status != TournamentStatus::Published {
        return Json(error_json("Registration is closed for this tournament"));
    }

    let mut form = form.into_inner();
    if !manager.user.is_admin() {
        // School admins always register for their own school.
        form.school_id = manager.user.profile.school_id();
        if form.school_id.is_none() {
            return Json(error_json("Your account is not linked to a school"));
        }
    }
    if let Err(e) = check_members(pool, &form.members) {
        return Json(error_json(e));
    }

    let team_id = match Team::create(pool, tournament.id, &form) {
        Ok(id) => id,
        Err(e) => return Json(error_json(e)),
    };
    log::info!("[team] Registered {} for tournament {}", team_id, tournament.id);

    let title = format!("Registered for {}", tournament.name);
    let body = format!("You are on team {}.", form.name.trim());
    let link = format!("/tournaments/{}", tournament.slug);
    notifier.notify_users(
        &form.members,
        &NewNotification {
            user_id: 0,
            kind: NotificationKind::Team,
            title: &title,
            body: &body,
            link: Some(&link),
            expires_at: None,
        },
    );

    Json(json!({"success": true, "id": team_id}))
}

#[derive(Debug, Deserialize)]
pub struct MembersForm {
    pub members: Vec<i64>,
}

#[put("/teams/<id>/members", format = "json", data = "<form>")]
pub fn update_members(pool: &State<DbPool>, manager: SchoolManager, id: i64, form: Json<MembersForm>) -> Json<Value> {
    let team = match managed_team(pool, &manager, id) {
        Ok(t) => t,
        Err(e) => return Json(error_json(e)),
    };
    if team.confirmed {
        return Json(error_json("Confirmed teams cannot change members"));
    }
    let mut seen = std::collections::HashSet::new();
    if !form.members.iter().all(|m| seen.insert(*m)) {
        return Json(error_json("A member cannot appear twice in a team"));
    }
    if let Err(e) = check_members(pool, &form.members) {
        return Json(error_json(e));
    }
    Json(result_json(Team::update_members(pool, id, &form.members), |_| {
        json!({"success": true})
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmForm {
    pub confirmed: bool,
}

#[post("/teams/<id>/confirm", format = "json", data = "<form>")]
pub fn confirm(pool: &State<DbPool>, _admin: AdminUser, id: i64, form: Json<ConfirmForm>) -> Json<Value> {
    Json(result_json(Team::set_confirmed(pool, id, form.confirmed), |_| {
        json!({"success": true})
    }))
}

#[derive(Debug, Deserialize)]
pub struct PaymentForm {
    pub status: PaymentStatus,
}

#[post("/teams/<id>/payment", format = "json", data = "<form>")]
pub fn set_payment(pool: &State<DbPool>, _admin: AdminUser, id: i64, form: Json<PaymentForm>) -> Json<Value> {
    if Team::find_by_id(pool, id).is_none() {
        return Json(error_json("Team not found"));
    }
    Json(result_json(Team::set_payment_status(pool, id, form.status), |_| {
        json!({"success": true})
    }))
}

// ── Fee waivers ──

#[derive(Debug, Deserialize)]
pub struct RedeemForm {
    pub code: String,
}

#[post("/teams/<id>/waiver", format = "json", data = "<form>")]
pub fn redeem_waiver(pool: &State<DbPool>, manager: SchoolManager, id: i64, form: Json<RedeemForm>) -> Json<Value> {
    if let Err(e) = managed_team(pool, &manager, id) {
        return Json(error_json(e));
    }
    Json(result_json(WaiverCode::redeem(pool, &form.code, id), |waiver| {
        log::info!("[waiver] {} redeemed by team {} ({}/{})", waiver.code, id, waiver.usage_count, waiver.usage_limit);
        json!({"success": true, "payment_status": PaymentStatus::Waived})
    }))
}

#[derive(Debug, Deserialize)]
pub struct WaiverForm {
    #[serde(default)]
    pub code: Option<String>,
    pub usage_limit: i64,
    #[serde(default)]
    pub expires_at: Option<NaiveDateTime>,
}

#[post("/tournaments/<id>/waivers", format = "json", data = "<form>")]
pub fn waiver_create(pool: &State<DbPool>, _admin: AdminUser, id: i64, form: Json<WaiverForm>) -> Json<Value> {
    if Tournament::find_by_id(pool, id).is_none() {
        return Json(error_json("Tournament not found"));
    }
    Json(result_json(
        WaiverCode::create(pool, id, form.code.as_deref(), form.usage_limit, form.expires_at),
        |waiver| json!({"success": true, "waiver": waiver}),
    ))
}

#[get("/tournaments/<id>/waivers")]
pub fn waivers(pool: &State<DbPool>, _admin: AdminUser, id: i64) -> Json<Value> {
    Json(json!({"success": true, "waivers": WaiverCode::for_tournament(pool, id)}))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        list,
        register,
        update_members,
        confirm,
        set_payment,
        redeem_waiver,
        waiver_create,
        waivers
    ]
}
