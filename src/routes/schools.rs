use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use super::{error_json, result_json};
use crate::db::DbPool;
use crate::models::school::{School, SchoolForm};
use crate::models::user::{RoleProfile, User};
use crate::security::auth::{AdminUser, AuthenticatedUser, SchoolManager};

#[get("/schools?<country>&<verified>")]
pub fn list(pool: &State<DbPool>, country: Option<String>, verified: Option<bool>) -> Json<Value> {
    let schools = School::list(pool, country.as_deref(), verified.unwrap_or(false));
    Json(json!({"success": true, "schools": schools}))
}

#[get("/schools/<id>")]
pub fn detail(pool: &State<DbPool>, id: i64) -> Option<Json<Value>> {
    let school = School::find_by_id(pool, id)?;
    Some(Json(json!({"success": true, "school": school})))
}

/// A school admin without a school is attached to the one they create.
#[post("/schools", format = "json", data = "<form>")]
pub fn create(pool: &State<DbPool>, manager: SchoolManager, form: Json<SchoolForm>) -> Json<Value> {
    let school_id = match School::create(pool, &form, manager.user.id) {
        Ok(id) => id,
        Err(e) => return Json(error_json(e)),
    };

    if let RoleProfile::SchoolAdmin { position, school_id: None } = &manager.user.profile {
        let profile = RoleProfile::SchoolAdmin {
            position: position.clone(),
            school_id: Some(school_id),
        };
        if let Err(e) = User::update_profile(pool, manager.user.id, &manager.user.name, &profile) {
            log::warn!("[school] Failed to link user {} to school {}: {}", manager.user.id, school_id, e);
        }
    }

    Json(json!({"success": true, "id": school_id}))
}

#[put("/schools/<id>", format = "json", data = "<form>")]
pub fn update(pool: &State<DbPool>, current: AuthenticatedUser, id: i64, form: Json<SchoolForm>) -> Json<Value> {
    if form.name.trim().is_empty() {
        return Json(error_json("School name is required"));
    }
    Json(result_json(
        School::update(pool, id, &form, current.user.id, current.user.is_admin()),
        |_| json!({"success": true}),
    ))
}

#[post("/schools/<id>/verify")]
pub fn verify(pool: &State<DbPool>, _admin: AdminUser, id: i64) -> Json<Value> {
    Json(result_json(School::verify(pool, id), |_| json!({"success": true})))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![list, detail, create, update, verify]
}
