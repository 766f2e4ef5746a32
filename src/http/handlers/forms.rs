use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;

use crate::domain::{Form, FormId, Submission};
use crate::error::AppResult;
use crate::forms::{FormInput, Usage};
use crate::http::extract::{AppJson, AppPath};
use crate::http::server::AppState;
use crate::security::UserContext;

#[derive(Debug, Deserialize)]
pub struct Publish {
    pub published: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Json<Vec<Form>> {
    Json(state.forms.list_forms(&ctx.user_id))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    AppJson(body): AppJson<FormInput>,
) -> AppResult<(StatusCode, Json<Form>)> {
    let form = state.forms.create_form(&ctx.user_id, body)?;
    Ok((StatusCode::CREATED, Json(form)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    AppPath(id): AppPath<FormId>,
) -> AppResult<Json<Form>> {
    Ok(Json(state.forms.get_form(&ctx.user_id, &id)?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    AppPath(id): AppPath<FormId>,
    AppJson(body): AppJson<FormInput>,
) -> AppResult<Json<Form>> {
    Ok(Json(state.forms.update_form(&ctx.user_id, &id, body)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    AppPath(id): AppPath<FormId>,
) -> AppResult<StatusCode> {
    state.forms.delete_form(&ctx.user_id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    AppPath(id): AppPath<FormId>,
    AppJson(body): AppJson<Publish>,
) -> AppResult<Json<Form>> {
    Ok(Json(state.forms.set_published(&ctx.user_id, &id, body.published)?))
}

pub async fn submissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    AppPath(id): AppPath<FormId>,
) -> AppResult<Json<Vec<Submission>>> {
    Ok(Json(state.forms.list_submissions(&ctx.user_id, &id)?))
}

pub async fn usage(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> AppResult<Json<Usage>> {
    Ok(Json(state.forms.usage(&ctx.user_id)?))
}
