//! Respondent-facing endpoints. No identity required.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Form, FormField, FormId, FormKind, SubmissionId};
use crate::error::AppResult;
use crate::http::extract::{AppJson, AppPath};
use crate::http::server::AppState;

/// A form as shown to respondents, without owner details.
#[derive(Debug, Serialize)]
pub struct PublicForm {
    pub id: FormId,
    pub title: String,
    pub description: String,
    pub kind: FormKind,
    pub fields: Vec<FormField>,
}

impl From<Form> for PublicForm {
    fn from(form: Form) -> Self {
        Self {
            id: form.id,
            title: form.title,
            description: form.description,
            kind: form.kind,
            fields: form.fields,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswers {
    pub answers: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct Received {
    pub id: SubmissionId,
    pub submitted_at: DateTime<Utc>,
}

pub async fn get_form(
    State(state): State<AppState>,
    AppPath(id): AppPath<FormId>,
) -> AppResult<Json<PublicForm>> {
    Ok(Json(state.forms.public_form(&id)?.into()))
}

pub async fn submit(
    State(state): State<AppState>,
    AppPath(id): AppPath<FormId>,
    AppJson(body): AppJson<SubmitAnswers>,
) -> AppResult<(StatusCode, Json<Received>)> {
    let submission = state.forms.submit(&id, body.answers)?;
    Ok((
        StatusCode::CREATED,
        Json(Received {
            id: submission.id,
            submitted_at: submission.submitted_at,
        }),
    ))
}
