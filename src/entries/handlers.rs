use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::{
    model::{EntryDraft, FoodEntry},
    services::{delete_entry, load_entries, ExistingEntry, NewEntry},
};
use crate::{
    auth::extractors::AuthSession,
    editor::{run_detached, EditorKind, Submission},
    error::{AppError, Feedback},
    forms::FormData,
    listing::ListState,
    state::AppState,
};

pub const DASHBOARD_PATH: &str = "/dashboard";
pub const PLACEHOLDER_IMAGE: &str = "/images/foodTracker.jpg";
pub const IMAGE_FIELD: &str = "image";

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route(DASHBOARD_PATH, get(dashboard))
        .route("/entries/:id", get(get_entry))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/entries", axum::routing::post(create_entry))
        .route(
            "/entries/:id",
            axum::routing::put(update_entry).delete(remove_entry),
        )
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
}

/// `q` is the search box; `applied_q` is the term the shown page was
/// computed for. When they differ the view starts over at page 1.
#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub q: Option<String>,
    #[serde(default, deserialize_with = "lenient_page")]
    pub page: Option<usize>,
    pub applied_q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub confirm: bool,
    pub q: Option<String>,
    #[serde(default, deserialize_with = "lenient_page")]
    pub page: Option<usize>,
    pub applied_q: Option<String>,
}

/// A page number that does not parse is treated as absent.
fn lenient_page<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.and_then(|p| p.trim().parse().ok()))
}

#[derive(Debug, Serialize)]
pub struct EntryCard {
    pub id: Uuid,
    pub name: String,
    pub meal_type: String,
    pub eaten_at: String,
    pub image_url: String,
}

impl From<&FoodEntry> for EntryCard {
    fn from(e: &FoodEntry) -> Self {
        Self {
            id: e.id,
            name: e.name.clone(),
            meal_type: e.meal_type.to_string(),
            eaten_at: e.eaten_at.to_string(),
            image_url: e
                .image_url
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub entries: Vec<EntryCard>,
    pub q: String,
    pub page: usize,
    pub page_count: usize,
    pub total: usize,
    pub show_pagination: bool,
}

impl DashboardView {
    fn of(list: &ListState<FoodEntry>) -> Self {
        Self {
            entries: list.visible().into_iter().map(EntryCard::from).collect(),
            q: list.term().to_string(),
            page: list.page(),
            page_count: list.page_count(),
            total: list.filtered_len(),
            show_pagination: list.needs_pagination(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EntryForm {
    pub id: Uuid,
    pub name: String,
    pub meal_type: String,
    pub eaten_at: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedView {
    #[serde(flatten)]
    pub feedback: Feedback,
    pub dashboard: DashboardView,
}

fn apply_query(
    list: &mut ListState<FoodEntry>,
    q: Option<String>,
    page: Option<usize>,
    applied_q: Option<String>,
) {
    let q = q.unwrap_or_default();
    list.set_term(applied_q.as_deref().unwrap_or(&q));
    list.go_to(page.unwrap_or(1));
    list.set_term(&q);
}

async fn listing(state: &AppState, owner: Uuid) -> Result<ListState<FoodEntry>, AppError> {
    let entries = load_entries(state.backend.as_ref(), owner).await?;
    Ok(ListState::new(entries, state.config.page_size))
}

async fn find_entry(state: &AppState, owner: Uuid, id: Uuid) -> Result<FoodEntry, AppError> {
    load_entries(state.backend.as_ref(), owner)
        .await?
        .into_iter()
        .find(|e| e.id == id)
        .ok_or_else(|| AppError::NotFound("Entry not found".into()))
}

#[instrument(skip(state, session), fields(user_id = %session.user_id))]
pub async fn dashboard(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardView>, AppError> {
    let mut list = listing(&state, session.user_id).await?;
    apply_query(&mut list, query.q, query.page, query.applied_q);
    Ok(Json(DashboardView::of(&list)))
}

#[instrument(skip(state, session), fields(user_id = %session.user_id))]
pub async fn get_entry(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(id): Path<Uuid>,
) -> Result<Json<EntryForm>, AppError> {
    let entry = find_entry(&state, session.user_id, id).await?;
    Ok(Json(EntryForm {
        id: entry.id,
        name: entry.name,
        meal_type: entry.meal_type.to_string(),
        eaten_at: entry.eaten_at.to_string(),
        image_url: entry.image_url,
    }))
}

fn saved_feedback(state: &AppState, message: String) -> Feedback {
    Feedback::success(message).then_navigate(DASHBOARD_PATH, state.config.redirect_delay_ms, true)
}

#[instrument(skip(state, session, mp), fields(user_id = %session.user_id))]
pub async fn create_entry(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    mp: Multipart,
) -> Response {
    let form = match FormData::read(mp, IMAGE_FIELD).await {
        Ok(f) => f,
        Err(e) => return e.into_response(),
    };
    let guard = match state.inflight.try_begin(session.user_id, EditorKind::Entry) {
        Ok(g) => g,
        Err(e) => return e.into_response(),
    };
    let submission = Submission {
        draft: EntryDraft::from_form(&form),
        image: form.image,
    };
    let target = NewEntry {
        owner: session.user_id,
        bucket: state.config.storage.food_images_bucket.clone(),
    };
    match run_detached(state.backend.clone(), guard, target, submission).await {
        Ok(saved) => (
            StatusCode::CREATED,
            Json(saved_feedback(&state, saved.message)),
        )
            .into_response(),
        Err(failed) => failed.into_response(),
    }
}

#[instrument(skip(state, session, mp), fields(user_id = %session.user_id))]
pub async fn update_entry(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(id): Path<Uuid>,
    mp: Multipart,
) -> Response {
    let form = match FormData::read(mp, IMAGE_FIELD).await {
        Ok(f) => f,
        Err(e) => return e.into_response(),
    };
    let guard = match state.inflight.try_begin(session.user_id, EditorKind::Entry) {
        Ok(g) => g,
        Err(e) => return e.into_response(),
    };
    let entry = match find_entry(&state, session.user_id, id).await {
        Ok(e) => e,
        Err(e) => return e.into_response(),
    };
    let submission = Submission {
        draft: EntryDraft::from_form(&form),
        image: form.image,
    };
    let target = ExistingEntry::new(entry, state.config.storage.food_images_bucket.clone());
    match run_detached(state.backend.clone(), guard, target, submission).await {
        Ok(saved) => Json(saved_feedback(&state, saved.message)).into_response(),
        Err(failed) => failed.into_response(),
    }
}

#[instrument(skip(state, session), fields(user_id = %session.user_id))]
pub async fn remove_entry(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeletedView>, AppError> {
    let mut list = listing(&state, session.user_id).await?;
    let done = delete_entry(
        state.backend.as_ref(),
        &mut list,
        session.user_id,
        id,
        query.confirm,
        &state.config.storage.food_images_bucket,
    )
    .await?;
    apply_query(&mut list, query.q, query.page, query.applied_q);
    Ok(Json(DeletedView {
        feedback: Feedback::success(done.message),
        dashboard: DashboardView::of(&list),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{
            memory::{MemoryBackend, Op},
            Table,
        },
        entries,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "XyZfoodBoundary";

    fn app(state: AppState) -> Router {
        entries::router().with_state(state)
    }

    fn setup() -> (AppState, Arc<MemoryBackend>, String, Uuid) {
        let (state, mem) = AppState::fake();
        let session = mem.seed_user("cook@example.com", "password123");
        (state, mem, session.access_token, session.user_id)
    }

    fn seed_entries(mem: &MemoryBackend, owner: Uuid, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            mem.seed_record(
                Table::FoodEntries,
                json!({
                    "user_id": owner,
                    "name": name,
                    "meal_type": "Lunch",
                    "eaten_at": format!("2025-01-{:02}", 28 - i),
                }),
            );
        }
        mem.reset_calls();
    }

    fn multipart(fields: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (k, v) in fields {
            body.push_str(&format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"{k}\"\r\n\r\n{v}\r\n",
                b = BOUNDARY
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));
        body
    }

    fn form_request(method: &str, uri: &str, token: &str, fields: &[(&str, &str)]) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart(fields)))
            .unwrap()
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn dashboard_requires_a_session() {
        let (state, mem, _, _) = setup();
        let res = app(state)
            .oneshot(Request::builder().uri("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()[header::LOCATION], "/login");
        assert_eq!(mem.calls(Op::ListRecords), 0);
    }

    #[tokio::test]
    async fn dashboard_ignores_unparsable_page() {
        let (state, mem, token, owner) = setup();
        seed_entries(&mem, owner, &["A", "B", "C", "D", "E", "F"]);

        let res = app(state.clone())
            .oneshot(get("/dashboard?page=two", &token))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["page"], 1);
        assert_eq!(body["entries"].as_array().unwrap().len(), 5);

        let res = app(state).oneshot(get("/dashboard?page=2", &token)).await.unwrap();
        assert_eq!(json_body(res).await["page"], 2);
    }

    #[tokio::test]
    async fn dashboard_filters_and_paginates() {
        let (state, mem, token, owner) = setup();
        seed_entries(
            &mem,
            owner,
            &["Pad Thai", "Green Curry", "Pad See Ew", "Tom Yum", "Massaman", "Pad Krapow", "Som Tum"],
        );

        let res = app(state.clone()).oneshot(get("/dashboard", &token)).await.unwrap();
        let body = json_body(res).await;
        assert_eq!(body["entries"].as_array().unwrap().len(), 5);
        assert_eq!(body["page_count"], 2);
        assert_eq!(body["show_pagination"], true);
        assert_eq!(body["entries"][0]["image_url"], PLACEHOLDER_IMAGE);

        let res = app(state.clone())
            .oneshot(get("/dashboard?q=pad&page=2&applied_q=", &token))
            .await
            .unwrap();
        let body = json_body(res).await;
        // new term sends the view back to page 1
        assert_eq!(body["page"], 1);
        assert_eq!(body["total"], 3);
        assert_eq!(body["show_pagination"], false);
        let names: Vec<_> = body["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["Pad Thai", "Pad See Ew", "Pad Krapow"]);

        let res = app(state)
            .oneshot(get("/dashboard?page=2&applied_q=", &token))
            .await
            .unwrap();
        let body = json_body(res).await;
        assert_eq!(body["page"], 2);
        assert_eq!(body["entries"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dashboard_fetch_failure_shows_fixed_message() {
        let (state, mem, token, _) = setup();
        mem.fail(Op::ListRecords, "connection refused");
        let res = app(state).oneshot(get("/dashboard", &token)).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(res).await;
        assert_eq!(body["type"], "error");
        assert_eq!(body["message"], "Could not fetch food data.");
    }

    #[tokio::test]
    async fn create_entry_without_image() {
        let (state, mem, token, owner) = setup();
        mem.reset_calls();
        let res = app(state)
            .oneshot(form_request(
                "POST",
                "/entries",
                &token,
                &[("name", "Pad Thai"), ("meal_type", "Lunch"), ("eaten_at", "2025-01-10")],
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        assert_eq!(body["type"], "success");
        assert_eq!(body["navigate"]["to"], "/dashboard");
        assert_eq!(body["navigate"]["refetch"], true);
        assert_eq!(mem.calls(Op::InsertRecord), 1);
        assert_eq!(mem.storage_calls(), 0);

        let rows = mem.records(Table::FoodEntries);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"], json!(owner));
        assert_eq!(rows[0]["eaten_at"], "2025-01-10");
    }

    #[tokio::test]
    async fn invalid_entry_echoes_the_form() {
        let (state, mem, token, _) = setup();
        mem.reset_calls();
        let res = app(state)
            .oneshot(form_request(
                "POST",
                "/entries",
                &token,
                &[("name", ""), ("meal_type", "Dinner"), ("eaten_at", "2025-01-10")],
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json_body(res).await;
        assert_eq!(body["type"], "error");
        assert_eq!(body["form"]["meal_type"], "Dinner");
        // only the session lookup ran
        assert_eq!(mem.calls(Op::InsertRecord), 0);
        assert_eq!(mem.storage_calls(), 0);
    }

    #[tokio::test]
    async fn busy_editor_rejects_second_submit() {
        let (state, mem, token, owner) = setup();
        let _held = state.inflight.try_begin(owner, EditorKind::Entry).unwrap();
        mem.reset_calls();
        let res = app(state)
            .oneshot(form_request(
                "POST",
                "/entries",
                &token,
                &[("name", "Pad Thai"), ("eaten_at", "2025-01-10")],
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(mem.calls(Op::InsertRecord), 0);
    }

    #[tokio::test]
    async fn update_and_fetch_entry() {
        let (state, mem, token, owner) = setup();
        seed_entries(&mem, owner, &["Larb"]);
        let id = mem.records(Table::FoodEntries)[0]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let res = app(state.clone())
            .oneshot(form_request(
                "PUT",
                &format!("/entries/{}", id),
                &token,
                &[("name", "Larb Moo"), ("meal_type", "snack"), ("eaten_at", "2025-01-05")],
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app(state)
            .oneshot(get(&format!("/entries/{}", id), &token))
            .await
            .unwrap();
        let body = json_body(res).await;
        assert_eq!(body["name"], "Larb Moo");
        assert_eq!(body["meal_type"], "Snack");
        assert_eq!(body["eaten_at"], "2025-01-05");
    }

    #[tokio::test]
    async fn unknown_entry_is_not_found() {
        let (state, _, token, _) = setup();
        let res = app(state)
            .oneshot(get(&format!("/entries/{}", Uuid::new_v4()), &token))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    fn delete(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn delete_returns_refreshed_dashboard() {
        let (state, mem, token, owner) = setup();
        seed_entries(&mem, owner, &["Larb", "Tom Yum"]);
        let id = mem.records(Table::FoodEntries)[0]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let res = app(state.clone())
            .oneshot(delete(&format!("/entries/{}", id), &token))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(mem.calls(Op::DeleteRecord), 0);

        let res = app(state)
            .oneshot(delete(&format!("/entries/{}?confirm=true", id), &token))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["message"], "Entry deleted successfully!");
        assert_eq!(body["dashboard"]["total"], 1);
        assert_eq!(mem.records(Table::FoodEntries).len(), 1);
    }

    #[tokio::test]
    async fn failed_delete_keeps_entry() {
        let (state, mem, token, owner) = setup();
        seed_entries(&mem, owner, &["Larb"]);
        let id = mem.records(Table::FoodEntries)[0]["id"]
            .as_str()
            .unwrap()
            .to_string();
        mem.fail(Op::DeleteRecord, "permission denied");

        let res = app(state)
            .oneshot(delete(&format!("/entries/{}?confirm=true", id), &token))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(res).await;
        assert_eq!(body["message"], "Failed to delete entry: permission denied");
        assert_eq!(mem.calls(Op::DeleteObject), 0);
        assert_eq!(mem.records(Table::FoodEntries).len(), 1);
    }
}
