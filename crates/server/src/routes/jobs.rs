// crates/server/src/routes/jobs.rs
//! API routes for the generation-job surface.
//!
//! - `POST /jobs`               — submit a job
//! - `GET  /jobs`               — list active jobs
//! - `GET  /jobs/{id}`          — JSON snapshot
//! - `GET  /jobs/{id}/stream`   — SSE stream of status frames
//! - `POST /jobs/{id}/cancel`   — request cancellation
//!
//! These routes are the entire surface the rest of the application
//! uses; nothing else may reach into the store or worker pool.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::broadcast::error::RecvError;

use mediaforge_types::{CancelResponse, Job, JobFrame, JobId, SubmitRequest, SubmitResponse};

use crate::error::ApiResult;
use crate::state::AppState;

/// Build the jobs sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/stream", get(stream_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}

/// POST /api/jobs
///
/// Validate and enqueue a new generation job. Returns 201 with the job
/// id; `InvalidParams` and `Busy` reject without creating a job.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SubmitRequest>,
) -> ApiResult<impl IntoResponse> {
    let job_id = state.store.submit(input.kind, input.params)?;
    Ok((StatusCode::CREATED, Json(SubmitResponse { job_id })))
}

/// GET /api/jobs
///
/// Snapshots of all non-terminal jobs, oldest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<Job>> {
    Json(state.store.active_jobs())
}

/// GET /api/jobs/{id}
///
/// Current snapshot of a single job. 404 for unknown ids (including
/// jobs already collected after retention).
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.store.snapshot(id)?))
}

/// POST /api/jobs/{id}/cancel
///
/// Best-effort cancellation. `acknowledged` is false when the job was
/// already terminal.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<CancelResponse>> {
    let acknowledged = state.store.cancel(id)?;
    tracing::info!(job_id = %id, acknowledged, "Cancel requested");
    Ok(Json(CancelResponse { acknowledged }))
}

/// GET /api/jobs/{id}/stream
///
/// SSE stream of status frames for one job.
///
/// The first frame is always the current snapshot — a subscriber that
/// attaches late or reconnects never misses the fact that a job
/// already finished. Subsequent frames arrive in store-apply order,
/// and the stream terminates deterministically after a terminal frame.
/// A subscriber slow enough to overrun its event buffer is resynced
/// from a fresh snapshot rather than disconnected.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let (snapshot, mut rx) = state.store.subscribe(id)?;
    let store = state.store.clone();

    let stream = async_stream::stream! {
        yield Ok(frame_event(&snapshot));
        if snapshot.status.is_terminal() {
            return;
        }

        loop {
            match rx.recv().await {
                Ok(frame) => {
                    let terminal = frame.status.is_terminal();
                    yield Ok(frame_event(&frame));
                    if terminal {
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Dropped advisory frames; resync from the snapshot.
                    tracing::debug!(job_id = %id, skipped, "Slow stream subscriber resynced");
                    let Ok(frame) = store.snapshot(id).map(|j| j.frame()) else {
                        return;
                    };
                    let terminal = frame.status.is_terminal();
                    yield Ok(frame_event(&frame));
                    if terminal {
                        return;
                    }
                }
                Err(RecvError::Closed) => {
                    // Entry collected; nothing more will ever arrive.
                    return;
                }
            }
        }
    };

    Ok(Sse::new(stream))
}

fn frame_event(frame: &JobFrame) -> Event {
    let json = serde_json::to_string(frame).unwrap_or_default();
    Event::default().data(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStore, TransitionPayload};
    use axum::body::Body;
    use axum::http::Request;
    use mediaforge_types::{JobKind, JobStatus};
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn app_with_store(queue_cap: usize) -> (Router, Arc<JobStore>) {
        let (store, claims) = JobStore::new(queue_cap);
        // Keep the claim channel open for the lifetime of the test;
        // dropping the receiver would make every submit report Busy.
        std::mem::forget(claims);
        let state = AppState::new(store.clone());
        let app = Router::new().nest("/api", router()).with_state(state);
        (app, store)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn submit_returns_201_with_job_id() {
        let (app, store) = app_with_store(8);
        let response = app
            .oneshot(post_json(
                "/api/jobs",
                serde_json::json!({"kind": "video", "params": {"prompt": "a sunrise"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        let id: JobId = json["jobId"].as_str().unwrap().parse().unwrap();
        assert_eq!(store.snapshot(id).unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn invalid_params_return_400_and_create_nothing() {
        let (app, store) = app_with_store(8);
        let response = app
            .oneshot(post_json(
                "/api/jobs",
                serde_json::json!({"kind": "video", "params": {"prompt": ""}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["errorKind"], "invalidParams");
        assert!(store.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn full_queue_returns_429() {
        let (app, _store) = app_with_store(1);
        let submit = serde_json::json!({"kind": "text", "params": {"prompt": "x"}});

        let first = app
            .clone()
            .oneshot(post_json("/api/jobs", submit.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app.oneshot(post_json("/api/jobs", submit)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let json = body_json(second).await;
        assert_eq!(json["errorKind"], "busy");
    }

    #[tokio::test]
    async fn unknown_job_returns_404() {
        let (app, _store) = app_with_store(8);
        for uri in [
            format!("/api/jobs/{}", uuid::Uuid::new_v4()),
            format!("/api/jobs/{}/stream", uuid::Uuid::new_v4()),
        ] {
            let response = app.clone().oneshot(get_req(&uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            let json = body_json(response).await;
            assert_eq!(json["errorKind"], "notFound");
        }
    }

    #[tokio::test]
    async fn cancel_acknowledges_queued_and_declines_terminal() {
        let (app, store) = app_with_store(8);
        let id = store
            .submit(JobKind::Image, serde_json::json!({"prompt": "x"}))
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/jobs/{id}/cancel"),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["acknowledged"], true);
        assert_eq!(store.snapshot(id).unwrap().status, JobStatus::Cancelled);

        // Already terminal: acknowledged=false.
        let response = app
            .oneshot(post_json(
                &format!("/api/jobs/{id}/cancel"),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["acknowledged"], false);
    }

    #[tokio::test]
    async fn list_shows_only_active_jobs() {
        let (app, store) = app_with_store(8);
        let queued = store
            .submit(JobKind::Audio, serde_json::json!({"prompt": "x"}))
            .unwrap();
        let done = store
            .submit(JobKind::Audio, serde_json::json!({"prompt": "y"}))
            .unwrap();
        store.claim(done).unwrap();
        store
            .apply_transition(
                done,
                JobStatus::Completed,
                TransitionPayload {
                    result: Some("https://cdn.example/a.mp3".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let response = app.oneshot(get_req("/api/jobs")).await.unwrap();
        let json = body_json(response).await;
        let ids: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec![queued.to_string().as_str()]);
    }

    #[tokio::test]
    async fn stream_of_terminal_job_is_single_frame() {
        let (app, store) = app_with_store(8);
        let id = store
            .submit(JobKind::Video, serde_json::json!({"prompt": "x"}))
            .unwrap();
        store.claim(id).unwrap();
        store
            .apply_transition(
                id,
                JobStatus::Completed,
                TransitionPayload {
                    result: Some("https://cdn.example/v.mp4".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let response = app
            .oneshot(get_req(&format!("/api/jobs/{id}/stream")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/event-stream"));

        // The body terminates because the stream ends after the
        // terminal frame; a single data line carries the snapshot.
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();
        let frames: Vec<&str> = body_str
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .collect();
        assert_eq!(frames.len(), 1);
        let frame: JobFrame = serde_json::from_str(frames[0]).unwrap();
        assert_eq!(frame.status, JobStatus::Completed);
        assert_eq!(frame.result.as_deref(), Some("https://cdn.example/v.mp4"));
    }

    #[tokio::test]
    async fn stream_replays_snapshot_then_live_frames_in_order() {
        let (app, store) = app_with_store(8);
        let id = store
            .submit(JobKind::Video, serde_json::json!({"prompt": "x"}))
            .unwrap();

        // Drive the lifecycle concurrently while the stream is read.
        let driver = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                store.claim(id).unwrap();
                store.set_progress(id, 50).unwrap();
                store
                    .apply_transition(
                        id,
                        JobStatus::Completed,
                        TransitionPayload {
                            result: Some("https://cdn.example/v.mp4".into()),
                            ..Default::default()
                        },
                    )
                    .unwrap();
            })
        };

        let response = app
            .oneshot(get_req(&format!("/api/jobs/{id}/stream")))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        driver.await.unwrap();

        let body_str = String::from_utf8(body.to_vec()).unwrap();
        let statuses: Vec<String> = body_str
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|d| serde_json::from_str::<JobFrame>(d).unwrap())
            .map(|f| f.status.to_string())
            .collect();
        assert_eq!(statuses, vec!["queued", "running", "running", "completed"]);
    }
}
