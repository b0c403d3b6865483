use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::state::AppState;
use crate::status::{compute_status, resolve_artifact, ArtifactKind, JobStatus};

#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    pub prompt: Option<String>,
}

/// GET /api/v1/resumes/:job_id
/// Stage and artifact URLs derived from what the store holds.
pub async fn handle_get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatus>, AppError> {
    let labels = state.prompts.known_labels();
    let status = compute_status(
        state.store.as_ref(),
        &job_id,
        &labels,
        &state.public_base_url,
    )
    .await?;
    Ok(Json(status))
}

/// GET /api/v1/resumes/:job_id/:kind[?prompt=label]
pub async fn handle_get_artifact(
    State(state): State<AppState>,
    Path((job_id, kind)): Path<(String, String)>,
    Query(query): Query<ArtifactQuery>,
) -> Result<Response, AppError> {
    let kind: ArtifactKind = kind.parse().map_err(AppError::Validation)?;
    let prompt = query.prompt.as_deref().filter(|p| !p.trim().is_empty());
    if prompt.is_some() && kind != ArtifactKind::Json {
        return Err(AppError::Validation(
            "prompt is only meaningful for json artifacts".to_string(),
        ));
    }

    let labels = state.prompts.known_labels();
    let location = resolve_artifact(state.store.as_ref(), &job_id, kind, prompt, &labels)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No {kind} artifact for job {job_id}")))?;
    let bytes = state.store.get(&location.key).await?;

    let disposition = format!("inline; filename=\"{}\"", location.filename);
    Ok((
        [
            (header::CONTENT_TYPE, location.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use bytes::Bytes;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::prompts::PromptResolver;
    use crate::routes::build_router;
    use crate::state::AppState;
    use crate::storage::{keys, ArtifactStore, InMemoryArtifactStore};

    async fn app_with(artifacts: &[(&str, &str)]) -> axum::Router {
        let store = Arc::new(InMemoryArtifactStore::new());
        for (key, body) in artifacts {
            store
                .put(key, Bytes::from(body.to_string()), &keys::detect_mime(key))
                .await
                .unwrap();
        }
        build_router(AppState {
            store,
            prompts: Arc::new(PromptResolver::new(None, "test-model")),
            public_base_url: "http://api.test".to_string(),
        })
    }

    async fn get(app: axum::Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = get(app_with(&[]).await, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_lists_existing_artifacts() {
        let app = app_with(&[("text/cv-1.txt", "Jane"), ("docx/cv-1.docx", "PK")]).await;
        let response = get(app, "/api/v1/resumes/cv-1").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["stage"], "templated");
        assert_eq!(body["artifacts"]["docx"], "http://api.test/api/v1/resumes/cv-1/docx");
        assert!(body["artifacts"].get("pdf").is_none());
    }

    #[tokio::test]
    async fn test_artifact_bytes_and_headers() {
        let app = app_with(&[("text/cv-1.txt", "Jane Doe")]).await;
        let response = get(app, "/api/v1/resumes/cv-1/text").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], keys::TEXT_MIME);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "inline; filename=\"cv-1.txt\""
        );
        assert_eq!(&body_bytes(response).await[..], b"Jane Doe");
    }

    #[tokio::test]
    async fn test_json_by_prompt_label() {
        let app = app_with(&[
            ("json/cv-1.v1.json", r#"{"v":1}"#),
            ("json/cv-1.v2.json", r#"{"v":2}"#),
        ])
        .await;

        let response = get(app.clone(), "/api/v1/resumes/cv-1/json?prompt=v2").await;
        assert_eq!(&body_bytes(response).await[..], br#"{"v":2}"#);

        let response = get(app.clone(), "/api/v1/resumes/cv-1/json").await;
        assert_eq!(&body_bytes(response).await[..], br#"{"v":1}"#);

        let response = get(app, "/api/v1/resumes/cv-1/json?prompt=vjd1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_404_with_error_body() {
        let response = get(app_with(&[]).await, "/api/v1/resumes/cv-1/pdf").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unknown_kind_and_bad_job_id_are_400() {
        let app = app_with(&[]).await;
        let response = get(app.clone(), "/api/v1/resumes/cv-1/meta").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get(app, "/api/v1/resumes/bad%20id").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
