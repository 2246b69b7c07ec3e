use axum::{extract::Multipart, Json};
use serde::Serialize;

use crate::documents::extract;
use crate::errors::AppError;

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub file_name: String,
    pub lines: Vec<String>,
}

/// POST /api/v1/documents/extract
/// Reads the first file field of the upload and returns its text lines.
pub async fn handle_extract(mut multipart: Multipart) -> Result<Json<ExtractResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let Some(file_name) = field.file_name().map(String::from) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;

        // PDF parsing is CPU-bound; keep it off the async executor.
        let name = file_name.clone();
        let lines = tokio::task::spawn_blocking(move || extract(&name, &bytes))
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("spawn_blocking failed in extract: {e}"))
            })?;

        return Ok(Json(ExtractResponse { file_name, lines }));
    }

    Err(AppError::Validation("No file uploaded".to_string()))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::routes::build_router;
    use crate::routes::testing::{body_json, spawn_llm_stub, state_with};
    use crate::speech::SpeechServices;

    const BOUNDARY: &str = "X-CAREER-BUDDY-BOUNDARY";

    fn upload(file_name: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::post("/api/v1/documents/extract")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_extract_txt_upload() {
        let app = build_router(state_with(
            spawn_llm_stub(vec![]).await,
            SpeechServices::disabled(),
        ));
        let response = app
            .oneshot(upload("resume.txt", "Jane Doe\n\nSenior Rust Engineer\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["file_name"], "resume.txt");
        assert_eq!(body["lines"][0], "Jane Doe");
        assert_eq!(body["lines"][1], "Senior Rust Engineer");
    }

    #[tokio::test]
    async fn test_unsupported_upload_returns_explanation_line() {
        let app = build_router(state_with(
            spawn_llm_stub(vec![]).await,
            SpeechServices::disabled(),
        ));
        let response = app.oneshot(upload("resume.odt", "x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let lines = body["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].as_str().unwrap().starts_with("Unsupported file type"));
    }
}
