//! # Recognition Handler
//!
//! `POST /recognize`: upload one audio file, get text back.

use crate::error::AppError;
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Deserialize;

/// Query string of `POST /recognize`.
///
/// `optimize` is read as text and goes through the same `parse_flag` as the
/// form field, so `?optimize=yes` and `optimize=yes` mean the same thing.
#[derive(Debug, Default, Deserialize)]
pub struct RecognizeQuery {
    pub optimize: Option<String>,
}

/// Transcribe an uploaded audio file with the current model.
///
/// ## Endpoint: `POST /recognize`
///
/// ## Request:
/// Multipart form data with the audio in a field named `file`. Optimization
/// is requested with a form field `optimize=true` or `?optimize=true`.
///
/// ## Response:
/// ```json
/// {
///   "text": "今天天气不错",
///   "language": "zh",
///   "optimized_text": "今天天气不错。"
/// }
/// ```
///
/// `text` is always Simplified Chinese; when nothing was recognised it is the
/// placeholder `未识别到内容`. When optimization was requested but could not
/// run, `optimized_text` is absent and `optimization_error` says why.
///
/// ## Errors:
/// - 400: missing, empty or oversized file, malformed multipart body
/// - 409: no model is loaded (`model_not_loaded`)
/// - 415 / 422: the audio container is unknown or can't be decoded
///
/// The active-transcription gauge in `/api/v1/metrics` is held by a guard,
/// so it is released even when the client disconnects mid-request.
pub async fn recognize(
    app_state: web::Data<AppState>,
    query: web::Query<RecognizeQuery>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let max_bytes = app_state.transcriber.max_upload_bytes();

    let mut audio_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut optimize = query.optimize.as_deref().is_some_and(parse_flag);

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let (field_name, field_filename) = match field.content_disposition() {
            Some(disposition) => (
                disposition.get_name().map(str::to_string),
                disposition.get_filename().map(str::to_string),
            ),
            None => continue,
        };

        match field_name.as_deref() {
            Some("file") => {
                filename = field_filename;
                audio_data = Some(read_field(&mut field, max_bytes).await?);
            }
            Some("optimize") => {
                let value = read_field(&mut field, 16).await?;
                optimize = parse_flag(&String::from_utf8_lossy(&value));
            }
            // Drain unknown fields so the stream can advance.
            _ => while field.next().await.is_some() {},
        }
    }

    let audio = audio_data.ok_or_else(|| {
        AppError::BadRequest("No audio file provided in field 'file'".to_string())
    })?;

    let _active = app_state.track_transcription();
    let result = app_state
        .transcriber
        .transcribe(audio, filename, optimize)
        .await?;

    Ok(HttpResponse::Ok().json(result))
}

/// Collect a field, failing as soon as it grows past `limit` bytes.
async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::BadRequest(format!(
                "Upload too large. Maximum size is {} bytes",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::tests::wav_bytes;
    use crate::testing::{test_app, test_state, write_model_files};
    use crate::transcription::download::ModelStore;
    use crate::transcription::ModelSize;
    use actix_web::http::StatusCode;
    use actix_web::test::{call_service, read_body_json, TestRequest};
    use serde_json::Value;

    const BOUNDARY: &str = "----whisper-test-boundary";

    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload(uri: &str, body: Vec<u8>) -> TestRequest {
        TestRequest::post()
            .uri(uri)
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    #[actix_web::test]
    async fn test_silent_clip_without_model_is_conflict() {
        let cache = tempfile::tempdir().unwrap();
        let state = test_state(cache.path());
        let app = test_app!(state);

        // Two seconds of silence.
        let wav = wav_bytes(&vec![0i16; 32_000], 16_000, 1);
        let resp = call_service(
            &app,
            upload("/recognize", multipart_body(&[("file", Some("silence.wav"), &wav)])).to_request(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "model_not_loaded");
        assert_eq!(state.get_metrics_snapshot().active_transcriptions, 0);
    }

    #[actix_web::test]
    async fn test_recognize_with_loaded_model() {
        let cache = tempfile::tempdir().unwrap();
        let state = test_state(cache.path());
        write_model_files(&ModelStore::new(&state.config.model.cache_dir), ModelSize::Tiny);
        let state = test_state(cache.path());
        state.models.load("tiny").await.unwrap();
        let app = test_app!(state);

        let wav = wav_bytes(&[0, 100, -100, 0], 16_000, 1);
        let resp = call_service(
            &app,
            upload(
                "/recognize",
                multipart_body(&[("note", None, b"ignored"), ("file", Some("a.wav"), &wav)]),
            )
            .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["text"], "hello world");
        assert_eq!(body["language"], "tiny-lang");
        assert!(body.get("optimized_text").is_none());
        assert!(body.get("optimization_error").is_none());
    }

    #[actix_web::test]
    async fn test_optimize_flag_without_default_config() {
        let cache = tempfile::tempdir().unwrap();
        let state = test_state(cache.path());
        write_model_files(&ModelStore::new(&state.config.model.cache_dir), ModelSize::Tiny);
        let state = test_state(cache.path());
        state.models.load("tiny").await.unwrap();
        let app = test_app!(state);

        let wav = wav_bytes(&[0, 1, 2, 3], 16_000, 1);
        let resp = call_service(
            &app,
            upload(
                "/recognize",
                multipart_body(&[("file", Some("a.wav"), &wav), ("optimize", None, b"true")]),
            )
            .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["text"], "hello world");
        assert!(body["optimization_error"].is_string());

        for query in ["?optimize=true", "?optimize=yes", "?optimize=ON"] {
            let resp = call_service(
                &app,
                upload(
                    &format!("/recognize{}", query),
                    multipart_body(&[("file", Some("a.wav"), &wav)]),
                )
                .to_request(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::OK, "query {}", query);
            let body: Value = read_body_json(resp).await;
            assert!(body["optimization_error"].is_string(), "query {}", query);
        }

        let resp = call_service(
            &app,
            upload(
                "/recognize?optimize=no",
                multipart_body(&[("file", Some("a.wav"), &wav)]),
            )
            .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = read_body_json(resp).await;
        assert!(body.get("optimization_error").is_none());
    }

    #[actix_web::test]
    async fn test_missing_empty_and_oversized_files() {
        let cache = tempfile::tempdir().unwrap();
        let state = test_state(cache.path());
        let app = test_app!(state);

        let resp = call_service(
            &app,
            upload("/recognize", multipart_body(&[("other", None, b"x")])).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = call_service(
            &app,
            upload("/recognize", multipart_body(&[("file", Some("empty.wav"), b"")])).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // test_state caps uploads at 1 MB.
        let big = vec![0u8; 1024 * 1024 + 1];
        let resp = call_service(
            &app,
            upload("/recognize", multipart_body(&[("file", Some("big.wav"), &big)])).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" ON "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
