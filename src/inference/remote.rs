use std::time::Duration;

use anyhow::Result;
use axum::async_trait;
use serde_json::Value;

use crate::inference::bridge::{PredictHandler, PredictorError};
use crate::inference::invoker::parse_output;
use crate::inference::request::PredictionRequest;

/// Forwards predictions to a running prediction service such as the Flask
/// `/predict` endpoint shipped with the model.
#[derive(Debug, Clone)]
pub struct RemotePredictor {
    client: reqwest::Client,
    url: String,
}

impl RemotePredictor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PredictHandler for RemotePredictor {
    #[tracing::instrument(level = "info", skip_all, fields(url = %self.url))]
    async fn run_predict(&self, request: &PredictionRequest) -> Result<Value, PredictorError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| PredictorError::RemoteFailure {
                status: None,
                body: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PredictorError::RemoteFailure {
                status: Some(status.as_u16()),
                body: e.to_string(),
            })?;
        if !status.is_success() {
            return Err(PredictorError::RemoteFailure {
                status: Some(status.as_u16()),
                body,
            });
        }
        parse_output(&body)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::ValidationMode;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{}/predict", addr)
    }

    fn request() -> PredictionRequest {
        PredictionRequest::from_json(json!({"dayOfWeek": "Monday"}), ValidationMode::Fill).unwrap()
    }

    #[tokio::test]
    async fn returns_service_document() {
        let url = serve(Router::new().route(
            "/predict",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"success": true, "prediction": 12.5, "echo": body["dayOfWeek"]}))
            }),
        ))
        .await;

        let predictor = RemotePredictor::new(url, Duration::from_secs(5)).unwrap();
        let value = predictor.run_predict(&request()).await.unwrap();
        assert_eq!(value["prediction"], json!(12.5));
        assert_eq!(value["echo"], json!(1));
    }

    #[tokio::test]
    async fn error_status_is_a_remote_failure() {
        let url = serve(Router::new().route(
            "/predict",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"success": false, "error": "Ridge Regression model not loaded"})),
                )
            }),
        ))
        .await;

        let predictor = RemotePredictor::new(url, Duration::from_secs(5)).unwrap();
        let err = predictor.run_predict(&request()).await.unwrap_err();
        assert!(matches!(err, PredictorError::RemoteFailure { status: Some(400), .. }));
        assert!(err.to_string().contains("model not loaded"));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_remote_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/predict", listener.local_addr().unwrap());
        drop(listener);

        let predictor = RemotePredictor::new(url, Duration::from_secs(5)).unwrap();
        let err = predictor.run_predict(&request()).await.unwrap_err();
        assert!(matches!(err, PredictorError::RemoteFailure { status: None, .. }));
    }
}
