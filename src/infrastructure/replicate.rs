//! Client for the hosted inference provider (Replicate).
//!
//! A generation is started by creating a prediction with `stream: true`; the
//! text is then read from the prediction's stream URL as Server-Sent Events.

use crate::config::Settings;
use crate::core::error::AppError;
use crate::core::prompt::GenerationInput;
use crate::core::traits::{FragmentStream, InferenceClient};
use async_stream::stream;
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use eventsource_stream::Eventsource;
use futures_util::{StreamExt, pin_mut};
use log::{debug, error, info, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 200;

/// A model identifier of the form `owner/name` or `owner/name:version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub owner: String,
    pub name: String,
    pub version: Option<String>,
}

impl ModelRef {
    pub fn parse(identifier: &str) -> Result<ModelRef, AppError> {
        let invalid = || {
            AppError::Configuration(format!(
                "model identifier {identifier:?} is not of the form owner/name[:version]"
            ))
        };

        let (path, version) = match identifier.split_once(':') {
            Some((path, version)) if !version.is_empty() => (path, Some(version.to_owned())),
            Some(_) => return Err(invalid()),
            None => (identifier, None),
        };
        let (owner, name) = path.split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }

        Ok(ModelRef {
            owner: owner.to_owned(),
            name: name.to_owned(),
            version,
        })
    }
}

impl Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{version}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CreatePrediction<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    input: &'a GenerationInput,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    urls: PredictionUrls,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PredictionUrls {
    stream: Option<String>,
}

pub struct ReplicateClient {
    http: reqwest::Client,
    settings: Ref<Settings>,
}

#[injectable(InferenceClient)]
impl ReplicateClient {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> ReplicateClient {
        ReplicateClient::new(settings)
    }
}

impl ReplicateClient {
    pub fn new(settings: Ref<Settings>) -> ReplicateClient {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(settings.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("failed to configure HTTP client ({e}), using defaults");
                reqwest::Client::new()
            });

        ReplicateClient { http, settings }
    }

    fn token(&self) -> Result<&str, AppError> {
        self.settings.api_token.as_deref().ok_or_else(|| {
            AppError::Configuration("REPLICATE_API_TOKEN is not set".to_owned())
        })
    }

    fn predictions_url(&self, model: &ModelRef) -> String {
        match model.version {
            Some(_) => format!("{}/v1/predictions", self.settings.api_url),
            None => format!(
                "{}/v1/models/{}/{}/predictions",
                self.settings.api_url, model.owner, model.name
            ),
        }
    }

    async fn create_prediction(
        &self,
        token: &str,
        model: &ModelRef,
        input: &GenerationInput,
    ) -> Result<Prediction, AppError> {
        let body = CreatePrediction {
            version: model.version.as_deref(),
            input,
            stream: true,
        };

        let response = self
            .http
            .post(self.predictions_url(model))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text: String = text.chars().take(ERROR_BODY_LIMIT).collect();
            error!("prediction for {model} rejected: HTTP {status}: {text}");
            return Err(match status {
                reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                    AppError::Configuration(format!("API token was rejected (HTTP {status})"))
                }
                _ => AppError::Upstream(format!("HTTP {status}: {text}")),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("malformed prediction response: {e}")))
    }
}

#[async_trait]
impl InferenceClient for ReplicateClient {
    async fn generate(&self, input: GenerationInput) -> Result<FragmentStream, AppError> {
        let token = self.token()?;
        let model = ModelRef::parse(&self.settings.model)?;

        let prediction = self.create_prediction(token, &model, &input).await?;
        info!(
            "prediction {} created for {model} (status {})",
            prediction.id, prediction.status
        );

        if prediction.status == "failed" {
            let reason = prediction
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_owned());
            return Err(AppError::Upstream(format!(
                "prediction {} failed: {reason}",
                prediction.id
            )));
        }

        let stream_url = prediction.urls.stream.ok_or_else(|| {
            AppError::Upstream(format!("model {model} does not support streaming"))
        })?;

        let response = self
            .http
            .get(&stream_url)
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "stream for prediction {} returned HTTP {status}",
                prediction.id
            )));
        }

        let prediction_id = prediction.id;
        let events = response.bytes_stream().eventsource();

        let fragments = stream! {
            pin_mut!(events);
            let mut count = 0usize;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        error!("stream for prediction {prediction_id} broke: {e}");
                        yield Err(AppError::Upstream(format!("stream interrupted: {e}")));
                        return;
                    }
                };

                match event.event.as_str() {
                    "output" | "message" | "" => {
                        count += 1;
                        yield Ok(event.data);
                    }
                    "error" => {
                        error!("prediction {prediction_id} reported an error: {}", event.data);
                        yield Err(AppError::Upstream(stream_error_detail(&event.data)));
                        return;
                    }
                    "done" => {
                        debug!("prediction {prediction_id} done after {count} fragments");
                        return;
                    }
                    other => debug!("ignoring {other} event from prediction {prediction_id}"),
                }
            }

            warn!("stream for prediction {prediction_id} closed after {count} fragments without done");
            yield Err(AppError::Upstream("stream ended before completion".to_owned()));
        };

        Ok(fragments.boxed())
    }
}

/// Extracts a readable message from an `error` event payload.
fn stream_error_detail(data: &str) -> String {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_owned))
        .unwrap_or_else(|| data.to_owned())
}
