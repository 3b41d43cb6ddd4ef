//! HTTP client for a remote Control API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::ControlApi;
use crate::error::{Error, Result};
use crate::model::{CancelMode, ClaimFilter, Finalize, ListQuery, NewTask, Task, TaskId};
use crate::wire::{
    ClaimRequest, EnqueueRequest, ErrorBody, FinalizeRequest, ListParams, PatchLogRequest,
    TaskDetailed, TaskSummary,
};

/// Control API client authenticating with a bearer token.
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl HttpClient {
    /// `base_url` is the server root, e.g. `http://queue:8080`.
    pub fn new(base_url: &str, token: SecretString, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let response = req.bearer_auth(self.token.expose_secret()).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        Ok(self.send(req).await?.json().await?)
    }

    async fn task(&self, req: RequestBuilder) -> Result<Task> {
        let wire: TaskDetailed = self.json(req).await?;
        Ok(wire.into())
    }
}

/// Map a non-success response back onto the error it was produced from.
async fn error_from_response(response: Response) -> Error {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: Option<ErrorBody> = serde_json::from_str(&text).ok();
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| text.clone());

    match (status, body) {
        (StatusCode::CONFLICT, Some(ErrorBody { existing_task_id: Some(existing), .. })) => {
            Error::Duplicate { existing }
        }
        (StatusCode::BAD_REQUEST, _) => Error::Validation(message),
        (StatusCode::UNAUTHORIZED, _) => Error::Unauthorized(message),
        (StatusCode::FORBIDDEN, _) => Error::Forbidden(message),
        _ => Error::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// Turn a 404 into `NotFound(id)` for single-task endpoints.
fn not_found_as(id: TaskId) -> impl FnOnce(Error) -> Error {
    move |e| match e {
        Error::Api { status: 404, .. } => Error::NotFound(id),
        other => other,
    }
}

#[async_trait]
impl ControlApi for HttpClient {
    async fn enqueue(&self, new: NewTask) -> Result<Task> {
        let body = EnqueueRequest::from(&new);
        self.task(self.client.post(self.url("/tasks")).json(&body))
            .await
    }

    async fn claim(&self, worker: &str, filter: &ClaimFilter) -> Result<Option<Task>> {
        let body = ClaimRequest::new(worker, filter);
        let response = self
            .send(self.client.post(self.url("/queue/claim")).json(&body))
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let wire: TaskDetailed = response.json().await?;
        Ok(Some(wire.into()))
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        self.task(self.client.get(self.url(&format!("/tasks/{id}"))))
            .await
            .map_err(not_found_as(id))
    }

    async fn patch_log(&self, id: TaskId, log_append: &str) -> Result<Task> {
        let body = PatchLogRequest {
            log_append: log_append.to_string(),
        };
        self.task(
            self.client
                .patch(self.url(&format!("/tasks/{id}")))
                .json(&body),
        )
        .await
        .map_err(not_found_as(id))
    }

    async fn finalize(&self, id: TaskId, fin: &Finalize) -> Result<Task> {
        let body = FinalizeRequest::from(fin);
        self.task(
            self.client
                .put(self.url(&format!("/tasks/{id}/finalize")))
                .json(&body),
        )
        .await
        .map_err(not_found_as(id))
    }

    async fn cancel(&self, id: TaskId, mode: CancelMode) -> Result<Task> {
        let mode = match mode {
            CancelMode::Queued => "queued",
            CancelMode::Running => "running",
            CancelMode::Any => "any",
        };
        self.task(
            self.client
                .post(self.url(&format!("/tasks/{id}/cancel")))
                .query(&[("mode", mode)]),
        )
        .await
        .map_err(not_found_as(id))
    }

    async fn priority_boost(&self, id: TaskId) -> Result<Task> {
        self.task(
            self.client
                .post(self.url(&format!("/tasks/{id}/priority-boost"))),
        )
        .await
        .map_err(not_found_as(id))
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<TaskSummary>> {
        let params = ListParams::from(query);
        self.json(self.client.get(self.url("/tasks")).query(&params))
            .await
    }
}
