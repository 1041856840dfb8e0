//! HTTP client for a PocketBase-style record server.
//!
//! Endpoints used:
//! - `GET/POST /api/collections/{c}/records`
//! - `GET/PATCH/DELETE /api/collections/{c}/records/{id}`
//! - `POST /api/collections/users/auth-with-password`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::models::{RecordPage, USER_COLLECTION, User};
use crate::query::ListQuery;
use crate::store::{RecordStore, Session};
use crate::{Error, Result};

/// Per-request timeout for REST calls. The realtime stream is not bounded.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    record: User,
}

/// Remote record store.
///
/// Construct one per server and share it; it owns the connection pool and
/// the auth session. [`PocketBase::logout`] drops the session.
#[derive(Debug, Clone)]
pub struct PocketBase {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
}

impl PocketBase {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session: Arc::new(Session::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// The underlying HTTP client, for transports sharing the pool.
    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }

    /// Sign in with username/email and password.
    pub async fn authenticate(&self, identity: &str, password: &str) -> Result<User> {
        let url = format!(
            "{}/api/collections/{}/auth-with-password",
            self.base_url, USER_COLLECTION
        );
        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({"identity": identity, "password": password}))
            .send()
            .await?;
        let auth: AuthResponse = serde_json::from_value(read_body(response).await?)?;
        tracing::info!(user = %auth.record.id, "authenticated");
        self.session.set(auth.token, auth.record.clone());
        Ok(auth.record)
    }

    pub fn logout(&self) {
        self.session.clear();
    }

    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{}/records", self.base_url, collection)
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.records_url(collection), id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(REQUEST_TIMEOUT);
        match self.session.token() {
            Some(token) => request.header("Authorization", token),
            None => request,
        }
    }
}

/// Decode a response body, mapping non-success statuses to errors.
pub(crate) async fn read_body(response: Response) -> Result<Value> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(text);
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(message));
        }
        return Err(Error::Store {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl RecordStore for PocketBase {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<RecordPage<Value>> {
        tracing::debug!(collection, filter = ?query.filter, sort = ?query.sort, page = query.page, "list");
        let request = self
            .authorize(self.http.get(self.records_url(collection)))
            .query(&query.to_pairs());
        let body = read_body(request.send().await?).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn get_one(&self, collection: &str, id: &str, expand: Option<&str>) -> Result<Value> {
        let mut request = self.authorize(self.http.get(self.record_url(collection, id)));
        if let Some(expand) = expand.filter(|e| !e.is_empty()) {
            request = request.query(&[("expand", expand)]);
        }
        read_body(request.send().await?).await
    }

    async fn create(&self, collection: &str, body: Value) -> Result<Value> {
        let request = self
            .authorize(self.http.post(self.records_url(collection)))
            .json(&body);
        read_body(request.send().await?).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value> {
        tracing::debug!(collection, id, "update");
        let request = self
            .authorize(self.http.patch(self.record_url(collection, id)))
            .json(&patch);
        read_body(request.send().await?).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let request = self.authorize(self.http.delete(self.record_url(collection, id)));
        read_body(request.send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let pb = PocketBase::new("http://127.0.0.1:8090/").unwrap();
        assert_eq!(pb.base_url(), "http://127.0.0.1:8090");
        assert_eq!(
            pb.records_url("todos"),
            "http://127.0.0.1:8090/api/collections/todos/records"
        );
        assert_eq!(
            pb.record_url("todos", "abc"),
            "http://127.0.0.1:8090/api/collections/todos/records/abc"
        );
    }

    #[test]
    fn test_auth_response_shape() {
        let auth: AuthResponse = serde_json::from_value(json!({
            "token": "jwt",
            "record": {"id": "u1", "name": "Ada", "role": "admin", "avatar": ""}
        }))
        .unwrap();
        assert_eq!(auth.token, "jwt");
        assert_eq!(auth.record.name, "Ada");
    }

    #[test]
    fn test_logout_clears_session() {
        let pb = PocketBase::new("http://localhost:8090").unwrap();
        pb.session().set("t".to_string(), User::default());
        pb.logout();
        assert!(!pb.session().is_authenticated());
    }
}
