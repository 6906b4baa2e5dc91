//! PostgREST-style HTTP backend client.
//!
//! Tables are addressed as `/rest/v1/{table}` and filtered with
//! `column=eq.value` query parameters.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{EntityKind, Scope};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::mapping::row_version;
use super::{Backend, BackendError, BackendResult, RemoteRow};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Connection settings for [`RestBackend`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// User session token; the API key is sent as bearer when absent
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            api_key: Some(api_key.into()),
            access_token: None,
            timeout_secs: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        normalize_text_option(self.base_url.clone()).is_some()
            && normalize_text_option(self.api_key.clone()).is_some()
    }
}

/// HTTP client implementing [`Backend`] against a PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct RestBackend {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base_url = normalize_text_option(config.base_url.clone())
            .ok_or_else(|| Error::Config("backend base_url must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::Config(
                "backend base_url must include http:// or https://".to_string(),
            ));
        }
        let api_key = normalize_text_option(config.api_key.clone())
            .ok_or_else(|| Error::Config("backend api_key must not be empty".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            access_token: normalize_text_option(config.access_token.clone()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check reachability. Any HTTP answer below 500 counts as reachable.
    pub async fn ping(&self) -> BackendResult<()> {
        let response = self
            .authorize(self.client.get(format!("{}/rest/v1/", self.base_url)))
            .send()
            .await
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        if response.status().is_server_error() {
            return Err(classify_status(response.status(), ""));
        }
        Ok(())
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, kind.table())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
            .header("Accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn rows(response: Response) -> BackendResult<Vec<RemoteRow>> {
        response
            .json::<Vec<RemoteRow>>()
            .await
            .map_err(|error| BackendError::Decode(error.to_string()))
    }
}

/// Map an HTTP failure status onto the backend error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail = if body.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(body), status.as_u16())
    };

    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            BackendError::VersionConflict(detail)
        }
        StatusCode::NOT_FOUND => BackendError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Unavailable(detail)
        }
        status if status.is_server_error() => BackendError::Unavailable(detail),
        _ => BackendError::Rejected(detail),
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

/// Filters for a conditional PATCH: the row must not be ahead of `version`.
fn update_query(
    kind: EntityKind,
    account_id: &str,
    business_id: &str,
    version: i64,
) -> [(&'static str, String); 3] {
    [
        ("account_id", eq(account_id)),
        (kind.business_key(), eq(business_id)),
        ("version", format!("lte.{version}")),
    ]
}

/// Explain a PATCH that matched no rows, given the row as it stands now.
fn unmatched_update(
    kind: EntityKind,
    business_id: &str,
    incoming: i64,
    current: Option<&RemoteRow>,
) -> BackendError {
    match current {
        Some(row) => BackendError::VersionConflict(format!(
            "{kind} {business_id} is at version {}, write carried {incoming}",
            row_version(row)
        )),
        None => BackendError::NotFound(format!("{kind} {business_id}")),
    }
}

impl Backend for RestBackend {
    async fn list(&self, kind: EntityKind, scope: &Scope) -> BackendResult<Vec<RemoteRow>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("account_id", eq(&scope.account_id)),
        ];
        if let Some(project_id) = scope.project_id.as_deref() {
            query.push(("project_id", eq(project_id)));
        }

        let response = self
            .send(self.client.get(self.table_url(kind)).query(&query))
            .await?;
        Self::rows(response).await
    }

    async fn fetch(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
    ) -> BackendResult<Option<RemoteRow>> {
        let query = [
            ("select", "*".to_string()),
            ("account_id", eq(account_id)),
            (kind.business_key(), eq(business_id)),
            ("limit", "1".to_string()),
        ];
        let response = self
            .send(self.client.get(self.table_url(kind)).query(&query))
            .await?;
        Ok(Self::rows(response).await?.into_iter().next())
    }

    async fn create(
        &self,
        kind: EntityKind,
        row: RemoteRow,
        idempotency_key: &str,
    ) -> BackendResult<RemoteRow> {
        let account_id = row
            .get("account_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let business_id = row
            .get(kind.business_key())
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                BackendError::Rejected(format!("{kind} create is missing a business key"))
            })?
            .to_string();

        let request = self
            .client
            .post(self.table_url(kind))
            .query(&[("on_conflict", kind.business_key())])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .header("Idempotency-Key", idempotency_key)
            .json(&row);
        let inserted = Self::rows(self.send(request).await?).await?;

        if let Some(row) = inserted.into_iter().next() {
            return Ok(row);
        }
        // Duplicate ignored: the row already exists from an earlier delivery.
        tracing::debug!(%kind, %business_id, "Create replay matched existing row");
        self.fetch(kind, &account_id, &business_id)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("{kind} {business_id}")))
    }

    async fn update(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
        row: RemoteRow,
    ) -> BackendResult<RemoteRow> {
        let incoming = row_version(&row);
        let request = self
            .client
            .patch(self.table_url(kind))
            .query(&update_query(kind, account_id, business_id, incoming))
            .header("Prefer", "return=representation")
            .json(&row);

        if let Some(updated) = Self::rows(self.send(request).await?).await?.into_iter().next() {
            return Ok(updated);
        }
        let current = self.fetch(kind, account_id, business_id).await?;
        Err(unmatched_update(kind, business_id, incoming, current.as_ref()))
    }

    async fn delete(
        &self,
        kind: EntityKind,
        account_id: &str,
        business_id: &str,
    ) -> BackendResult<()> {
        let query = [
            ("account_id", eq(account_id)),
            (kind.business_key(), eq(business_id)),
        ];
        self.send(self.client.delete(self.table_url(kind)).query(&query))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_config() {
        assert!(RestBackend::new(&BackendConfig::default()).is_err());
        assert!(RestBackend::new(&BackendConfig::new("example.com", "key")).is_err());
        assert!(RestBackend::new(&BackendConfig::new("https://db.example.com", " ")).is_err());
    }

    #[test]
    fn new_trims_trailing_slash() {
        let backend = RestBackend::new(&BackendConfig::new("https://db.example.com/", "key"))
            .unwrap();
        assert_eq!(backend.base_url(), "https://db.example.com");
        assert_eq!(
            backend.table_url(EntityKind::Item),
            "https://db.example.com/rest/v1/items"
        );
    }

    #[test]
    fn classify_status_separates_transient_from_permanent() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_transient());
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "stale"),
            BackendError::VersionConflict(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "{\"message\":\"bad\"}"),
            BackendError::Rejected(_)
        ));
    }

    #[test]
    fn update_query_guards_on_version() {
        let query = update_query(EntityKind::Item, "acct", "item-1", 4);
        assert_eq!(
            query,
            [
                ("account_id", "eq.acct".to_string()),
                ("item_id", "eq.item-1".to_string()),
                ("version", "lte.4".to_string()),
            ]
        );
    }

    #[test]
    fn unmatched_update_separates_missing_from_stale() {
        assert!(matches!(
            unmatched_update(EntityKind::Item, "item-1", 4, None),
            BackendError::NotFound(_)
        ));

        let mut ahead = RemoteRow::new();
        ahead.insert("item_id".into(), "item-1".into());
        ahead.insert("version".into(), 6.into());
        match unmatched_update(EntityKind::Item, "item-1", 4, Some(&ahead)) {
            BackendError::VersionConflict(detail) => {
                assert!(detail.contains("version 6"));
                assert!(detail.contains("carried 4"));
            }
            other => panic!("expected version conflict, got {other:?}"),
        }
    }

    #[test]
    fn is_configured_requires_url_and_key() {
        assert!(!BackendConfig::default().is_configured());
        assert!(BackendConfig::new("https://db.example.com", "key").is_configured());
    }
}
