//! Conditional upload of the coverage report.
//!
//! Publishing is gated separately from fixture access. A missing reporter
//! credential skips the upload; it never fails the pipeline on its own.

use crate::credentials::{GateDecision, PublishCredentials};
use crate::errors::PublishError;
use crate::runner::CoverageReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Default reporting endpoint; `{commit}` and `{language}` are substituted.
pub const DEFAULT_PUBLISH_ENDPOINT: &str = "https://api.codacy.com/2.0/coverage/{commit}/{language}";

/// Header carrying the reporter identity.
pub const REPORTER_HEADER: &str = "project-token";

/// Client for the external coverage-reporting service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// Uploads `report` under `reporter_id`.
    async fn upload(&self, report: &CoverageReport, reporter_id: &str) -> Result<(), PublishError>;
}

/// What the publish step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum PublishOutcome {
    /// The report was accepted by the service.
    Published,
    /// The upload was not attempted.
    Skipped(String),
}

impl PublishOutcome {
    /// Returns true if the report was uploaded.
    #[must_use]
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published)
    }
}

/// Uploads coverage when the publish gate allows it.
#[derive(Clone)]
pub struct ReportPublisher {
    client: Arc<dyn PublishClient>,
}

impl std::fmt::Debug for ReportPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportPublisher").finish_non_exhaustive()
    }
}

impl ReportPublisher {
    /// Creates a publisher around `client`.
    #[must_use]
    pub fn new(client: Arc<dyn PublishClient>) -> Self {
        Self { client }
    }

    /// Publishes `report` if `gate` is granted.
    ///
    /// A denied gate, or a granted gate without usable credentials, yields
    /// [`PublishOutcome::Skipped`] and never touches the client.
    pub async fn publish(
        &self,
        report: &CoverageReport,
        gate: GateDecision,
        credentials: Option<&PublishCredentials>,
    ) -> Result<PublishOutcome, PublishError> {
        if !gate.is_granted() {
            info!("Publish credentials not present; skipping coverage upload");
            return Ok(PublishOutcome::Skipped("publish credentials not present".to_string()));
        }
        let Some(credentials) = credentials else {
            warn!("Publish gate granted without a reporter identity; skipping coverage upload");
            return Ok(PublishOutcome::Skipped("reporter identity unavailable".to_string()));
        };

        info!(report = %report.path.display(), "Uploading coverage report");
        self.client.upload(report, &credentials.reporter_id).await?;
        info!("Coverage report published");
        Ok(PublishOutcome::Published)
    }
}

/// Substitutes `{commit}` and `{language}` in an endpoint template.
#[must_use]
pub fn render_endpoint(template: &str, commit: &str, language: &str) -> String {
    template.replace("{commit}", commit).replace("{language}", language)
}

#[cfg(feature = "http-publish")]
pub use http::HttpPublishClient;

#[cfg(feature = "http-publish")]
mod http {
    use super::{render_endpoint, PublishClient, REPORTER_HEADER};
    use crate::errors::PublishError;
    use crate::runner::CoverageReport;
    use async_trait::async_trait;
    use std::time::Duration;
    use tracing::debug;

    const MAX_BODY_CHARS: usize = 512;

    /// Uploads coverage over HTTPS with `reqwest`.
    #[derive(Debug, Clone)]
    pub struct HttpPublishClient {
        client: reqwest::Client,
        url: String,
    }

    impl HttpPublishClient {
        /// Creates a client posting to `endpoint` for `commit`.
        pub fn new(
            endpoint: &str,
            commit: &str,
            language: &str,
            timeout: Option<Duration>,
        ) -> Result<Self, PublishError> {
            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }
            let client = builder
                .build()
                .map_err(|e| PublishError::Transport(e.to_string()))?;
            Ok(Self {
                client,
                url: render_endpoint(endpoint, commit, language),
            })
        }

        /// The resolved upload URL.
        #[must_use]
        pub fn url(&self) -> &str {
            &self.url
        }
    }

    #[async_trait]
    impl PublishClient for HttpPublishClient {
        async fn upload(
            &self,
            report: &CoverageReport,
            reporter_id: &str,
        ) -> Result<(), PublishError> {
            let body = tokio::fs::read(&report.path).await.map_err(|e| PublishError::Io {
                path: report.path.display().to_string(),
                message: e.to_string(),
            })?;

            debug!(url = %self.url, bytes = body.len(), "POST coverage report");
            let response = self
                .client
                .post(&self.url)
                .header(REPORTER_HEADER, reporter_id)
                .header(reqwest::header::CONTENT_TYPE, report.format.content_type())
                .body(body)
                .send()
                .await
                .map_err(|e| PublishError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let text = response.text().await.unwrap_or_default();
            Err(PublishError::Rejected {
                status: status.as_u16(),
                body: text.chars().take(MAX_BODY_CHARS).collect(),
            })
        }
    }
}

/// Client that fails every upload with a fixed reason.
///
/// Stands in when no real client can be built, e.g. without the
/// `http-publish` feature or without a commit to report against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailablePublishClient {
    reason: String,
}

impl UnavailablePublishClient {
    /// Creates a client failing with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PublishClient for UnavailablePublishClient {
    async fn upload(
        &self,
        _report: &CoverageReport,
        _reporter_id: &str,
    ) -> Result<(), PublishError> {
        Err(PublishError::Transport(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CoverageFormat;
    use mockall::predicate::eq;
    use std::path::PathBuf;

    fn report() -> CoverageReport {
        CoverageReport {
            path: PathBuf::from("coverage.xml"),
            format: CoverageFormat::Cobertura,
        }
    }

    fn creds() -> PublishCredentials {
        PublishCredentials {
            reporter_id: "token-123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_uploads_when_granted() {
        let mut client = MockPublishClient::new();
        client
            .expect_upload()
            .with(eq(report()), eq("token-123"))
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = ReportPublisher::new(Arc::new(client))
            .publish(&report(), GateDecision::Granted, Some(&creds()))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Published);
    }

    #[tokio::test]
    async fn test_publish_skips_without_contacting_service() {
        let mut client = MockPublishClient::new();
        client.expect_upload().times(0);

        let outcome = ReportPublisher::new(Arc::new(client))
            .publish(&report(), GateDecision::Denied, None)
            .await
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::Skipped(_)));
        assert!(!outcome.is_published());
    }

    #[tokio::test]
    async fn test_publish_propagates_rejection() {
        let mut client = MockPublishClient::new();
        client.expect_upload().returning(|_, _| {
            Err(PublishError::Rejected {
                status: 401,
                body: "bad token".to_string(),
            })
        });

        let err = ReportPublisher::new(Arc::new(client))
            .publish(&report(), GateDecision::Granted, Some(&creds()))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Rejected { status: 401, .. }));
    }

    #[test]
    fn test_render_endpoint() {
        assert_eq!(
            render_endpoint(DEFAULT_PUBLISH_ENDPOINT, "abc123", "python"),
            "https://api.codacy.com/2.0/coverage/abc123/python"
        );
    }

    #[tokio::test]
    async fn test_unavailable_client_errors() {
        let err = UnavailablePublishClient::new("no commit sha")
            .upload(&report(), "x")
            .await
            .unwrap_err();
        assert_eq!(err, PublishError::Transport("no commit sha".to_string()));
    }

    #[test]
    fn test_outcome_serializes_with_reason() {
        let json = serde_json::to_value(PublishOutcome::Skipped("no token".into())).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "skipped", "reason": "no token"}));
    }
}
