use std::time::Duration;

use futures::{stream, StreamExt};
use tracing::{debug, info};

use crate::{
    api::ApiClient,
    domain::{AppError, CatalogEntry, ProbeOutcome, ProbeResult},
};

/// Checks which catalog sources answer before any real transfer starts.
#[derive(Clone, Default)]
pub struct Prober {
    api_client: ApiClient,
}

impl Prober {
    pub fn new(api_client: ApiClient) -> Self {
        Self { api_client }
    }

    /// Probes every entry, at most `max_concurrency` at a time.
    ///
    /// Returns exactly one result per entry. A failed probe only makes that
    /// entry `Unreachable`; the call itself fails on malformed input only.
    pub async fn probe(
        &self,
        entries: &[CatalogEntry],
        timeout: Duration,
        max_concurrency: usize,
    ) -> Result<Vec<ProbeResult>, AppError> {
        if entries.is_empty() {
            return Err(AppError::invalid_argument("nothing to probe"));
        }
        if timeout.is_zero() {
            return Err(AppError::invalid_argument("probe timeout must be positive"));
        }
        if max_concurrency == 0 {
            return Err(AppError::invalid_argument(
                "probe concurrency must be at least 1",
            ));
        }

        let results: Vec<ProbeResult> = stream::iter(entries.iter().cloned())
            .map(|entry| self.probe_one(entry, timeout))
            .buffer_unordered(max_concurrency)
            .collect()
            .await;

        let unreachable = results.iter().filter(|r| !r.is_reachable()).count();
        info!(
            total = results.len(),
            unreachable, "Connectivity check finished"
        );

        Ok(results)
    }

    #[tracing::instrument(level = "debug", skip(self, entry), fields(name = %entry.name, url = %entry.url))]
    async fn probe_one(&self, entry: CatalogEntry, timeout: Duration) -> ProbeResult {
        let outcome = match self.api_client.probe(&entry.url, timeout).await {
            Ok(status) => ProbeOutcome::Reachable {
                status: status.as_u16(),
            },
            Err(e) => {
                let reason = e.reason();
                ProbeOutcome::Unreachable {
                    reason: if reason.trim().is_empty() {
                        "unreachable".to_string()
                    } else {
                        reason
                    },
                }
            }
        };

        debug!(outcome = ?outcome, "Probe finished");
        ProbeResult { entry, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, ProbeReport};
    use url::Url;

    fn entry(name: &str, url: &str) -> CatalogEntry {
        CatalogEntry::new(name, Category::Utilities, Url::parse(url).unwrap())
    }

    /// A localhost URL nothing listens on.
    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/setup.exe", port)
    }

    #[tokio::test]
    async fn test_one_unreachable_of_three() {
        let mut server = mockito::Server::new_async().await;
        let _a = server.mock("HEAD", "/a.exe").with_status(200).create_async().await;
        let _b = server.mock("HEAD", "/b.exe").with_status(405).create_async().await;

        let entries = vec![
            entry("A", &format!("{}/a.exe", server.url())),
            entry("B", &format!("{}/b.exe", server.url())),
            entry("C", &closed_port_url().await),
        ];

        let results = Prober::default()
            .probe(&entries, Duration::from_secs(5), 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);

        let report = ProbeReport::from(results);
        assert_eq!(report.reachable.len(), 2);
        assert_eq!(report.unreachable.len(), 1);

        let (excluded, reason) = &report.unreachable[0];
        assert_eq!(excluded.name, "C");
        assert!(!reason.is_empty());
    }

    #[tokio::test]
    async fn test_result_count_matches_input() {
        let mut entries = Vec::new();
        for i in 0..7 {
            entries.push(entry(&format!("Dead {i}"), &closed_port_url().await));
        }

        let results = Prober::default()
            .probe(&entries, Duration::from_secs(2), 3)
            .await
            .unwrap();
        assert_eq!(results.len(), entries.len());
        assert!(results.iter().all(|r| !r.is_reachable()));
    }

    #[tokio::test]
    async fn test_probe_can_be_repeated() {
        let mut server = mockito::Server::new_async().await;
        let _a = server
            .mock("HEAD", "/a.exe")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;
        let entries = vec![entry("A", &format!("{}/a.exe", server.url()))];

        let prober = Prober::default();
        for _ in 0..2 {
            let results = prober.probe(&entries, Duration::from_secs(5), 1).await.unwrap();
            assert!(results[0].is_reachable());
        }
        _a.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejects_malformed_input() {
        let prober = Prober::default();
        let entries = vec![entry("A", "http://127.0.0.1:9/a.exe")];

        assert!(matches!(
            prober.probe(&[], Duration::from_secs(1), 1).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            prober.probe(&entries, Duration::ZERO, 1).await,
            Err(AppError::InvalidArgument(_))
        ));
        assert!(matches!(
            prober.probe(&entries, Duration::from_secs(1), 0).await,
            Err(AppError::InvalidArgument(_))
        ));
    }
}
