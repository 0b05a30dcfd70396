//! Result sinks and the publisher that feeds them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::Client;
use scoreprobe::{CheckResult, Projection, event};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination for projected result documents
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    async fn index(&self, projection: &Projection) -> Result<()>;
}

/// Writes documents to an Elasticsearch-compatible document store
#[derive(Debug, Clone)]
pub struct Elasticsearch {
    client: Client,
    url: String,
    username: String,
    password: String,
}

impl Elasticsearch {
    pub fn new(settings: &config::Elasticsearch) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!settings.verify_certs)
            .connect_timeout(CONNECT_TIMEOUT.min(settings.timeout()))
            .timeout(settings.timeout())
            .build()
            .context("failed to build document store client")?;

        Ok(Self {
            client,
            url: settings.url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }
}

#[async_trait::async_trait]
impl ResultSink for Elasticsearch {
    async fn index(&self, projection: &Projection) -> Result<()> {
        let mut request = self
            .client
            .post(format!("{}/{}/_doc", self.url, projection.index))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(projection.body.clone());
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        request
            .send()
            .await
            .with_context(|| format!("failed to send document to {}", projection.index))?
            .error_for_status()
            .with_context(|| format!("document store rejected document for {}", projection.index))?;

        Ok(())
    }
}

/// Writes documents to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl ResultSink for LogSink {
    async fn index(&self, projection: &Projection) -> Result<()> {
        info!(
            index = %projection.index,
            audience = ?projection.audience,
            body = %String::from_utf8_lossy(&projection.body),
            "result document"
        );
        Ok(())
    }
}

/// Build the sink selected in the configuration
pub fn build(settings: &config::Sink) -> Result<Arc<dyn ResultSink>> {
    Ok(match settings {
        config::Sink::Log => Arc::new(LogSink),
        config::Sink::Elasticsearch(es) => Arc::new(Elasticsearch::new(es)?),
    })
}

/// Publish every result from `results` until the channel closes.
///
/// Each result is written on its own task so a slow sink never holds up
/// the round. Returns the number of documents written.
pub async fn publish(sink: Arc<dyn ResultSink>, mut results: mpsc::Receiver<CheckResult>) -> u64 {
    let mut tasks = JoinSet::new();
    let mut published = 0;

    while let Some(result) = results.recv().await {
        let sink = sink.clone();
        tasks.spawn(async move { write_result(sink.as_ref(), &result).await });

        while let Some(done) = tasks.try_join_next() {
            published += written(done);
        }
    }

    while let Some(done) = tasks.join_next().await {
        published += written(done);
    }

    debug!(published, "result queue closed");
    published
}

fn written(done: Result<u64, tokio::task::JoinError>) -> u64 {
    done.unwrap_or_else(|e| {
        error!("publish task failed: {e}");
        0
    })
}

async fn write_result(sink: &dyn ResultSink, result: &CheckResult) -> u64 {
    let projections = match event::project(result) {
        Ok(projections) => projections,
        Err(e) => {
            error!(check_id = %result.metadata.id, "failed to project result: {e}");
            return 0;
        }
    };

    let outcomes = join_all(projections.iter().map(|projection| sink.index(projection))).await;

    let mut count = 0;
    for (projection, outcome) in projections.iter().zip(outcomes) {
        match outcome {
            Ok(()) => count += 1,
            Err(e) => error!(
                check_id = %result.metadata.id,
                index = %projection.index,
                "failed to index result: {e:#}"
            ),
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreprobe::{Audience, CheckMetadata};
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recording {
        indices: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ResultSink for Recording {
        async fn index(&self, projection: &Projection) -> Result<()> {
            if projection.audience == Audience::Admin {
                anyhow::bail!("admin index unavailable");
            }
            self.indices.lock().unwrap().push(projection.index.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_counts_written_documents() {
        let sink = Arc::new(Recording::default());
        let (tx, rx) = mpsc::channel(4);

        for id in ["a", "b"] {
            let metadata = CheckMetadata::new(id, "Team01", "noop");
            tx.send(CheckResult::failure(metadata, "down")).await.unwrap();
        }
        drop(tx);

        let published = publish(sink.clone(), rx).await;

        assert_eq!(published, 4);
        let indices = sink.indices.lock().unwrap();
        assert_eq!(indices.len(), 4);
        assert!(indices.iter().all(|index| !index.starts_with("results-admin")));
        assert!(indices.iter().any(|index| index.starts_with("results-team01-")));
    }

    #[tokio::test]
    async fn test_stalled_document_store_does_not_block_publish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(60)))
            .mount(&server)
            .await;

        let sink = Elasticsearch::new(&config::Elasticsearch {
            url: server.uri(),
            username: String::new(),
            password: String::new(),
            verify_certs: true,
            timeout_seconds: 1,
        })
        .unwrap();

        let (tx, rx) = mpsc::channel(1);
        tx.send(CheckResult::failure(CheckMetadata::new("a", "team01", "noop"), "down")).await.unwrap();
        drop(tx);

        let published = tokio::time::timeout(Duration::from_secs(10), publish(Arc::new(sink), rx))
            .await
            .expect("publish must finish once the sink times out");
        assert_eq!(published, 0);
    }

    #[tokio::test]
    async fn test_log_sink_accepts_everything() {
        let metadata = CheckMetadata::new("a", "team01", "noop");
        let [generic, _, _] = event::project(&CheckResult::failure(metadata, "down")).unwrap();
        assert!(LogSink.index(&generic).await.is_ok());
    }
}
