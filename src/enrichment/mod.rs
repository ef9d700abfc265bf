//! Background classification of window distractions.
//!
//! The coordinator hands over `(title, process)` when a window event is
//! created; the verdict comes back as [`Feedback::Enriched`]. Failures leave
//! the event without enrichment and are never retried.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{coordinator::Feedback, error::EngineError, providers::Classifier};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRequest {
    pub event_id: Uuid,
    pub window_title: String,
    pub process_name: String,
}

pub struct Enricher {
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    feedback: mpsc::UnboundedSender<Feedback>,
}

impl Enricher {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        timeout: Duration,
        feedback: mpsc::UnboundedSender<Feedback>,
    ) -> Self {
        Self {
            classifier,
            timeout,
            feedback,
        }
    }

    /// Assessments run concurrently. Cancelling aborts the ones in flight;
    /// a closed request channel lets them finish first.
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<EnrichmentRequest>,
        cancel_token: CancellationToken,
    ) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                maybe_request = requests.recv() => match maybe_request {
                    Some(request) => {
                        log_debug!("assessing {} ({})", request.event_id, request.process_name);
                        in_flight.spawn(assess(
                            Arc::clone(&self.classifier),
                            self.timeout,
                            self.feedback.clone(),
                            request,
                        ));
                    }
                    None => break,
                },
                Some(joined) = in_flight.join_next() => {
                    if let Err(err) = joined {
                        log_error!("assessment task failed: {err}");
                    }
                }
                _ = cancel_token.cancelled() => {
                    if !in_flight.is_empty() {
                        log_info!("enricher cancelled with {} assessments in flight", in_flight.len());
                    }
                    in_flight.abort_all();
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                joined = in_flight.join_next() => match joined {
                    Some(Err(err)) if !err.is_cancelled() => log_error!("assessment task failed: {err}"),
                    Some(_) => {}
                    None => break,
                },
                _ = cancel_token.cancelled() => {
                    in_flight.abort_all();
                    break;
                }
            }
        }
        log_info!("enricher shutting down");
    }
}

async fn assess(
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    feedback: mpsc::UnboundedSender<Feedback>,
    request: EnrichmentRequest,
) {
    let call = classifier.assess(&request.window_title, &request.process_name, timeout);
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(enrichment)) => Ok(enrichment),
        Ok(Err(err)) => Err(EngineError::ClassifierError(format!("{err:#}"))),
        Err(_) => Err(EngineError::ClassifierTimeout(timeout.as_secs_f64())),
    };

    match result {
        Ok(enrichment) => {
            let _ = feedback.send(Feedback::Enriched {
                event_id: request.event_id,
                enrichment,
            });
        }
        Err(err) => log_warn!("{err}; {} stays unenriched", request.event_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::ApplicationCategory,
        test_support::{ClassifierMode, FakeClassifier},
    };

    fn request() -> EnrichmentRequest {
        EnrichmentRequest {
            event_id: Uuid::new_v4(),
            window_title: "YouTube - Home".into(),
            process_name: "chrome.exe".into(),
        }
    }

    async fn run_once(mode: ClassifierMode, timeout: Duration) -> Option<Feedback> {
        let classifier = Arc::new(FakeClassifier::new(mode));
        let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::channel(4);
        let enricher = Enricher::new(classifier, timeout, feedback_tx);

        request_tx.send(request()).await.unwrap();
        drop(request_tx);
        enricher.run(request_rx, CancellationToken::new()).await;
        feedback_rx.try_recv().ok()
    }

    #[tokio::test]
    async fn success_reports_enrichment() {
        let feedback = run_once(
            ClassifierMode::Succeed(ApplicationCategory::Streaming),
            Duration::from_secs(1),
        )
        .await;
        match feedback {
            Some(Feedback::Enriched { enrichment, .. }) => {
                assert_eq!(enrichment.category, ApplicationCategory::Streaming)
            }
            other => panic!("expected enrichment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_reports_nothing() {
        assert!(run_once(ClassifierMode::Fail, Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn slow_classifier_times_out() {
        let feedback = run_once(
            ClassifierMode::Hang(Duration::from_secs(5)),
            Duration::from_millis(20),
        )
        .await;
        assert!(feedback.is_none());
    }
}
