//! Queue processing through the orchestrator

use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;

use site_deployer::deploy::fsm::DeploymentStatus;
use site_deployer::queue::{DeployJob, JobHandler, JobInfo, JobQueue, JobState, QueueError};
use site_deployer::store::DeploymentStore;

use crate::support::{acknowledged, fast_options, fast_policy, new_deployment, Harness, ScriptedProvider, StaticFetcher};

const PROVIDER: &str = "static-host";

async fn wait_for_state(queue: &dyn JobQueue, job_id: &str, state: JobState) -> JobInfo {
    let wait = async {
        loop {
            if let Some(job) = queue.get_job(job_id).await.unwrap() {
                if job.state == state {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("job {} never reached {}", job_id, state))
}

fn start(harness: &Harness) -> Arc<dyn JobHandler> {
    harness.orchestrator.clone()
}

#[tokio::test]
async fn test_requested_deployment_is_processed() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-123", "https://x.test")]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    assert_ok!(harness.queue.process(start(&harness)).await);

    let (deployment, handle) = harness
        .orchestrator
        .request_deployment(new_deployment(), PROVIDER, fast_options(3))
        .await
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Queued);

    let job = wait_for_state(harness.queue.as_ref(), &handle.id, JobState::Completed).await;
    assert_eq!(job.attempts_made, 1);
    assert_eq!(job.data.deployment_id, deployment.id);

    let stored = harness.store.find(&deployment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Success);
    assert_eq!(provider.calls(), 1);

    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.requested, 1);
    assert_eq!(metrics.succeeded, 1);

    harness.queue.shutdown().await;
}

#[tokio::test]
async fn test_provider_exhaustion_completes_the_job() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(
        site_deployer::http::error::ProviderError::Status {
            status: http::StatusCode::BAD_GATEWAY,
            message: "upstream".to_string(),
        },
    )]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    harness.queue.process(start(&harness)).await.unwrap();

    let (deployment, handle) = harness
        .orchestrator
        .request_deployment(new_deployment(), PROVIDER, fast_options(2))
        .await
        .unwrap();

    // The failure lives on the deployment; the queue does not run it again
    let job = wait_for_state(harness.queue.as_ref(), &handle.id, JobState::Completed).await;
    assert_eq!(job.attempts_made, 1);
    assert_eq!(provider.calls(), 2);

    let stored = harness.store.find(&deployment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
    assert!(stored.error_message.unwrap().contains("(after 2 attempt(s))"));

    harness.queue.shutdown().await;
}

#[tokio::test]
async fn test_missing_deployment_fails_permanently() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    harness.queue.process(start(&harness)).await.unwrap();

    let handle = harness
        .queue
        .enqueue(
            DeployJob {
                deployment_id: "ghost".to_string(),
                provider: PROVIDER.to_string(),
            },
            fast_options(3),
        )
        .await
        .unwrap();

    let job = wait_for_state(harness.queue.as_ref(), &handle.id, JobState::Failed).await;
    assert_eq!(job.attempts_made, 1);
    assert!(job.failed_reason.unwrap().contains("not found"));
    assert_eq!(provider.calls(), 0);

    harness.queue.shutdown().await;
}

#[tokio::test]
async fn test_redelivered_job_for_finished_deployment_is_skipped() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));

    let queued = harness.queued().await;
    let done = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(1))
        .await
        .unwrap();
    assert_eq!(done.status, DeploymentStatus::Success);

    harness.queue.process(start(&harness)).await.unwrap();
    let handle = harness
        .queue
        .enqueue(
            DeployJob {
                deployment_id: done.id.clone(),
                provider: PROVIDER.to_string(),
            },
            fast_options(3),
        )
        .await
        .unwrap();

    wait_for_state(harness.queue.as_ref(), &handle.id, JobState::Completed).await;
    assert_eq!(provider.calls(), 1);
    assert_eq!(harness.store.find(&done.id).await.unwrap().unwrap(), done);

    harness.queue.shutdown().await;
}

#[tokio::test]
async fn test_pending_job_is_not_duplicated() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::new(provider, Arc::new(StaticFetcher::healthy()));
    let job = DeployJob {
        deployment_id: "dep-1".to_string(),
        provider: PROVIDER.to_string(),
    };

    let first = harness.queue.enqueue(job.clone(), fast_options(3)).await.unwrap();
    let second = harness.queue.enqueue(job, fast_options(3)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(harness.queue.stats().await.unwrap().waiting, 1);
}

#[tokio::test]
async fn test_closed_queue_rejects_work() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::new(provider, Arc::new(StaticFetcher::healthy()));
    harness.queue.process(start(&harness)).await.unwrap();
    harness.queue.shutdown().await;

    let err = harness
        .orchestrator
        .request_deployment(new_deployment(), PROVIDER, fast_options(3))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        site_deployer::errors::DeployerError::QueueError(QueueError::Closed)
    ));
}
