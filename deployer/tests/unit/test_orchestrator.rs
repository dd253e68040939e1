//! Deployment orchestration tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use secrecy::SecretString;
use tokio_test::{assert_err, assert_ok};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use site_deployer::deploy::fsm::DeploymentStatus;
use site_deployer::http::client::{HttpProviderClient, ProviderEndpoint};
use site_deployer::http::error::{ProviderError, TransportCode};
use site_deployer::http::fetch::HttpSiteFetcher;
use site_deployer::models::deployment::{Deployment, DeploymentFile};
use site_deployer::notify::NotificationKind;
use site_deployer::queue::{DeployJob, JobContext, JobHandler};
use site_deployer::store::DeploymentStore;
use site_deployer::validate::live::{CheckName, LiveCheckError};
use site_deployer::validate::preflight::{PreflightValidator, ValidationErrorKind};

use crate::support::{
    acknowledged, fast_options, fast_policy, FlakyStore, Harness, ScriptedProvider, StaticFetcher, HTML,
    WEBSITE_ID,
};

const PROVIDER: &str = "static-host";

fn assert_finalized(deployment: &Deployment) {
    assert!(deployment.is_terminal(), "status is {}", deployment.status);
    assert!(deployment.completed_at.is_some());
    assert!(deployment.build_time_ms.is_some());
}

fn unavailable() -> Result<site_deployer::http::client::ProviderDeployment, ProviderError> {
    Err(ProviderError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "maintenance".to_string(),
    })
}

// ============================== PRE-FLIGHT ====================================== //

#[test]
fn test_valid_bundle_passes_preflight() {
    let result = PreflightValidator::default()
        .validate_deployment(&[DeploymentFile::new("index.html", HTML)]);
    assert!(result.valid);
    assert!(result.errors.is_empty());
}

#[test]
fn test_missing_entry_file_is_reported() {
    let result = PreflightValidator::default()
        .validate_deployment(&[DeploymentFile::new("about.html", HTML)]);
    assert!(!result.valid);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ValidationErrorKind::MissingFile);
    assert!(result.errors[0].message.contains("index.html"));
}

#[test]
fn test_oversized_file_is_reported() {
    let big = "a".repeat(5 * 1024 * 1024);
    let result = PreflightValidator::default().validate_deployment(&[
        DeploymentFile::new("index.html", HTML),
        DeploymentFile::new("assets/blob.txt", big),
    ]);
    assert!(!result.valid);
    let error = result.error(ValidationErrorKind::FileTooLarge).unwrap();
    assert!(error.message.contains("exceeds maximum allowed size"));
}

#[test]
fn test_one_error_per_violated_rule() {
    let result = PreflightValidator::default().validate_deployment(&[
        DeploymentFile::new("a.html", "<html><body><div>Hello</body></html>"),
        DeploymentFile::new("b.html", "<html><body>Hello</body>"),
        DeploymentFile::new("site.css", "body { color: red;"),
    ]);

    let kinds: Vec<_> = result.errors.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&ValidationErrorKind::MissingFile));
    assert!(kinds.contains(&ValidationErrorKind::InvalidHtml));
    assert!(kinds.contains(&ValidationErrorKind::InvalidCss));
    assert_eq!(result.valid, result.errors.is_empty());
}

// =============================== DEPLOYING ====================================== //

#[tokio::test]
async fn test_successful_deployment() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-123", "https://x.test")]));
    let mut harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    let queued = harness.queued().await;

    let deployment = assert_ok!(
        harness
            .orchestrator
            .deploy_to_provider(queued.clone(), PROVIDER, &fast_policy(3))
            .await
    );

    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(deployment.provider_deployment_id.as_deref(), Some("p-123"));
    assert_eq!(deployment.url.as_deref(), Some("https://x.test"));
    assert!(deployment.error_message.is_none());
    assert_finalized(&deployment);
    assert_eq!(provider.calls(), 1);

    let stored = harness.store.find(&queued.id).await.unwrap().unwrap();
    assert_eq!(stored, deployment);

    let notification = harness.notifications.try_recv().unwrap();
    assert_eq!(notification.kind, NotificationKind::DeploymentSucceeded);
    assert_eq!(notification.website_id, WEBSITE_ID);

    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.started, 1);
    assert_eq!(metrics.succeeded, 1);
    assert_eq!(metrics.provider_attempts, 1);
    assert_eq!(metrics.provider_retries, 0);
}

#[tokio::test]
async fn test_retryable_failure_then_success() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(ProviderError::transport(TransportCode::ConnectionRefused, "connection refused")),
        acknowledged("p-123", "https://x.test"),
    ]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    let queued = harness.queued().await;

    let deployment = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(3))
        .await
        .unwrap();

    assert_eq!(provider.calls(), 2);
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(harness.metrics.snapshot().provider_retries, 1);
}

#[tokio::test]
async fn test_retries_are_bounded_by_attempts() {
    let provider = Arc::new(ScriptedProvider::new(vec![unavailable()]));
    let mut harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    let queued = harness.queued().await;

    let deployment = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(3))
        .await
        .unwrap();

    assert_eq!(provider.calls(), 3);
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_finalized(&deployment);
    let message = deployment.error_message.unwrap();
    assert!(message.starts_with("API Error [server_error]"), "{}", message);
    assert!(message.contains("maintenance"));
    assert!(message.ends_with("(after 3 attempt(s))"));
    assert!(deployment.provider_deployment_id.is_none());

    let notification = harness.notifications.try_recv().unwrap();
    assert_eq!(notification.kind, NotificationKind::DeploymentFailed);
    assert_eq!(harness.metrics.snapshot().failed, 1);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Status {
        status: StatusCode::UNAUTHORIZED,
        message: "bad token".to_string(),
    })]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    let queued = harness.queued().await;

    let deployment = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(5))
        .await
        .unwrap();

    assert_eq!(provider.calls(), 1);
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment
        .error_message
        .unwrap()
        .starts_with("API Error [authentication]"));
}

#[tokio::test]
async fn test_invalid_bundle_never_reaches_provider() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    harness
        .sites
        .put(WEBSITE_ID, vec![DeploymentFile::new("about.html", HTML)]);
    let queued = harness.queued().await;

    let deployment = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(3))
        .await
        .unwrap();

    assert_eq!(provider.calls(), 0);
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_finalized(&deployment);
    let message = deployment.error_message.unwrap();
    assert!(message.starts_with("Validation failed: "));
    assert!(message.contains("Missing required file"));
    assert_eq!(harness.metrics.snapshot().preflight_rejections, 1);
}

#[tokio::test]
async fn test_failed_live_check_fails_deployment() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-123", "https://x.test")]));
    let fetcher = Arc::new(StaticFetcher {
        status: 404,
        body: HTML.to_string(),
    });
    let harness = Harness::new(provider, fetcher);
    let queued = harness.queued().await;

    let deployment = harness
        .orchestrator
        .deploy_to_provider(queued.clone(), PROVIDER, &fast_policy(3))
        .await
        .unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(
        deployment.error_message.as_deref(),
        Some("Deployed website validation failed: page_load: Unexpected status code: 404")
    );
    // The provider accepted the bundle, so its identifiers stay on the record
    assert_eq!(deployment.provider_deployment_id.as_deref(), Some("p-123"));
    assert_eq!(deployment.url.as_deref(), Some("https://x.test"));

    let report = harness
        .orchestrator
        .validate_deployed_website(&queued.id)
        .await
        .unwrap();
    assert!(!report.valid);
    let page_load = report.check(CheckName::PageLoad).unwrap();
    assert!(!page_load.passed);
    assert!(page_load
        .error
        .as_deref()
        .unwrap()
        .contains("Unexpected status code: 404"));
    assert!(report.check(CheckName::Accessibility).unwrap().passed);
}

#[tokio::test]
async fn test_live_check_of_unknown_deployment() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::new(provider, Arc::new(StaticFetcher::healthy()));

    let err = harness
        .orchestrator
        .validate_deployed_website("nope")
        .await
        .unwrap_err();
    assert!(matches!(err, LiveCheckError::NotFound(_)));
    assert_eq!(err.to_string(), "Deployment not found");
}

#[tokio::test]
async fn test_terminal_deployment_is_returned_unchanged() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));
    let queued = harness.queued().await;
    let done = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(1))
        .await
        .unwrap();

    let again = harness
        .orchestrator
        .deploy_to_provider(done.clone(), PROVIDER, &fast_policy(1))
        .await
        .unwrap();
    assert_eq!(again, done);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_unpersisted_deployment_is_an_infrastructure_error() {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::new(provider.clone(), Arc::new(StaticFetcher::healthy()));

    // Never written to the store, so the first save fails
    let orphan = Deployment::new(crate::support::new_deployment());
    assert_err!(
        harness
            .orchestrator
            .deploy_to_provider(orphan, PROVIDER, &fast_policy(1))
            .await
    );
    assert_eq!(provider.calls(), 0);
}

fn flaky_harness(fails: impl Fn(u32) -> bool + Send + Sync + 'static) -> (Harness, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", "https://x.test")]));
    let harness = Harness::with_store(provider.clone(), Arc::new(StaticFetcher::healthy()), |store| {
        Arc::new(FlakyStore::new(store, fails)) as Arc<dyn DeploymentStore>
    });
    (harness, provider)
}

fn job_for(deployment: &Deployment) -> (DeployJob, JobContext) {
    (
        DeployJob {
            deployment_id: deployment.id.clone(),
            provider: PROVIDER.to_string(),
        },
        JobContext {
            job_id: "job-1".to_string(),
            attempt: 1,
            options: fast_options(1),
        },
    )
}

#[tokio::test]
async fn test_save_failure_after_ack_still_persists_failed_record() {
    // Saves: #1 start, #2 provider ack, #3 final
    let (mut harness, provider) = flaky_harness(|n| n == 2);
    let queued = harness.queued().await;

    let err = harness
        .orchestrator
        .deploy_to_provider(queued.clone(), PROVIDER, &fast_policy(1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("save #2 blipped"));
    assert_eq!(provider.calls(), 1);

    let stored = harness.store.find(&queued.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
    assert_finalized(&stored);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Deployment aborted:"));
    assert_eq!(stored.provider_deployment_id.as_deref(), Some("p-1"));
    assert_eq!(stored.url.as_deref(), Some("https://x.test"));

    let notification = harness.notifications.try_recv().unwrap();
    assert_eq!(notification.kind, NotificationKind::DeploymentFailed);
}

#[tokio::test]
async fn test_job_with_finalized_record_fails_permanently() {
    let (harness, _provider) = flaky_harness(|n| n == 2);
    let queued = harness.queued().await;
    let (job, ctx) = job_for(&queued);

    let failure = harness.orchestrator.handle(&job, &ctx).await.unwrap_err();
    assert!(!failure.retryable);
    assert!(failure.message.contains("save #2 blipped"));
}

#[tokio::test]
async fn test_job_with_unsaved_outcome_is_retried() {
    let (harness, _provider) = flaky_harness(|n| n >= 2);
    let queued = harness.queued().await;
    let (job, ctx) = job_for(&queued);

    let failure = harness.orchestrator.handle(&job, &ctx).await.unwrap_err();
    assert!(failure.retryable);

    // Final save was lost too, so the record never left `in_progress`
    let stored = harness.store.find(&queued.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::InProgress);
    assert!(stored.completed_at.is_none());
}

#[tokio::test]
async fn test_live_check_of_truncated_error_page() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        socket
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 1000\r\n\r\n<html>")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let site_url = format!("http://{}/", addr);
    let provider = Arc::new(ScriptedProvider::new(vec![acknowledged("p-1", &site_url)]));
    let fetcher = Arc::new(HttpSiteFetcher::new(Duration::from_secs(5)).unwrap());
    let harness = Harness::new(provider, fetcher);
    let queued = harness.queued().await;

    let deployment = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(1))
        .await
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(deployment.url.as_deref(), Some(site_url.as_str()));

    let message = deployment.error_message.unwrap();
    assert!(message.contains("page_load: Unexpected status code: 500"), "{}", message);
    assert!(message.contains("html_structure: Failed to read response body"), "{}", message);
    assert!(!message.contains("accessibility"), "{}", message);
}

#[tokio::test]
async fn test_deploys_over_http() {
    let server = MockServer::start().await;
    let site_url = format!("{}/live/site-1", server.uri());

    Mock::given(method("POST"))
        .and(path("/api/deploy"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"error": "busy"})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/deploy"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "deploymentId": "p-777",
            "url": site_url,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/live/site-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
        .mount(&server)
        .await;

    let mut endpoints = HashMap::new();
    endpoints.insert(
        PROVIDER.to_string(),
        ProviderEndpoint {
            base_url: Url::parse(&format!("{}/api", server.uri())).unwrap(),
            api_token: Some(SecretString::from("tok".to_string())),
            timeout: Duration::from_secs(5),
        },
    );
    let provider = Arc::new(HttpProviderClient::new(endpoints).unwrap());
    let fetcher = Arc::new(HttpSiteFetcher::new(Duration::from_secs(5)).unwrap());
    let harness = Harness::new(provider, fetcher);
    let queued = harness.queued().await;

    let deployment = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(3))
        .await
        .unwrap();

    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(deployment.provider_deployment_id.as_deref(), Some("p-777"));
    assert_eq!(harness.metrics.snapshot().provider_attempts, 2);
}

#[tokio::test]
async fn test_binary_asset_is_deployed_base64_encoded() {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/deploy"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "deploymentId": "p-1",
            "url": format!("{}/live", server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut endpoints = HashMap::new();
    endpoints.insert(
        PROVIDER.to_string(),
        ProviderEndpoint {
            base_url: Url::parse(&format!("{}/api", server.uri())).unwrap(),
            api_token: None,
            timeout: Duration::from_secs(5),
        },
    );
    let provider = Arc::new(HttpProviderClient::new(endpoints).unwrap());
    let harness = Harness::new(provider, Arc::new(StaticFetcher::healthy()));

    let png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0xfe, 0xff];
    let mut files = crate::support::valid_files();
    files.push(DeploymentFile::new("img/logo.png", png.clone()));
    harness.sites.put(WEBSITE_ID, files);

    let queued = harness.queued().await;
    let deployment = harness
        .orchestrator
        .deploy_to_provider(queued, PROVIDER, &fast_policy(1))
        .await
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let files = body["files"].as_array().unwrap();

    let logo = files.iter().find(|f| f["path"] == "img/logo.png").unwrap();
    assert_eq!(logo["encoding"], "base64");
    assert_eq!(BASE64.decode(logo["content"].as_str().unwrap()).unwrap(), png);

    let index = files.iter().find(|f| f["path"] == "index.html").unwrap();
    assert_eq!(index["content"], HTML);
    assert!(index.get("encoding").is_none());
}
