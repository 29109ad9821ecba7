use serde_json::json;
use siphon::{
    config::Config,
    fetcher::HttpFetcher,
    orchestrator::{Orchestrator, RunOutcome, RunResult},
    store::{Store, UploadStatus},
    uploader::HttpIngestionClient,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

async fn mount_site(site: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/hc/en-us"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    r#"<html><body>
                    <header><a href="/hc/signin">Sign in</a></header>
                    <main><ul>
                      <li><a href="/hc/articles/1-pairing?utm_source=home">Pairing</a></li>
                      <li><a href="/hc/articles/2-playlists/">Playlists</a></li>
                      <li><a href="https://elsewhere.example.org/promo">Promo</a></li>
                    </ul></main></body></html>"#,
                )
                .insert_header("Content-Type", "text/html; charset=utf-8"),
        )
        .mount(site)
        .await;

    for (slug, title) in [("1-pairing", "How to pair a screen"), ("2-playlists", "Building playlists")] {
        Mock::given(method("GET"))
            .and(path(format!("/hc/articles/{slug}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(
                        "<html><head><title>{title} | Help Center</title></head><body>\
                         <nav>Home / Articles</nav>\
                         <article><h1>{title}</h1><p>Step one of {title}.</p><ul><li>Open the app</li><li>Tap add</li></ul>\
                         <p>That's all for now!</p></article>\
                         <footer>Copyright</footer></body></html>"
                    ))
                    .insert_header("Content-Type", "text/html; charset=utf-8"),
            )
            .mount(site)
            .await;
    }
}

async fn mount_backend(backend: &MockServer, site: &MockServer) {
    let base = site.uri();
    Mock::given(method("POST"))
        .and(path("/v1/documents/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "url": format!("{base}/hc/articles/1-pairing"), "remote_id": "file-1" },
                { "url": format!("{base}/hc/articles/2-playlists"), "remote_id": "file-2" }
            ]
        })))
        .expect(1)
        .mount(backend)
        .await;
}

async fn run(site: &MockServer, backend: &MockServer, state: &TempDir) -> RunResult {
    let config = Config::new(
        "sk-test",
        Url::parse(&format!("{}/hc/en-us", site.uri())).unwrap(),
        state.path(),
    )
    .with_ingest_endpoint(Url::parse(&format!("{}/v1", backend.uri())).unwrap())
    .with_batch_pause(Duration::ZERO)
    .with_request_timeout(Duration::from_secs(5));

    let store = Store::open(config.state_dir()).unwrap();
    let fetcher = HttpFetcher::new(config.request_timeout()).unwrap();
    let api = HttpIngestionClient::new(
        config.ingest_endpoint().clone(),
        config.api_key(),
        config.request_timeout(),
    )
    .unwrap();

    Orchestrator::new(config, store, fetcher, api)
        .unwrap()
        .run(CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_end_to_end_run_is_idempotent() {
    let site = MockServer::start().await;
    let backend = MockServer::start().await;
    let state = TempDir::new().unwrap();
    mount_site(&site).await;
    // `expect(1)`: the second run must not submit anything
    mount_backend(&backend, &site).await;

    let first = run(&site, &backend, &state).await;
    assert_eq!(first.outcome, RunOutcome::Completed);
    assert_eq!(first.articles_seen, 2);
    assert_eq!(first.articles_uploaded, 2);
    assert_eq!(first.batches, 1);

    let second = run(&site, &backend, &state).await;
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.articles_new_or_changed, 0);
    assert_eq!(second.batches, 0);

    let store = Store::open(state.path()).unwrap();
    let record = store
        .get(&format!("{}/hc/articles/1-pairing", site.uri()))
        .unwrap();
    assert_eq!(record.status, UploadStatus::Uploaded);
    assert_eq!(record.remote_id.as_deref(), Some("file-1"));
    assert_eq!(record.title, "How to pair a screen");

    // Snapshot carries the cleaned body and the citation line
    let snapshot = std::fs::read_dir(state.path().join("articles"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().unwrap().to_str().unwrap().starts_with("how-to-pair"))
        .unwrap();
    let content = std::fs::read_to_string(snapshot).unwrap();
    assert!(content.contains(&format!("Article URL: {}/hc/articles/1-pairing", site.uri())));
    assert!(content.contains("- Open the app"));
    assert!(!content.contains("That's all"));
    assert!(!content.contains("Copyright"));
}

#[tokio::test]
async fn test_end_to_end_index_outage_is_fatal() {
    let site = MockServer::start().await;
    let backend = MockServer::start().await;
    let state = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/hc/en-us"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&site)
        .await;

    let result = run(&site, &backend, &state).await;

    assert_eq!(result.outcome, RunOutcome::Fatal);
    assert!(result.is_fatal());
    assert_eq!(result.articles_uploaded, 0);
}
