// rdap-client-lib/tests/integration.rs

//! End-to-end query tests with network-free registry doubles

use async_trait::async_trait;
use parking_lot::Mutex;
use rdap_client_lib::protocols::{
    BootstrapDocument, BootstrapRegistry, Fetch, FetchContext, StaticBootstrapSource,
};
use rdap_client_lib::{
    ClientConfig, Identifier, MemorySharedCache, QueryOptions, RawResponse, RdapClient, RdapError,
    Redactor, TelemetryEvent, TelemetrySink, REDACTED,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DNS: &str = r#"{
    "version": "1.0",
    "publication": "2024-05-01T00:00:00Z",
    "services": [
        [["com", "net"], ["https://rdap.verisign.com/com/v1/"]],
        [["org"], ["https://rdap.publicinterestregistry.org/rdap/", "https://rdap.backup-pir.example/rdap/"]]
    ]
}"#;

const IPV4: &str = r#"{
    "version": "1.0",
    "services": [
        [["8.0.0.0/8"], ["https://rdap.arin.net/registry/", "http://rdap.arin.net/registry/"]],
        [["193.0.0.0/8"], ["https://rdap.db.ripe.net/"]]
    ]
}"#;

const IPV6: &str = r#"{"version": "1.0", "services": [[["2001:4800::/23"], ["https://rdap.arin.net/registry/"]]]}"#;

const ASN: &str = r#"{"version": "1.0", "services": [[["15000-16000"], ["https://rdap.arin.net/registry/"]]]}"#;

fn bootstrap() -> BootstrapRegistry {
    BootstrapRegistry::from_documents(&[
        (BootstrapDocument::Dns, DNS.as_bytes()),
        (BootstrapDocument::Ipv4, IPV4.as_bytes()),
        (BootstrapDocument::Ipv6, IPV6.as_bytes()),
        (BootstrapDocument::Asn, ASN.as_bytes()),
    ])
    .unwrap()
}

fn vcard() -> Value {
    json!(["vcard", [
        ["version", {}, "text", "4.0"],
        ["fn", {}, "text", "Network Abuse"],
        ["email", {}, "text", "abuse@example.net"],
        ["tel", {"type": ["work", "voice"]}, "uri", "tel:+1-650-555-0100"],
        ["adr", {"label": "1600 Example Pkwy\nMountain View"}, "text",
            ["", "", "1600 Example Pkwy", "Mountain View", "CA", "94043", "US"]]
    ]])
}

fn document_for(url: &Url) -> Value {
    let path = url.path();
    let last = path.rsplit('/').next().unwrap_or_default();
    if path.contains("/domain/") {
        json!({
            "objectClassName": "domain",
            "ldhName": last.to_uppercase(),
            "status": ["clientTransferProhibited"],
            "events": [{"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"}],
            "entities": [{
                "objectClassName": "entity",
                "handle": "REG-1",
                "roles": ["registrant"],
                "vcardArray": vcard()
            }]
        })
    } else if path.contains("/ip/") {
        json!({
            "objectClassName": "ip network",
            "handle": "NET-8-8-8-0-2",
            "startAddress": "8.8.8.0",
            "endAddress": "8.8.8.255",
            "ipVersion": "v4",
            "name": "GOGL",
            "type": "DIRECT ALLOCATION",
            "entities": [{
                "objectClassName": "entity",
                "handle": "ABUSE5250-ARIN",
                "roles": ["abuse"],
                "vcardArray": vcard()
            }]
        })
    } else {
        json!({
            "objectClassName": "autnum",
            "handle": format!("AS{}", last),
            "startAutnum": last.parse::<u32>().unwrap_or_default(),
            "endAutnum": last.parse::<u32>().unwrap_or_default(),
            "name": "EXAMPLE-AS"
        })
    }
}

/// Registry double: answers every RDAP path with a canned document.
#[derive(Default)]
struct FakeRegistry {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    failing_hosts: Vec<(&'static str, u16)>,
}

impl FakeRegistry {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn failing(host: &'static str, status: u16) -> Self {
        Self {
            failing_hosts: vec![(host, status)],
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetch for FakeRegistry {
    async fn fetch(&self, url: &Url, context: &FetchContext) -> Result<RawResponse, RdapError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let host = url.host_str().unwrap_or_default();
        if let Some((_, status)) = self.failing_hosts.iter().find(|(h, _)| *h == host) {
            return Err(RdapError::server(&context.registry, *status, "unavailable"));
        }
        if url.path().ends_with("/missing.com") {
            return Err(RdapError::server(&context.registry, 404, "Not Found"));
        }

        Ok(RawResponse {
            status: 200,
            body: serde_json::to_vec(&document_for(url)).unwrap(),
            registry: context.registry.clone(),
            url: url.clone(),
            remote_addr: "199.5.26.46".parse().unwrap(),
            latency: Duration::from_millis(12),
        })
    }
}

#[derive(Default)]
struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        self.events.lock().push(event.clone());
    }
}

fn client_with(fetch: Arc<FakeRegistry>, config: ClientConfig) -> RdapClient {
    RdapClient::builder()
        .config(config)
        .fetcher(fetch)
        .bootstrap_registry(bootstrap())
        .build()
        .unwrap()
}

fn client(fetch: Arc<FakeRegistry>) -> RdapClient {
    client_with(fetch, ClientConfig::default())
}

#[tokio::test]
async fn test_ip_lookup_then_cached() {
    let fetch = Arc::new(FakeRegistry::default());
    let client = client(fetch.clone());

    let first = client.query("8.8.8.8", &QueryOptions::default()).await.unwrap();
    assert_eq!(first.meta.registry, "arin");
    assert_eq!(first.object_class, "ip network");
    assert!(!first.meta.cached);
    let network = first.network.as_ref().unwrap();
    assert_eq!(network.start_address.to_string(), "8.8.8.0");
    assert_eq!(
        fetch.urls.lock().as_slice(),
        ["https://rdap.arin.net/registry/ip/8.8.8.8"]
    );

    let second = client.query("8.8.8.8", &QueryOptions::default()).await.unwrap();
    assert!(second.meta.cached);
    assert_eq!(second.identifier, first.identifier);
    assert_eq!(fetch.calls(), 1);
    assert_eq!(client.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_private_network_rejected_before_any_resolution() {
    let fetch = Arc::new(FakeRegistry::default());
    let source = Arc::new(StaticBootstrapSource::new(bootstrap()));
    let client = RdapClient::builder()
        .fetcher(fetch.clone())
        .bootstrap_source(source.clone())
        .build()
        .unwrap();

    let err = client
        .ip("192.168.0.0/16", &QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SSRF_PROTECTION_ERROR");
    assert_eq!(source.load_count(), 0);
    assert_eq!(fetch.calls(), 0);

    // A public target triggers the lazy bootstrap load.
    client.ip("8.8.8.8", &QueryOptions::default()).await.unwrap();
    assert_eq!(source.load_count(), 1);
}

#[tokio::test]
async fn test_invalid_input_rejected_before_network() {
    let fetch = Arc::new(FakeRegistry::default());
    let client = client(fetch.clone());

    for raw in ["not a domain!", "999.999.999.999", "AS999999999999"] {
        let err = client.query(raw, &QueryOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR", "{}", raw);
    }

    let err = client
        .query("example.com", &QueryOptions::default().with_legal_basis("nosy"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(fetch.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_queries_share_one_fetch() {
    let fetch = Arc::new(FakeRegistry::slow(Duration::from_millis(200)));
    let client = client(fetch.clone());

    let queries = (0..16).map(|_| {
        let client = client.clone();
        async move { client.query("example.com", &QueryOptions::default()).await }
    });
    let results = futures::future::join_all(queries).await;

    assert_eq!(fetch.calls(), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), first);
    }
}

#[tokio::test]
async fn test_failover_to_next_service_url() {
    let fetch = Arc::new(FakeRegistry::failing(
        "rdap.publicinterestregistry.org",
        503,
    ));
    let client = client(fetch.clone());

    let response = client
        .domain("example.org", &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(response.name.as_deref(), Some("example.org"));
    assert_eq!(
        response.meta.source_url,
        "https://rdap.backup-pir.example/rdap/domain/example.org"
    );
    assert_eq!(fetch.calls(), 2);
}

#[tokio::test]
async fn test_client_errors_do_not_fail_over() {
    let fetch = Arc::new(FakeRegistry::failing(
        "rdap.publicinterestregistry.org",
        400,
    ));
    let client = client(fetch.clone());

    let err = client
        .domain("example.org", &QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert_eq!(fetch.calls(), 1);
}

#[tokio::test]
async fn test_not_found_is_negatively_cached() {
    let fetch = Arc::new(FakeRegistry::default());
    let client = client(fetch.clone());

    let first = client
        .domain("missing.com", &QueryOptions::default())
        .await
        .unwrap_err();
    assert!(first.is_not_found());

    let second = client
        .domain("missing.com", &QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(second, first);
    assert_eq!(fetch.calls(), 1);
}

#[tokio::test]
async fn test_unknown_tld_reports_no_server() {
    let fetch = Arc::new(FakeRegistry::default());
    let client = client(fetch.clone());

    let err = client
        .domain("example.zz", &QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_SERVER_FOUND");
    assert_eq!(fetch.calls(), 0);
}

#[tokio::test]
async fn test_resolver_is_deterministic() {
    let fetch = Arc::new(FakeRegistry::default());
    let client = client(fetch);
    let com = Identifier::Domain("example.com".parse().unwrap());

    let first = client.resolver().resolve(&com).await.unwrap();
    let second = client.resolver().resolve(&com).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].as_str(), "https://rdap.verisign.com/com/v1/");

    // Only the HTTPS ARIN URL survives bootstrap parsing.
    let ip = Identifier::Ip("8.8.4.4".parse().unwrap());
    let urls = client.resolver().resolve(&ip).await.unwrap();
    assert_eq!(urls.len(), 1);
}

#[tokio::test]
async fn test_pii_is_redacted_and_redaction_is_idempotent() {
    let fetch = Arc::new(FakeRegistry::default());
    let client = client(fetch);

    let response = client.asn("AS15169", &QueryOptions::default()).await.unwrap();
    assert_eq!(response.autnum.as_ref().unwrap().start_autnum, 15169);

    let response = client
        .query("example.com", &QueryOptions::default().with_raw(true))
        .await
        .unwrap();
    assert!(response.meta.redacted);

    let text = serde_json::to_string(&response).unwrap();
    assert!(!text.contains("abuse@example.net"));
    assert!(!text.contains("650-555-0100"));
    assert!(!text.contains("1600 Example Pkwy"));

    let registrant = &response.entities[0];
    assert_eq!(registrant.contact.email.as_deref(), Some(REDACTED));
    assert_eq!(registrant.contact.name.as_deref(), Some("Network Abuse"));

    assert_eq!(Redactor::redact(response.clone()), response);
}

#[tokio::test]
async fn test_redaction_can_be_disabled_per_query() {
    let fetch = Arc::new(FakeRegistry::default());
    let client = client(fetch);

    let response = client
        .query(
            "example.com",
            &QueryOptions::default()
                .with_legal_basis("contract")
                .with_redaction(false),
        )
        .await
        .unwrap();
    assert!(!response.meta.redacted);
    assert_eq!(
        response.entities[0].contact.email.as_deref(),
        Some("abuse@example.net")
    );
}

#[tokio::test]
async fn test_shared_tier_serves_other_clients() {
    let shared = Arc::new(MemorySharedCache::new());
    let first_fetch = Arc::new(FakeRegistry::default());
    let second_fetch = Arc::new(FakeRegistry::default());

    let build = |fetch: Arc<FakeRegistry>| {
        RdapClient::builder()
            .fetcher(fetch)
            .bootstrap_registry(bootstrap())
            .shared_cache(shared.clone())
            .build()
            .unwrap()
    };
    let first = build(first_fetch.clone());
    let second = build(second_fetch.clone());

    first.query("example.net", &QueryOptions::default()).await.unwrap();
    let response = second.query("example.net", &QueryOptions::default()).await.unwrap();

    assert!(response.meta.cached);
    assert_eq!(first_fetch.calls(), 1);
    assert_eq!(second_fetch.calls(), 0);
    assert_eq!(second.cache_stats().shared_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_query_deadline() {
    let fetch = Arc::new(FakeRegistry::slow(Duration::from_secs(30)));
    let client = client(fetch);

    let err = client
        .query(
            "example.com",
            &QueryOptions::default().with_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TIMEOUT_ERROR");
}

#[tokio::test]
async fn test_query_telemetry() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let client = RdapClient::builder()
        .fetcher(Arc::new(FakeRegistry::default()))
        .bootstrap_registry(bootstrap())
        .telemetry(telemetry.clone())
        .build()
        .unwrap();

    client.query("8.8.8.8", &QueryOptions::default()).await.unwrap();

    let events = telemetry.events.lock();
    let query = events
        .iter()
        .find(|e| matches!(e, TelemetryEvent::Query { .. }))
        .unwrap();
    match query {
        TelemetryEvent::Query {
            registry,
            cached,
            error,
            ..
        } => {
            assert_eq!(registry.as_deref(), Some("arin"));
            assert!(!cached);
            assert!(error.is_none());
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_library_exports_work() {
    assert!(!rdap_client_lib::VERSION.is_empty());
    assert!(rdap_client_lib::info().user_agent.starts_with("rdap-client/"));
    rdap_client_lib::init();
}
