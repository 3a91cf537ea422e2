//! End-to-end tests for the adsieve proxy
//!
//! Starts a real Axum server on a random port in front of a wiremock
//! upstream and drives it over HTTP the way a player would.

use adsieve::config::{AdFilterConfig, CacheConfig, Config, SecurityConfig, UpstreamConfig};
use adsieve::server::build_router;
use futures_util::future::join_all;
use m3u8_rs::Playlist;
use std::net::SocketAddr;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:100
#EXTINF:10.0,
seg100.ts
#EXTINF:10.0,
seg101.ts
#EXT-X-DISCONTINUITY
#EXTINF:10.0,
https://ads.example.net/ad_break/ad_001.ts
#EXT-X-DISCONTINUITY
#EXTINF:10.0,
seg102.ts
#EXT-X-ENDLIST
";

const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720
hi/mock-stream.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=640000,RESOLUTION=640x360
lo/mock-stream.m3u8
";

// ── Test server helpers ───────────────────────────────────────────────────────

fn config(addr: SocketAddr) -> Config {
    Config {
        port: 0,
        base_url: format!("http://{}", addr),
        is_dev: true,
        proxy_segments: false,
        cache: CacheConfig::default(),
        ad_filter: AdFilterConfig {
            enabled: true,
            patterns: vec!["/ad_/i".to_string(), "/ads\\./i".to_string()],
        },
        security: SecurityConfig {
            rate_limit_max: 0,
            block_private_hosts: false,
            ..SecurityConfig::default()
        },
        upstream: UpstreamConfig {
            timeout: Duration::from_secs(5),
            ..UpstreamConfig::default()
        },
    }
}

/// Spin up the proxy, letting `tweak` adjust the config before the router is built.
async fn start_server(tweak: impl FnOnce(&mut Config)) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().unwrap();

    let mut config = config(addr);
    tweak(&mut config);
    let app = build_router(config).unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

fn proxy_url(addr: SocketAddr, target: &str) -> String {
    format!(
        "http://{}/proxy?url={}",
        addr,
        url::form_urlencoded::byte_serialize(target.as_bytes()).collect::<String>()
    )
}

async fn mount(server: &MockServer, p: &str, body: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path(p))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(calls)
        .mount(server)
        .await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_check() {
    let addr = start_server(|_| {}).await;
    let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn ad_segment_removed_and_repeat_served_from_cache() {
    let upstream = MockServer::start().await;
    mount(&upstream, "/mock-stream.m3u8", MEDIA, 1).await;

    let addr = start_server(|_| {}).await;
    let client = reqwest::Client::new();
    let url = proxy_url(addr, &format!("{}/mock-stream.m3u8", upstream.uri()));

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/vnd.apple.mpegurl"
    );
    let body = resp.text().await.unwrap();

    // Parse the playlist to ensure it is structurally valid M3U8
    let playlist =
        m3u8_rs::parse_playlist_res(body.as_bytes()).expect("Response should be valid M3U8");
    let Playlist::MediaPlaylist(pl) = playlist else {
        panic!("Expected a MediaPlaylist, got MasterPlaylist");
    };
    let uris: Vec<String> = pl.segments.iter().map(|s| s.uri.clone()).collect();
    assert_eq!(
        uris,
        vec![
            format!("{}/seg100.ts", upstream.uri()),
            format!("{}/seg101.ts", upstream.uri()),
            format!("{}/seg102.ts", upstream.uri()),
        ]
    );
    assert!(
        pl.segments.iter().all(|s| !s.discontinuity),
        "No dangling DISCONTINUITY expected, got:\n{}",
        body
    );
    assert_eq!(pl.media_sequence, 100);
    assert!(pl.end_list);

    // Second request within TTL: byte-identical, no second upstream call
    let again = client.get(&url).send().await.unwrap();
    assert_eq!(again.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(again.text().await.unwrap(), body);
}

#[tokio::test]
async fn burst_of_clients_costs_one_upstream_call() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mock-stream.m3u8"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(MEDIA)
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    // Cache off, so only single-flight coalescing prevents extra fetches
    let addr = start_server(|c| c.cache.enabled = false).await;
    let client = reqwest::Client::new();
    let url = proxy_url(addr, &format!("{}/mock-stream.m3u8", upstream.uri()));

    let responses = join_all((0..20).map(|_| {
        let client = client.clone();
        let url = url.clone();
        async move {
            let resp = client.get(&url).send().await.unwrap();
            assert_eq!(resp.status(), 200);
            resp.text().await.unwrap()
        }
    }))
    .await;

    assert!(responses.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn master_playlist_variants_are_filtered_through_proxy() {
    let upstream = MockServer::start().await;
    mount(&upstream, "/master.m3u8", MASTER, 1).await;
    mount(&upstream, "/hi/mock-stream.m3u8", MEDIA, 1).await;

    let addr = start_server(|_| {}).await;
    let client = reqwest::Client::new();

    let body = client
        .get(proxy_url(addr, &format!("{}/master.m3u8", upstream.uri())))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let Playlist::MasterPlaylist(master) =
        m3u8_rs::parse_playlist_res(body.as_bytes()).expect("valid master playlist")
    else {
        panic!("Expected a MasterPlaylist, got:\n{}", body);
    };
    assert_eq!(master.variants.len(), 2);
    let hi = &master.variants[0].uri;
    assert_eq!(
        hi,
        &proxy_url(addr, &format!("{}/hi/mock-stream.m3u8", upstream.uri()))
    );

    // Follow the rewritten variant link as a player would
    let media = client.get(hi).send().await.unwrap().text().await.unwrap();
    assert!(!media.contains("ad_001"));
    assert!(media.contains("seg102.ts"));
}

#[tokio::test]
async fn upstream_down_is_network_error() {
    let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let addr = start_server(|_| {}).await;
    let resp = reqwest::get(proxy_url(addr, &format!("http://{}/live.m3u8", dead_addr)))
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NETWORK_ERROR");
}

#[tokio::test]
async fn rate_limit_applies_per_peer_address() {
    let upstream = MockServer::start().await;
    mount(&upstream, "/mock-stream.m3u8", MEDIA, 1).await;

    let addr = start_server(|c| c.security.rate_limit_max = 2).await;
    let client = reqwest::Client::new();
    let url = proxy_url(addr, &format!("{}/mock-stream.m3u8", upstream.uri()));

    for _ in 0..2 {
        assert_eq!(client.get(&url).send().await.unwrap().status(), 200);
    }
    let limited = client.get(&url).send().await.unwrap();
    assert_eq!(limited.status(), 429);
    assert!(limited.headers().get("retry-after").is_some());
}
