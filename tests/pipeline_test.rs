//! End-to-end pipeline tests: upload through HLS playback.

mod common;

use common::{TestHarness, NO_FAILURE, PROBE_1080, PROBE_240};

/// Scenario: unlisted 1080p upload, no passphrase, full happy path.
#[tokio::test]
async fn upload_to_playback_happy_path() {
    let (h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let (video_id, status) = h.upload_and_wait(addr, "u1", "Big Buck Bunny", &[]).await;
    assert_eq!(status, "ready");

    // Access grant carries the stream URL and disclosed metadata.
    let resp = h.request_access(addr, &video_id, None, None).await;
    assert_eq!(resp.status(), 200);
    let grant: serde_json::Value = resp.json().await.unwrap();
    let stream_url = grant["streamUrl"].as_str().unwrap();
    assert!(stream_url.starts_with(&format!("/api/stream/{video_id}/master.m3u8?token=")));
    assert_eq!(grant["title"], "Big Buck Bunny");
    assert_eq!(grant["durationSecs"], 30.0);
    assert_eq!(grant["width"], 1920);
    assert_eq!(grant["height"], 1080);

    // Master playlist: 4 renditions, every variant line tokenized.
    let resp = client
        .get(format!("http://{addr}{stream_url}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-cache");
    let master = resp.text().await.unwrap();
    assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 4);

    let variant_urls: Vec<&str> = master
        .lines()
        .filter(|l| !l.starts_with('#') && l.contains(".m3u8?token="))
        .collect();
    assert_eq!(variant_urls.len(), 4);

    // Each variant serves with its own token and tokenizes every segment.
    for variant_url in &variant_urls {
        let resp = client
            .get(format!("http://{addr}/api/stream/{video_id}/{variant_url}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "variant {variant_url}");
        let playlist = resp.text().await.unwrap();

        let segment_urls: Vec<&str> = playlist
            .lines()
            .filter(|l| !l.starts_with('#') && !l.is_empty())
            .collect();
        assert_eq!(segment_urls.len(), 3);
        assert!(segment_urls.iter().all(|s| s.contains(".ts?token=")));
    }

    // Segments stream with the right headers and bytes.
    let first_variant = variant_urls[0];
    let playlist = client
        .get(format!("http://{addr}/api/stream/{video_id}/{first_variant}"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let segment_url = playlist
        .lines()
        .find(|l| l.contains(".ts?token="))
        .unwrap();

    let resp = client
        .get(format!("http://{addr}/api/stream/{video_id}/{segment_url}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "video/MP2T");
    assert_eq!(
        resp.headers().get("cache-control").unwrap(),
        "public, max-age=31536000"
    );
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(&bytes[..], b"ts-000");
}

/// Scenario: a 320x240 source gets a single-rung ladder at its own height.
#[tokio::test]
async fn sub_360p_source_gets_single_rendition() {
    let (h, addr) = TestHarness::with_server_tools(NO_FAILURE, PROBE_240).await;
    let client = reqwest::Client::new();

    let (video_id, status) = h.upload_and_wait(addr, "u1", "tiny clip", &[]).await;
    assert_eq!(status, "ready");

    let resp = h.request_access(addr, &video_id, None, None).await;
    let grant: serde_json::Value = resp.json().await.unwrap();
    let stream_url = grant["streamUrl"].as_str().unwrap();

    let master = client
        .get(format!("http://{addr}{stream_url}"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 1);
    assert!(master.contains("240p.m3u8?token="));
}

/// Scenario: encoder fails at 1080p only; the video still goes ready with
/// the remaining ladder and the missing variant 404s.
#[tokio::test]
async fn partial_rendition_failure_tolerated() {
    let (h, addr) = TestHarness::with_server_tools("1080p", PROBE_1080).await;
    let client = reqwest::Client::new();

    let (video_id, status) = h.upload_and_wait(addr, "u1", "flaky encode", &[]).await;
    assert_eq!(status, "ready");

    let resp = h.request_access(addr, &video_id, None, None).await;
    let grant: serde_json::Value = resp.json().await.unwrap();
    let master = client
        .get(format!("http://{addr}{}", grant["streamUrl"].as_str().unwrap()))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 3);
    assert!(!master.contains("1080p.m3u8"));
    assert!(master.contains("720p.m3u8?token="));

    // A valid token for the absent variant still yields 404: it was never
    // produced.
    let token = h.signer().mint(&video_id, "1080p.m3u8", None, None);
    let resp = client
        .get(format!(
            "http://{addr}/api/stream/{video_id}/1080p.m3u8?token={token}"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

/// Every rendition failing marks the video failed with the error recorded.
#[tokio::test]
async fn all_renditions_failed_marks_video_failed() {
    // "-f hls" appears in every rendition invocation but not in the
    // thumbnail one.
    let (h, addr) = TestHarness::with_server_tools("hls", PROBE_1080).await;

    let (video_id, status) = h.upload_and_wait(addr, "u1", "doomed", &[]).await;
    assert_eq!(status, "failed");

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/videos/{video_id}"))
        .bearer_auth(h.bearer("u1"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["processingError"]
        .as_str()
        .unwrap()
        .contains("all renditions failed"));

    // A failed video is refused playback with its status attached.
    let resp = h.request_access(addr, &video_id, None, None).await;
    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "VIDEO_NOT_READY");
}

/// A source with no video stream fails at the probe step.
#[tokio::test]
async fn probe_failure_marks_video_failed() {
    let probe = r#"{"streams":[{"codec_type":"audio","codec_name":"aac"}],"format":{"duration":"9.0","format_name":"mp3"}}"#;
    let (h, addr) = TestHarness::with_server_tools(NO_FAILURE, probe).await;

    let (_video_id, status) = h.upload_and_wait(addr, "u1", "audio only", &[]).await;
    assert_eq!(status, "failed");
}

/// The HLS tree lands under the documented storage layout.
#[tokio::test]
async fn storage_layout_matches_contract() {
    let (h, addr) = TestHarness::with_server().await;
    let (video_id, status) = h.upload_and_wait(addr, "owner-7", "layout", &[]).await;
    assert_eq!(status, "ready");

    let base = h.storage_root.join(format!("videos/owner-7/{video_id}"));
    assert!(base.join("original.mp4").exists());
    assert!(base.join("hls/master.m3u8").exists());
    for name in ["1080p", "720p", "480p", "360p"] {
        assert!(base.join(format!("hls/{name}.m3u8")).exists());
        for seg in ["000", "001", "002"] {
            assert!(base.join(format!("hls/{name}_{seg}.ts")).exists());
        }
    }
    assert!(base.join("hls/thumbnail.jpg").exists());
}
