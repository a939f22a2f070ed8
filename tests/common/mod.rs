//! Shared test harness for integration tests.
//!
//! Builds a full `AppContext` against a temp directory tree: temp SQLite
//! database, local storage root, scratch dir, and fake ffmpeg/ffprobe
//! shell tools so the pipeline runs without real encoders. The
//! `with_server` constructors start Axum on a random port for HTTP-level
//! testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vaultstream::config::Config;
use vaultstream::db::DbPool;
use vaultstream::server::{build_context, create_router, AppContext};
use vaultstream::signer::UrlSigner;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

pub const PROBE_1080: &str = r#"{"streams":[{"codec_type":"video","codec_name":"h264","width":1920,"height":1080,"avg_frame_rate":"30/1"}],"format":{"duration":"30.0","bit_rate":"4500000","format_name":"mov,mp4"}}"#;

pub const PROBE_240: &str = r#"{"streams":[{"codec_type":"video","codec_name":"h264","width":320,"height":240,"avg_frame_rate":"30/1"}],"format":{"duration":"10.0","format_name":"mov,mp4"}}"#;

/// Marker that never matches an ffmpeg invocation.
pub const NO_FAILURE: &str = "__never__";

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Fake ffmpeg: writes three segments plus a VOD playlist per rendition
/// invocation (or a fake JPEG for thumbnail invocations). Any invocation
/// whose arguments contain `fail_marker` exits non-zero.
fn fake_ffmpeg(dir: &Path, fail_marker: &str) -> PathBuf {
    let body = format!(
        r##"#!/bin/sh
case "$*" in *{fail_marker}*) exit 1 ;; esac
segpat=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-hls_segment_filename" ]; then segpat="$a"; fi
  prev="$a"
  last="$a"
done
if [ -z "$segpat" ]; then
  printf 'JPEGDATA' > "$last"
  exit 0
fi
{{
  echo "#EXTM3U"
  echo "#EXT-X-VERSION:3"
  echo "#EXT-X-TARGETDURATION:4"
  echo "#EXT-X-MEDIA-SEQUENCE:0"
  echo "#EXT-X-PLAYLIST-TYPE:VOD"
  for i in 000 001 002; do
    seg=$(echo "$segpat" | sed "s/%03d/$i/")
    printf 'ts-%s' "$i" > "$seg"
    echo "#EXTINF:4.000000,"
    basename "$seg"
  done
  echo "#EXT-X-ENDLIST"
}} > "$last"
"##
    );
    write_script(dir, "ffmpeg", &body)
}

fn fake_ffprobe(dir: &Path, json: &str) -> PathBuf {
    write_script(dir, "ffprobe", &format!("#!/bin/sh\ncat <<'EOF'\n{json}\nEOF\n"))
}

/// Test harness wrapping a fully-constructed `AppContext` backed by a
/// temp directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub storage_root: PathBuf,
    root: tempfile::TempDir,
}

impl TestHarness {
    /// Harness with default fake tools: every encode succeeds against a
    /// 1080p source.
    pub fn new() -> Self {
        Self::with_tools(NO_FAILURE, PROBE_1080)
    }

    /// Harness whose fake ffmpeg fails invocations matching `fail_marker`
    /// and whose fake ffprobe reports `probe_json`.
    pub fn with_tools(fail_marker: &str, probe_json: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let tools_dir = root.path().join("tools");
        std::fs::create_dir(&tools_dir).unwrap();
        let ffmpeg = fake_ffmpeg(&tools_dir, fail_marker);
        let ffprobe = fake_ffprobe(&tools_dir, probe_json);

        let storage_root = root.path().join("media");
        let scratch_dir = root.path().join("scratch");
        std::fs::create_dir_all(&scratch_dir).unwrap();

        let mut config = Config::default();
        config.database.path = root.path().join("test.db");
        config.storage.root = storage_root.clone();
        config.signer.secret = Some(TEST_SECRET.to_string());
        config.upload.scratch_dir = Some(scratch_dir);
        // Minimum bcrypt cost keeps passphrase tests fast.
        config.upload.passphrase_cost = 4;
        config.transcode.ffmpeg_path = Some(ffmpeg);
        config.transcode.ffprobe_path = Some(ffprobe);

        let ctx = build_context(config).expect("failed to build app context");
        let db = ctx.db.clone();

        Self {
            ctx,
            db,
            storage_root,
            root,
        }
    }

    /// Start an Axum server on a random port and return the harness
    /// together with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_tools(NO_FAILURE, PROBE_1080).await
    }

    pub async fn with_server_tools(fail_marker: &str, probe_json: &str) -> (Self, SocketAddr) {
        let harness = Self::with_tools(fail_marker, probe_json);
        let app = create_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Bearer token for a user, as the external account service would
    /// mint it.
    pub fn bearer(&self, user_id: &str) -> String {
        self.ctx.sessions.issue(user_id, 3600)
    }

    pub fn signer(&self) -> Arc<UrlSigner> {
        Arc::clone(&self.ctx.signer)
    }

    /// Upload a fake video over HTTP. Extra form fields: `(name, value)`.
    pub async fn upload(
        &self,
        addr: SocketAddr,
        user: &str,
        title: &str,
        extra_fields: &[(&str, &str)],
    ) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(b"not-really-an-mp4".to_vec())
            .file_name("bunny.mp4")
            .mime_str("video/mp4")
            .unwrap();
        let mut form = reqwest::multipart::Form::new().text("title", title.to_string());
        for (name, value) in extra_fields {
            form = form.text(name.to_string(), value.to_string());
        }
        form = form.part("file", part);

        reqwest::Client::new()
            .post(format!("http://{addr}/api/videos/upload"))
            .bearer_auth(self.bearer(user))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    /// Upload and wait for the pipeline to reach a terminal state.
    /// Returns the video id and its final status.
    pub async fn upload_and_wait(
        &self,
        addr: SocketAddr,
        user: &str,
        title: &str,
        extra_fields: &[(&str, &str)],
    ) -> (String, String) {
        let resp = self.upload(addr, user, title, extra_fields).await;
        assert_eq!(resp.status(), 201, "upload should be accepted");
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "uploading");
        let video_id = body["videoId"].as_str().unwrap().to_string();

        let status = self.wait_terminal(addr, user, &video_id).await;
        (video_id, status)
    }

    /// Poll video metadata until the status is terminal.
    pub async fn wait_terminal(&self, addr: SocketAddr, user: &str, video_id: &str) -> String {
        let client = reqwest::Client::new();
        for _ in 0..100 {
            let resp = client
                .get(format!("http://{addr}/api/videos/{video_id}"))
                .bearer_auth(self.bearer(user))
                .send()
                .await
                .unwrap();
            if resp.status() == 200 {
                let body: serde_json::Value = resp.json().await.unwrap();
                let status = body["status"].as_str().unwrap().to_string();
                if status == "ready" || status == "failed" {
                    return status;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        panic!("video {video_id} never reached a terminal state");
    }

    /// Request playback access; returns the raw response.
    pub async fn request_access(
        &self,
        addr: SocketAddr,
        video_id: &str,
        user: Option<&str>,
        passphrase: Option<&str>,
    ) -> reqwest::Response {
        let mut req = reqwest::Client::new()
            .post(format!("http://{addr}/api/videos/{video_id}/access"));
        if let Some(user) = user {
            req = req.bearer_auth(self.bearer(user));
        }
        let body = match passphrase {
            Some(p) => serde_json::json!({ "passphrase": p }),
            None => serde_json::json!({}),
        };
        req.json(&body).send().await.unwrap()
    }
}
