//! Integration tests for VersionInstaller
//!
//! These tests verify:
//! - Non-archive sources fail before any download or directory creation
//! - Only allow-listed archive entries are extracted, plus the version marker
//! - Failed installs leave no version directory and keep a previous install
//! - Progress reporting, cancellation and download deadlines

use async_trait::async_trait;
use camino::Utf8PathBuf;
use packrun::{LauncherError, LauncherResult};
use packrun::services::installer::{
    LAUNCHER_EXE, PLAYLUNKY_DLL, SPEL2_DLL, UninstallOutcome, VERSION_FILENAME,
};
use packrun::services::{Downloader, HttpDownloader, VersionInstaller};
use std::fs;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Serves a fixed archive in 1 KiB chunks and counts calls.
struct FakeDownloader {
    archive: Vec<u8>,
    calls: AtomicUsize,
}

impl FakeDownloader {
    fn serving(archive: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            archive,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(
        &self,
        _url: &str,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> LauncherResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut sent = 0;
        for chunk in self.archive.chunks(1024) {
            sent += chunk.len() as u64;
            progress(sent);
        }
        Ok(self.archive.clone())
    }
}

/// Never finishes.
struct StalledDownloader;

#[async_trait]
impl Downloader for StalledDownloader {
    async fn download(
        &self,
        _url: &str,
        _progress: &mut (dyn FnMut(u64) + Send),
    ) -> LauncherResult<Vec<u8>> {
        std::future::pending().await
    }
}

fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn complete_archive() -> Vec<u8> {
    build_archive(&[
        (SPEL2_DLL, b"spel2"),
        (PLAYLUNKY_DLL, b"playlunky"),
        (LAUNCHER_EXE, b"launcher"),
        ("README.md", b"not extracted"),
        ("nested/spel2.dll", b"not extracted either"),
    ])
}

fn versions_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, root.join("versions"))
}

/// A dropped sender never cancels.
fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn test_non_archive_fails_before_download() {
    let (_temp_dir, versions) = versions_dir();
    let downloader = FakeDownloader::serving(complete_archive());
    let installer = VersionInstaller::new(&versions, downloader.clone());

    let result = installer
        .install(
            "nightly",
            "https://example.com/releases/playlunky_nightly.exe",
            |_| {},
            no_cancel(),
        )
        .await;

    assert!(matches!(result, Err(LauncherError::Format(_))));
    assert_eq!(downloader.calls(), 0);
    assert!(!versions.exists());
}

#[tokio::test]
async fn test_install_extracts_allow_list_and_marker() {
    let (_temp_dir, versions) = versions_dir();
    let downloader = FakeDownloader::serving(complete_archive());
    let installer = VersionInstaller::new(&versions, downloader.clone());

    let installed = installer
        .install(
            "stable",
            "https://example.com/download/playlunky_v2.1.3.zip",
            |_| {},
            no_cancel(),
        )
        .await
        .unwrap();

    assert_eq!(installed.version, "v2.1.3");
    let dir = versions.join("stable");
    assert_eq!(installed.directory, dir);

    let mut names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    let mut expected = vec![SPEL2_DLL, PLAYLUNKY_DLL, LAUNCHER_EXE, VERSION_FILENAME];
    expected.sort();
    assert_eq!(names, expected);

    assert_eq!(fs::read(dir.join(SPEL2_DLL)).unwrap(), b"spel2");
    assert_eq!(installer.installed_version("stable").as_deref(), Some("v2.1.3"));
    assert!(installer.is_installed("stable"));
    assert_eq!(
        installer.installed_tags().into_iter().collect::<Vec<_>>(),
        vec!["stable".to_string()]
    );
}

#[tokio::test]
async fn test_archive_missing_required_file_leaves_nothing() {
    let (_temp_dir, versions) = versions_dir();
    let archive = build_archive(&[(SPEL2_DLL, b"spel2"), (LAUNCHER_EXE, b"launcher")]);
    let installer = VersionInstaller::new(&versions, FakeDownloader::serving(archive));

    let result = installer
        .install("v1", "https://h/playlunky_v1.zip", |_| {}, no_cancel())
        .await;

    match result {
        Err(LauncherError::Format(message)) => assert!(message.contains(PLAYLUNKY_DLL)),
        other => panic!("expected format error, got {:?}", other),
    }
    assert!(!versions.join("v1").exists());
    assert!(installer.installed_tags().is_empty());
    let leftovers: Vec<_> = fs::read_dir(&versions).unwrap().collect();
    assert!(leftovers.is_empty(), "staging directory left behind");
}

#[tokio::test]
async fn test_reinstall_replaces_and_failed_reinstall_keeps_previous() {
    let (_temp_dir, versions) = versions_dir();
    let good = VersionInstaller::new(&versions, FakeDownloader::serving(complete_archive()));
    good.install("nightly", "https://h/playlunky_n1.zip", |_| {}, no_cancel())
        .await
        .unwrap();
    good.install("nightly", "https://h/playlunky_n2.zip", |_| {}, no_cancel())
        .await
        .unwrap();
    assert_eq!(good.installed_version("nightly").as_deref(), Some("n2"));

    let broken = VersionInstaller::new(
        &versions,
        FakeDownloader::serving(b"this is not a zip file".to_vec()),
    );
    let result = broken
        .install("nightly", "https://h/playlunky_n3.zip", |_| {}, no_cancel())
        .await;
    assert!(matches!(result, Err(LauncherError::Zip(_))));

    assert_eq!(good.installed_version("nightly").as_deref(), Some("n2"));
    assert!(good.is_installed("nightly"));
}

#[tokio::test]
async fn test_progress_is_cumulative() {
    let (_temp_dir, versions) = versions_dir();
    let archive = complete_archive();
    let total = archive.len() as u64;
    let installer = VersionInstaller::new(&versions, FakeDownloader::serving(archive));

    let mut reports = Vec::new();
    installer
        .install(
            "v1",
            "https://h/playlunky_v1.zip",
            |downloaded| reports.push(downloaded),
            no_cancel(),
        )
        .await
        .unwrap();

    assert!(!reports.is_empty());
    assert!(reports.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(*reports.last().unwrap(), total);
}

#[tokio::test]
async fn test_cancelled_download_creates_nothing() {
    let (_temp_dir, versions) = versions_dir();
    let installer = Arc::new(VersionInstaller::new(&versions, Arc::new(StalledDownloader)));
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let running = tokio::spawn({
        let installer = Arc::clone(&installer);
        async move {
            installer
                .install("v1", "https://h/playlunky_v1.zip", |_| {}, cancel_rx)
                .await
        }
    });
    tokio::task::yield_now().await;
    cancel_tx.send_replace(true);

    let result = running.await.unwrap();
    assert!(matches!(result, Err(LauncherError::Cancelled)));
    assert!(!versions.exists());
}

#[tokio::test(start_paused = true)]
async fn test_download_deadline() {
    let (_temp_dir, versions) = versions_dir();
    let installer = VersionInstaller::new(&versions, Arc::new(StalledDownloader))
        .with_download_timeout(Some(Duration::from_secs(30)));

    let result = installer
        .install("v1", "https://h/playlunky_v1.zip", |_| {}, no_cancel())
        .await;

    assert!(matches!(result, Err(LauncherError::Timeout(_))));
    assert!(!versions.exists());
}

#[tokio::test]
async fn test_uninstall_removes_everything() {
    let (_temp_dir, versions) = versions_dir();
    let installer = VersionInstaller::new(&versions, FakeDownloader::serving(complete_archive()));
    installer
        .install("v1", "https://h/playlunky_v1.zip", |_| {}, no_cancel())
        .await
        .unwrap();

    assert_eq!(installer.uninstall("v1").unwrap(), UninstallOutcome::Removed);
    assert!(!versions.join("v1").exists());
    assert_eq!(
        installer.uninstall("v1").unwrap(),
        UninstallOutcome::NotInstalled
    );
}

/// Answer one HTTP request with `response` verbatim, then hang up.
async fn serve_once(response: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        let _ = socket.write_all(response).await;
        let _ = socket.shutdown().await;
    });
    format!("http://{}/playlunky_v1.zip", addr)
}

fn http_downloader() -> HttpDownloader {
    HttpDownloader::new(reqwest::Client::builder().no_proxy().build().unwrap())
}

#[tokio::test]
async fn test_oversized_content_length_is_a_network_error() {
    let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 400000000000000\r\n\r\nabc").await;

    let result = http_downloader().download(&url, &mut |_| {}).await;

    // The body ends long before the advertised length
    let error = result.unwrap_err();
    assert!(error.is_network(), "{:?}", error);
}

#[tokio::test]
async fn test_http_error_status_is_reported() {
    let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").await;

    let result = http_downloader().download(&url, &mut |_| {}).await;

    match result {
        Err(LauncherError::HttpStatus { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected HTTP status error, got {:?}", other.err()),
    }
}
