//! Integration tests for TTL-based cleanup of the cache directory.

use std::fs::OpenOptions;
use std::path::Path;
use std::time::{Duration, SystemTime};

use frame_cache::cache::identity::{CacheIdentity, LiveTime};
use frame_cache::cache::janitor::{list_entries, sweep_at};
use frame_cache::cache::store::FrameStore;
use frame_cache::cache::{CacheJanitor, Codec, SweepReport};
use tempfile::TempDir;

/// Create a closed index/data pair for `key` holding one blob.
fn make_pair(dir: &Path, key: &str, live_time: LiveTime) -> CacheIdentity {
    let id = CacheIdentity::new(key, 4096, live_time, Codec::Lz4);
    let mut store = FrameStore::open(id.index_path(dir), id.data_path(dir)).unwrap();
    store.write(0, b"blob").unwrap();
    store.mark_finalized(true);
    store.close().unwrap();
    id
}

fn backdate(path: &Path, age: Duration) {
    OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

#[tokio::test]
async fn test_expired_pair_is_deleted() {
    let tmp = TempDir::new().unwrap();
    let id = make_pair(tmp.path(), "old", LiveTime::Chat);

    let later = SystemTime::now() + LiveTime::Chat.as_duration() + Duration::from_secs(60);
    let report = sweep_at(tmp.path(), later).await;

    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired, 2);
    assert_eq!(report.kept, 0);
    assert!(!id.index_path(tmp.path()).exists());
    assert!(!id.data_path(tmp.path()).exists());
}

#[tokio::test]
async fn test_fresh_pair_survives() {
    let tmp = TempDir::new().unwrap();
    let id = make_pair(tmp.path(), "fresh", LiveTime::Chat);

    let report = sweep_at(tmp.path(), SystemTime::now()).await;

    assert_eq!(report.expired, 0);
    assert_eq!(report.kept, 2);
    assert!(id.index_path(tmp.path()).exists());
    assert!(id.data_path(tmp.path()).exists());
}

#[tokio::test]
async fn test_ttl_is_read_from_each_name() {
    let tmp = TempDir::new().unwrap();
    let chat = make_pair(tmp.path(), "chat", LiveTime::Chat);
    let thumb = make_pair(tmp.path(), "thumb", LiveTime::Thumb);

    // Past the chat TTL, well inside the thumbnail TTL.
    let later = SystemTime::now() + Duration::from_secs(2 * 3_600);
    let report = sweep_at(tmp.path(), later).await;

    assert_eq!(report.expired, 2);
    assert_eq!(report.kept, 2);
    assert!(!chat.data_path(tmp.path()).exists());
    assert!(thumb.data_path(tmp.path()).exists());
}

#[tokio::test]
async fn test_newest_mtime_of_pair_wins() {
    let tmp = TempDir::new().unwrap();
    let id = make_pair(tmp.path(), "split", LiveTime::Chat);

    // Only the index looks old; the data file was touched just now.
    backdate(&id.index_path(tmp.path()), Duration::from_secs(10 * 3_600));
    let report = sweep_at(tmp.path(), SystemTime::now()).await;

    assert_eq!(report.expired, 0);
    assert!(id.index_path(tmp.path()).exists());
}

#[tokio::test]
async fn test_orphans_and_stale_versions_are_deleted() {
    let tmp = TempDir::new().unwrap();
    let id = make_pair(tmp.path(), "keep", LiveTime::Effect);

    let junk = tmp.path().join("leftover.tmp");
    let stale = tmp
        .path()
        .join("fc0-lz4-4096-3600-0123456789abcdef0123456789abcdef-data");
    std::fs::write(&junk, b"junk").unwrap();
    std::fs::write(&stale, b"old layout").unwrap();
    std::fs::create_dir(tmp.path().join("nested")).unwrap();

    let report = sweep_at(tmp.path(), SystemTime::now()).await;

    assert_eq!(report.scanned, 4);
    assert_eq!(report.orphaned, 2);
    assert_eq!(report.kept, 2);
    assert!(!junk.exists());
    assert!(!stale.exists());
    assert!(tmp.path().join("nested").is_dir());
    assert!(id.data_path(tmp.path()).exists());
}

#[tokio::test]
async fn test_sweep_of_missing_directory_is_empty() {
    let tmp = TempDir::new().unwrap();
    let report = sweep_at(&tmp.path().join("absent"), SystemTime::now()).await;
    assert_eq!(report, SweepReport::default());
}

#[tokio::test]
async fn test_list_reports_pairs() {
    let tmp = TempDir::new().unwrap();
    make_pair(tmp.path(), "a", LiveTime::Chat);
    make_pair(tmp.path(), "b", LiveTime::Custom(30));

    let entries = list_entries(tmp.path()).await;
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.paths.len(), 2);
        assert_eq!(entry.buffer_size, 4096);
        assert!(entry.expires_in(SystemTime::now()).is_some());
    }
    assert!(entries.iter().any(|e| e.ttl == Duration::from_secs(30)));
}

#[tokio::test]
async fn test_background_janitor_deletes_expired_pair() {
    let tmp = TempDir::new().unwrap();
    let old = make_pair(tmp.path(), "old", LiveTime::Custom(60));
    let fresh = make_pair(tmp.path(), "fresh", LiveTime::Custom(60));
    for path in [old.index_path(tmp.path()), old.data_path(tmp.path())] {
        backdate(&path, Duration::from_secs(600));
    }

    let janitor = CacheJanitor::start(tmp.path().to_path_buf(), Duration::from_millis(50));
    assert!(janitor.is_running());

    let mut deleted = false;
    for _ in 0..100 {
        if !old.data_path(tmp.path()).exists() && !old.index_path(tmp.path()).exists() {
            deleted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    janitor.stop().await;

    assert!(deleted, "expired pair should be swept");
    assert!(fresh.index_path(tmp.path()).exists());
    assert!(fresh.data_path(tmp.path()).exists());
}
