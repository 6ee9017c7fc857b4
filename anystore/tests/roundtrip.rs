mod common;

use anystore::{ErrorKind, OpenMode, Resolver, StorageFile};
use common::{payload, resolver_with, test_config, FaultyStore};
use std::io::SeekFrom;
use std::sync::atomic::Ordering;
use tempfile::TempDir;

async fn write_then_read(file: &mut StorageFile, data: &[u8]) -> Vec<u8> {
    file.open(OpenMode::Write).await.unwrap();
    for chunk in data.chunks(10) {
        file.write(chunk).await.unwrap();
    }
    file.close().await.unwrap();

    file.open(OpenMode::Read).await.unwrap();
    let mut out = Vec::new();
    loop {
        let chunk = file.read(7).await.unwrap();
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    file.close().await.unwrap();
    out
}

#[tokio::test]
async fn test_roundtrip_around_write_threshold() {
    let dir = TempDir::new().unwrap();
    let resolver = resolver_with(FaultyStore::new());
    let threshold = test_config().write_threshold;

    for size in [0, threshold - 1, threshold, threshold + 1, threshold * 3 + 5] {
        let data = payload(size);

        let local = dir.path().join(format!("f-{}.bin", size));
        let mut file = StorageFile::with_resolver(&local.display().to_string(), &resolver).unwrap();
        assert_eq!(write_then_read(&mut file, &data).await, data, "local size {size}");

        let mut file = StorageFile::with_resolver(&format!("s3://bucket/f-{}.bin", size), &resolver).unwrap();
        assert_eq!(write_then_read(&mut file, &data).await, data, "object size {size}");
        assert_eq!(file.size().await.unwrap(), size as u64);
    }
}

#[tokio::test]
async fn test_backward_seek_matches_across_backends() {
    let dir = TempDir::new().unwrap();
    let resolver = resolver_with(FaultyStore::new());
    let data = payload(200);

    let local_path = dir.path().join("seek.bin");
    std::fs::write(&local_path, &data).unwrap();
    let mut object = StorageFile::with_resolver("s3://bucket/seek.bin", &resolver).unwrap();
    object.write_all(&data).await.unwrap();
    let mut local = StorageFile::with_resolver(&local_path.display().to_string(), &resolver).unwrap();

    let mut reads = Vec::new();
    for file in [&mut local, &mut object] {
        file.open(OpenMode::Read).await.unwrap();
        let mut seen = Vec::new();
        seen.push(file.read(50).await.unwrap());
        assert_eq!(file.seek(SeekFrom::Start(10)).await.unwrap(), 10);
        seen.push(file.read(20).await.unwrap());
        assert_eq!(file.seek(SeekFrom::Current(100)).await.unwrap(), 130);
        seen.push(file.read(30).await.unwrap());
        assert_eq!(file.seek(SeekFrom::End(-5)).await.unwrap(), 195);
        seen.push(file.read(100).await.unwrap());
        assert_eq!(file.tell().unwrap(), 200);
        file.close().await.unwrap();
        reads.push(seen);
    }

    assert_eq!(reads[0], reads[1]);
    assert_eq!(&reads[0][1][..], &data[10..30]);
    assert_eq!(&reads[0][3][..], &data[195..]);
}

#[tokio::test]
async fn test_read_resumes_after_broken_body() {
    let store = FaultyStore::new();
    let resolver = resolver_with(store.clone());
    let data = payload(120);
    let mut file = StorageFile::with_resolver("s3://bucket/flaky.bin", &resolver).unwrap();
    file.write_all(&data).await.unwrap();

    store.body_failures.store(1, Ordering::SeqCst);
    let before = store.get_calls.load(Ordering::SeqCst);
    assert_eq!(&file.read_to_end().await.unwrap()[..], &data[..]);
    assert_eq!(store.get_calls.load(Ordering::SeqCst), before + 2);
}

#[tokio::test]
async fn test_state_errors_and_idempotent_close() {
    let resolver = resolver_with(FaultyStore::new());
    let mut file = StorageFile::with_resolver("s3://bucket/state.txt", &resolver).unwrap();

    let err = file.read(1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    let err = file.write(b"x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    file.open(OpenMode::Write).await.unwrap();
    let err = file.open(OpenMode::Read).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    let err = file.read(1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    file.write(b"hello").await.unwrap();
    file.close().await.unwrap();
    file.close().await.unwrap();
    assert!(!file.is_open());

    file.open(OpenMode::Read).await.unwrap();
    let err = file.write(b"x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(&file.read(100).await.unwrap()[..], b"hello");
    file.close().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_write_leaves_no_object() {
    let resolver = resolver_with(FaultyStore::new());
    let mut file = StorageFile::with_resolver("s3://bucket/abandoned.bin", &resolver).unwrap();

    {
        let mut guard = file.open_scoped(OpenMode::Write).await.unwrap();
        guard.write(&payload(500)).await.unwrap();
        guard.release().await;
    }

    assert!(!file.is_open());
    assert!(!file.exists().await.unwrap());
}

#[tokio::test]
async fn test_scoped_closure_commits() {
    let resolver = Resolver::with_credentials(test_config(), Default::default());
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scoped.txt");
    let mut file = StorageFile::with_resolver(&path.display().to_string(), &resolver).unwrap();

    let written = file
        .scoped(OpenMode::Write, |f| {
            Box::pin(async move { f.write(b"scoped write").await })
        })
        .await
        .unwrap();

    assert_eq!(written, 12);
    assert!(!file.is_open());
    assert_eq!(std::fs::read(&path).unwrap(), b"scoped write");
}
