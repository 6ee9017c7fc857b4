mod common;

use anystore::{ErrorKind, StorageError, StorageFile, StorageFolder};
use common::{resolver_with, FaultyStore};
use futures::TryStreamExt;
use std::collections::HashSet;
use std::sync::atomic::Ordering;

async fn seed(resolver: &anystore::Resolver, keys: &[&str]) {
    for key in keys {
        let mut file = StorageFile::with_resolver(&format!("s3://bucket/{}", key), resolver).unwrap();
        file.write_all(key.as_bytes()).await.unwrap();
    }
}

fn keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("logs/part-{:03}.txt", i)).collect()
}

#[tokio::test]
async fn test_listing_survives_a_throttled_page() {
    let store = FaultyStore::new();
    let resolver = resolver_with(store.clone());
    let names = keys(10);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    seed(&resolver, &refs).await;

    store.list_failures.store(1, Ordering::SeqCst);
    let folder = StorageFolder::with_resolver("s3://bucket/logs/", &resolver).unwrap();
    let entries = folder.list(false).collect_all().await.unwrap();

    assert_eq!(entries.len(), 10);
    let unique: HashSet<String> = entries.iter().map(|e| e.id.to_string()).collect();
    assert_eq!(unique.len(), 10);
    assert!(entries.iter().all(|e| e.is_file()));
    assert_eq!(store.list_failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_listing_reports_exhausted_retry_budget() {
    let store = FaultyStore::new();
    let resolver = resolver_with(store.clone());
    seed(&resolver, &["logs/a.txt", "logs/b.txt"]).await;

    store.list_failures.store(3, Ordering::SeqCst);
    let folder = StorageFolder::with_resolver("s3://bucket/logs/", &resolver).unwrap();
    let err = folder.list(false).collect_all().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    match err {
        StorageError::Transient { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_listing_is_lazy_and_paged() {
    let store = FaultyStore::new();
    let resolver = resolver_with(store.clone());
    let names = keys(7);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    seed(&resolver, &refs).await;

    let folder = StorageFolder::with_resolver("s3://bucket/logs/", &resolver).unwrap();
    let before = store.list_calls.load(Ordering::SeqCst);
    let mut listing = folder.list(true);
    assert_eq!(store.list_calls.load(Ordering::SeqCst), before);

    let first = listing.next().await.unwrap().unwrap();
    assert_eq!(first.id.to_string(), "s3://bucket/logs/part-000.txt");
    assert_eq!(store.list_calls.load(Ordering::SeqCst), before + 1);

    let mut rest = 1;
    while listing.next().await.unwrap().is_some() {
        rest += 1;
    }
    assert_eq!(rest, 7);
    // Page size 3 over 7 keys
    assert_eq!(store.list_calls.load(Ordering::SeqCst), before + 3);
}

#[tokio::test]
async fn test_shallow_listing_skips_nested_keys() {
    let store = FaultyStore::new();
    let resolver = resolver_with(store.clone());
    let mut names = vec!["tree/top.txt".to_string()];
    names.extend((0..20).map(|i| format!("tree/deep/{}/leaf-{}.txt", i % 4, i)));
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    seed(&resolver, &refs).await;

    let folder = StorageFolder::with_resolver("s3://bucket/tree/", &resolver).unwrap();
    let lists_before = store.list_calls.load(Ordering::SeqCst);
    let entries = folder.list(false).collect_all().await.unwrap();

    let names: Vec<String> = entries.iter().map(|e| e.id.to_string()).collect();
    assert_eq!(names, vec!["s3://bucket/tree/deep/", "s3://bucket/tree/top.txt"]);
    assert_eq!(store.list_calls.load(Ordering::SeqCst), lists_before);
    assert_eq!(store.delimiter_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recursive_listing_synthesizes_folders_once() {
    let store = FaultyStore::new();
    let resolver = resolver_with(store);
    seed(
        &resolver,
        &["data/2024/jan.csv", "data/2024/feb.csv", "data/2025/jan.csv", "data/top.csv"],
    )
    .await;

    let folder = StorageFolder::with_resolver("s3://bucket/data/", &resolver).unwrap();
    let entries: Vec<_> = folder.list(true).into_stream().try_collect().await.unwrap();

    let folders: Vec<String> = entries
        .iter()
        .filter(|e| e.is_folder())
        .map(|e| e.id.to_string())
        .collect();
    assert_eq!(folders.len(), 2);
    assert!(folders.contains(&"s3://bucket/data/2024/".to_string()));
    assert!(folders.contains(&"s3://bucket/data/2025/".to_string()));
    assert_eq!(entries.iter().filter(|e| e.is_file()).count(), 4);

    let shallow = folder.list(false).collect_all().await.unwrap();
    assert_eq!(shallow.len(), 3);
}

#[tokio::test]
async fn test_filter_files_by_prefix() {
    let store = FaultyStore::new();
    let resolver = resolver_with(store);
    seed(&resolver, &["in/report-1.csv", "in/report-2.csv", "in/notes.txt"]).await;

    let folder = StorageFolder::with_resolver("s3://bucket/in/", &resolver).unwrap();
    let mut names: Vec<String> = folder
        .filter_files("report-")
        .await
        .unwrap()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["report-1.csv", "report-2.csv"]);
}
