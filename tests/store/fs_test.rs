//! Filesystem content-store resolution against a real staging directory.

use straylight::store::{ContentStore, FsContentStore, StoreError};

fn staging() -> (tempfile::TempDir, FsContentStore) {
    let tmp = tempfile::tempdir().expect("tempdir should be creatable");
    let store = FsContentStore::new(tmp.path().to_path_buf());
    (tmp, store)
}

#[tokio::test]
async fn resolves_a_staged_file_with_type_and_size() {
    let (tmp, store) = staging();
    std::fs::write(tmp.path().join("photo.png"), b"fake-png-bytes")
        .expect("staging file should be writable");

    let staged = store
        .resolve("photo.png")
        .await
        .expect("reference should resolve");

    assert_eq!(staged.file_name, "photo.png");
    assert_eq!(staged.content_type, "image/png");
    assert_eq!(staged.size_bytes, 14);
    assert!(!staged.is_video());
}

#[tokio::test]
async fn video_extensions_resolve_as_video() {
    let (tmp, store) = staging();
    std::fs::write(tmp.path().join("clip.mp4"), b"x").expect("staging file should be writable");

    let staged = store
        .resolve("clip.mp4")
        .await
        .expect("reference should resolve");
    assert_eq!(staged.content_type, "video/mp4");
    assert!(staged.is_video());
}

#[tokio::test]
async fn nested_references_resolve_inside_the_root() {
    let (tmp, store) = staging();
    std::fs::create_dir_all(tmp.path().join("batch-7")).expect("subdir should be creatable");
    std::fs::write(tmp.path().join("batch-7/doc.pdf"), b"pdf")
        .expect("staging file should be writable");

    let staged = store
        .resolve("batch-7/doc.pdf")
        .await
        .expect("reference should resolve");
    assert_eq!(staged.content_type, "application/pdf");
}

#[tokio::test]
async fn missing_files_are_not_found() {
    let (_tmp, store) = staging();
    let result = store.resolve("nope.png").await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn unknown_extensions_are_unsupported() {
    let (tmp, store) = staging();
    std::fs::write(tmp.path().join("blob.xyz"), b"?").expect("staging file should be writable");

    let result = store.resolve("blob.xyz").await;
    assert!(matches!(result, Err(StoreError::UnsupportedType(_))));
}

#[tokio::test]
async fn traversal_references_are_rejected() {
    let (_tmp, store) = staging();
    for reference in ["../outside.png", "/etc/passwd", ""] {
        let result = store.resolve(reference).await;
        assert!(
            matches!(result, Err(StoreError::NotFound(_))),
            "reference {reference:?} should not resolve"
        );
    }
}

#[tokio::test]
async fn directories_do_not_resolve() {
    let (tmp, store) = staging();
    std::fs::create_dir_all(tmp.path().join("folder.png")).expect("subdir should be creatable");

    let result = store.resolve("folder.png").await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}
