//! Unit tests for image payloads and image stores

use gen_fanout_engine::response::{
    base64, iteration_image_key, slot_image_key, FileImageStore, ImageError, ImageStore, MemoryImageStore,
};

const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x01];
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

#[test]
fn test_base64_decode_data_url() {
    let data_url = format!("data:image/png;base64,{}", base64::encode(PNG));
    assert_eq!(base64::decode(&data_url).unwrap(), PNG);
}

#[test]
fn test_base64_rejects_garbage_and_empty() {
    assert!(matches!(base64::decode("not valid base64!!!"), Err(ImageError::InvalidData(_))));
    assert!(matches!(base64::decode(""), Err(ImageError::InvalidData(_))));
}

#[test]
fn test_format_detection() {
    assert_eq!(base64::detect_image_format(PNG), Some("png"));
    assert_eq!(base64::detect_image_format(JPEG), Some("jpg"));
    assert_eq!(base64::detect_image_format(b"hello"), None);
    assert_eq!(base64::content_type("group-images/j/a-0.jpg"), "image/jpeg");
}

#[tokio::test]
async fn test_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileImageStore::new(dir.path(), "http://cdn.test/images");

    let key = store.save(&slot_image_key("job-1", "DALL-E 3", 0), JPEG).await.unwrap();
    assert_eq!(key, "group-images/job-1/dall-e-3-0.jpg");
    assert!(store.get_path(&key).exists());
    assert_eq!(store.load(&key).await.unwrap(), JPEG);
    assert_eq!(
        store.public_url(&key),
        "http://cdn.test/images/group-images/job-1/dall-e-3-0.jpg"
    );
}

#[tokio::test]
async fn test_file_store_missing_and_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileImageStore::new(dir.path(), "http://cdn.test/images");

    assert!(matches!(
        store.load("group-images/none/x-0.png").await,
        Err(ImageError::NotFound(_))
    ));
    assert!(matches!(
        store.load("../../etc/passwd").await,
        Err(ImageError::InvalidKey(_))
    ));
    assert!(matches!(store.save("a/../b", PNG).await, Err(ImageError::InvalidKey(_))));
}

#[tokio::test]
async fn test_memory_store_defaults_to_png() {
    let store = MemoryImageStore::new("http://test/images");

    let key = store
        .save(&iteration_image_key("job-2", "Flux Pro", 3), b"opaque bytes")
        .await
        .unwrap();
    assert_eq!(key, "group-images/job-2/flux-pro-iter3.png");
    assert!(store.contains(&key));
    assert_eq!(store.len(), 1);

    assert!(matches!(store.save("group-images/job-2/empty", b"").await, Err(ImageError::InvalidData(_))));
}
