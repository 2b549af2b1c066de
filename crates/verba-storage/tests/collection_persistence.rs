//! Cross-layer scenarios over the filesystem backend.

use std::time::Duration;

use verba_storage::{StorageConfig, Vault};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Paragraph {
    text: String,
}

/// Retry `check` until it passes or a generous deadline expires.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn paragraph_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    // First run: write through the synchronous façade.
    {
        let vault = Vault::new(StorageConfig::filesystem(dir.path()));
        let paragraphs = vault.collection::<Paragraph>("Paragraph", None);

        assert!(paragraphs.keys().is_empty());
        paragraphs.set("p1", Paragraph { text: "hi".into() });
        assert_eq!(paragraphs.get("p1"), Some(Paragraph { text: "hi".into() }));

        let durable = eventually(|| async {
            paragraphs.get_promise("p1").await.unwrap().is_some()
        })
        .await;
        assert!(durable, "write never reached the filesystem");
    }

    // Fresh process: the first synchronous read misses, resolves in the
    // background, and a post-notification read observes the stored value.
    let vault = Vault::new(StorageConfig::filesystem(dir.path()));
    let paragraphs = vault.collection::<Paragraph>("Paragraph", None);

    let mut changes = paragraphs.subscribe();
    assert_eq!(paragraphs.get("p1"), None);
    changes.changed().await.unwrap();
    assert_eq!(paragraphs.get("p1"), Some(Paragraph { text: "hi".into() }));
}

#[tokio::test]
async fn rapid_writes_leave_only_the_newest_value() {
    let dir = tempfile::tempdir().unwrap();

    {
        let vault = Vault::new(StorageConfig::filesystem(dir.path()));
        let paragraphs =
            vault.collection::<Paragraph>("Paragraph", Some(Duration::from_millis(25)));

        paragraphs.set("p1", Paragraph { text: "first".into() });
        paragraphs.set("p1", Paragraph { text: "second".into() });
        assert_eq!(
            paragraphs.get("p1"),
            Some(Paragraph { text: "second".into() })
        );

        let flushed = eventually(|| async {
            paragraphs.get_promise("p1").await.unwrap()
                == Some(Paragraph { text: "second".into() })
        })
        .await;
        assert!(flushed, "coalesced write never flushed");
    }

    let vault = Vault::new(StorageConfig::filesystem(dir.path()));
    let paragraphs = vault.collection::<Paragraph>("Paragraph", None);
    assert_eq!(
        paragraphs.get_promise("p1").await.unwrap(),
        Some(Paragraph { text: "second".into() })
    );
}

#[tokio::test]
async fn enumeration_merges_with_local_writes() {
    let dir = tempfile::tempdir().unwrap();

    {
        let vault = Vault::new(StorageConfig::filesystem(dir.path()));
        let paragraphs = vault.collection::<Paragraph>("Paragraph", None);
        paragraphs.set("stored", Paragraph { text: "old".into() });
        let durable = eventually(|| async {
            paragraphs.get_promise("stored").await.unwrap().is_some()
        })
        .await;
        assert!(durable);
    }

    let vault = Vault::new(StorageConfig::filesystem(dir.path()));
    let paragraphs = vault.collection::<Paragraph>("Paragraph", None);

    // Trigger enumeration, then add a key while it may still be in flight.
    let _ = paragraphs.keys();
    paragraphs.set("local", Paragraph { text: "new".into() });

    let merged = eventually(|| async {
        paragraphs.keys() == vec!["local".to_owned(), "stored".to_owned()]
    })
    .await;
    assert!(merged, "enumeration and local writes never merged");
}

#[tokio::test]
async fn reset_empties_cache_and_disk() {
    let dir = tempfile::tempdir().unwrap();

    let vault = Vault::new(StorageConfig::filesystem(dir.path()));
    let paragraphs = vault.collection::<Paragraph>("Paragraph", None);

    paragraphs.set("p1", Paragraph { text: "doomed".into() });
    let durable = eventually(|| async {
        paragraphs.get_promise("p1").await.unwrap().is_some()
    })
    .await;
    assert!(durable);

    paragraphs.reset().await.unwrap();
    assert!(paragraphs.keys().is_empty());

    // A fresh instance over the same root sees nothing.
    let vault = Vault::new(StorageConfig::filesystem(dir.path()));
    let paragraphs = vault.collection::<Paragraph>("Paragraph", None);
    assert!(paragraphs.get_promise("p1").await.unwrap().is_none());
}

#[tokio::test]
async fn info_reflects_stored_payload() {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::new(StorageConfig::filesystem(dir.path()));
    let paragraphs = vault.collection::<Paragraph>("Paragraph", None);

    paragraphs.set("p1", Paragraph { text: "hi".into() });
    let durable = eventually(|| async {
        paragraphs.get_promise("p1").await.unwrap().is_some()
    })
    .await;
    assert!(durable);

    let mut changes = paragraphs.subscribe();
    assert!(paragraphs.info("p1").is_none());
    changes.changed().await.unwrap();

    let info = paragraphs.info("p1").unwrap();
    assert!(info.size > 0);
    assert!(info.last_modified > 0);
}
