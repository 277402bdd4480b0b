//! Cancelling an in-flight borrow

mod common;

use book_borrow::borrow::{BorrowOutcome, Borrower};
use book_borrow::format::FormatDefinition;
use book_borrow::{AcquisitionPath, Availability, BookStatus, MimeType};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn cancelled_download_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.epub"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(EPUB_BODY, "application/epub+zip")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let harness = Harness::new();
    let href = format!("{}/slow.epub", server.uri());
    let entry = harness.admit(feed_entry(
        "urn:book:slow",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::epub())],
    ));

    let cancel = CancellationToken::new();
    let borrower = harness.borrower();
    let task = {
        let entry = entry.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            borrower
                .borrow(
                    entry,
                    basic_account(),
                    AcquisitionPath::single(url(&href), MimeType::epub()),
                    cancel,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("borrow stops promptly after cancellation")
        .unwrap();

    assert_eq!(result.outcome, BorrowOutcome::Cancelled);
    assert!(!result.is_success());
    assert_eq!(harness.registry.status(entry.id()), Some(BookStatus::Cancelled));

    let names = file_names_under(&harness.database_dir());
    assert!(!names.iter().any(|n| n.starts_with("epub-book")), "{names:?}");
    assert!(files_under(&harness.temp_dir()).is_empty());
    let snapshot = entry
        .format_handle(FormatDefinition::Epub)
        .unwrap()
        .as_epub()
        .unwrap()
        .snapshot();
    assert!(snapshot.file.is_none());
}

#[tokio::test]
async fn cancelled_before_start_never_touches_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let href = format!("{}/book.epub", server.uri());
    let entry = harness.admit(feed_entry(
        "urn:book:early",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::epub())],
    ));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = harness
        .borrower()
        .borrow(
            entry.clone(),
            basic_account(),
            AcquisitionPath::single(url(&href), MimeType::epub()),
            cancel,
        )
        .await;

    assert_eq!(result.outcome, BorrowOutcome::Cancelled);
    assert_eq!(harness.registry.status(entry.id()), Some(BookStatus::Cancelled));
}

#[tokio::test]
async fn cancelling_mid_body_removes_the_partial_file() {
    let (base, server) = stalled_download_server(4096, 1 << 20).await;
    let harness = Harness::new();
    let href = format!("{base}/stalled.epub");
    let entry = harness.admit(feed_entry(
        "urn:book:stalled",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::epub())],
    ));

    // Every progress sample is published, so the first received bytes show up.
    let borrower = Borrower::new(
        harness
            .services()
            .with_clock(Arc::new(SteppingClock::new(Duration::from_secs(2)))),
    );
    let cancel = CancellationToken::new();
    let task = {
        let entry = entry.clone();
        let cancel = cancel.clone();
        let href = href.clone();
        tokio::spawn(async move {
            borrower
                .borrow(
                    entry,
                    basic_account(),
                    AcquisitionPath::single(url(&href), MimeType::epub()),
                    cancel,
                )
                .await
        })
    };

    let streaming = wait_for_status(&harness.registry, entry.id(), Duration::from_secs(5), |s| {
        matches!(s, BookStatus::Downloading { received, .. } if *received > 0)
    })
    .await;
    match streaming {
        Some(BookStatus::Downloading { received, expected, .. }) => {
            assert!(received <= 4096);
            assert_eq!(expected, Some(1 << 20));
        }
        other => panic!("expected part of the body to arrive, got {other:?}"),
    }
    assert!(!files_under(&harness.temp_dir()).is_empty(), "partial body on disk");

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("borrow stops promptly after cancellation")
        .unwrap();
    server.abort();

    assert_eq!(result.outcome, BorrowOutcome::Cancelled);
    assert_eq!(harness.registry.status(entry.id()), Some(BookStatus::Cancelled));
    assert!(files_under(&harness.temp_dir()).is_empty());
    let names = file_names_under(&harness.database_dir());
    assert!(!names.iter().any(|n| n.starts_with("epub-book")), "{names:?}");
    let snapshot = entry
        .format_handle(FormatDefinition::Epub)
        .unwrap()
        .as_epub()
        .unwrap()
        .snapshot();
    assert!(snapshot.file.is_none());
}
