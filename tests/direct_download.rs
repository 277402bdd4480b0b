//! Direct downloads of EPUB and PDF content over HTTP

mod common;

use book_borrow::borrow::BorrowOutcome;
use book_borrow::format::FormatDefinition;
use book_borrow::{
    AcquisitionPath, Availability, BookStatus, BorrowErrorCode, DrmInformation, DrmKind, MimeType,
};
use common::*;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn epub_download_lands_in_the_epub_handle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/works/1/book.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(EPUB_BODY, "application/epub+zip"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let href = format!("{}/works/1/book.epub", server.uri());
    let feed_entry = feed_entry(
        "urn:book:direct",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::epub())],
    );
    let entry = harness.admit(feed_entry);
    let mut events = harness.registry.subscribe();

    let result = harness
        .borrower()
        .borrow(
            entry.clone(),
            basic_account(),
            AcquisitionPath::single(url(&href), MimeType::epub()),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.outcome, BorrowOutcome::Completed, "{result:#?}");
    assert!(result.is_success());
    assert_eq!(result.attributes.get("book_id").map(String::as_str), Some(entry.id().as_str()));

    let handles = entry.format_handles();
    assert_eq!(handles.len(), 1);
    let epub = handles[0].as_epub().expect("an EPUB handle").snapshot();
    let file = epub.file.clone().expect("a persisted book");
    assert_eq!(std::fs::read(&file).unwrap(), EPUB_BODY);
    assert_eq!(epub.drm_info, DrmInformation::None);
    assert!(entry.book().is_downloaded());

    assert_eq!(harness.registry.status(entry.id()), Some(BookStatus::Downloaded));
    let statuses = drain_statuses(&mut events, entry.id());
    assert_eq!(statuses.last(), Some(&BookStatus::Downloaded));

    // Nothing is left behind in the download area.
    assert!(files_under(&harness.temp_dir()).is_empty());
}

#[tokio::test]
async fn octet_stream_is_accepted_for_pdf() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BODY, "application/octet-stream"))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let href = format!("{}/book.pdf", server.uri());
    let entry = harness.admit(feed_entry(
        "urn:book:pdf",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::pdf())],
    ));

    let result = harness
        .borrower()
        .borrow(
            entry.clone(),
            basic_account(),
            AcquisitionPath::single(url(&href), MimeType::pdf()),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.outcome, BorrowOutcome::Completed, "{result:#?}");
    let pdf = entry
        .format_handle(FormatDefinition::Pdf)
        .expect("a PDF handle");
    let snapshot = pdf.as_pdf().unwrap().snapshot();
    assert_eq!(std::fs::read(snapshot.file.as_ref().unwrap()).unwrap(), PDF_BODY);
}

#[tokio::test]
async fn server_error_fails_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book.epub"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let href = format!("{}/book.epub", server.uri());
    let entry = harness.admit(feed_entry(
        "urn:book:500",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::epub())],
    ));

    let result = harness
        .borrower()
        .borrow(
            entry.clone(),
            basic_account(),
            AcquisitionPath::single(url(&href), MimeType::epub()),
            CancellationToken::new(),
        )
        .await;

    assert_failed_with(&result, BorrowErrorCode::HttpRequestFailed);
    assert!(!result.is_success());
    assert_eq!(harness.registry.status(entry.id()), Some(BookStatus::FailedDownload));
    let epub = entry.format_handle(FormatDefinition::Epub).unwrap();
    assert!(epub.as_epub().unwrap().snapshot().file.is_none());
    assert!(files_under(&harness.temp_dir()).is_empty());
}

#[tokio::test]
async fn incompatible_content_type_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BODY, "application/pdf"))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let href = format!("{}/book.epub", server.uri());
    let entry = harness.admit(feed_entry(
        "urn:book:mismatch",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::epub())],
    ));

    let result = harness
        .borrower()
        .borrow(
            entry.clone(),
            basic_account(),
            AcquisitionPath::single(url(&href), MimeType::epub()),
            CancellationToken::new(),
        )
        .await;

    assert_failed_with(&result, BorrowErrorCode::HttpContentTypeIncompatible);
    assert!(!entry.book().is_downloaded());
}

#[tokio::test]
async fn html_without_saml_is_incompatible() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>login</html>", "text/html"))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let href = format!("{}/book.epub", server.uri());
    let entry = harness.admit(feed_entry(
        "urn:book:html",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::epub())],
    ));

    let result = harness
        .borrower()
        .borrow(
            entry,
            basic_account(),
            AcquisitionPath::single(url(&href), MimeType::epub()),
            CancellationToken::new(),
        )
        .await;

    assert_failed_with(&result, BorrowErrorCode::HttpContentTypeIncompatible);
}

#[tokio::test]
async fn missing_format_handle_fails_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF_BODY, "application/pdf"))
        .expect(0)
        .mount(&server)
        .await;

    // The entry only advertises EPUB, so no PDF handle exists.
    let harness = Harness::new();
    let epub_href = format!("{}/book.epub", server.uri());
    let pdf_href = format!("{}/book.pdf", server.uri());
    let entry = harness.admit(feed_entry(
        "urn:book:nohandle",
        Availability::OpenAccess,
        vec![acquisition(&epub_href, MimeType::epub())],
    ));

    let result = harness
        .borrower()
        .borrow(
            entry,
            basic_account(),
            AcquisitionPath::single(url(&pdf_href), MimeType::pdf()),
            CancellationToken::new(),
        )
        .await;

    assert_failed_with(&result, BorrowErrorCode::NoFormatHandle);
}

#[tokio::test]
async fn unknown_type_has_no_subtask() {
    let harness = Harness::new();
    let entry = harness.admit(feed_entry(
        "urn:book:unknown",
        Availability::OpenAccess,
        vec![acquisition("http://example.com/book.epub", MimeType::epub())],
    ));

    let result = harness
        .borrower()
        .borrow(
            entry,
            basic_account(),
            AcquisitionPath::single(
                url("http://example.com/thing"),
                MimeType::known("application/x-unknown"),
            ),
            CancellationToken::new(),
        )
        .await;

    assert_failed_with(&result, BorrowErrorCode::NoSubtaskAvailable);
}

#[tokio::test]
async fn failed_drm_marker_write_keeps_the_book_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(EPUB_BODY, "application/epub+zip"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let href = format!("{}/book.epub", server.uri());
    let entry = harness.admit(feed_entry(
        "urn:book:marker",
        Availability::OpenAccess,
        vec![acquisition(&href, MimeType::epub())],
    ));
    let epub = entry.format_handle(FormatDefinition::Epub).unwrap();
    epub.set_drm_kind(DrmKind::Lcp).unwrap();
    // A directory where the marker's temporary file goes makes the marker write fail.
    std::fs::create_dir(entry.directory().join("epub-drm.txt.tmp")).unwrap();

    let result = harness
        .borrower()
        .borrow(
            entry.clone(),
            basic_account(),
            AcquisitionPath::single(url(&href), MimeType::epub()),
            CancellationToken::new(),
        )
        .await;

    assert_failed_with(&result, BorrowErrorCode::PersistenceFailed);
    assert_eq!(harness.registry.status(entry.id()), Some(BookStatus::FailedDownload));
    let snapshot = epub.as_epub().unwrap().snapshot();
    assert!(snapshot.file.is_none());
    assert_eq!(snapshot.drm_info, DrmInformation::Lcp);
    assert!(!entry.directory().join("epub-book.epub").exists());
    assert!(files_under(&harness.temp_dir()).is_empty());

    let reopened = harness.reopen();
    let epub = reopened
        .entry(entry.id())
        .unwrap()
        .format_handle(FormatDefinition::Epub)
        .unwrap();
    assert_eq!(epub.as_epub().unwrap().snapshot(), snapshot);
}
