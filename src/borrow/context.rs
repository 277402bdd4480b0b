//! Per-borrow state handed to every subtask

use super::engines::{AdobeEngine, AxisNowService};
use super::http::{Authorization, HttpClient, HttpRequest, HttpResponse, HttpResult};
use super::resolver::{BundledContentResolver, ContentResolver};
use crate::acquisition::{AcquisitionPathElement, FeedEntryParser, JsonFeedEntryParser};
use crate::config::Config;
use crate::database::BookDatabaseEntry;
use crate::error::{BorrowErrorCode, Error, SubtaskError, SubtaskFailure};
use crate::format::FormatHandle;
use crate::mime::MimeType;
use crate::progress::{Clock, SystemClock};
use crate::recorder::TaskRecorder;
use crate::registry::BookRegistry;
use crate::retry::fetch_with_retry;
use crate::types::{AccountAuth, AccountState, BookId, BookStatus};
use crate::utils::temp_download_path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Collaborators shared by every borrow
#[derive(Clone)]
pub struct BorrowServices {
    pub(crate) config: Arc<Config>,
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) registry: BookRegistry,
    pub(crate) parser: Arc<dyn FeedEntryParser>,
    pub(crate) resolver: Arc<dyn ContentResolver>,
    pub(crate) adobe: Option<Arc<dyn AdobeEngine>>,
    pub(crate) axis: Option<Arc<dyn AxisNowService>>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BorrowServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowServices")
            .field("adobe", &self.adobe.is_some())
            .field("axis", &self.axis.is_some())
            .finish_non_exhaustive()
    }
}

impl BorrowServices {
    /// Services with the JSON feed-entry parser, a `file:`-only resolver and no DRM engines
    pub fn new(config: Arc<Config>, http: Arc<dyn HttpClient>, registry: BookRegistry) -> Self {
        Self {
            config,
            http,
            registry,
            parser: Arc::new(JsonFeedEntryParser),
            resolver: Arc::new(BundledContentResolver::new()),
            adobe: None,
            axis: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a different feed-entry parser
    pub fn with_parser(mut self, parser: Arc<dyn FeedEntryParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Use a different content resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Enable Adobe DRM
    pub fn with_adobe_engine(mut self, engine: Arc<dyn AdobeEngine>) -> Self {
        self.adobe = Some(engine);
        self
    }

    /// Enable AxisNow DRM
    pub fn with_axis_service(mut self, service: Arc<dyn AxisNowService>) -> Self {
        self.axis = Some(service);
        self
    }

    /// Use a different clock for progress throttling
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The status registry
    pub fn registry(&self) -> &BookRegistry {
        &self.registry
    }
}

/// State of one borrow, consumed by subtasks
///
/// Subtasks read the current path element and collaborators from here and
/// report progress through the state mutators, which publish to the
/// [`BookRegistry`].
pub struct BorrowContext {
    services: BorrowServices,
    entry: Arc<BookDatabaseEntry>,
    account: AccountState,
    current: AcquisitionPathElement,
    remaining: Vec<AcquisitionPathElement>,
    consumed: usize,
    current_target: Option<Url>,
    next_target: Option<Url>,
    finished: bool,
    requesting_loan: bool,
    bearer_token: Option<String>,
    cancel: CancellationToken,
    recorder: TaskRecorder,
}

impl BorrowContext {
    pub(crate) fn new(
        services: BorrowServices,
        entry: Arc<BookDatabaseEntry>,
        account: AccountState,
        first: AcquisitionPathElement,
        remaining: Vec<AcquisitionPathElement>,
        cancel: CancellationToken,
    ) -> Self {
        let current_target = first.target.clone();
        Self {
            services,
            entry,
            account,
            current: first,
            remaining,
            consumed: 0,
            current_target,
            next_target: None,
            finished: false,
            requesting_loan: false,
            bearer_token: None,
            cancel,
            recorder: TaskRecorder::new(),
        }
    }

    /// The book being borrowed
    pub fn book_id(&self) -> &BookId {
        self.entry.id()
    }

    /// The book's database entry
    pub fn entry(&self) -> &Arc<BookDatabaseEntry> {
        &self.entry
    }

    /// The borrowing account
    pub fn account(&self) -> &AccountState {
        &self.account
    }

    /// The element being processed
    pub fn current_element(&self) -> &AcquisitionPathElement {
        &self.current
    }

    /// Where the current element is fetched from
    pub fn current_target(&self) -> Option<&Url> {
        self.current_target.as_ref()
    }

    /// Elements after the current one
    pub fn remaining_path(&self) -> &[AcquisitionPathElement] {
        self.remaining.get(self.consumed..).unwrap_or_default()
    }

    /// The element after the current one
    pub fn next_element(&self) -> Option<&AcquisitionPathElement> {
        self.remaining_path().first()
    }

    /// The configuration
    pub fn config(&self) -> &Config {
        &self.services.config
    }

    /// The HTTP client
    pub fn http(&self) -> Arc<dyn HttpClient> {
        self.services.http.clone()
    }

    /// The feed-entry parser
    pub fn parser(&self) -> Arc<dyn FeedEntryParser> {
        self.services.parser.clone()
    }

    /// The local content resolver
    pub fn resolver(&self) -> Arc<dyn ContentResolver> {
        self.services.resolver.clone()
    }

    /// The Adobe engine, if configured
    pub fn adobe_engine(&self) -> Option<Arc<dyn AdobeEngine>> {
        self.services.adobe.clone()
    }

    /// The AxisNow service, if configured
    pub fn axis_service(&self) -> Option<Arc<dyn AxisNowService>> {
        self.services.axis.clone()
    }

    /// The cancellation token of this borrow
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current time, for progress throttling
    pub fn now(&self) -> Instant {
        self.services.clock.now()
    }

    /// The task recorder
    pub fn recorder(&mut self) -> &mut TaskRecorder {
        &mut self.recorder
    }

    /// Fresh path for a temporary download of `source`
    ///
    /// # Errors
    /// Fails if the temporary directory cannot be created
    pub async fn temp_file_for(&self, source: &Url) -> crate::Result<PathBuf> {
        let dir = &self.services.config.storage.temp_dir;
        tokio::fs::create_dir_all(dir).await?;
        Ok(temp_download_path(dir, source))
    }

    /// Bearer token obtained earlier in this borrow
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    /// Authenticate later requests with `token`
    pub fn set_bearer_token(&mut self, token: impl Into<String>) {
        self.bearer_token = Some(token.into());
    }

    /// A request for `url` carrying the best credentials available
    ///
    /// A bearer token obtained during this borrow wins over account credentials.
    pub fn request(&self, url: Url) -> HttpRequest {
        let mut request = HttpRequest::new(url);
        if let Some(token) = &self.bearer_token {
            request.authorization = Some(Authorization::Bearer(token.clone()));
            return request;
        }
        if let Some(credentials) = &self.account.credentials {
            match &credentials.auth {
                AccountAuth::Basic { username, password } => {
                    request.authorization = Some(Authorization::Basic {
                        username: username.clone(),
                        password: password.clone(),
                    });
                }
                AccountAuth::OAuth { access_token } => {
                    request.authorization = Some(Authorization::Bearer(access_token.clone()));
                }
                AccountAuth::Saml2 {
                    access_token,
                    cookies,
                } => {
                    request.authorization = Some(Authorization::Bearer(access_token.clone()));
                    request.cookies = cookies.clone();
                }
            }
        }
        request
    }

    /// Fetch a small document, retrying transient failures
    ///
    /// Transport failures become `http_connection_failed`; error statuses
    /// become `failure_code` with any problem-report detail in the message.
    pub async fn fetch_document(
        &mut self,
        url: Url,
        failure_code: BorrowErrorCode,
    ) -> Result<HttpResponse, SubtaskError> {
        let http = self.http();
        let request = self.request(url.clone());
        let retry = self.services.config.retry.clone();
        let cancel = self.cancel.clone();

        let result = fetch_with_retry(&retry, &cancel, || {
            let http = http.clone();
            let request = request.clone();
            async move {
                match http.execute(&request).await {
                    HttpResult::Failed(e) => Err(e),
                    other => Ok(other),
                }
            }
        })
        .await;

        match result {
            Ok(HttpResult::Ok(response)) => Ok(response),
            Ok(HttpResult::Error(response)) => {
                let mut message = format!("{url} returned status {}", response.status);
                if let Some(detail) = response.problem_detail() {
                    message.push_str(": ");
                    message.push_str(&detail);
                }
                Err(self.fail(failure_code, message))
            }
            Ok(HttpResult::Failed(e)) | Err(e) => {
                self.check_cancelled()?;
                Err(self.fail_with(
                    BorrowErrorCode::HttpConnectionFailed,
                    format!("could not reach {url}"),
                    e,
                ))
            }
        }
    }

    /// The handle that stores content of `mime_type`, or a `no_format_handle` failure
    pub fn format_handle_for(&mut self, mime_type: &MimeType) -> Result<FormatHandle, SubtaskError> {
        match self.entry.find_format_handle_for_content_type(mime_type) {
            Some(handle) => Ok(handle),
            None => Err(self.fail(
                BorrowErrorCode::NoFormatHandle,
                format!("no format can store {mime_type}"),
            )),
        }
    }

    /// `Err(Cancelled)` once the borrow has been cancelled
    pub fn check_cancelled(&self) -> Result<(), SubtaskError> {
        if self.cancel.is_cancelled() {
            Err(self.cancelled())
        } else {
            Ok(())
        }
    }

    /// The cancellation signal; logged, never reported as a failure
    pub fn cancelled(&self) -> SubtaskError {
        tracing::info!(book_id = %self.book_id(), "borrow cancelled");
        SubtaskError::Cancelled
    }

    /// Record a failed step, publish the failure, and build the error to return
    pub fn fail(&mut self, code: BorrowErrorCode, message: impl Into<String>) -> SubtaskError {
        self.record_failure(SubtaskFailure {
            code,
            message: message.into(),
            cause: None,
        })
    }

    /// As [`fail`](Self::fail), preserving the underlying error
    pub fn fail_with<E>(
        &mut self,
        code: BorrowErrorCode,
        message: impl Into<String>,
        cause: E,
    ) -> SubtaskError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.record_failure(SubtaskFailure {
            code,
            message: message.into(),
            cause: Some(Arc::new(cause)),
        })
    }

    /// Record a persistence failure
    pub fn persistence_failed(&mut self, what: &str, error: Error) -> SubtaskError {
        self.fail_with(
            BorrowErrorCode::PersistenceFailed,
            format!("could not save {what}"),
            error,
        )
    }

    fn record_failure(&mut self, failure: SubtaskFailure) -> SubtaskError {
        tracing::error!(
            book_id = %self.book_id(),
            code = %failure.code,
            error = %failure,
            "borrow step failed"
        );
        self.recorder.current_step_failed(
            failure.message.clone(),
            failure.code,
            failure.cause.clone(),
        );
        if self.requesting_loan {
            self.book_loan_failed();
        } else {
            self.book_download_failed();
        }
        SubtaskError::Failed(failure)
    }

    /// Advance the walk to the next element, fetched from `uri`
    pub fn received_new_uri(&mut self, uri: Url) {
        tracing::debug!(book_id = %self.book_id(), uri = %uri, "next acquisition step");
        self.next_target = Some(uri);
    }

    /// Publish download progress
    pub fn book_download_is_running(
        &self,
        received: u64,
        expected: Option<u64>,
        bytes_per_second: u64,
        message: impl Into<String>,
    ) {
        self.publish(BookStatus::Downloading {
            received,
            expected,
            bytes_per_second,
            message: message.into(),
        });
    }

    /// Content is persisted; the walk is complete
    pub fn book_download_succeeded(&mut self) {
        self.finished = true;
        tracing::info!(book_id = %self.book_id(), "book downloaded");
        self.publish(BookStatus::Downloaded);
    }

    /// Fetching or persisting content failed
    pub fn book_download_failed(&self) {
        self.publish(BookStatus::FailedDownload);
    }

    /// The identity provider wants the user to log in at `uri`
    pub fn book_download_is_waiting_for_external_authentication(&self, uri: Url) {
        tracing::info!(book_id = %self.book_id(), uri = %uri, "waiting for external authentication");
        self.publish(BookStatus::DownloadWaitingForExternalAuthentication { uri });
    }

    /// A loan request is starting
    pub fn book_loan_is_requesting(&mut self) {
        self.requesting_loan = true;
        self.publish(BookStatus::RequestingLoan);
    }

    /// The loan was granted
    pub fn book_reached_loan(&mut self) {
        self.requesting_loan = false;
        self.publish(BookStatus::Loaned);
    }

    /// The request resulted in a hold
    pub fn book_is_held(&mut self, position: Option<u32>) {
        self.requesting_loan = false;
        self.publish(BookStatus::Held { position });
    }

    /// A held book is ready to be borrowed
    pub fn book_hold_is_ready(&mut self) {
        self.requesting_loan = false;
        self.publish(BookStatus::HoldReady);
    }

    /// The loan request failed
    pub fn book_loan_failed(&mut self) {
        self.requesting_loan = false;
        self.publish(BookStatus::FailedLoan);
    }

    fn publish(&self, status: BookStatus) {
        self.services.registry.update_status(self.entry.id(), status);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Move to the next element; false once the path is exhausted
    pub(crate) fn advance(&mut self) -> bool {
        let next_target = self.next_target.take();
        let Some(next) = self.remaining.get(self.consumed).cloned() else {
            return false;
        };
        self.consumed += 1;
        self.current_target = next_target.or_else(|| next.target.clone());
        self.current = next;
        true
    }

    pub(crate) fn into_recorder(self) -> TaskRecorder {
        self.recorder
    }
}
