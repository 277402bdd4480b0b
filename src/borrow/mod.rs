//! The borrow pipeline
//!
//! A [`Borrower`] walks an [`AcquisitionPath`](crate::AcquisitionPath)
//! element by element. For each element it asks the [`SubtaskDirectory`]
//! for the first applicable subtask and runs it against a [`BorrowContext`].
//! Subtasks fetch documents, hand tokens to DRM engines, and persist the
//! final content through the book's format handles.

mod context;
mod directory;
mod engines;
mod http;
mod resolver;
pub mod subtasks;
mod walker;

pub use self::context::{BorrowContext, BorrowServices};
pub use self::directory::{Subtask, SubtaskDirectory, SubtaskFactory};
pub use self::engines::{AdobeEngine, AdobeFulfillment, AxisFulfillment, AxisNowService, DrmEngineError};
pub use self::http::{
    Authorization, DownloadOutcome, HttpClient, HttpRequest, HttpResponse, HttpResult, ProgressFn,
    ReqwestHttpClient,
};
pub use self::resolver::{BundledContentResolver, ContentResolver, LOCAL_SCHEMES};
pub use self::walker::{BorrowOutcome, BorrowResult, Borrower};
