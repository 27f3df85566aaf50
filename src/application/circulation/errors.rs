use crate::domain::{BorrowBookError, BorrowId, ReturnBookError};
use crate::ports::CommitError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// 貸出管理アプリケーション層のエラー
///
/// `StorageConflict`のみ再試行ポリシーを持つ（操作全体を再実行する）。
/// その他はリクエストに対して終端であり、呼び出し元へそのまま返す。
#[derive(Debug, Error)]
pub enum CirculationError {
    /// 会員に延滞中の貸出がある
    #[error("Member has an overdue borrow")]
    OverdueLockout,

    /// コピーが貸出中
    #[error("Copy is not available for borrowing")]
    CopyUnavailable,

    /// 貸出は既に返却済み
    #[error("Borrow has already been returned")]
    AlreadyReturned,

    /// 返却日時が貸出日時より前
    #[error("Return date {returned_at} is before borrow date {borrow_date}")]
    InvalidReturnDate {
        borrow_date: DateTime<Utc>,
        returned_at: DateTime<Utc>,
    },

    /// 対象が存在しない（会員、コピー、貸出、支払）
    #[error("{0} not found")]
    NotFound(String),

    /// 1貸出1支払の不変条件違反（外部には出ない想定）
    #[error("Payment already exists for borrow {0}")]
    DuplicatePayment(BorrowId),

    /// 同時書き込みとの競合（再試行を使い切った）
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// 貸出ストアのエラー
    #[error("Circulation store error")]
    StoreError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// カタログストアのエラー
    #[error("Catalog store error")]
    CatalogError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// 会員ストアのエラー
    #[error("Member store error")]
    MemberStoreError(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// 司書名簿のエラー
    #[error("Librarian directory error")]
    DirectoryError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<BorrowBookError> for CirculationError {
    fn from(err: BorrowBookError) -> Self {
        match err {
            BorrowBookError::OverdueLockout => CirculationError::OverdueLockout,
            BorrowBookError::CopyUnavailable => CirculationError::CopyUnavailable,
        }
    }
}

impl From<ReturnBookError> for CirculationError {
    fn from(err: ReturnBookError) -> Self {
        match err {
            ReturnBookError::AlreadyReturned => CirculationError::AlreadyReturned,
            ReturnBookError::ReturnBeforeBorrow {
                borrow_date,
                returned_at,
            } => CirculationError::InvalidReturnDate {
                borrow_date,
                returned_at,
            },
        }
    }
}

impl From<CommitError> for CirculationError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Conflict(reason) => CirculationError::StorageConflict(reason),
            CommitError::DuplicatePayment(borrow_id) => {
                CirculationError::DuplicatePayment(borrow_id)
            }
            CommitError::Backend(source) => CirculationError::StoreError(source),
        }
    }
}

/// アプリケーション層の Result型
pub type Result<T> = std::result::Result<T, CirculationError>;
