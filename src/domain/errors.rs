use chrono::{DateTime, Utc};

/// 貸出のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BorrowBookError {
    /// 会員に延滞中の貸出がある（会員単位のゲート、対象書籍に限らない）
    OverdueLockout,
    /// コピーが貸出中
    CopyUnavailable,
}

/// 返却のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnBookError {
    /// 既に返却済み
    AlreadyReturned,
    /// 返却日時が貸出日時より前
    ReturnBeforeBorrow {
        borrow_date: DateTime<Utc>,
        returned_at: DateTime<Utc>,
    },
}

/// 延滞料金記録のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFineError {
    /// この貸出には既に支払が存在する
    DuplicatePayment,
}
