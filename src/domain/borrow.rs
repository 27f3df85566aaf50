use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{
    BookBorrowed, BookCopy, BookReturned, BorrowBookError, BorrowId, CopyId, EmployeeId,
    MemberId, ReturnBookError,
};

/// 既定の貸出期間（日数）
pub const DEFAULT_LOAN_PERIOD_DAYS: i64 = 14;

// ============================================================================
// 型安全な状態パターン
// ============================================================================

/// Borrow集約の共通フィールド
///
/// 貸出中・返却済みの両状態で共有されるコアデータ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowCore {
    // 識別子
    pub borrow_id: BorrowId,

    // 他の集約への参照（IDのみ）
    pub member_id: MemberId,
    pub copy_id: CopyId,
    pub employee_id: EmployeeId,

    // 貸出時点のシリアル番号（非正規化コピー）
    pub serial_number: String,

    pub borrow_date: DateTime<Utc>,
    pub expected_return_date: DateTime<Utc>,
}

/// 貸出中状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBorrow {
    #[serde(flatten)]
    pub core: BorrowCore,
}

impl std::ops::Deref for OpenBorrow {
    type Target = BorrowCore;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

/// 返却済み状態
///
/// ビジネスルール：
/// - actual_return_dateが必須（型で保証）
/// - 一度設定された返却日は変更されない
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedBorrow {
    #[serde(flatten)]
    pub core: BorrowCore,
    pub actual_return_date: DateTime<Utc>,
}

impl std::ops::Deref for ReturnedBorrow {
    type Target = BorrowCore;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

/// Borrow集約の統合型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Borrow {
    Open(OpenBorrow),
    Returned(ReturnedBorrow),
}

impl Borrow {
    pub fn core(&self) -> &BorrowCore {
        match self {
            Borrow::Open(open) => &open.core,
            Borrow::Returned(returned) => &returned.core,
        }
    }

    pub fn borrow_id(&self) -> BorrowId {
        self.core().borrow_id
    }

    pub fn actual_return_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Borrow::Open(_) => None,
            Borrow::Returned(returned) => Some(returned.actual_return_date),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Borrow::Open(_))
    }
}

// ============================================================================
// 純粋関数
// ============================================================================

/// 2時点間の暦日数（UTC日付の差）
pub fn whole_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to.date_naive() - from.date_naive()).num_days()
}

/// 純粋関数：延滞日数
///
/// 返却予定日時を過ぎていれば、同じ暦日のうちの返却でも1日と数える。
/// 予定日時ちょうど、またはそれ以前の返却は0。
pub fn days_late(expected_return_date: DateTime<Utc>, returned_at: DateTime<Utc>) -> i64 {
    if returned_at <= expected_return_date {
        return 0;
    }
    whole_days_between(expected_return_date, returned_at).max(1)
}

/// 純粋関数：延滞判定
///
/// 返却予定日時を過ぎている貸出中の貸出を延滞とする。
pub fn is_overdue(borrow: &OpenBorrow, now: DateTime<Utc>) -> bool {
    borrow.expected_return_date < now
}

/// 純粋関数：貸出資格の確認
///
/// 会員の貸出中の全貸出を対象に延滞を確認する（対象書籍に限らない）。
pub fn check_eligibility(
    open_borrows: &[OpenBorrow],
    now: DateTime<Utc>,
) -> Result<(), BorrowBookError> {
    if open_borrows.iter().any(|b| is_overdue(b, now)) {
        return Err(BorrowBookError::OverdueLockout);
    }
    Ok(())
}

/// 純粋関数：コピーに対する貸出を発行する
///
/// コピーの可用性のみを検証し、延滞ゲートは確認しない。
/// 予約の自動充足はこの関数を直接使う。
pub fn issue_borrow(
    member_id: MemberId,
    copy: &BookCopy,
    employee_id: EmployeeId,
    borrowed_at: DateTime<Utc>,
    loan_period: Duration,
) -> Result<(OpenBorrow, BookBorrowed), BorrowBookError> {
    if !copy.available {
        return Err(BorrowBookError::CopyUnavailable);
    }

    let borrow_id = BorrowId::new();
    let expected_return_date = borrowed_at + loan_period;

    let borrow = OpenBorrow {
        core: BorrowCore {
            borrow_id,
            member_id,
            copy_id: copy.copy_id,
            employee_id,
            serial_number: copy.serial_number.clone(),
            borrow_date: borrowed_at,
            expected_return_date,
        },
    };

    let event = BookBorrowed {
        borrow_id,
        member_id,
        copy_id: copy.copy_id,
        employee_id,
        serial_number: copy.serial_number.clone(),
        borrow_date: borrowed_at,
        expected_return_date,
    };

    Ok((borrow, event))
}

/// 純粋関数：書籍を貸し出す
///
/// ビジネスルール：
/// - 会員に延滞中の貸出があれば不可（OverdueLockout）
/// - コピーが貸出中なら不可（CopyUnavailable）
/// - 返却予定日 = 貸出日 + 貸出期間
///
/// 副作用なし。新しいOpenBorrowとイベントを返す。
pub fn borrow_book(
    member_open_borrows: &[OpenBorrow],
    member_id: MemberId,
    copy: &BookCopy,
    employee_id: EmployeeId,
    borrowed_at: DateTime<Utc>,
    loan_period: Duration,
) -> Result<(OpenBorrow, BookBorrowed), BorrowBookError> {
    check_eligibility(member_open_borrows, borrowed_at)?;
    issue_borrow(member_id, copy, employee_id, borrowed_at, loan_period)
}

/// 純粋関数：書籍を返却する
///
/// ビジネスルール：
/// - 返却済みの貸出は再返却不可
/// - 返却日時は貸出日時より前にできない
/// - 延滞していても返却は受け付ける（料金は請求台帳で扱う）
/// - 延滞の判定は`is_overdue`と同じく返却予定日時との比較
pub fn return_book(
    borrow: Borrow,
    returned_at: DateTime<Utc>,
) -> Result<(ReturnedBorrow, BookReturned), ReturnBookError> {
    match borrow {
        Borrow::Open(open) => {
            if returned_at < open.borrow_date {
                return Err(ReturnBookError::ReturnBeforeBorrow {
                    borrow_date: open.borrow_date,
                    returned_at,
                });
            }

            let was_late = returned_at > open.expected_return_date;
            let event = BookReturned {
                borrow_id: open.borrow_id,
                member_id: open.member_id,
                copy_id: open.copy_id,
                actual_return_date: returned_at,
                was_late,
            };

            let returned = ReturnedBorrow {
                core: open.core,
                actual_return_date: returned_at,
            };

            Ok((returned, event))
        }
        Borrow::Returned(_) => Err(ReturnBookError::AlreadyReturned),
    }
}
