use serde::{Deserialize, Serialize};

use super::{BookId, CopyId};

/// 蔵書（書籍の物理コピー）
///
/// 不変条件：`available == false` ⇔ このコピーに未返却の貸出が存在する。
/// 可用性は貸出・返却のコミットの副作用としてのみ変化する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    pub copy_id: CopyId,
    pub book_id: BookId,
    pub serial_number: String,
    pub available: bool,
}

/// 可用性フラグの変更（コンペア・アンド・セット）
///
/// コミット時に現在値が`expected`と一致しなければ競合として扱われる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityChange {
    pub copy_id: CopyId,
    pub expected: bool,
    pub new_value: bool,
}

impl AvailabilityChange {
    /// 貸出によって利用不可にする
    pub fn checkout(copy_id: CopyId) -> Self {
        Self {
            copy_id,
            expected: true,
            new_value: false,
        }
    }

    /// 返却によって利用可能に戻す
    pub fn release(copy_id: CopyId) -> Self {
        Self {
            copy_id,
            expected: false,
            new_value: true,
        }
    }
}
