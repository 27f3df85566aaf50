use crate::domain::{BookCopy, BookId, CopyId};
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// カタログストアポート
///
/// 貸出コンテキストとカタログコンテキストの境界を維持する。
/// 可用性フラグの変更はここではなく、貸出ストアのコミットに含めて
/// 貸出・返却と同じトランザクションで反映する。
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// コピーを取得する
    async fn get_copy(&self, copy_id: CopyId) -> Result<Option<BookCopy>>;

    /// コピーが属する書籍IDを取得する
    async fn book_id_for_copy(&self, copy_id: CopyId) -> Result<Option<BookId>>;

    /// 書籍の貸出可能なコピーを1つ探す
    ///
    /// 複数ある場合はコピーIDの最小のものを返す。
    /// 予約の単独充足に使用される。
    async fn find_available_copy(&self, book_id: BookId) -> Result<Option<BookCopy>>;
}
