use crate::domain::value_objects::MemberId;
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// 会員ストアポート
///
/// 貸出コンテキストはMemberIDのみを知り、会員詳細（住所など）は知らない。
#[async_trait]
pub trait MemberStore: Send + Sync {
    /// 会員が存在するか確認する
    ///
    /// 貸出・予約の前の会員バリデーションに使用される。
    async fn exists(&self, member_id: MemberId) -> Result<bool>;
}
