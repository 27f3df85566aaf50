use crate::domain::MemberId;
use crate::ports::member_store::{MemberStore as MemberStoreTrait, Result};
use async_trait::async_trait;
use sqlx::PgPool;

/// MemberStoreのPostgreSQL実装
pub struct MemberStore {
    pool: PgPool,
}

impl MemberStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberStoreTrait for MemberStore {
    async fn exists(&self, member_id: MemberId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM members WHERE id = $1)")
                .bind(member_id.value())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}
