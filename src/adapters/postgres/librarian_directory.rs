use crate::domain::EmployeeId;
use crate::ports::librarian_directory::{LibrarianDirectory as LibrarianDirectoryTrait, Result};
use async_trait::async_trait;
use sqlx::PgPool;

/// LibrarianDirectoryのPostgreSQL実装
///
/// `is_active`の司書のみを割当対象とする。
pub struct LibrarianDirectory {
    pool: PgPool,
}

impl LibrarianDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LibrarianDirectoryTrait for LibrarianDirectory {
    async fn valid_employee_ids(&self) -> Result<Vec<EmployeeId>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM librarians WHERE is_active ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(EmployeeId::new).collect())
    }
}
