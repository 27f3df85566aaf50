use crate::domain::{BookCopy, BookId, CopyId};
use crate::ports::catalog_store::{CatalogStore as CatalogStoreTrait, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

fn map_row_to_copy(row: &PgRow) -> BookCopy {
    BookCopy {
        copy_id: CopyId::new(row.get("id")),
        book_id: BookId::new(row.get("book_id")),
        serial_number: row.get("serial_number"),
        available: row.get("available"),
    }
}

/// CatalogStoreのPostgreSQL実装
///
/// 読み取り専用。可用性は貸出ストアのコミットが書き込む。
pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStoreTrait for CatalogStore {
    async fn get_copy(&self, copy_id: CopyId) -> Result<Option<BookCopy>> {
        let row = sqlx::query(
            r#"
            SELECT id, book_id, serial_number, available
            FROM book_copies
            WHERE id = $1
            "#,
        )
        .bind(copy_id.value())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_row_to_copy))
    }

    async fn book_id_for_copy(&self, copy_id: CopyId) -> Result<Option<BookId>> {
        let book_id: Option<i64> =
            sqlx::query_scalar("SELECT book_id FROM book_copies WHERE id = $1")
                .bind(copy_id.value())
                .fetch_optional(&self.pool)
                .await?;
        Ok(book_id.map(BookId::new))
    }

    async fn find_available_copy(&self, book_id: BookId) -> Result<Option<BookCopy>> {
        let row = sqlx::query(
            r#"
            SELECT id, book_id, serial_number, available
            FROM book_copies
            WHERE book_id = $1 AND available
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(book_id.value())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_row_to_copy))
    }
}
