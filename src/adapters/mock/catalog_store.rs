use crate::domain::{BookCopy, BookId, CopyId};
use crate::ports::catalog_store::{CatalogStore, Result};
use async_trait::async_trait;

use super::InMemoryLibrary;

#[async_trait]
impl CatalogStore for InMemoryLibrary {
    async fn get_copy(&self, copy_id: CopyId) -> Result<Option<BookCopy>> {
        Ok(self.lock_state().copies.get(&copy_id).cloned())
    }

    async fn book_id_for_copy(&self, copy_id: CopyId) -> Result<Option<BookId>> {
        Ok(self.lock_state().copies.get(&copy_id).map(|c| c.book_id))
    }

    /// コピーはBTreeMapで保持しているため、最初に一致したものが最小ID
    async fn find_available_copy(&self, book_id: BookId) -> Result<Option<BookCopy>> {
        Ok(self
            .lock_state()
            .copies
            .values()
            .find(|c| c.book_id == book_id && c.available)
            .cloned())
    }
}
