mod catalog_store;
mod circulation_store;
mod librarian_directory;
mod library;
mod member_store;

pub use library::InMemoryLibrary;
