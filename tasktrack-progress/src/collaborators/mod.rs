//! External collaborators of the progress service
//!
//! - [`UserDirectory`]: resolves display names from the user service
//! - [`DocumentStore`]: stores uploaded progress documents

pub mod documents;
pub mod users;

pub use documents::{DocumentStore, LocalDocumentStore, StoredDocument, Upload};
pub use users::{HttpUserDirectory, StaticUserDirectory, UserDirectory};
