//! Repository abstractions for data access.
//!
//! Repositories provide a clean interface for database operations,
//! hiding the `SeaORM` implementation details from the approval engine.

pub mod approval;
pub mod listing;

pub use approval::SeaOrmStore;
pub use listing::ApprovalListingRepository;
