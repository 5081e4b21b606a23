pub mod header;
pub mod layout;

pub use header::PageHeader;
