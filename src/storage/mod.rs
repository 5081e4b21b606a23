pub mod buffer;
pub mod disk;
pub mod doublewrite;
pub mod page;
