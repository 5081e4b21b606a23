// Data page layout
//
// Every page starts with a fixed header; the body (the part redo records may
// modify) follows it.

/// CRC-32 of bytes `PAGE_NO_OFFSET..page_size`
pub const PAGE_CHECKSUM_OFFSET: usize = 0;
/// Page number within its tablespace
pub const PAGE_NO_OFFSET: usize = 4;
/// Tablespace identifier
pub const PAGE_SPACE_OFFSET: usize = 8;
/// LSN of the newest change contained in the page
pub const PAGE_LSN_OFFSET: usize = 12;
/// Page type tag
pub const PAGE_TYPE_OFFSET: usize = 20;
/// First byte of the page body
pub const PAGE_DATA_OFFSET: usize = 24;
