//! Raw on-disk structures: byte-for-byte `repr(C, packed)` mirrors of the
//! ext2 layout, with no I/O or allocation policy attached. Higher-level
//! modules (`context`, `bitmap`, `blockmap`, `file`, `directory`) own the
//! sector arithmetic that locates these structures on disk; this module
//! only knows their shape.

pub mod block_group;
pub mod dirent;
pub mod inode;
pub mod superblock;
