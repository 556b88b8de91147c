#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate bitflags;
extern crate alloc;

pub mod bitmap;
pub mod blockmap;
pub mod context;
pub mod device;
pub mod directory;
pub mod error;
pub mod file;
pub mod fs;
pub mod path;
pub mod sys;

pub use device::{BlockDevice, Clock, HostIdentity, SECTOR_SIZE};
pub use error::Error;
pub use file::{FileHandle, FileStat, OpenFlags, SeekFrom};
pub use fs::Ext2Volume;

#[cfg(test)]
mod tests {
    use crate::sys::block_group::*;
    use crate::sys::inode::*;
    use crate::sys::superblock::*;

    #[test]
    fn sizes() {
        use std::mem::size_of;
        assert_eq!(size_of::<Superblock>(), 1024);
        assert_eq!(size_of::<BlockGroupDescriptor>(), 32);
        assert_eq!(size_of::<Inode>(), 128);
    }
}
