use core::fmt::{self, Debug};
use core::mem;
use core::ptr;

use crate::device::SECTOR_SIZE;

/// Ext2 signature (0xef53), used to help confirm the presence of Ext2 on a
/// volume.
pub const EXT2_MAGIC: u16 = 0xef53;

/// Filesystem is free of errors.
pub const FS_CLEAN: u16 = 1;
/// Filesystem has errors.
pub const FS_ERR: u16 = 2;

/// Revision 0, the original ext2 format with fixed 128-byte inodes.
pub const REV_GOOD_OLD: u32 = 0;
/// Revision 1, variable inode size and feature bits.
pub const REV_DYNAMIC: u32 = 1;

/// On-disk byte offset of the primary superblock into the partition.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// Size in bytes of one on-disk superblock copy.
pub const SUPERBLOCK_SIZE: usize = 1024;

/// The Superblock contains all information about the layout of the file
/// system and possibly contains other important information like what
/// optional features were used to create the file system.
///
/// The Superblock is always located at byte 1024 from the beginning of the
/// volume and is exactly 1024 bytes in length. For example, if the disk uses
/// 512 byte sectors, the Superblock will begin at LBA 2 and will occupy all
/// of sector 2 and 3.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Superblock {
    /// Total number of inodes in the file system.
    pub inodes_count: u32,
    /// Total number of blocks in the file system.
    pub blocks_count: u32,
    /// Number of blocks reserved for the superuser.
    pub r_blocks_count: u32,
    /// Total number of unallocated blocks.
    pub free_blocks_count: u32,
    /// Total number of unallocated inodes.
    pub free_inodes_count: u32,
    /// Block number of the block containing the superblock.
    pub first_data_block: u32,
    /// log2(block size) - 10.
    pub log_block_size: u32,
    /// log2(fragment size) - 10.
    pub log_frag_size: i32,
    /// Number of blocks in each block group.
    pub blocks_per_group: u32,
    /// Number of fragments in each block group.
    pub frags_per_group: u32,
    /// Number of inodes in each block group.
    pub inodes_per_group: u32,
    /// Last mount time (POSIX time).
    pub mtime: u32,
    /// Last written time (POSIX time).
    pub wtime: u32,
    /// Number of mounts since the last consistency check.
    pub mnt_count: u16,
    /// Number of mounts allowed before a consistency check must be done.
    pub max_mnt_count: i16,
    /// Ext2 signature (0xef53).
    pub magic: u16,
    /// File system state (`FS_CLEAN` or `FS_ERR`).
    pub state: u16,
    /// What to do when an error is detected.
    pub errors: u16,
    /// Minor revision level.
    pub rev_minor: u16,
    /// POSIX time of the last consistency check.
    pub lastcheck: u32,
    /// Interval in seconds between forced consistency checks.
    pub checkinterval: u32,
    /// Creator OS identifier.
    pub creator_os: u32,
    /// Revision level (`REV_GOOD_OLD` or `REV_DYNAMIC`).
    pub rev_major: u32,
    /// UID allowed to use reserved blocks.
    pub block_uid: u16,
    /// GID allowed to use reserved blocks.
    pub block_gid: u16,

    /// First non-reserved inode in the file system.
    pub first_inode: u32,
    /// Size of each inode structure in bytes (rev >= 1 only).
    pub inode_size: u16,
    /// Block group this copy belongs to; rewritten before every flush.
    pub block_group: u16,
    /// Optional feature bits.
    pub features_opt: FeaturesOptional,
    /// Required feature bits; unsupported bits must abort the mount.
    pub features_req: FeaturesRequired,
    /// RO-compat feature bits; unsupported bits force read-only mount.
    pub features_ronly: FeaturesROnly,
    /// File system UUID.
    pub fs_id: [u8; 16],
    /// Volume name, NUL-terminated.
    pub volume_name: [u8; 16],
    /// Path last mounted to, NUL-terminated.
    pub last_mnt_path: [u8; 64],
    /// Compression algorithm bitmap.
    pub compression: u32,
    /// Blocks to preallocate for regular files.
    pub prealloc_blocks_files: u8,
    /// Blocks to preallocate for directories.
    pub prealloc_blocks_dirs: u8,
    #[doc(hidden)]
    _unused: [u8; 2],
    /// Journal UUID.
    pub journal_id: [u8; 16],
    /// Journal inode.
    pub journal_inode: u32,
    /// Journal device.
    pub journal_dev: u32,
    /// Head of the orphan inode list.
    pub journal_orphan_head: u32,
    #[doc(hidden)]
    _reserved: [u8; 788],
}

impl Superblock {
    /// Parse a superblock out of a 1024-byte on-disk copy.
    pub fn from_bytes(bytes: &[u8; SUPERBLOCK_SIZE]) -> Superblock {
        unsafe { ptr::read_unaligned(bytes.as_ptr() as *const Superblock) }
    }

    /// Serialize this superblock into a fresh 1024-byte on-disk copy.
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut out = [0_u8; SUPERBLOCK_SIZE];
        unsafe {
            ptr::write_unaligned(out.as_mut_ptr() as *mut Superblock, *self);
        }
        out
    }

    /// Block size in bytes, derived from `log_block_size`.
    #[inline]
    pub fn block_size(&self) -> usize {
        1024 << self.log_block_size
    }

    /// Number of physical sectors spanned by one filesystem block.
    #[inline]
    pub fn sectors_per_block(&self) -> usize {
        self.block_size() / SECTOR_SIZE
    }

    /// Fragment size in bytes, derived from `log_frag_size`.
    #[inline]
    pub fn frag_size(&self) -> usize {
        1024 << self.log_frag_size
    }

    /// `ceil(blocks_count / blocks_per_group)`.
    pub fn block_group_count(&self) -> u32 {
        let blocks_per_group = self.blocks_per_group;
        let blocks_count = self.blocks_count;
        let rem = if blocks_count % blocks_per_group == 0 {
            0
        } else {
            1
        };
        blocks_count / blocks_per_group + rem
    }

    /// Whether this revision-1 volume uses the sparse-superblock layout:
    /// copies live only in groups 0, 1, and pure powers of 3, 5, or 7.
    pub fn is_sparse_super(&self) -> bool {
        self.rev_major == REV_DYNAMIC && self.features_ronly.contains(FeaturesROnly::RONLY_SPARSE)
    }

    /// Block number (relative to the partition) of the block containing the
    /// primary superblock: block 1 when the block size is exactly 1 KiB
    /// (block 0 holds boot code instead), block 0 otherwise.
    pub fn primary_superblock_block(&self) -> u32 {
        if self.block_size() == 1024 {
            1
        } else {
            0
        }
    }
}

impl Debug for Superblock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Superblock")
            .field("inodes_count", &{ self.inodes_count })
            .field("blocks_count", &{ self.blocks_count })
            .field("free_blocks_count", &{ self.free_blocks_count })
            .field("free_inodes_count", &{ self.free_inodes_count })
            .field("blocks_per_group", &{ self.blocks_per_group })
            .field("inodes_per_group", &{ self.inodes_per_group })
            .field("mnt_count", &{ self.mnt_count })
            .field("max_mnt_count", &{ self.max_mnt_count })
            .field("magic", &{ self.magic })
            .field("state", &{ self.state })
            .field("inode_size", &{ self.inode_size })
            .field("block_group", &{ self.block_group })
            .finish()
    }
}

bitflags! {
    /// Optional features: safe to ignore, usually just a performance cost.
    pub struct FeaturesOptional: u32 {
        const PREALLOCATE = 0x0001;
        const AFS = 0x0002;
        const JOURNAL = 0x0004;
        const EXTENDED_INODE = 0x0008;
        const SELF_RESIZE = 0x0010;
        const HASH_INDEX = 0x0020;
    }
}

bitflags! {
    /// Required features. Unsupported bits here mean the volume cannot be
    /// mounted at all.
    pub struct FeaturesRequired: u32 {
        const REQ_COMPRESSION = 0x0001;
        const REQ_DIRECTORY_TYPE = 0x0002;
        const REQ_REPLAY_JOURNAL = 0x0004;
        const REQ_JOURNAL_DEVICE = 0x0008;
    }
}

bitflags! {
    /// RO-compat features. Unsupported bits here mean the volume must be
    /// mounted read-only.
    pub struct FeaturesROnly: u32 {
        const RONLY_SPARSE = 0x0001;
        const RONLY_FILE_SIZE_64 = 0x0002;
        const RONLY_BTREE_DIRECTORY = 0x0004;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_1024() {
        assert_eq!(mem::size_of::<Superblock>(), SUPERBLOCK_SIZE);
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut raw = [0_u8; SUPERBLOCK_SIZE];
        raw[56] = (EXT2_MAGIC & 0xff) as u8;
        raw[57] = (EXT2_MAGIC >> 8) as u8;
        raw[32] = 8; // blocks_per_group low byte
        let sb = Superblock::from_bytes(&raw);
        assert_eq!({ sb.magic }, EXT2_MAGIC);
        let back = sb.to_bytes();
        assert_eq!(&back[..], &raw[..]);
    }

    #[test]
    fn block_size_from_log() {
        let mut raw = [0_u8; SUPERBLOCK_SIZE];
        raw[24] = 2; // log_block_size = 2 -> 4096 byte blocks
        let sb = Superblock::from_bytes(&raw);
        assert_eq!(sb.block_size(), 4096);
        assert_eq!(sb.sectors_per_block(), 8);
    }

    #[test]
    fn sparse_super_needs_both_bits() {
        let mut raw = [0_u8; SUPERBLOCK_SIZE];
        let sb = Superblock::from_bytes(&raw);
        assert!(!sb.is_sparse_super());

        raw[76] = REV_DYNAMIC as u8;
        raw[100] = FeaturesROnly::RONLY_SPARSE.bits() as u8;
        let sb = Superblock::from_bytes(&raw);
        assert!(sb.is_sparse_super());
    }
}
