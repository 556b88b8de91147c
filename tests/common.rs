//! A synthetic in-memory block device and a hand-built minimal ext2 image,
//! shared by the integration tests. The image is deliberately tiny: one
//! block group, 1 KiB blocks, 64 blocks total, a root directory already
//! populated with "." and "..".
//!
//! Run with `cargo test --no-default-features`: the crate's own `no_std`
//! feature is default-on, and these tests link against a `std`-built copy
//! of the library.

use ext2rs::sys::dirent::{file_type, DirEntryHeader};
use ext2rs::sys::inode::{Inode, TypePerm};
use ext2rs::{BlockDevice, Clock, HostIdentity};

pub const BLOCK_SIZE: usize = 1024;
pub const DEVICE_SECTOR_SIZE: usize = 512;
pub const BLOCKS_COUNT: u32 = 64;
pub const INODES_PER_GROUP: u32 = 16;
pub const ROOT_DATA_BLOCK: u32 = 7;

pub struct MemDevice {
    sectors: Vec<[u8; DEVICE_SECTOR_SIZE]>,
}

impl MemDevice {
    pub fn from_image(image: Vec<u8>) -> MemDevice {
        let sectors = image
            .chunks(DEVICE_SECTOR_SIZE)
            .map(|chunk| {
                let mut sector = [0_u8; DEVICE_SECTOR_SIZE];
                sector.copy_from_slice(chunk);
                sector
            })
            .collect();
        MemDevice { sectors }
    }
}

impl BlockDevice for MemDevice {
    type Error = std::convert::Infallible;

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn read_sector(&mut self, sector: u64, buf: &mut [u8; DEVICE_SECTOR_SIZE]) -> Result<(), Self::Error> {
        buf.copy_from_slice(&self.sectors[sector as usize]);
        Ok(())
    }

    fn write_sector(&mut self, sector: u64, buf: &[u8; DEVICE_SECTOR_SIZE]) -> Result<(), Self::Error> {
        self.sectors[sector as usize] = *buf;
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.sectors.len() as u64
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn now(&self) -> u32 {
        self.0
    }
}

pub struct Identity {
    pub uid: u16,
    pub gid: u16,
}

impl HostIdentity for Identity {
    fn owner_uid(&self) -> u16 {
        self.uid
    }

    fn owner_gid(&self) -> u16 {
        self.gid
    }
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Build the on-disk image byte-for-byte: superblock at block 1, descriptor
/// table at block 2, block/inode bitmaps at blocks 3/4, a two-block inode
/// table at blocks 5-6, and the root directory's content at block 7.
pub fn build_image() -> Vec<u8> {
    let mut image = vec![0_u8; BLOCKS_COUNT as usize * BLOCK_SIZE];

    let sb = BLOCK_SIZE; // superblock lives at block 1 when block size is 1 KiB
    put_u32(&mut image, sb, 16); // inodes_count
    put_u32(&mut image, sb + 4, BLOCKS_COUNT); // blocks_count
    put_u32(&mut image, sb + 12, 56); // free_blocks_count
    put_u32(&mut image, sb + 16, 14); // free_inodes_count
    put_u32(&mut image, sb + 20, 1); // first_data_block
    put_u32(&mut image, sb + 24, 0); // log_block_size -> 1024 byte blocks
    put_u32(&mut image, sb + 32, BLOCKS_COUNT); // blocks_per_group (single group)
    put_u32(&mut image, sb + 40, INODES_PER_GROUP); // inodes_per_group
    put_u32(&mut image, sb + 44, 1_700_000_000); // mtime
    put_u16(&mut image, sb + 56, 0xef53); // magic
    put_u16(&mut image, sb + 58, 1); // state = clean
    put_u32(&mut image, sb + 76, 0); // rev_major = good old rev
    put_u32(&mut image, sb + 84, 11); // first_inode
    put_u16(&mut image, sb + 88, 128); // inode_size

    let bg = 2 * BLOCK_SIZE;
    put_u32(&mut image, bg, 3); // block_bitmap
    put_u32(&mut image, bg + 4, 4); // inode_bitmap
    put_u32(&mut image, bg + 8, 5); // inode_table
    put_u16(&mut image, bg + 12, 56); // free_blocks_count
    put_u16(&mut image, bg + 14, 14); // free_inodes_count
    put_u16(&mut image, bg + 16, 1); // used_dirs_count

    // Block bitmap: allocator block numbers are 1-based (block 0 is the
    // boot sector and never allocated), so bit i names block i+1. Blocks
    // 1-7 hold the superblock, descriptor table, bitmaps, inode table, and
    // root directory data; the last bit in the group (block 64, one past
    // the device's actual last block) is reserved so the allocator never
    // hands it out.
    image[3 * BLOCK_SIZE] = 0x7F;
    image[3 * BLOCK_SIZE + 7] = 0x80;
    image[4 * BLOCK_SIZE] = 0x03; // inodes 1 (reserved) and 2 (root) in use

    let mut root = Inode::zeroed();
    root.type_perm = (TypePerm::DIRECTORY
        | TypePerm::U_READ
        | TypePerm::U_WRITE
        | TypePerm::U_EXEC
        | TypePerm::G_READ
        | TypePerm::G_EXEC
        | TypePerm::O_READ
        | TypePerm::O_EXEC)
        .bits();
    root.set_size(BLOCK_SIZE as u32);
    root.hard_links = 2;
    root.sectors_count = (BLOCK_SIZE / DEVICE_SECTOR_SIZE) as u32;
    root.ctime = 1_700_000_000;
    root.mtime = 1_700_000_000;
    root.atime = 1_700_000_000;
    root.set_direct(0, ROOT_DATA_BLOCK);
    // Inode #2 is index 1 in the table starting at block 5.
    root.write_into(&mut image[5 * BLOCK_SIZE..], 128);

    let dot = DirEntryHeader {
        inode: 2,
        rec_len: 12,
        name_len: 1,
        file_type: file_type::DIRECTORY,
    };
    let dotdot = DirEntryHeader {
        inode: 2,
        rec_len: (BLOCK_SIZE - 12) as u16,
        name_len: 2,
        file_type: file_type::DIRECTORY,
    };
    let root_block = ROOT_DATA_BLOCK as usize * BLOCK_SIZE;
    image[root_block..root_block + 8].copy_from_slice(&dot.to_bytes());
    image[root_block + 8] = b'.';
    image[root_block + 12..root_block + 20].copy_from_slice(&dotdot.to_bytes());
    image[root_block + 20] = b'.';
    image[root_block + 21] = b'.';

    image
}

pub fn mount_fresh() -> ext2rs::Ext2Volume<MemDevice, FixedClock, Identity> {
    let device = MemDevice::from_image(build_image());
    ext2rs::Ext2Volume::mount(device, 0, FixedClock(1_700_000_100), Identity { uid: 1000, gid: 1000 })
        .expect("mount a freshly built image")
}
