use alloc::rc::Rc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::Error;
use crate::sys::block_group::{BlockGroupDescriptor, DESCRIPTOR_SIZE};
use crate::sys::inode::{Inode, INODE_SIZE};
use crate::sys::superblock::{Superblock, EXT2_MAGIC, FS_ERR, SUPERBLOCK_SIZE};

/// Process-wide state for one mounted volume: the parsed superblock, the
/// partition offset, and the location of every superblock/descriptor-table
/// copy. Created by [`mount`], destroyed by [`unmount`]; shared by every
/// [`crate::file::FileHandle`] opened against it, which is why it lives
/// behind [`SharedContext`] rather than being owned by a single handle.
///
/// Per the redesign direction in the filesystem's design notes, this
/// struct holds no shared scratch sector: every metadata routine below
/// allocates its own stack-local sector buffer, so there is no aliasing
/// hazard between concurrent metadata calls to guard against.
pub struct Context<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) partition_start: u64,
    pub(crate) superblock: Superblock,
    pub(crate) superblock_block: u32,
    pub(crate) superblock_copies: Vec<u32>,
    pub(crate) block_group_count: u32,
    pub(crate) read_only: bool,
}

/// Shared ownership of a mounted [`Context`]. A [`crate::file::FileHandle`]
/// holds one of these rather than a bare reference, so the context can
/// outlive any particular borrow of it without lifetimes leaking into the
/// public API.
pub type SharedContext<D> = Rc<Mutex<Context<D>>>;

impl<D: BlockDevice> Context<D> {
    /// Absolute device sector number for filesystem block `block`.
    #[inline]
    pub(crate) fn block_to_sector(&self, block: u32) -> u64 {
        block as u64 * self.superblock.sectors_per_block() as u64
    }

    /// Read one physical sector, relative to the partition start.
    pub(crate) fn read_sector_abs(
        &mut self,
        sector: u64,
        buf: &mut [u8; SECTOR_SIZE],
    ) -> Result<(), Error<D::Error>> {
        self.device
            .read_sector(self.partition_start + sector, buf)
            .map_err(Error::Device)
    }

    /// Write one physical sector, relative to the partition start.
    pub(crate) fn write_sector_abs(
        &mut self,
        sector: u64,
        buf: &[u8; SECTOR_SIZE],
    ) -> Result<(), Error<D::Error>> {
        self.device
            .write_sector(self.partition_start + sector, buf)
            .map_err(Error::Device)
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.superblock.block_size()
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[inline]
    pub fn block_group_count(&self) -> u32 {
        self.block_group_count
    }

    /// Read the descriptor for block group `group` from the primary
    /// descriptor table (§4.2): locate the sector holding it, read that one
    /// sector, copy the entry out.
    pub(crate) fn read_block_group_descriptor(
        &mut self,
        group: u32,
    ) -> Result<BlockGroupDescriptor, Error<D::Error>> {
        if group >= self.block_group_count {
            return Err(Error::InvalidArg);
        }
        let table_start_block = self.superblock_block + 1;
        let descriptors_per_sector = (SECTOR_SIZE / DESCRIPTOR_SIZE) as u32;
        let sector = (table_start_block as u64 * self.superblock.sectors_per_block() as u64)
            + (group / descriptors_per_sector) as u64;
        let offset = (group % descriptors_per_sector) as usize * DESCRIPTOR_SIZE;

        let mut buf = [0_u8; SECTOR_SIZE];
        self.read_sector_abs(sector, &mut buf)?;
        Ok(BlockGroupDescriptor::from_bytes(&buf, offset))
    }

    /// Write the descriptor for block group `group` into every mirrored
    /// descriptor table (one per superblock copy), per §4.2.
    pub(crate) fn write_block_group_descriptor(
        &mut self,
        group: u32,
        descriptor: &BlockGroupDescriptor,
    ) -> Result<(), Error<D::Error>> {
        if group >= self.block_group_count {
            return Err(Error::InvalidArg);
        }
        let descriptors_per_sector = (SECTOR_SIZE / DESCRIPTOR_SIZE) as u32;
        let sectors_per_block = self.superblock.sectors_per_block() as u64;
        let copies: Vec<u32> = self.superblock_copies.clone();
        for copy_block in copies {
            let table_start_block = copy_block + 1;
            let sector = (table_start_block as u64 * sectors_per_block)
                + (group / descriptors_per_sector) as u64;
            let offset = (group % descriptors_per_sector) as usize * DESCRIPTOR_SIZE;

            let mut buf = [0_u8; SECTOR_SIZE];
            self.read_sector_abs(sector, &mut buf)?;
            descriptor.write_into(&mut buf, offset);
            self.write_sector_abs(sector, &buf)?;
        }
        log::trace!("mirrored block group {} descriptor across {} copies", group, self.superblock_copies.len());
        Ok(())
    }

    /// Flush protocol (§4.1): for every superblock-copy location, zero the
    /// scratch buffer, stamp the self-identifying group field, copy the
    /// superblock in, write it out. All copies end up byte-identical
    /// except for that one field.
    pub(crate) fn flush_superblock(&mut self) -> Result<(), Error<D::Error>> {
        let sectors_per_block = self.superblock.sectors_per_block() as u64;
        let copies: Vec<u32> = self.superblock_copies.clone();
        for copy_block in copies {
            self.superblock.block_group = copy_block as u16;
            let raw = self.superblock.to_bytes();
            let sector = copy_block as u64 * sectors_per_block;

            let mut first = [0_u8; SECTOR_SIZE];
            let mut second = [0_u8; SECTOR_SIZE];
            first.copy_from_slice(&raw[0..SECTOR_SIZE]);
            second.copy_from_slice(&raw[SECTOR_SIZE..SUPERBLOCK_SIZE]);
            self.write_sector_abs(sector, &first)?;
            self.write_sector_abs(sector + 1, &second)?;
        }
        log::trace!("flushed superblock to {} copies", self.superblock_copies.len());
        Ok(())
    }

    /// Load inode `number` (§4.4): locate its block group, its index
    /// within the group's inode table, the sector that covers it, and copy
    /// the record out.
    pub fn load_inode(&mut self, number: u32) -> Result<Inode, Error<D::Error>> {
        if number == 0 || number > self.superblock.inodes_count {
            return Err(Error::InvalidArg);
        }
        let group = (number - 1) / self.superblock.inodes_per_group;
        let index = (number - 1) % self.superblock.inodes_per_group;
        let descriptor = self.read_block_group_descriptor(group)?;

        let inodes_per_block = (self.block_size() / INODE_SIZE) as u32;
        let block = descriptor.inode_table + index / inodes_per_block;
        let sector_in_block = (index % inodes_per_block) as usize * INODE_SIZE / SECTOR_SIZE;
        let offset_in_sector = (index % inodes_per_block) as usize * INODE_SIZE % SECTOR_SIZE;
        let sector = self.block_to_sector(block) + sector_in_block as u64;

        let mut buf = [0_u8; SECTOR_SIZE];
        self.read_sector_abs(sector, &mut buf)?;
        Ok(Inode::from_bytes(&buf, offset_in_sector))
    }

    /// Store inode `number` (§4.4): the read-modify-write mirror of
    /// `load_inode`.
    pub fn store_inode(&mut self, number: u32, inode: &Inode) -> Result<(), Error<D::Error>> {
        if number == 0 || number > self.superblock.inodes_count {
            return Err(Error::InvalidArg);
        }
        let group = (number - 1) / self.superblock.inodes_per_group;
        let index = (number - 1) % self.superblock.inodes_per_group;
        let descriptor = self.read_block_group_descriptor(group)?;

        let inodes_per_block = (self.block_size() / INODE_SIZE) as u32;
        let block = descriptor.inode_table + index / inodes_per_block;
        let sector_in_block = (index % inodes_per_block) as usize * INODE_SIZE / SECTOR_SIZE;
        let offset_in_sector = (index % inodes_per_block) as usize * INODE_SIZE % SECTOR_SIZE;
        let sector = self.block_to_sector(block) + sector_in_block as u64;

        let mut buf = [0_u8; SECTOR_SIZE];
        self.read_sector_abs(sector, &mut buf)?;
        inode.write_into(&mut buf, offset_in_sector);
        self.write_sector_abs(sector, &buf)?;
        Ok(())
    }
}

/// `true` if `n`, after repeatedly dividing out `base`, reduces exactly to 1
/// (`n` is a pure power of `base`; `1` itself counts).
fn is_pure_power(mut n: u32, base: u32) -> bool {
    if n == 0 {
        return false;
    }
    while n % base == 0 {
        n /= base;
    }
    n == 1
}

/// Enumerate the block-group numbers holding a superblock/descriptor-table
/// copy (§4.1): groups 0, 1, and every group whose index is a pure power of
/// 3, 5, or 7 when the sparse-superblock feature applies; every group
/// otherwise.
fn superblock_copy_groups(superblock: &Superblock, group_count: u32) -> Vec<u32> {
    let mut groups = Vec::new();
    if superblock.is_sparse_super() {
        for g in 0..group_count {
            if g == 0 || g == 1 || is_pure_power(g, 3) || is_pure_power(g, 5) || is_pure_power(g, 7)
            {
                groups.push(g);
            }
        }
    } else {
        groups.extend(0..group_count);
    }
    groups
}

/// Mount a volume: read and validate the primary superblock, enumerate its
/// copies, stamp mount bookkeeping, and flush the now-ERROR state so an
/// abrupt termination is externally detectable (§4.1, §7).
pub fn mount<D: BlockDevice>(
    mut device: D,
    partition_start: u64,
    now: u32,
) -> Result<SharedContext<D>, Error<D::Error>> {
    device.init().map_err(Error::Device)?;
    let read_only = device.is_read_only();

    let mut raw = [0_u8; SUPERBLOCK_SIZE];
    {
        let mut sector = [0_u8; SECTOR_SIZE];
        device
            .read_sector(partition_start + 2, &mut sector)
            .map_err(Error::Device)?;
        raw[0..SECTOR_SIZE].copy_from_slice(&sector);
        device
            .read_sector(partition_start + 3, &mut sector)
            .map_err(Error::Device)?;
        raw[SECTOR_SIZE..SUPERBLOCK_SIZE].copy_from_slice(&sector);
    }
    let mut superblock = Superblock::from_bytes(&raw);
    if superblock.magic != EXT2_MAGIC {
        return Err(Error::StructuralCorruption);
    }

    let volume_bytes = device.sector_count() * SECTOR_SIZE as u64;
    if (superblock.blocks_count as u64) * (superblock.block_size() as u64) > volume_bytes {
        return Err(Error::StructuralCorruption);
    }

    let superblock_block = superblock.primary_superblock_block();
    let block_group_count = superblock.block_group_count();
    let superblock_copies = superblock_copy_groups(&superblock, block_group_count)
        .into_iter()
        .map(|g| g * superblock.blocks_per_group + superblock_block)
        .collect();

    if superblock.state == FS_ERR {
        log::warn!("volume was not cleanly unmounted; an external consistency check is recommended");
    } else if superblock.mnt_count > superblock.max_mnt_count {
        log::warn!("mount count exceeds the configured maximum; routine maintenance is recommended");
    }
    superblock.mtime = now;
    superblock.mnt_count += 1;
    superblock.state = FS_ERR;

    let mut context = Context {
        device,
        partition_start,
        superblock,
        superblock_block,
        superblock_copies,
        block_group_count,
        read_only,
    };
    context.flush_superblock()?;

    Ok(Rc::new(Mutex::new(context)))
}

/// Unmount a volume: restore `state = CLEAN` and flush every superblock
/// copy. Requires the caller to have closed every [`crate::file::FileHandle`]
/// derived from this context first (`Rc::try_unwrap` fails otherwise,
/// surfaced as `Error::BadHandle`).
pub fn unmount<D: BlockDevice>(context: SharedContext<D>) -> Result<(), Error<D::Error>> {
    let mutex = Rc::try_unwrap(context).map_err(|_| Error::BadHandle)?;
    let mut context = mutex.into_inner();
    context.superblock.state = crate::sys::superblock::FS_CLEAN;
    context.flush_superblock()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_power_detection() {
        assert!(is_pure_power(1, 3));
        assert!(is_pure_power(3, 3));
        assert!(is_pure_power(9, 3));
        assert!(is_pure_power(27, 3));
        assert!(!is_pure_power(0, 3));
        assert!(!is_pure_power(6, 3));
        assert!(is_pure_power(25, 5));
        assert!(is_pure_power(49, 7));
        assert!(!is_pure_power(14, 7));
    }
}
