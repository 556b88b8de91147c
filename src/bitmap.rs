//! Block and inode allocation (§4.3): group selection by free-resource
//! count, byte-at-a-time bitmap scan for the first clear bit, and the
//! three-step commit (bitmap bit, group descriptor counter, superblock
//! counter) that keeps all three in agreement.

use crate::context::Context;
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::Error;

/// What kind of resource a bitmap operation concerns, since blocks and
/// inodes are counted in different descriptor fields and only inode
/// allocation flushes the superblock immediately.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Resource {
    Block { is_directory: bool },
    Inode,
}

/// Flip one bit in a group's bitmap (block or inode, selected by
/// `resource`) and keep the group descriptor and in-memory superblock
/// counters consistent with it. `number` is the 1-based resource number
/// (a block number for `Resource::Block`, an inode number for
/// `Resource::Inode`); `per_group` is `blocks_per_group` or
/// `inodes_per_group` respectively.
fn change_allocated<D: BlockDevice>(
    ctx: &mut Context<D>,
    number: u32,
    per_group: u32,
    resource: Resource,
    allocate: bool,
) -> Result<(), Error<D::Error>> {
    if number == 0 {
        return Err(Error::InvalidArg);
    }
    let group = (number - 1) / per_group;
    let index = (number - 1) % per_group;
    let mut descriptor = ctx.read_block_group_descriptor(group)?;

    let bitmap_block = match resource {
        Resource::Block { .. } => descriptor.block_bitmap,
        Resource::Inode => descriptor.inode_bitmap,
    };
    let byte_index = index / 8;
    let bit = (index % 8) as u8;
    let sector_offset = byte_index as u64 / SECTOR_SIZE as u64;
    let byte_in_sector = (byte_index % SECTOR_SIZE as u32) as usize;
    let sector = ctx.block_to_sector(bitmap_block) + sector_offset;

    let mut buf = [0_u8; SECTOR_SIZE];
    ctx.read_sector_abs(sector, &mut buf)?;
    let mask = 1_u8 << bit;
    let currently_set = buf[byte_in_sector] & mask != 0;
    if allocate == currently_set {
        return Err(Error::StructuralCorruption);
    }
    if allocate {
        buf[byte_in_sector] |= mask;
    } else {
        buf[byte_in_sector] &= !mask;
    }
    ctx.write_sector_abs(sector, &buf)?;

    let delta: i32 = if allocate { -1 } else { 1 };
    match resource {
        Resource::Block { is_directory } => {
            descriptor.free_blocks_count = (descriptor.free_blocks_count as i32 + delta) as u16;
            if is_directory {
                let dir_delta = if allocate { 1_i32 } else { -1_i32 };
                descriptor.used_dirs_count = (descriptor.used_dirs_count as i32 + dir_delta) as u16;
            }
        }
        Resource::Inode => {
            descriptor.free_inodes_count = (descriptor.free_inodes_count as i32 + delta) as u16;
        }
    }
    ctx.write_block_group_descriptor(group, &descriptor)?;

    match resource {
        Resource::Block { .. } => {
            ctx.superblock.free_blocks_count = (ctx.superblock.free_blocks_count as i32 + delta) as u32;
        }
        Resource::Inode => {
            ctx.superblock.free_inodes_count = (ctx.superblock.free_inodes_count as i32 + delta) as u32;
        }
    }
    Ok(())
}

/// Scan every group's descriptor for the one with the most free resources
/// (earliest group wins ties), then scan that group's bitmap sector by
/// sector for the first clear bit. Returns the group and the 0-based index
/// of the free bit within it.
fn find_free<D: BlockDevice>(
    ctx: &mut Context<D>,
    per_group: u32,
    free_count: impl Fn(&crate::sys::block_group::BlockGroupDescriptor) -> u16,
    bitmap_block: impl Fn(&crate::sys::block_group::BlockGroupDescriptor) -> u32,
) -> Result<(u32, u32), Error<D::Error>> {
    let group_count = ctx.block_group_count();
    let mut best_group = 0_u32;
    let mut best_free = 0_u16;
    for g in 0..group_count {
        let descriptor = ctx.read_block_group_descriptor(g)?;
        if free_count(&descriptor) > best_free {
            best_free = free_count(&descriptor);
            best_group = g;
        }
    }
    if best_free == 0 {
        return Err(Error::NoSpace);
    }

    let descriptor = ctx.read_block_group_descriptor(best_group)?;
    let bytes = (per_group / 8) as u64;
    let sectors = (bytes + SECTOR_SIZE as u64 - 1) / SECTOR_SIZE as u64;
    let bitmap_block = bitmap_block(&descriptor);

    for sector_offset in 0..sectors {
        let mut buf = [0_u8; SECTOR_SIZE];
        ctx.read_sector_abs(ctx.block_to_sector(bitmap_block) + sector_offset, &mut buf)?;
        let bytes_in_sector = SECTOR_SIZE.min((bytes - sector_offset * SECTOR_SIZE as u64) as usize);
        for (i, byte) in buf[..bytes_in_sector].iter().enumerate() {
            if *byte != 0xff {
                for bit in 0..8 {
                    if byte & (1 << bit) == 0 {
                        let byte_index = sector_offset * SECTOR_SIZE as u64 + i as u64;
                        return Ok((best_group, byte_index as u32 * 8 + bit));
                    }
                }
            }
        }
    }
    Err(Error::StructuralCorruption)
}

/// Allocate a free block (§4.3). `is_directory` marks whether the caller is
/// about to use it to hold directory content, which bumps the owning
/// group's directory count.
pub fn alloc_block<D: BlockDevice>(
    ctx: &mut Context<D>,
    is_directory: bool,
) -> Result<u32, Error<D::Error>> {
    let per_group = ctx.superblock.blocks_per_group;
    let (group, index) = find_free(
        ctx,
        per_group,
        |d| d.free_blocks_count,
        |d| d.block_bitmap,
    )?;
    let block = group * per_group + index + 1;
    change_allocated(ctx, block, per_group, Resource::Block { is_directory }, true)?;
    log::trace!("allocated block {} in group {}", block, group);
    Ok(block)
}

/// Release a previously allocated block.
pub fn free_block<D: BlockDevice>(
    ctx: &mut Context<D>,
    block: u32,
    is_directory: bool,
) -> Result<(), Error<D::Error>> {
    let per_group = ctx.superblock.blocks_per_group;
    change_allocated(ctx, block, per_group, Resource::Block { is_directory }, false)
}

/// Allocate a free inode (§4.3). Unlike block allocation, this flushes the
/// superblock immediately: a freshly allocated inode is about to be handed
/// to a caller who may crash before ever closing it, so the reservation
/// must survive a remount.
pub fn alloc_inode<D: BlockDevice>(ctx: &mut Context<D>) -> Result<u32, Error<D::Error>> {
    let per_group = ctx.superblock.inodes_per_group;
    let (group, index) = find_free(
        ctx,
        per_group,
        |d| d.free_inodes_count,
        |d| d.inode_bitmap,
    )?;
    let inode = group * per_group + index + 1;
    change_allocated(ctx, inode, per_group, Resource::Inode, true)?;
    ctx.flush_superblock()?;
    log::trace!("allocated inode {} in group {}", inode, group);
    Ok(inode)
}

/// Release a previously allocated inode.
pub fn free_inode<D: BlockDevice>(ctx: &mut Context<D>, inode: u32) -> Result<(), Error<D::Error>> {
    let per_group = ctx.superblock.inodes_per_group;
    change_allocated(ctx, inode, per_group, Resource::Inode, false)?;
    ctx.flush_superblock()
}
