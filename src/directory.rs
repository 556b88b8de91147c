//! Directory content: the record format is the same on-disk bytes as any
//! other file's data blocks, walked through the block map (§4.7). A
//! block's records always tile it exactly, which is what makes append
//! work by shrinking the final record's slack rather than maintaining a
//! separate free list.
//!
//! Deleting an entry is deliberately not implemented here — the original
//! driver this one was modeled after left it as a stub, and nothing in
//! the public interface exposes an operation that would need it.

use alloc::vec::Vec;

use crate::blockmap::{self, block_count_for, MAX_BLOCK_SIZE};
use crate::context::Context;
use crate::device::BlockDevice;
use crate::error::Error;
use crate::sys::dirent::{DirEntryHeader, DIR_HEADER_SIZE};
use crate::sys::inode::Inode;

/// One live directory record, decoded off disk.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub inode: u32,
    pub file_type: u8,
    pub name: Vec<u8>,
}

/// Call `f` with every live entry in `dir_inode`, in on-disk order, until
/// either the directory is exhausted or `f` returns `Ok(false)`.
pub fn for_each<D: BlockDevice, F>(
    ctx: &mut Context<D>,
    dir_inode: &Inode,
    mut f: F,
) -> Result<(), Error<D::Error>>
where
    F: FnMut(DirEntry) -> Result<bool, Error<D::Error>>,
{
    if !dir_inode.is_directory() {
        return Err(Error::NotDirectory);
    }
    let block_size = ctx.block_size();
    let mut scratch = *dir_inode;
    let block_count = block_count_for(dir_inode.size(), block_size);
    let mut buf = [0_u8; MAX_BLOCK_SIZE];

    for logical in 0..block_count {
        let block = match blockmap::resolve(ctx, &mut scratch, logical, false, false)? {
            Some(block) => block,
            None => continue,
        };
        blockmap::read_block(ctx, block, &mut buf[..block_size])?;

        let mut offset = 0_usize;
        while offset + DIR_HEADER_SIZE <= block_size {
            let mut header_bytes = [0_u8; DIR_HEADER_SIZE];
            header_bytes.copy_from_slice(&buf[offset..offset + DIR_HEADER_SIZE]);
            let header = DirEntryHeader::from_bytes(&header_bytes);
            if header.rec_len == 0 {
                break;
            }
            if header.is_live() {
                let name_start = offset + DIR_HEADER_SIZE;
                let name_end = name_start + header.name_len as usize;
                let entry = DirEntry {
                    inode: header.inode,
                    file_type: header.file_type,
                    name: buf[name_start..name_end].to_vec(),
                };
                if !f(entry)? {
                    return Ok(());
                }
            }
            offset += header.rec_len as usize;
        }
    }
    Ok(())
}

/// Resolve `name` against `dir_inode`'s entries, returning the inode
/// number it names if found.
pub fn lookup<D: BlockDevice>(
    ctx: &mut Context<D>,
    dir_inode: &Inode,
    name: &[u8],
) -> Result<Option<u32>, Error<D::Error>> {
    let mut found = None;
    for_each(ctx, dir_inode, |entry| {
        if entry.name == name {
            found = Some(entry.inode);
            Ok(false)
        } else {
            Ok(true)
        }
    })?;
    Ok(found)
}

/// Append a new record naming `inode_number` under `name` (§4.7). Scans
/// every existing block's tail record for enough slack to shrink-and-split
/// before resorting to allocating a fresh, zeroed block for the entry.
pub fn append_entry<D: BlockDevice>(
    ctx: &mut Context<D>,
    dir_inode: &mut Inode,
    name: &[u8],
    inode_number: u32,
    file_type: u8,
) -> Result<(), Error<D::Error>> {
    if name.is_empty() || name.len() > 255 {
        return Err(Error::InvalidArg);
    }
    let block_size = ctx.block_size();
    let needed = DirEntryHeader::minimum_len(name.len());
    let size = dir_inode.size();
    if size % block_size as u32 != 0 {
        return Err(Error::StructuralCorruption);
    }
    let block_count = block_count_for(size, block_size);
    let mut buf = [0_u8; MAX_BLOCK_SIZE];

    for logical in 0..block_count {
        let block = match blockmap::resolve(ctx, dir_inode, logical, false, true)? {
            Some(block) => block,
            None => continue,
        };
        blockmap::read_block(ctx, block, &mut buf[..block_size])?;

        let mut offset = 0_usize;
        let mut tail_offset = 0_usize;
        while offset + DIR_HEADER_SIZE <= block_size {
            let mut header_bytes = [0_u8; DIR_HEADER_SIZE];
            header_bytes.copy_from_slice(&buf[offset..offset + DIR_HEADER_SIZE]);
            let header = DirEntryHeader::from_bytes(&header_bytes);
            if header.rec_len == 0 {
                break;
            }
            tail_offset = offset;
            offset += header.rec_len as usize;
        }

        let mut tail_bytes = [0_u8; DIR_HEADER_SIZE];
        tail_bytes.copy_from_slice(&buf[tail_offset..tail_offset + DIR_HEADER_SIZE]);
        let mut tail = DirEntryHeader::from_bytes(&tail_bytes);
        let tail_occupied = if tail.is_live() {
            DirEntryHeader::minimum_len(tail.name_len as usize)
        } else {
            DIR_HEADER_SIZE as u16
        };

        if tail.rec_len < tail_occupied || tail.rec_len - tail_occupied <= needed {
            continue;
        }

        let split_len = tail.rec_len - tail_occupied;
        tail.rec_len = tail_occupied;
        buf[tail_offset..tail_offset + DIR_HEADER_SIZE].copy_from_slice(&tail.to_bytes());

        let new_offset = tail_offset + tail_occupied as usize;
        let new_header = DirEntryHeader {
            inode: inode_number,
            rec_len: split_len,
            name_len: name.len() as u8,
            file_type,
        };
        buf[new_offset..new_offset + DIR_HEADER_SIZE].copy_from_slice(&new_header.to_bytes());
        buf[new_offset + DIR_HEADER_SIZE..new_offset + DIR_HEADER_SIZE + name.len()]
            .copy_from_slice(name);

        blockmap::write_block(ctx, block, &buf[..block_size])?;
        return Ok(());
    }

    let new_block = blockmap::resolve(ctx, dir_inode, block_count, true, true)?
        .expect("extend=true always resolves to a block");
    let header = DirEntryHeader {
        inode: inode_number,
        rec_len: block_size as u16,
        name_len: name.len() as u8,
        file_type,
    };
    let mut block_buf = [0_u8; MAX_BLOCK_SIZE];
    block_buf[0..DIR_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    block_buf[DIR_HEADER_SIZE..DIR_HEADER_SIZE + name.len()].copy_from_slice(name);
    blockmap::write_block(ctx, new_block, &block_buf[..block_size])?;

    dir_inode.set_size(size + block_size as u32);
    Ok(())
}
