//! An open file or directory (§4.6): a cached inode, a cursor, and the
//! open-time flags, all riding on top of the shared volume [`Context`].
//! Every read and write goes through the block map a chunk at a time,
//! sector by sector, rather than staging a whole block in memory.

use crate::blockmap;
use crate::context::SharedContext;
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::Error;
use crate::sys::inode::{Inode, TypePerm};

bitflags! {
    /// Open-time flags. Mirrors the subset of POSIX `open(2)` flags this
    /// driver understands; `INTERNAL` has no POSIX counterpart and exists
    /// only so the directory-append path can open a directory inode for
    /// writing without tripping the usual `IsDirectory` guard.
    pub struct OpenFlags: u32 {
        const WRONLY = 0x0001;
        const RDWR = 0x0002;
        const CREAT = 0x0040;
        const EXCL = 0x0080;
        const TRUNC = 0x0200;
        const APPEND = 0x0400;
        const INTERNAL = 0x1000;
    }
}

impl OpenFlags {
    pub fn readable(self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }

    pub fn writable(self) -> bool {
        self.contains(OpenFlags::WRONLY) || self.contains(OpenFlags::RDWR)
    }
}

/// Origin for [`FileHandle::seek`], mirroring `lseek(2)`'s `whence`.
#[derive(Clone, Copy, Debug)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    End(i32),
}

/// Snapshot of an inode's metadata, returned by [`FileHandle::stat`].
#[derive(Clone, Copy, Debug)]
pub struct FileStat {
    pub inode: u32,
    pub size: u32,
    pub mode: TypePerm,
    pub uid: u16,
    pub gid: u16,
    pub hard_links: u16,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// An open file or directory. Constructed by [`crate::fs::Ext2Volume::open`];
/// every handle keeps its own cached copy of the inode and flushes it back
/// through [`crate::context::Context::store_inode`] whenever a write
/// changes it.
pub struct FileHandle<D: BlockDevice> {
    pub(crate) ctx: SharedContext<D>,
    pub(crate) number: u32,
    pub(crate) inode: Inode,
    pub(crate) offset: u32,
    pub(crate) flags: OpenFlags,
}

impl<D: BlockDevice> FileHandle<D> {
    /// Inode number backing this handle.
    pub fn inode_number(&self) -> u32 {
        self.number
    }

    pub fn stat(&self) -> FileStat {
        FileStat {
            inode: self.number,
            size: self.inode.size(),
            mode: TypePerm::from_bits_truncate(self.inode.type_perm),
            uid: self.inode.uid,
            gid: self.inode.gid,
            hard_links: self.inode.hard_links,
            atime: self.inode.atime,
            mtime: self.inode.mtime,
            ctime: self.inode.ctime,
        }
    }

    /// Never a tty: every handle in this driver backs a disk file or
    /// directory.
    pub fn isatty(&self) -> Result<bool, Error<D::Error>> {
        Err(Error::NotATty)
    }

    pub fn seek(&mut self, from: SeekFrom) -> Result<u32, Error<D::Error>> {
        let base: i64 = match from {
            SeekFrom::Start(pos) => pos as i64,
            SeekFrom::Current(delta) => self.offset as i64 + delta as i64,
            SeekFrom::End(delta) => self.inode.size() as i64 + delta as i64,
        };
        if base < 0 {
            return Err(Error::InvalidArg);
        }
        if base > u32::MAX as i64 {
            return Err(Error::Overflow);
        }
        self.offset = base as u32;
        Ok(self.offset)
    }

    /// Read up to `out.len()` bytes starting at the cursor, advancing it
    /// by the amount actually read. A hole (a zero block pointer within the
    /// inode's size) is an error: this driver does not support sparse
    /// reads. `now` stamps the inode's access time.
    pub fn read(&mut self, out: &mut [u8], now: u32) -> Result<usize, Error<D::Error>> {
        if self.inode.is_directory() && !self.flags.contains(OpenFlags::INTERNAL) {
            return Err(Error::IsDirectory);
        }
        let size = self.inode.size();
        if self.offset >= size || out.is_empty() {
            return Ok(0);
        }
        let to_read = out.len().min((size - self.offset) as usize);

        let mut ctx = self.ctx.lock();
        let block_size = ctx.block_size();
        let mut done = 0;
        while done < to_read {
            let logical = self.offset as usize / block_size;
            let within = self.offset as usize % block_size;
            let chunk = (block_size - within).min(to_read - done);
            match blockmap::resolve(&mut ctx, &mut self.inode, logical as u32, false, false)? {
                Some(block) => read_block_range(&mut ctx, block, within, &mut out[done..done + chunk])?,
                None => return Err(Error::Io),
            }
            done += chunk;
            self.offset += chunk as u32;
        }
        self.inode.atime = now;
        Ok(done)
    }

    /// Write `data` at the cursor (or at end-of-file first, if opened with
    /// `APPEND`), extending the file and allocating blocks as needed.
    /// `now` stamps modification and, for a newly extended file, access
    /// time. The inode is flushed to disk before returning.
    pub fn write(&mut self, data: &[u8], now: u32) -> Result<usize, Error<D::Error>> {
        if self.inode.is_directory() && !self.flags.contains(OpenFlags::INTERNAL) {
            return Err(Error::IsDirectory);
        }
        if !self.flags.writable() {
            return Err(Error::BadHandle);
        }
        let mut ctx = self.ctx.lock();
        if ctx.is_read_only() {
            return Err(Error::ReadOnlyFs);
        }
        if self.flags.contains(OpenFlags::APPEND) {
            self.offset = self.inode.size();
        }
        if data.is_empty() {
            return Ok(0);
        }

        let block_size = ctx.block_size();
        let mut done = 0;
        while done < data.len() {
            let logical = self.offset as usize / block_size;
            let within = self.offset as usize % block_size;
            let chunk = (block_size - within).min(data.len() - done);
            let block = blockmap::resolve(&mut ctx, &mut self.inode, logical as u32, true, false)?
                .expect("extend=true always resolves to a block");
            write_block_range(&mut ctx, block, within, &data[done..done + chunk])?;
            done += chunk;
            self.offset += chunk as u32;
        }

        if self.offset > self.inode.size() {
            self.inode.set_size(self.offset);
        }
        self.inode.mtime = now;
        ctx.store_inode(self.number, &self.inode)?;
        Ok(done)
    }

    /// Flush the cached inode and release the handle's share of the
    /// volume context.
    pub fn close(self) -> Result<(), Error<D::Error>> {
        let mut ctx = self.ctx.lock();
        ctx.store_inode(self.number, &self.inode)
    }
}

fn read_block_range<D: BlockDevice>(
    ctx: &mut crate::context::Context<D>,
    block: u32,
    offset_in_block: usize,
    out: &mut [u8],
) -> Result<(), Error<D::Error>> {
    let base_sector = ctx.block_to_sector(block);
    let mut remaining_offset = offset_in_block;
    let mut out_pos = 0;
    while out_pos < out.len() {
        let sector_index = remaining_offset / SECTOR_SIZE;
        let sector_offset = remaining_offset % SECTOR_SIZE;
        let mut sector = [0_u8; SECTOR_SIZE];
        ctx.read_sector_abs(base_sector + sector_index as u64, &mut sector)?;
        let take = (SECTOR_SIZE - sector_offset).min(out.len() - out_pos);
        out[out_pos..out_pos + take].copy_from_slice(&sector[sector_offset..sector_offset + take]);
        out_pos += take;
        remaining_offset += take;
    }
    Ok(())
}

fn write_block_range<D: BlockDevice>(
    ctx: &mut crate::context::Context<D>,
    block: u32,
    offset_in_block: usize,
    data: &[u8],
) -> Result<(), Error<D::Error>> {
    let base_sector = ctx.block_to_sector(block);
    let mut remaining_offset = offset_in_block;
    let mut data_pos = 0;
    while data_pos < data.len() {
        let sector_index = remaining_offset / SECTOR_SIZE;
        let sector_offset = remaining_offset % SECTOR_SIZE;
        let mut sector = [0_u8; SECTOR_SIZE];
        ctx.read_sector_abs(base_sector + sector_index as u64, &mut sector)?;
        let take = (SECTOR_SIZE - sector_offset).min(data.len() - data_pos);
        sector[sector_offset..sector_offset + take].copy_from_slice(&data[data_pos..data_pos + take]);
        ctx.write_sector_abs(base_sector + sector_index as u64, &sector)?;
        data_pos += take;
        remaining_offset += take;
    }
    Ok(())
}
