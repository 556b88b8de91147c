//! The public facade (§4.9): mount a device once, then open, read, write,
//! seek, and list directories against the resulting volume. Everything
//! below this module is an implementation detail reachable only through
//! `Ext2Volume` and `FileHandle`.

use alloc::vec::Vec;

use crate::bitmap;
use crate::blockmap::{self, block_count_for};
use crate::context::{self, SharedContext};
use crate::device::{BlockDevice, Clock, HostIdentity};
use crate::directory::{self, DirEntry};
use crate::error::Error;
use crate::file::{FileHandle, OpenFlags};
use crate::path;
use crate::sys::dirent::file_type;
use crate::sys::inode::{Inode, TypePerm};

/// A mounted ext2 volume. Generic over the block device, a clock for
/// timestamping, and a host identity used to stamp ownership on newly
/// created inodes — none of which this crate implements itself (§6).
pub struct Ext2Volume<D: BlockDevice, C: Clock, H: HostIdentity> {
    ctx: SharedContext<D>,
    clock: C,
    identity: H,
}

impl<D: BlockDevice, C: Clock, H: HostIdentity> Ext2Volume<D, C, H> {
    /// Mount `device`, whose ext2 partition starts at sector
    /// `partition_start`.
    pub fn mount(
        device: D,
        partition_start: u64,
        clock: C,
        identity: H,
    ) -> Result<Ext2Volume<D, C, H>, Error<D::Error>> {
        let now = clock.now();
        let ctx = context::mount(device, partition_start, now)?;
        Ok(Ext2Volume { ctx, clock, identity })
    }

    /// Unmount the volume, restoring `state = CLEAN`. Fails with
    /// `Error::BadHandle` if any `FileHandle` opened from this volume is
    /// still open (clones of the shared context outlive this call).
    pub fn unmount(self) -> Result<(), Error<D::Error>> {
        context::unmount(self.ctx)
    }

    /// Number of block groups on the volume.
    pub fn block_group_count(&self) -> u32 {
        self.ctx.lock().block_group_count()
    }

    /// Open (optionally creating) the file or directory named by `path`,
    /// an absolute or root-relative byte string with `/`-separated
    /// components (§4.9, following the `open(2)`-flag conventions in
    /// [`OpenFlags`]).
    pub fn open(&mut self, path: &[u8], flags: OpenFlags) -> Result<FileHandle<D>, Error<D::Error>> {
        let now = self.clock.now();
        let mut ctx = self.ctx.lock();

        let (parent_number, mut parent_inode, name) = path::resolve_parent(&mut ctx, path)?;
        if !parent_inode.is_directory() {
            return Err(Error::NotDirectory);
        }
        let existing = directory::lookup(&mut ctx, &parent_inode, name)?;

        let (number, mut inode) = match existing {
            Some(number) => {
                if flags.contains(OpenFlags::CREAT) && flags.contains(OpenFlags::EXCL) {
                    return Err(Error::AlreadyExists);
                }
                let inode = ctx.load_inode(number)?;
                (number, inode)
            }
            None => {
                if !flags.contains(OpenFlags::CREAT) {
                    return Err(Error::NotFound);
                }
                if ctx.is_read_only() {
                    return Err(Error::ReadOnlyFs);
                }
                let number = bitmap::alloc_inode(&mut ctx)?;
                let mut inode = Inode::zeroed();
                inode.type_perm = (TypePerm::FILE
                    | TypePerm::U_READ
                    | TypePerm::U_WRITE
                    | TypePerm::G_READ
                    | TypePerm::O_READ)
                    .bits();
                inode.uid = self.identity.owner_uid();
                inode.gid = self.identity.owner_gid();
                inode.ctime = now;
                inode.mtime = now;
                inode.atime = now;
                inode.hard_links = 1;
                ctx.store_inode(number, &inode)?;

                directory::append_entry(&mut ctx, &mut parent_inode, name, number, file_type::REGULAR_FILE)?;
                ctx.store_inode(parent_number, &parent_inode)?;
                (number, inode)
            }
        };

        if inode.is_directory() && flags.writable() && !flags.contains(OpenFlags::INTERNAL) {
            return Err(Error::IsDirectory);
        }
        if flags.contains(OpenFlags::TRUNC) && inode.is_regular_file() {
            let old_blocks = block_count_for(inode.size(), ctx.block_size());
            blockmap::truncate(&mut ctx, &mut inode, old_blocks, 0, false)?;
            inode.set_size(0);
            ctx.store_inode(number, &inode)?;
        }

        drop(ctx);
        Ok(FileHandle {
            ctx: self.ctx.clone(),
            number,
            inode,
            offset: 0,
            flags,
        })
    }

    /// Read up to `out.len()` bytes from `handle` at its current cursor,
    /// stamping the access time with the volume's clock.
    pub fn read(&mut self, handle: &mut FileHandle<D>, out: &mut [u8]) -> Result<usize, Error<D::Error>> {
        handle.read(out, self.clock.now())
    }

    /// Write `data` to `handle` at its current cursor (or at end-of-file,
    /// under `O_APPEND`), stamping the modification time with the
    /// volume's clock.
    pub fn write(&mut self, handle: &mut FileHandle<D>, data: &[u8]) -> Result<usize, Error<D::Error>> {
        handle.write(data, self.clock.now())
    }

    /// Create a new, empty subdirectory named by `path`.
    pub fn create_dir(&mut self, path: &[u8]) -> Result<u32, Error<D::Error>> {
        let now = self.clock.now();
        let mut ctx = self.ctx.lock();
        if ctx.is_read_only() {
            return Err(Error::ReadOnlyFs);
        }

        let (parent_number, mut parent_inode, name) = path::resolve_parent(&mut ctx, path)?;
        if !parent_inode.is_directory() {
            return Err(Error::NotDirectory);
        }
        if directory::lookup(&mut ctx, &parent_inode, name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let number = bitmap::alloc_inode(&mut ctx)?;
        let mut inode = Inode::zeroed();
        inode.type_perm = (TypePerm::DIRECTORY
            | TypePerm::U_READ
            | TypePerm::U_WRITE
            | TypePerm::U_EXEC
            | TypePerm::G_READ
            | TypePerm::G_EXEC
            | TypePerm::O_READ
            | TypePerm::O_EXEC)
            .bits();
        inode.uid = self.identity.owner_uid();
        inode.gid = self.identity.owner_gid();
        inode.ctime = now;
        inode.mtime = now;
        inode.atime = now;
        inode.hard_links = 2; // its own "." entry plus the parent's entry for it

        // "." and ".." are ordinary entries this driver writes explicitly;
        // nothing downstream treats them specially.
        directory::append_entry(&mut ctx, &mut inode, b".", number, file_type::DIRECTORY)?;
        directory::append_entry(&mut ctx, &mut inode, b"..", parent_number, file_type::DIRECTORY)?;
        ctx.store_inode(number, &inode)?;

        directory::append_entry(&mut ctx, &mut parent_inode, name, number, file_type::DIRECTORY)?;
        parent_inode.hard_links += 1; // the new subdirectory's ".." points back
        ctx.store_inode(parent_number, &parent_inode)?;

        Ok(number)
    }

    /// List the live entries of the directory `handle` is open on.
    pub fn read_dir(&mut self, handle: &FileHandle<D>) -> Result<Vec<DirEntry>, Error<D::Error>> {
        let mut ctx = self.ctx.lock();
        let mut entries = Vec::new();
        directory::for_each(&mut ctx, &handle.inode, |entry| {
            entries.push(entry);
            Ok(true)
        })?;
        Ok(entries)
    }
}
