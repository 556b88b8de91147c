//! Path resolution (§4.8): split on `/`, walk each component through the
//! owning directory's entries, starting from the root inode. Relative
//! paths and `.`/`..` are resolved exactly like any other name — they are
//! ordinary entries every directory carries, not special-cased here.

use crate::context::Context;
use crate::device::BlockDevice;
use crate::directory;
use crate::error::Error;
use crate::sys::inode::{Inode, ROOT_INODE};

/// Resolve `path` (an absolute or root-relative byte string, components
/// separated by `/`) to the inode number and inode it names.
pub fn resolve<D: BlockDevice>(
    ctx: &mut Context<D>,
    path: &[u8],
) -> Result<(u32, Inode), Error<D::Error>> {
    let mut number = ROOT_INODE;
    let mut inode = ctx.load_inode(ROOT_INODE)?;

    for component in path.split(|&b| b == b'/').filter(|c| !c.is_empty()) {
        if !inode.is_directory() {
            return Err(Error::NotDirectory);
        }
        let next = directory::lookup(ctx, &inode, component)?.ok_or(Error::NotFound)?;
        inode = ctx.load_inode(next)?;
        number = next;
    }
    Ok((number, inode))
}

/// Resolve `path` down to its parent directory, returning the parent's
/// inode number and inode alongside the final path component (the name
/// being created, looked up, or otherwise acted on within it). Used by
/// `open` with `O_CREAT`, which needs a directory to append an entry to
/// rather than an inode the entry already names.
pub fn resolve_parent<'a, D: BlockDevice>(
    ctx: &mut Context<D>,
    path: &'a [u8],
) -> Result<(u32, Inode, &'a [u8]), Error<D::Error>> {
    let mut components = path.split(|&b| b == b'/').filter(|c| !c.is_empty());
    let first = components.next().ok_or(Error::InvalidArg)?;

    let mut number = ROOT_INODE;
    let mut inode = ctx.load_inode(ROOT_INODE)?;
    let mut name = first;

    for next_component in components {
        if !inode.is_directory() {
            return Err(Error::NotDirectory);
        }
        let next = directory::lookup(ctx, &inode, name)?.ok_or(Error::NotFound)?;
        inode = ctx.load_inode(next)?;
        number = next;
        name = next_component;
    }
    Ok((number, inode, name))
}
