#[cfg(any(test, not(feature = "no_std")))]
use std::fmt;

/// Every failure mode a facade call can surface.
///
/// The C driver this crate descends from threads a secondary `rerrno`
/// out-parameter through every call in addition to a sentinel return
/// value. This collapses that into one sum type: every fallible operation
/// returns `Result<T, Error<D>>`, where `D` is the block device's own
/// error type (so a device failure is never silently downgraded to a
/// generic I/O error).
#[derive(Debug)]
pub enum Error<D> {
    /// No free blocks or inodes remain in any block group.
    NoSpace,
    /// The volume is mounted read-only.
    ReadOnlyFs,
    /// A path component, or the whole path, does not exist.
    NotFound,
    /// `O_CREAT | O_EXCL` on a path that already resolves.
    AlreadyExists,
    /// Attempted to open a directory for writing without the internal bit.
    IsDirectory,
    /// A non-final path component does not name a directory.
    NotDirectory,
    /// A handle is closed, stale, or was never valid.
    BadHandle,
    /// A seek, open flag combination, or argument is malformed.
    InvalidArg,
    /// A signed offset computation would wrap.
    Overflow,
    /// `isatty` on a file handle: never a tty.
    NotATty,
    /// Allocation of an in-memory structure failed.
    OutOfMemory,
    /// A byte offset would need an inode index the inode cannot represent.
    FileTooLarge,
    /// An on-disk invariant was violated (e.g. a bitmap bit already had the
    /// expected value going into `change_allocated`).
    StructuralCorruption,
    /// A read landed on a hole (a zero block pointer within the inode's
    /// size). This driver does not support sparse reads.
    Io,
    /// The block device reported an error of its own.
    Device(D),
}

impl<D: PartialEq> PartialEq for Error<D> {
    fn eq(&self, rhs: &Error<D>) -> bool {
        use Error::*;
        match (self, rhs) {
            (NoSpace, NoSpace)
            | (ReadOnlyFs, ReadOnlyFs)
            | (NotFound, NotFound)
            | (AlreadyExists, AlreadyExists)
            | (IsDirectory, IsDirectory)
            | (NotDirectory, NotDirectory)
            | (BadHandle, BadHandle)
            | (InvalidArg, InvalidArg)
            | (Overflow, Overflow)
            | (NotATty, NotATty)
            | (OutOfMemory, OutOfMemory)
            | (FileTooLarge, FileTooLarge)
            | (StructuralCorruption, StructuralCorruption)
            | (Io, Io) => true,
            (Device(a), Device(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(any(test, not(feature = "no_std")))]
impl<D: fmt::Debug> fmt::Display for Error<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoSpace => write!(f, "no free blocks or inodes"),
            Error::ReadOnlyFs => write!(f, "volume is mounted read-only"),
            Error::NotFound => write!(f, "no such file or directory"),
            Error::AlreadyExists => write!(f, "file already exists"),
            Error::IsDirectory => write!(f, "is a directory"),
            Error::NotDirectory => write!(f, "not a directory"),
            Error::BadHandle => write!(f, "bad file handle"),
            Error::InvalidArg => write!(f, "invalid argument"),
            Error::Overflow => write!(f, "offset would overflow"),
            Error::NotATty => write!(f, "not a tty"),
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::FileTooLarge => write!(f, "file too large"),
            Error::StructuralCorruption => write!(f, "on-disk structure is corrupt"),
            Error::Io => write!(f, "read landed on a hole"),
            Error::Device(e) => write!(f, "block device error: {:?}", e),
        }
    }
}

#[cfg(any(test, not(feature = "no_std")))]
impl<D: fmt::Debug> std::error::Error for Error<D> {}
