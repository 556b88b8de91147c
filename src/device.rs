//! The external collaborators this crate expects the host to supply:
//! a raw block device, a clock, and a host identity source. None of
//! these are implemented here; the host binds them to whatever hardware
//! or OS facility it has (an SD card driver, a `RefCell<File>` in tests,
//! a RTC peripheral, a fixed uid/gid pair).

/// Size in bytes of one physical sector. Fixed at 512 in practice, as
/// spec'd by every real ext2 deployment this driver targets.
pub const SECTOR_SIZE: usize = 512;

/// A flat, addressable array of fixed-size sectors with synchronous
/// single-sector read/write.
///
/// Sector numbers are absolute on the device; a mounted volume's
/// partition start offset is added internally by [`crate::context::Context`],
/// never by the caller.
pub trait BlockDevice {
    /// The device's own error type, carried in [`crate::error::Error::Device`]
    /// rather than collapsed into a generic I/O error.
    type Error;

    /// Prepare the device for use. Called once, before the first sector
    /// access.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Read exactly one 512-byte sector.
    fn read_sector(&mut self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error>;

    /// Write exactly one 512-byte sector.
    fn write_sector(&mut self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error>;

    /// Total number of sectors addressable on this device.
    fn sector_count(&self) -> u64;

    /// Whether the device refuses writes; the mount routine inherits this
    /// into the volume context rather than re-querying it per write.
    fn is_read_only(&self) -> bool;
}

/// Seconds-since-epoch clock used to stamp inode and superblock times.
pub trait Clock {
    fn now(&self) -> u32;
}

/// Ownership identity stamped onto newly created inodes.
pub trait HostIdentity {
    fn owner_uid(&self) -> u16;
    fn owner_gid(&self) -> u16;
}
