// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedRegion - POSIX shared memory holding the two transport rings.
//!
//! The client creates the region under a random name, the server attaches to
//! it by that name, and the client unlinks the name once the server has
//! acknowledged. All unsafe operations are encapsulated here; callers only
//! ever see role-bound ring handles.
//!
//! ```text
//! ┌──────────────────────────────────────────┐ 0
//! │ RegionHeader (magic, version, capacity)  │
//! ├──────────────────────────────────────────┤ 64
//! │ to_server RingHeader (write/read idx)    │
//! ├──────────────────────────────────────────┤ 192
//! │ to_client RingHeader (write/read idx)    │
//! ├──────────────────────────────────────────┤ 320
//! │ to_server data [capacity]                │
//! ├──────────────────────────────────────────┤ 320 + capacity
//! │ to_client data [capacity]                │
//! └──────────────────────────────────────────┘ 320 + 2 * capacity
//! ```

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

use crate::error::ShmError;
use crate::shm::ring_buffer::{Consumer, Producer, RingBuffer, RingHeader, RING_HEADER_SIZE};
use crate::types::{RegionName, RingCapacity, MIN_RING_CAPACITY};

/// Identifies a region laid out by this crate.
const REGION_MAGIC: [u8; 8] = *b"SHMPIPE1";

/// Bumped whenever the layout above changes.
pub const LAYOUT_VERSION: u32 = 1;

/// Bytes of randomness in a generated region name.
const NAME_ENTROPY_BYTES: usize = 16;

/// Fixed header at offset 0 of every region.
#[repr(C, align(64))]
#[derive(Clone, Copy)]
struct RegionHeader {
    magic: [u8; 8],
    layout_version: u32,
    _reserved: u32,
    ring_capacity: u64,
}

const REGION_HEADER_SIZE: usize = std::mem::size_of::<RegionHeader>();

const TO_SERVER_HEADER_OFFSET: usize = REGION_HEADER_SIZE;
const TO_CLIENT_HEADER_OFFSET: usize = TO_SERVER_HEADER_OFFSET + RING_HEADER_SIZE;
const DATA_OFFSET: usize = TO_CLIENT_HEADER_OFFSET + RING_HEADER_SIZE;

/// Total mapping size for rings of `capacity` bytes each.
pub const fn region_size(capacity: usize) -> usize {
    DATA_OFFSET + 2 * capacity
}

/// Which ring a side writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

mod sealed {
    pub trait Sealed {}
}

/// Compile-time role of the process holding a region.
pub trait Side: sealed::Sealed {
    /// Name used in logs.
    const NAME: &'static str;
    /// The ring this side produces into; it consumes the other one.
    const OUTBOUND: Direction;
    /// Whether this side removes the name from the namespace.
    const OWNS_NAME: bool;
}

/// The creating side: writes `to_server`, reads `to_client`.
#[derive(Debug)]
pub enum Client {}

/// The attaching side: writes `to_client`, reads `to_server`.
#[derive(Debug)]
pub enum Server {}

impl sealed::Sealed for Client {}
impl sealed::Sealed for Server {}

impl Side for Client {
    const NAME: &'static str = "client";
    const OUTBOUND: Direction = Direction::ToServer;
    const OWNS_NAME: bool = true;
}

impl Side for Server {
    const NAME: &'static str = "server";
    const OUTBOUND: Direction = Direction::ToClient;
    const OWNS_NAME: bool = false;
}

/// An `mmap`ed range, unmapped exactly once on drop.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn new(fd: &OwnedFd, len: usize) -> Result<Self, ShmError> {
        // SAFETY: fd is a valid shared memory descriptor sized to at least len.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(ShmError::ResourceExhaustion {
                step: "mmap",
                source: io::Error::last_os_error(),
            });
        }

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| ShmError::ResourceExhaustion {
            step: "mmap",
            source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
        })?;

        Ok(Self { ptr, len })
    }

    /// Pointer `offset` bytes into the mapping.
    fn at<T>(&self, offset: usize) -> NonNull<T> {
        debug_assert!(offset < self.len);
        // SAFETY: offsets are derived from region_size and stay in bounds.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)).cast() }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr and len come from a successful mmap.
        let result = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if result < 0 {
            tracing::error!(
                error = %io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }
    }
}

/// Removes a freshly created name again unless setup completes.
struct NameGuard<'a> {
    c_name: &'a CString,
    armed: bool,
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            // SAFETY: c_name is a valid CString.
            unsafe { libc::shm_unlink(self.c_name.as_ptr()) };
        }
    }
}

/// The mapped region holding the `to_server` and `to_client` rings.
///
/// Owned exclusively by one connection. Dropping it unmaps the memory and,
/// on the client side, unlinks the name if that has not happened yet.
pub struct SharedRegion<S: Side> {
    /// Set while the name is still present in the namespace.
    name: Option<RegionName>,
    /// Name kept for logs after unlinking.
    label: String,
    to_server: RingBuffer,
    to_client: RingBuffer,
    mapping: Mapping,
    _side: PhantomData<S>,
}

// SAFETY: the region owns its mapping; ring access goes through &mut self.
unsafe impl<S: Side> Send for SharedRegion<S> {}

impl SharedRegion<Client> {
    /// Create a region under a fresh random name.
    ///
    /// Every failure unlinks and unmaps whatever was set up so far.
    pub fn create(prefix: &str, capacity: RingCapacity) -> Result<Self, ShmError> {
        let name = unique_name(prefix)?;
        let c_name = c_name(&name)?;
        let size = region_size(capacity.bytes());

        // Clear any stale object left under this name.
        // SAFETY: c_name is a valid CString.
        unsafe { libc::shm_unlink(c_name.as_ptr()) };

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags.
        let raw_fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if raw_fd < 0 {
            return Err(ShmError::ResourceUnavailable {
                step: "shm_open",
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: raw_fd was just returned by shm_open and is owned here.
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };
        let mut guard = NameGuard {
            c_name: &c_name,
            armed: true,
        };

        // SAFETY: fd is a valid descriptor.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } < 0 {
            return Err(ShmError::ResourceExhaustion {
                step: "ftruncate",
                source: io::Error::last_os_error(),
            });
        }

        let mapping = Mapping::new(&fd, size)?;
        // The mapping keeps the object alive.
        drop(fd);

        // SAFETY: the mapping is region_size(capacity) bytes and exclusively ours.
        let region = unsafe {
            mapping.at::<RegionHeader>(0).as_ptr().write(RegionHeader {
                magic: REGION_MAGIC,
                layout_version: LAYOUT_VERSION,
                _reserved: 0,
                ring_capacity: capacity.bytes() as u64,
            });
            let to_server = RingBuffer::init(
                mapping.at::<RingHeader>(TO_SERVER_HEADER_OFFSET),
                mapping.at::<u8>(DATA_OFFSET),
                capacity.bytes(),
            );
            let to_client = RingBuffer::init(
                mapping.at::<RingHeader>(TO_CLIENT_HEADER_OFFSET),
                mapping.at::<u8>(DATA_OFFSET + capacity.bytes()),
                capacity.bytes(),
            );
            fence(Ordering::SeqCst);
            Self::assemble(name, mapping, to_server, to_client)?
        };

        guard.armed = false;
        tracing::debug!(
            name = %region.label,
            size = size,
            capacity = capacity.bytes(),
            "Created shared memory region"
        );
        Ok(region)
    }

    /// Remove the name from the namespace; the mapping stays valid.
    ///
    /// Called once the peer has attached so that a crash cannot leak the
    /// object. A second call is a no-op.
    pub fn unlink(&mut self) -> Result<(), ShmError> {
        let Some(name) = self.name.take() else {
            return Ok(());
        };
        let c_name = c_name(&name)?;
        // SAFETY: c_name is a valid CString.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(ShmError::ResourceUnavailable {
                    step: "shm_unlink",
                    source: err,
                });
            }
        }
        tracing::debug!(name = %name, "Unlinked shared memory region");
        Ok(())
    }
}

impl SharedRegion<Server> {
    /// Attach to a region created by a client.
    pub fn attach(name: &RegionName) -> Result<Self, ShmError> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid CString.
        let raw_fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if raw_fd < 0 {
            return Err(ShmError::ResourceUnavailable {
                step: "shm_open",
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: raw_fd was just returned by shm_open and is owned here.
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        let file = File::from(fd);
        let size = file
            .metadata()
            .map_err(|source| ShmError::ResourceUnavailable {
                step: "fstat",
                source,
            })?
            .len() as usize;
        let fd = OwnedFd::from(file);

        if size < region_size(MIN_RING_CAPACITY) {
            return Err(ShmError::InvalidLayout {
                name: name.to_string(),
                reason: format!("region too small: {} bytes", size),
            });
        }

        let mapping = Mapping::new(&fd, size)?;
        drop(fd);

        fence(Ordering::SeqCst);
        // SAFETY: the mapping is at least REGION_HEADER_SIZE bytes.
        let header = unsafe { std::ptr::read_volatile(mapping.at::<RegionHeader>(0).as_ptr()) };

        if header.magic != REGION_MAGIC {
            return Err(ShmError::InvalidLayout {
                name: name.to_string(),
                reason: "bad magic".to_string(),
            });
        }
        if header.layout_version != LAYOUT_VERSION {
            return Err(ShmError::InvalidLayout {
                name: name.to_string(),
                reason: format!(
                    "layout version {} (expected {})",
                    header.layout_version, LAYOUT_VERSION
                ),
            });
        }
        let capacity = usize::try_from(header.ring_capacity).unwrap_or(usize::MAX);
        if capacity < MIN_RING_CAPACITY || capacity > (size - DATA_OFFSET) / 2 {
            return Err(ShmError::InvalidLayout {
                name: name.to_string(),
                reason: format!("ring capacity {} does not fit {} bytes", capacity, size),
            });
        }

        // SAFETY: capacity was checked against the mapped size above.
        let region = unsafe {
            let to_server = RingBuffer::from_raw(
                mapping.at::<RingHeader>(TO_SERVER_HEADER_OFFSET),
                mapping.at::<u8>(DATA_OFFSET),
                capacity,
            );
            let to_client = RingBuffer::from_raw(
                mapping.at::<RingHeader>(TO_CLIENT_HEADER_OFFSET),
                mapping.at::<u8>(DATA_OFFSET + capacity),
                capacity,
            );
            Self::assemble(name.clone(), mapping, to_server, to_client)?
        };

        tracing::debug!(name = %name, size = size, capacity = capacity, "Attached shared memory region");
        Ok(region)
    }
}

impl<S: Side> SharedRegion<S> {
    fn assemble(
        name: RegionName,
        mapping: Mapping,
        to_server: Result<RingBuffer, crate::error::RingError>,
        to_client: Result<RingBuffer, crate::error::RingError>,
    ) -> Result<Self, ShmError> {
        let invalid = |e: crate::error::RingError| ShmError::InvalidLayout {
            name: name.to_string(),
            reason: e.to_string(),
        };
        let to_server = to_server.map_err(invalid)?;
        let to_client = to_client.map_err(invalid)?;
        Ok(Self {
            label: name.to_string(),
            name: Some(name),
            to_server,
            to_client,
            mapping,
            _side: PhantomData,
        })
    }

    /// The name, while it is still linked in the namespace.
    pub fn name(&self) -> Option<&RegionName> {
        self.name.as_ref()
    }

    /// Name the region was created under, linked or not.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ring capacity in bytes (same for both rings).
    pub fn capacity(&self) -> usize {
        self.to_server.capacity()
    }

    /// Size of the whole mapping.
    pub fn size(&self) -> usize {
        self.mapping.len
    }

    /// The ring this side writes into.
    pub fn outbound(&self) -> &RingBuffer {
        match S::OUTBOUND {
            Direction::ToServer => &self.to_server,
            Direction::ToClient => &self.to_client,
        }
    }

    /// The ring this side reads from.
    pub fn inbound(&self) -> &RingBuffer {
        match S::OUTBOUND {
            Direction::ToServer => &self.to_client,
            Direction::ToClient => &self.to_server,
        }
    }

    /// Producer for the outbound ring and consumer for the inbound ring.
    pub fn split(&mut self) -> (Producer<'_>, Consumer<'_>) {
        let (outbound, inbound) = match S::OUTBOUND {
            Direction::ToServer => (&mut self.to_server, &mut self.to_client),
            Direction::ToClient => (&mut self.to_client, &mut self.to_server),
        };
        (outbound.producer(), inbound.consumer())
    }

    /// Unmap, unlink if still named, release.
    pub fn destroy(self) {
        drop(self);
    }
}

impl<S: Side> Drop for SharedRegion<S> {
    fn drop(&mut self) {
        if S::OWNS_NAME {
            if let Some(name) = self.name.take() {
                if let Ok(c_name) = CString::new(name.as_str()) {
                    // SAFETY: c_name is a valid CString.
                    unsafe { libc::shm_unlink(c_name.as_ptr()) };
                }
            }
        }
        tracing::debug!(name = %self.label, side = S::NAME, "Released shared memory region");
        // `mapping` unmaps when the fields drop.
    }
}

impl<S: Side> std::fmt::Debug for SharedRegion<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("side", &S::NAME)
            .field("label", &self.label)
            .field("linked", &self.name.is_some())
            .field("size", &self.mapping.len)
            .field("to_server", &self.to_server)
            .field("to_client", &self.to_client)
            .finish()
    }
}

/// A name no other live client uses: prefix, pid and 128 random bits.
///
/// Randomness comes from the system source; failing to read it is a hard
/// error, not retried.
pub fn unique_name(prefix: &str) -> Result<RegionName, ShmError> {
    let mut entropy = [0u8; NAME_ENTROPY_BYTES];
    getrandom::getrandom(&mut entropy).map_err(|e| ShmError::ResourceUnavailable {
        step: "random name",
        source: io::Error::new(io::ErrorKind::Other, e.to_string()),
    })?;

    let name = format!(
        "/{}-{}-{}",
        prefix,
        std::process::id(),
        hex::encode(entropy)
    );
    RegionName::new(name).map_err(|e| ShmError::ResourceUnavailable {
        step: "random name",
        source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
    })
}

fn c_name(name: &RegionName) -> Result<CString, ShmError> {
    CString::new(name.as_str()).map_err(|e| ShmError::ResourceUnavailable {
        step: "region name",
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })
}

#[cfg(test)]
pub(crate) fn name_is_linked(name: &str) -> bool {
    let Ok(c_name) = CString::new(name) else {
        return false;
    };
    // SAFETY: c_name is a valid CString.
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
    if fd >= 0 {
        // SAFETY: fd was just opened.
        unsafe { libc::close(fd) };
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(bytes: usize) -> RingCapacity {
        RingCapacity::new(bytes).unwrap()
    }

    #[test]
    fn test_layout_offsets() {
        assert_eq!(REGION_HEADER_SIZE, 64);
        assert_eq!(DATA_OFFSET, 320);
        assert_eq!(region_size(16), 352);
    }

    #[test]
    fn test_unique_names_differ() {
        let a = unique_name("test").unwrap();
        let b = unique_name("test").unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(&format!("/test-{}-", std::process::id())));
    }

    #[test]
    fn test_create_attach_and_exchange() {
        let mut client = SharedRegion::<Client>::create("region-test", capacity(64)).unwrap();
        let name = client.name().cloned().unwrap();
        assert!(name_is_linked(name.as_str()));

        let mut server = SharedRegion::<Server>::attach(&name).unwrap();
        assert_eq!(server.capacity(), 64);
        assert_eq!(server.size(), client.size());

        {
            let (mut tx, _) = client.split();
            tx.write(b"ping").unwrap();
        }
        {
            let (mut tx, mut rx) = server.split();
            assert_eq!(rx.read_vec(16), b"ping");
            tx.write(b"pong").unwrap();
        }
        let (_, mut rx) = client.split();
        assert_eq!(rx.read_vec(16), b"pong");
    }

    #[test]
    fn test_unlink_keeps_mapping_valid() {
        let mut client = SharedRegion::<Client>::create("region-test", capacity(32)).unwrap();
        let name = client.name().cloned().unwrap();
        let mut server = SharedRegion::<Server>::attach(&name).unwrap();

        client.unlink().unwrap();
        assert!(client.name().is_none());
        assert!(!name_is_linked(name.as_str()));
        // Second unlink is a no-op.
        client.unlink().unwrap();

        {
            let (mut tx, _) = client.split();
            tx.write(b"still here").unwrap();
        }
        let (_, mut rx) = server.split();
        assert_eq!(rx.read_vec(32), b"still here");

        assert!(matches!(
            SharedRegion::<Server>::attach(&name),
            Err(ShmError::ResourceUnavailable { step: "shm_open", .. })
        ));
    }

    #[test]
    fn test_destroy_unlinks_name() {
        let client = SharedRegion::<Client>::create("region-test", capacity(16)).unwrap();
        let name = client.label().to_string();
        assert!(name_is_linked(&name));
        client.destroy();
        assert!(!name_is_linked(&name));
    }

    #[test]
    fn test_server_drop_does_not_unlink() {
        let client = SharedRegion::<Client>::create("region-test", capacity(16)).unwrap();
        let name = client.name().cloned().unwrap();
        let server = SharedRegion::<Server>::attach(&name).unwrap();
        drop(server);
        assert!(name_is_linked(name.as_str()));
        drop(client);
        assert!(!name_is_linked(name.as_str()));
    }

    #[test]
    fn test_attach_rejects_foreign_object() {
        let name = unique_name("foreign").unwrap();
        let c_name = CString::new(name.as_str()).unwrap();
        // SAFETY: plain shm calls on a test-owned name.
        unsafe {
            let fd = libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            );
            assert!(fd >= 0);
            assert_eq!(libc::ftruncate(fd, 4096), 0);
            libc::close(fd);
        }

        let result = SharedRegion::<Server>::attach(&name);
        // SAFETY: c_name is a valid CString.
        unsafe { libc::shm_unlink(c_name.as_ptr()) };

        match result {
            Err(ShmError::InvalidLayout { reason, .. }) => assert_eq!(reason, "bad magic"),
            other => panic!("expected InvalidLayout, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_attach_missing_name() {
        let name = unique_name("missing").unwrap();
        assert!(matches!(
            SharedRegion::<Server>::attach(&name),
            Err(ShmError::ResourceUnavailable { .. })
        ));
    }
}
