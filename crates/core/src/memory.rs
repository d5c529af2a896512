// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Pluggable allocator facade.
//!
//! Subsystems that manage raw storage (attribute pools, document buffers)
//! allocate through the [`Allocator`] contract rather than the global Rust
//! allocator, so a host can substitute tracked or arena-backed
//! implementations. Three singleton storage policies are supported:
//!
//! - **Environment**: one instance shared process-wide, installed into a
//!   `OnceLock` table ([`system_allocator`]).
//! - **Module**: a lazily created instance local to the owning module.
//! - **ManuallyOwned**: the caller installs and retains ownership.
//!
//! Allocation failure is a `None` return, never a panic; callers record an
//! error and abandon the one sub-operation.

// Required for raw allocation through std::alloc
#![allow(unsafe_code)]

use std::{
    alloc::{Layout, alloc, alloc_zeroed, dealloc},
    ptr::NonNull,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use ahash::AHashMap;

use crate::correctness::check_power_of_two;

bitflags::bitflags! {
    /// Behavior flags for a single allocation request.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct AllocationFlags: u32 {
        /// Returned storage is zero-initialized.
        const ZEROED = 1;
    }
}

/// Uniform allocation contract.
///
/// All sizes are in bytes and all alignments must be powers of two. A
/// returned `None` means the request could not be satisfied; the allocator
/// logs the reason and the caller continues without the storage.
pub trait Allocator: Send + Sync + 'static {
    /// Returns the allocator name for diagnostics.
    fn name(&self) -> &str;

    /// Allocates `size` bytes at `align` alignment.
    fn allocate(&self, size: usize, align: usize, flags: AllocationFlags) -> Option<NonNull<u8>>;

    /// Releases an allocation previously returned by this allocator.
    fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize);

    /// Moves an allocation to `new_size` bytes, preserving the common
    /// prefix. `None` input behaves as [`Allocator::allocate`].
    fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
        new_align: usize,
    ) -> Option<NonNull<u8>>;

    /// Attempts to grow or shrink in place; returns the new usable size, or
    /// 0 when in-place resizing is unsupported.
    fn resize(&self, _ptr: NonNull<u8>, _new_size: usize) -> usize {
        0
    }

    /// Returns the recorded size of an allocation, or 0 when unknown.
    fn allocation_size(&self, _ptr: NonNull<u8>) -> usize {
        0
    }

    /// Reclaims any lazily retained storage.
    fn garbage_collect(&self) {}

    /// Returns the number of bytes currently allocated.
    fn num_allocated_bytes(&self) -> usize;

    /// Returns the total capacity managed by this allocator.
    fn capacity(&self) -> usize {
        usize::MAX
    }

    /// Returns the largest single allocation this allocator can satisfy.
    fn max_allocation_size(&self) -> usize {
        usize::MAX
    }

    /// Returns the largest contiguous block currently available.
    fn max_contiguous_allocation_size(&self) -> usize {
        self.max_allocation_size()
    }

    /// Returns unallocated capacity, optionally logging a summary.
    fn get_unallocated_memory(&self, print: bool) -> usize {
        let free = self.capacity().saturating_sub(self.num_allocated_bytes());
        if print {
            log::info!(
                "Allocator '{}': {} bytes allocated, {free} bytes free",
                self.name(),
                self.num_allocated_bytes(),
            );
        }
        free
    }

    /// Returns the allocator this one draws from, if any.
    fn sub_allocator(&self) -> Option<&dyn Allocator> {
        None
    }
}

/// General-purpose allocator backed by `std::alloc`.
///
/// Keeps a side table of live allocations so `deallocate` can recover exact
/// layouts and `allocation_size` answers precisely; byte totals and peak are
/// tracked atomically.
pub struct SystemAllocator {
    allocated: AtomicUsize,
    peak: AtomicUsize,
    allocation_count: AtomicUsize,
    records: Mutex<AHashMap<usize, (usize, usize)>>,
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemAllocator {
    /// Creates a new [`SystemAllocator`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            records: Mutex::new(AHashMap::new()),
        }
    }

    /// Returns the high-water mark of allocated bytes.
    #[must_use]
    pub fn peak_allocated_bytes(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Returns the number of live allocations.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }

    fn record(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        self.records
            .lock()
            .expect("SystemAllocator record table poisoned")
            .insert(ptr.as_ptr() as usize, (size, align));
        let now = self.allocated.fetch_add(size, Ordering::Relaxed) + size;
        self.peak.fetch_max(now, Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
    }

    fn forget(&self, ptr: NonNull<u8>) -> Option<(usize, usize)> {
        let record = self
            .records
            .lock()
            .expect("SystemAllocator record table poisoned")
            .remove(&(ptr.as_ptr() as usize));
        if let Some((size, _)) = record {
            self.allocated.fetch_sub(size, Ordering::Relaxed);
            self.allocation_count.fetch_sub(1, Ordering::Relaxed);
        }
        record
    }
}

impl Allocator for SystemAllocator {
    fn name(&self) -> &str {
        stringify!(SystemAllocator)
    }

    fn allocate(&self, size: usize, align: usize, flags: AllocationFlags) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        if let Err(e) = check_power_of_two(align, "align") {
            log::error!("{}: {e}", self.name());
            return None;
        }
        let layout = Layout::from_size_align(size, align).ok()?;
        // SAFETY: layout is validated non-zero-size with power-of-two align
        let raw = unsafe {
            if flags.contains(AllocationFlags::ZEROED) {
                alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };
        let ptr = NonNull::new(raw);
        match ptr {
            Some(ptr) => self.record(ptr, size, align),
            None => log::error!("{}: failed to allocate {size} bytes", self.name()),
        }
        ptr
    }

    fn deallocate(&self, ptr: NonNull<u8>, _size: usize, _align: usize) {
        // An untracked pointer has no recorded layout; freeing it with the
        // caller-supplied values could be unsound, so refuse and leak
        let Some((size, align)) = self.forget(ptr) else {
            log::error!(
                "{}: deallocate of untracked pointer {:p}; allocation leaked",
                self.name(),
                ptr.as_ptr(),
            );
            return;
        };
        if let Ok(layout) = Layout::from_size_align(size, align) {
            // SAFETY: the pointer was produced by this allocator with the
            // recorded layout
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }

    fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
        new_align: usize,
    ) -> Option<NonNull<u8>> {
        let Some(old) = ptr else {
            return self.allocate(new_size, new_align, AllocationFlags::empty());
        };
        let old_size = self.allocation_size(old);
        let new = self.allocate(new_size, new_align, AllocationFlags::empty())?;
        let copy_len = old_size.min(new_size);
        if copy_len > 0 {
            // SAFETY: both pointers are live allocations of at least copy_len
            // bytes and cannot overlap
            unsafe {
                std::ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), copy_len);
            }
        }
        self.deallocate(old, old_size, new_align);
        Some(new)
    }

    fn allocation_size(&self, ptr: NonNull<u8>) -> usize {
        self.records
            .lock()
            .expect("SystemAllocator record table poisoned")
            .get(&(ptr.as_ptr() as usize))
            .map_or(0, |(size, _)| *size)
    }

    fn num_allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

/// Allocator that forwards every operation to a parent while keeping its own
/// byte accounting, so a subsystem's consumption stays attributable.
pub struct ChildAllocator<P: Allocator> {
    name: String,
    parent: Arc<P>,
    allocated: AtomicUsize,
}

impl<P: Allocator> ChildAllocator<P> {
    /// Creates a new [`ChildAllocator`] drawing from `parent`.
    #[must_use]
    pub fn new<S: AsRef<str>>(name: S, parent: Arc<P>) -> Self {
        Self {
            name: name.as_ref().to_owned(),
            parent,
            allocated: AtomicUsize::new(0),
        }
    }
}

impl<P: Allocator> Allocator for ChildAllocator<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&self, size: usize, align: usize, flags: AllocationFlags) -> Option<NonNull<u8>> {
        let ptr = self.parent.allocate(size, align, flags);
        if ptr.is_some() {
            self.allocated.fetch_add(size, Ordering::Relaxed);
        }
        ptr
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        let recorded = self.parent.allocation_size(ptr);
        let freed = if recorded > 0 { recorded } else { size };
        self.parent.deallocate(ptr, size, align);
        self.allocated.fetch_sub(freed, Ordering::Relaxed);
    }

    fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
        new_align: usize,
    ) -> Option<NonNull<u8>> {
        let old_size = ptr.map_or(0, |p| self.parent.allocation_size(p));
        let new = self.parent.reallocate(ptr, new_size, new_align);
        if new.is_some() {
            self.allocated.fetch_sub(old_size, Ordering::Relaxed);
            self.allocated.fetch_add(new_size, Ordering::Relaxed);
        }
        new
    }

    fn resize(&self, ptr: NonNull<u8>, new_size: usize) -> usize {
        self.parent.resize(ptr, new_size)
    }

    fn allocation_size(&self, ptr: NonNull<u8>) -> usize {
        self.parent.allocation_size(ptr)
    }

    fn garbage_collect(&self) {
        self.parent.garbage_collect();
    }

    fn num_allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> usize {
        self.parent.capacity()
    }

    fn max_allocation_size(&self) -> usize {
        self.parent.max_allocation_size()
    }

    fn max_contiguous_allocation_size(&self) -> usize {
        self.parent.max_contiguous_allocation_size()
    }

    fn sub_allocator(&self) -> Option<&dyn Allocator> {
        Some(self.parent.as_ref())
    }
}

/// Where a singleton allocator instance lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocatorStorage {
    /// Shared process-wide through the environment table.
    Environment,
    /// Local to the owning module, created lazily.
    Module,
    /// Installed and owned by the caller.
    ManuallyOwned,
}

static ENVIRONMENT_ALLOCATOR: OnceLock<Arc<dyn Allocator>> = OnceLock::new();

/// Returns the process-wide system allocator, creating it on first use.
#[must_use]
pub fn system_allocator() -> Arc<dyn Allocator> {
    ENVIRONMENT_ALLOCATOR
        .get_or_init(|| Arc::new(SystemAllocator::new()))
        .clone()
}

/// Installs a custom allocator into the environment table.
///
/// # Errors
///
/// Returns an error if an environment allocator was already created or
/// installed.
pub fn install_environment_allocator(allocator: Arc<dyn Allocator>) -> anyhow::Result<()> {
    ENVIRONMENT_ALLOCATOR
        .set(allocator)
        .map_err(|_| anyhow::anyhow!("Environment allocator already installed"))
}

/// A singleton allocator slot configured with one of the storage policies.
pub struct AllocatorSlot {
    storage: AllocatorStorage,
    cell: OnceLock<Arc<dyn Allocator>>,
}

impl AllocatorSlot {
    /// Creates a new [`AllocatorSlot`] with the given storage policy.
    #[must_use]
    pub const fn new(storage: AllocatorStorage) -> Self {
        Self {
            storage,
            cell: OnceLock::new(),
        }
    }

    /// Returns the storage policy for this slot.
    #[must_use]
    pub const fn storage(&self) -> AllocatorStorage {
        self.storage
    }

    /// Resolves the allocator instance for this slot.
    ///
    /// Environment slots share the process-wide allocator; Module slots
    /// lazily create a local instance; ManuallyOwned slots require a prior
    /// [`AllocatorSlot::install`] and fall back to the environment allocator
    /// (with a logged error) when none was installed.
    #[must_use]
    pub fn get(&self) -> Arc<dyn Allocator> {
        match self.storage {
            AllocatorStorage::Environment => system_allocator(),
            AllocatorStorage::Module => self
                .cell
                .get_or_init(|| Arc::new(SystemAllocator::new()))
                .clone(),
            AllocatorStorage::ManuallyOwned => self.cell.get().cloned().unwrap_or_else(|| {
                log::error!("AllocatorSlot: no allocator installed in manually-owned slot");
                system_allocator()
            }),
        }
    }

    /// Installs the allocator for a manually-owned slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is not manually owned or already holds
    /// an instance.
    pub fn install(&self, allocator: Arc<dyn Allocator>) -> anyhow::Result<()> {
        if self.storage != AllocatorStorage::ManuallyOwned {
            anyhow::bail!("AllocatorSlot: install is only valid for manually-owned slots");
        }
        self.cell
            .set(allocator)
            .map_err(|_| anyhow::anyhow!("AllocatorSlot: allocator already installed"))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_allocate_and_deallocate_accounting() {
        let alloc = SystemAllocator::new();
        let ptr = alloc.allocate(64, 8, AllocationFlags::empty()).unwrap();

        assert_eq!(alloc.num_allocated_bytes(), 64);
        assert_eq!(alloc.allocation_count(), 1);
        assert_eq!(alloc.allocation_size(ptr), 64);

        alloc.deallocate(ptr, 64, 8);
        assert_eq!(alloc.num_allocated_bytes(), 0);
        assert_eq!(alloc.allocation_count(), 0);
        assert_eq!(alloc.peak_allocated_bytes(), 64);
    }

    #[rstest]
    fn test_deallocate_untracked_pointer_is_refused() {
        let alloc = SystemAllocator::new();
        let live = alloc.allocate(8, 8, AllocationFlags::empty()).unwrap();

        // An unknown pointer is never freed; accounting is untouched
        alloc.deallocate(NonNull::dangling(), 8, 8);
        assert_eq!(alloc.num_allocated_bytes(), 8);
        assert_eq!(alloc.allocation_count(), 1);

        alloc.deallocate(live, 8, 8);
    }

    #[rstest]
    fn test_allocate_zero_size_fails() {
        let alloc = SystemAllocator::new();
        assert!(alloc.allocate(0, 8, AllocationFlags::empty()).is_none());
    }

    #[rstest]
    fn test_allocate_bad_alignment_fails() {
        let alloc = SystemAllocator::new();
        assert!(alloc.allocate(16, 3, AllocationFlags::empty()).is_none());
        assert_eq!(alloc.num_allocated_bytes(), 0);
    }

    #[rstest]
    fn test_zeroed_allocation() {
        let alloc = SystemAllocator::new();
        let ptr = alloc.allocate(32, 8, AllocationFlags::ZEROED).unwrap();

        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 32) };
        assert!(bytes.iter().all(|b| *b == 0));

        alloc.deallocate(ptr, 32, 8);
    }

    #[rstest]
    fn test_reallocate_preserves_prefix() {
        let alloc = SystemAllocator::new();
        let ptr = alloc.allocate(4, 4, AllocationFlags::empty()).unwrap();
        unsafe {
            ptr.as_ptr().copy_from_nonoverlapping([1u8, 2, 3, 4].as_ptr(), 4);
        }

        let grown = alloc.reallocate(Some(ptr), 16, 4).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 4) };
        assert_eq!(bytes, &[1, 2, 3, 4]);
        assert_eq!(alloc.num_allocated_bytes(), 16);

        alloc.deallocate(grown, 16, 4);
        assert_eq!(alloc.num_allocated_bytes(), 0);
    }

    #[rstest]
    fn test_reallocate_from_null_allocates() {
        let alloc = SystemAllocator::new();
        let ptr = alloc.reallocate(None, 8, 8).unwrap();
        assert_eq!(alloc.num_allocated_bytes(), 8);
        alloc.deallocate(ptr, 8, 8);
    }

    #[rstest]
    fn test_resize_unsupported_returns_zero() {
        let alloc = SystemAllocator::new();
        let ptr = alloc.allocate(8, 8, AllocationFlags::empty()).unwrap();
        assert_eq!(alloc.resize(ptr, 16), 0);
        alloc.deallocate(ptr, 8, 8);
    }

    #[rstest]
    fn test_child_allocator_forwards_and_tracks() {
        let parent = Arc::new(SystemAllocator::new());
        let child = ChildAllocator::new("AttributeAllocator", parent.clone());

        let ptr = child.allocate(128, 16, AllocationFlags::empty()).unwrap();
        assert_eq!(child.num_allocated_bytes(), 128);
        assert_eq!(parent.num_allocated_bytes(), 128);
        assert_eq!(child.allocation_size(ptr), 128);
        assert!(child.sub_allocator().is_some());

        child.deallocate(ptr, 128, 16);
        assert_eq!(child.num_allocated_bytes(), 0);
        assert_eq!(parent.num_allocated_bytes(), 0);
    }

    #[rstest]
    fn test_environment_allocator_is_shared() {
        let a = system_allocator();
        let b = system_allocator();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[rstest]
    fn test_module_slot_creates_local_instance() {
        let slot = AllocatorSlot::new(AllocatorStorage::Module);
        let a = slot.get();
        let b = slot.get();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &system_allocator()));
    }

    #[rstest]
    fn test_manually_owned_slot_install() {
        let slot = AllocatorSlot::new(AllocatorStorage::ManuallyOwned);
        let custom: Arc<dyn Allocator> = Arc::new(SystemAllocator::new());
        slot.install(custom.clone()).unwrap();
        assert!(Arc::ptr_eq(&slot.get(), &custom));

        // Second install is rejected
        assert!(slot.install(Arc::new(SystemAllocator::new())).is_err());
    }

    #[rstest]
    fn test_install_rejected_for_non_manual_slot() {
        let slot = AllocatorSlot::new(AllocatorStorage::Module);
        assert!(slot.install(Arc::new(SystemAllocator::new())).is_err());
    }

    #[rstest]
    fn test_unallocated_memory_reporting() {
        let alloc = SystemAllocator::new();
        let free = alloc.get_unallocated_memory(false);
        assert_eq!(free, usize::MAX);

        let ptr = alloc.allocate(16, 8, AllocationFlags::empty()).unwrap();
        assert_eq!(alloc.get_unallocated_memory(false), usize::MAX - 16);
        alloc.deallocate(ptr, 16, 8);
    }
}
