//! External interfaces consumed by the datapath.
//!
//! The engine never touches hardware directly: doorbell writes, interrupt
//! credits and DMA memory all go through the traits here. [`MemDmaDevice`]
//! is a software reference implementation used by the test harnesses; it
//! tracks mappings and page references so leak and double-free bugs show up
//! as assertion failures.

use std::collections::HashMap;

/// Page allocation failed (out of memory). Transient: the caller degrades
/// gracefully and retries on a later pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("page allocation failed")]
pub struct AllocationFailure;

/// DMA mapping failed. Transient, same handling as [`AllocationFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dma mapping failed")]
pub struct MapFailure;

/// Handle to one DMA-able page owned by the device interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub u64);

/// Which direction of a queue pair a doorbell write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Tx,
    Rx,
}

/// Doorbell register window.
pub trait DoorbellPage {
    fn ring(&mut self, kind: QueueKind, val: u64);
}

/// Interrupt-credit register interface. `unmask` re-arms the interrupt,
/// `reset_coalesce` restarts the hardware coalescing timer.
pub trait IntrControl {
    fn credits(&mut self, intr_index: u32, credits: u32, unmask: bool, reset_coalesce: bool);
}

/// Consumer of traffic samples for interrupt-moderation decisions. The
/// moderation algorithm itself lives outside this core; it only receives
/// the per-poll sample.
pub trait CoalesceObserver {
    fn sample(&mut self, pkts: u64, bytes: u64, rearm_count: u64);
}

/// DMA memory services.
///
/// Pages are identified by opaque [`PageId`] handles; mapped regions by the
/// `u64` bus address the mapping returned. TX packet memory (header + frags)
/// is host memory and is mapped by length via `map_host`.
pub trait DmaDevice {
    fn alloc_page(&mut self) -> Result<PageId, AllocationFailure>;
    fn free_page(&mut self, page: PageId);

    fn map_page(&mut self, page: PageId) -> Result<u64, MapFailure>;
    fn unmap_page(&mut self, dma_addr: u64);

    fn map_host(&mut self, len: usize) -> Result<u64, MapFailure>;
    fn unmap_host(&mut self, dma_addr: u64, len: usize);

    /// Makes device-written bytes visible to the CPU before `page_read`.
    fn sync_for_cpu(&mut self, _dma_addr: u64, _offset: usize, _len: usize) {}
    /// Hands a region back to the device after CPU access.
    fn sync_for_device(&mut self, _dma_addr: u64, _offset: usize, _len: usize) {}

    fn page_read(&self, page: PageId, offset: usize, dst: &mut [u8]);
    /// Device-side deposit of received bytes (used by harnesses playing
    /// hardware).
    fn page_write(&mut self, page: PageId, offset: usize, src: &[u8]);

    fn page_ref_add(&mut self, page: PageId, n: u32);
    fn page_ref_sub(&mut self, page: PageId, n: u32);
    /// Whether the page may be kept for exclusive reuse (an external holder
    /// or special placement makes a page non-reusable).
    fn page_is_reusable(&self, page: PageId) -> bool;
}

/// Doorbell sink that discards every ring.
#[derive(Debug, Default)]
pub struct NullDoorbell;

impl DoorbellPage for NullDoorbell {
    fn ring(&mut self, _kind: QueueKind, _val: u64) {}
}

/// Doorbell sink that records every ring, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingDoorbell {
    pub rings: Vec<(QueueKind, u64)>,
}

impl DoorbellPage for RecordingDoorbell {
    fn ring(&mut self, kind: QueueKind, val: u64) {
        self.rings.push((kind, val));
    }
}

#[derive(Debug)]
struct PageState {
    data: Vec<u8>,
    refs: u32,
    mapped: Option<u64>,
    reusable: bool,
}

/// In-memory [`DmaDevice`] with failure injection and leak accounting.
#[derive(Debug, Default)]
pub struct MemDmaDevice {
    pages: HashMap<u64, PageState>,
    page_maps: HashMap<u64, u64>,
    host_maps: HashMap<u64, usize>,
    next_page: u64,
    next_addr: u64,
    /// Fail this many upcoming `alloc_page` calls.
    pub fail_page_allocs: u32,
    /// Let this many `alloc_page` calls succeed before failures start.
    pub fail_page_allocs_after: u32,
    /// Fail this many upcoming `map_page`/`map_host` calls.
    pub fail_maps: u32,
    /// Let this many map calls succeed before failures start.
    pub fail_maps_after: u32,
}

impl MemDmaDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages currently allocated (not yet freed).
    pub fn live_pages(&self) -> usize {
        self.pages.len()
    }

    /// Page mappings that have not been unmapped.
    pub fn outstanding_page_maps(&self) -> usize {
        self.page_maps.len()
    }

    /// Host (TX) mappings that have not been unmapped.
    pub fn outstanding_host_maps(&self) -> usize {
        self.host_maps.len()
    }

    /// Marks a page as held externally, so recycling must reject it.
    pub fn set_unreusable(&mut self, page: PageId) {
        self.pages.get_mut(&page.0).expect("live page").reusable = false;
    }

    /// Resolves a descriptor address back to its page and in-page offset.
    /// Harness helper for code playing the hardware side.
    pub fn page_by_dma(&self, dma_addr: u64) -> Option<(PageId, usize)> {
        let base = dma_addr & !(crate::PAGE_SIZE as u64 - 1);
        let id = self.page_maps.get(&base)?;
        Some((PageId(*id), (dma_addr - base) as usize))
    }

    pub fn page_refs(&self, page: PageId) -> u32 {
        self.pages.get(&page.0).expect("live page").refs
    }

    fn page_mut(&mut self, page: PageId) -> &mut PageState {
        self.pages.get_mut(&page.0).expect("live page")
    }

    fn map_should_fail(&mut self) -> bool {
        if self.fail_maps_after > 0 {
            self.fail_maps_after -= 1;
            return false;
        }
        if self.fail_maps > 0 {
            self.fail_maps -= 1;
            return true;
        }
        false
    }
}

impl DmaDevice for MemDmaDevice {
    fn alloc_page(&mut self) -> Result<PageId, AllocationFailure> {
        if self.fail_page_allocs_after > 0 {
            self.fail_page_allocs_after -= 1;
        } else if self.fail_page_allocs > 0 {
            self.fail_page_allocs -= 1;
            return Err(AllocationFailure);
        }
        let id = self.next_page;
        self.next_page += 1;
        self.pages.insert(
            id,
            PageState {
                data: vec![0u8; crate::PAGE_SIZE],
                refs: 1,
                mapped: None,
                reusable: true,
            },
        );
        Ok(PageId(id))
    }

    fn free_page(&mut self, page: PageId) {
        let state = self.pages.remove(&page.0).expect("free of a live page");
        debug_assert_eq!(state.refs, 1, "page freed with outstanding references");
        debug_assert!(state.mapped.is_none(), "page freed while still mapped");
    }

    fn map_page(&mut self, page: PageId) -> Result<u64, MapFailure> {
        if self.map_should_fail() {
            return Err(MapFailure);
        }
        self.next_addr += crate::PAGE_SIZE as u64;
        let addr = self.next_addr;
        self.page_mut(page).mapped = Some(addr);
        self.page_maps.insert(addr, page.0);
        Ok(addr)
    }

    fn unmap_page(&mut self, dma_addr: u64) {
        let id = self
            .page_maps
            .remove(&dma_addr)
            .expect("unmap of a mapped page");
        if let Some(state) = self.pages.get_mut(&id) {
            state.mapped = None;
        }
    }

    fn map_host(&mut self, len: usize) -> Result<u64, MapFailure> {
        if self.map_should_fail() {
            return Err(MapFailure);
        }
        self.next_addr += crate::PAGE_SIZE as u64;
        let addr = self.next_addr;
        self.host_maps.insert(addr, len);
        Ok(addr)
    }

    fn unmap_host(&mut self, dma_addr: u64, len: usize) {
        let mapped = self
            .host_maps
            .remove(&dma_addr)
            .expect("unmap of a mapped host region");
        debug_assert_eq!(mapped, len, "host unmap length mismatch");
    }

    fn page_read(&self, page: PageId, offset: usize, dst: &mut [u8]) {
        let state = self.pages.get(&page.0).expect("live page");
        dst.copy_from_slice(&state.data[offset..offset + dst.len()]);
    }

    fn page_write(&mut self, page: PageId, offset: usize, src: &[u8]) {
        let state = self.page_mut(page);
        state.data[offset..offset + src.len()].copy_from_slice(src);
    }

    fn page_ref_add(&mut self, page: PageId, n: u32) {
        self.page_mut(page).refs += n;
    }

    fn page_ref_sub(&mut self, page: PageId, n: u32) {
        let state = self.page_mut(page);
        debug_assert!(state.refs > n, "reference underflow");
        state.refs -= n;
    }

    fn page_is_reusable(&self, page: PageId) -> bool {
        self.pages.get(&page.0).expect("live page").reusable
    }
}
