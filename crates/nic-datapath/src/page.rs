//! RX buffer lifecycle: page allocation, split-page recycling and release.
//!
//! Every RX buffer is one DMA page, mapped once at allocation and carried in
//! a [`BufInfo`] that lives with its ring slot. Pages larger than the buffer
//! length are split: the slot advances `page_offset` in
//! [`crate::PAGE_SPLIT_SZ`] steps on each recycle, and the extra references a
//! split will consume are prepaid into `pagecnt_bias` at fill time so the
//! hot path never touches the reference count more than once.

use tracing::warn;

use crate::dev::{DmaDevice, PageId};
use crate::stats::RxStats;
use crate::{PAGE_SIZE, PAGE_SPLIT_MAX_MTU, PAGE_SPLIT_SZ};

/// One posted buffer. TX slots use `dma_addr`/`len` only (host mappings);
/// RX slots carry the page and its split state.
#[derive(Debug, Clone, Default)]
pub struct BufInfo {
    pub page: Option<PageId>,
    pub dma_addr: u64,
    pub page_offset: usize,
    /// Prepaid page references still unconsumed by recycling.
    pub pagecnt_bias: u32,
    pub len: usize,
}

/// Allocates and maps a fresh page into `buf`. On failure the buffer is left
/// empty and the matching counter is bumped; the caller degrades gracefully.
pub fn rx_page_alloc(
    dev: &mut impl DmaDevice,
    buf: &mut BufInfo,
    stats: &mut RxStats,
) -> Result<(), ()> {
    let page = match dev.alloc_page() {
        Ok(page) => page,
        Err(err) => {
            warn!(%err, "rx page alloc failed");
            stats.alloc_err += 1;
            return Err(());
        }
    };

    let dma_addr = match dev.map_page(page) {
        Ok(addr) => addr,
        Err(err) => {
            dev.free_page(page);
            warn!(%err, "rx dma map failed");
            stats.dma_map_err += 1;
            return Err(());
        }
    };

    buf.page = Some(page);
    buf.dma_addr = dma_addr;
    buf.page_offset = 0;
    buf.pagecnt_bias = 0;
    Ok(())
}

/// Unmaps and releases the buffer's page, returning any unconsumed prepaid
/// references first. No-op on an empty buffer.
pub fn rx_page_free(dev: &mut impl DmaDevice, buf: &mut BufInfo) {
    let Some(page) = buf.page.take() else {
        return;
    };

    dev.unmap_page(buf.dma_addr);
    if buf.pagecnt_bias > 0 {
        dev.page_ref_sub(page, buf.pagecnt_bias);
        buf.pagecnt_bias = 0;
    }
    dev.free_page(page);
}

/// Decides whether the buffer's page can be posted again after `used` bytes
/// were consumed from it. On success the offset has advanced past the used
/// split and one prepaid reference was consumed.
pub fn rx_buf_recycle(
    dev: &impl DmaDevice,
    buf: &mut BufInfo,
    used: usize,
    mtu: usize,
) -> bool {
    let page = match buf.page {
        Some(page) => page,
        None => return false,
    };

    if !dev.page_is_reusable(page) {
        return false;
    }

    if mtu > PAGE_SPLIT_MAX_MTU {
        return false;
    }

    buf.page_offset += align_split(used);
    if buf.page_offset >= PAGE_SIZE {
        return false;
    }

    buf.pagecnt_bias -= 1;
    true
}

/// How many buffers of `len` bytes one page splits into.
pub fn page_splits(len: usize) -> usize {
    PAGE_SIZE / align_split(len)
}

fn align_split(len: usize) -> usize {
    len.div_ceil(PAGE_SPLIT_SZ) * PAGE_SPLIT_SZ
}
