//! Scatter/gather copy between a chunk's page-backed buffer and the
//! caller's memory description.
//!
//! The raw block-layer glue that turns an OS I/O request into
//! chunk-aligned segments is out of scope (spec.md §1); what remains in
//! scope here is the copy routine itself, which must walk both the
//! chunk's fixed `PAGE_SIZE` pages and an arbitrary caller segment list
//! without ever reading or writing across a page boundary in one step
//! (spec.md §4.4: "a scatter/gather copy that handles unaligned segment
//! boundaries without straddling page boundaries, to keep page-kernel
//! mapping safe").

use nexus_cache::{Page, PAGE_SIZE};

/// One caller-owned memory segment. A real block layer would hand over
/// pinned kernel pages; the reference engine uses plain owned buffers
/// since the kernel-mapping safety concern itself is out of scope (only
/// the "don't straddle a page" discipline is in scope, and that applies
/// equally to a `Vec<u8>` segment).
#[derive(Debug)]
pub struct Segment {
    pub data: Vec<u8>,
}

impl Segment {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { data: vec![0u8; len] }
    }

    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// Copies `len` bytes starting at `chunk_offset` out of `pages` into
/// `segments`, never reading past a single page's boundary in one slice
/// operation.
pub fn copy_pages_to_segments(pages: &[Page], chunk_offset: usize, len: usize, segments: &mut [Segment]) {
    let mut remaining = len;
    let mut src_pos = chunk_offset;
    let mut seg_idx = 0;
    let mut seg_pos = 0;

    while remaining > 0 {
        let page_idx = src_pos / PAGE_SIZE;
        let page_off = src_pos % PAGE_SIZE;
        let page_run = (PAGE_SIZE - page_off).min(remaining);

        let mut taken = 0;
        while taken < page_run {
            while seg_idx < segments.len() && seg_pos == segments[seg_idx].data.len() {
                seg_idx += 1;
                seg_pos = 0;
            }
            let seg = &mut segments[seg_idx];
            let run = (seg.data.len() - seg_pos).min(page_run - taken);
            seg.data[seg_pos..seg_pos + run].copy_from_slice(&pages[page_idx][page_off + taken..page_off + taken + run]);
            seg_pos += run;
            taken += run;
        }

        src_pos += page_run;
        remaining -= page_run;
    }
}

/// The inverse of [`copy_pages_to_segments`]: copies `len` bytes from
/// `segments` into `pages` starting at `chunk_offset`.
pub fn copy_segments_to_pages(segments: &[Segment], pages: &mut [Page], chunk_offset: usize, len: usize) {
    let mut remaining = len;
    let mut dst_pos = chunk_offset;
    let mut seg_idx = 0;
    let mut seg_pos = 0;

    while remaining > 0 {
        let page_idx = dst_pos / PAGE_SIZE;
        let page_off = dst_pos % PAGE_SIZE;
        let page_run = (PAGE_SIZE - page_off).min(remaining);

        let mut taken = 0;
        while taken < page_run {
            while seg_idx < segments.len() && seg_pos == segments[seg_idx].data.len() {
                seg_idx += 1;
                seg_pos = 0;
            }
            let seg = &segments[seg_idx];
            let run = (seg.data.len() - seg_pos).min(page_run - taken);
            pages[page_idx][page_off + taken..page_off + taken + run].copy_from_slice(&seg.data[seg_pos..seg_pos + run]);
            seg_pos += run;
            taken += run;
        }

        dst_pos += page_run;
        remaining -= page_run;
    }
}

/// Concatenates a request's whole segment list into one owned buffer. The
/// request-segment boundaries are caller memory layout, not a
/// page-alignment concern (unlike [`copy_pages_to_segments`]), so a plain
/// flatten is enough here.
#[must_use]
pub fn flatten_segments(segments: &[Segment]) -> Vec<u8> {
    segments.iter().flat_map(|s| s.data.iter().copied()).collect()
}

/// The inverse of [`flatten_segments`]: splits `data` back across
/// `segments` according to each segment's existing length.
///
/// # Panics
/// Panics if `data` is shorter than the sum of the segments' lengths.
pub fn unflatten_into_segments(segments: &mut [Segment], data: &[u8]) {
    let mut pos = 0;
    for seg in segments.iter_mut() {
        let n = seg.data.len();
        seg.data.copy_from_slice(&data[pos..pos + n]);
        pos += n;
    }
}

/// Allocates a fresh, zeroed page vector sized for `chunksize`.
#[must_use]
pub fn new_pages(chunksize: usize) -> Vec<Page> {
    (0..chunksize.div_ceil(PAGE_SIZE)).map(|_| Box::new([0u8; PAGE_SIZE])).collect()
}

/// Flattens a chunk's pages into one contiguous buffer of exactly
/// `len` bytes starting at `chunk_offset` -- used where the transform
/// pipeline needs a single slice (it has no notion of pages).
#[must_use]
pub fn flatten(pages: &[Page], chunk_offset: usize, len: usize) -> Vec<u8> {
    let mut seg = [Segment::new(len)];
    copy_pages_to_segments(pages, chunk_offset, len, &mut seg);
    let [Segment { data }] = seg;
    data
}

/// The inverse of [`flatten`]: writes a contiguous buffer back into a
/// chunk's pages at `chunk_offset`.
pub fn unflatten(pages: &mut [Page], chunk_offset: usize, data: &[u8]) {
    let seg = [Segment::from_vec(data.to_vec())];
    copy_segments_to_pages(&seg, pages, chunk_offset, data.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_across_page_and_segment_boundaries() {
        let mut pages = new_pages(PAGE_SIZE * 2);
        let data: Vec<u8> = (0..PAGE_SIZE + 200).map(|i| (i % 251) as u8).collect();
        unflatten(&mut pages, 4000, &data);

        let mut segs = [Segment::new(100), Segment::new(300), Segment::new(data.len() - 400)];
        copy_pages_to_segments(&pages, 4000, data.len(), &mut segs);
        let reassembled: Vec<u8> = segs.iter().flat_map(|s| s.data.clone()).collect();
        assert_eq!(reassembled, data);
    }

    #[test]
    fn flatten_unflatten_identity() {
        let mut pages = new_pages(PAGE_SIZE);
        let data = vec![0xABu8; 50];
        unflatten(&mut pages, 10, &data);
        assert_eq!(flatten(&pages, 10, 50), data);
    }
}
