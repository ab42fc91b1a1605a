//! A doubly-mapped ("mirrored") ring buffer: a region of `len` samples is
//! mapped twice at adjacent virtual addresses, so a write or read that walks
//! past the nominal end wraps into the mirror without any branch. Grounded
//! on the overlap-save buffer that the shared input filter owns (spec §4.1);
//! the underlying double-`mmap` trick is the standard way to make circular
//! buffers linear for DSP code that wants contiguous slices.

use fcsdr_core::{ComplexSample, CoreError};
use std::ptr::NonNull;

/// Ring buffer of `f32` samples, doubly mapped so any contiguous window of
/// up to `len` samples starting anywhere in `[0, len)` can be read as a
/// single slice.
pub struct MirroredRingBuffer {
    ptr: NonNull<f32>,
    /// Number of `f32` samples in one copy of the mapping.
    len: usize,
    /// Byte size of one copy, rounded up to a page boundary.
    mapped_bytes: usize,
    write_pos: usize,
}

// SAFETY: the buffer is only ever accessed through `&self`/`&mut self`
// methods that hand out slices scoped to the call; no aliasing pointers
// escape this type.
unsafe impl Send for MirroredRingBuffer {}
unsafe impl Sync for MirroredRingBuffer {}

impl MirroredRingBuffer {
    /// Create a ring buffer holding `len` `f32` samples, backed by a
    /// double mapping of `len * 4` bytes (rounded to a page).
    pub fn new(len: usize) -> Result<Self, CoreError> {
        assert!(len > 0);
        let elem_bytes = std::mem::size_of::<f32>();
        let page = page_size();
        let raw_bytes = len * elem_bytes;
        let mapped_bytes = raw_bytes.div_ceil(page) * page;

        let ptr = unsafe { double_map(mapped_bytes) }
            .ok_or_else(|| CoreError::ResourceExhaustion("could not establish mirrored mapping".to_string()))?;

        Ok(Self {
            ptr,
            len: mapped_bytes / elem_bytes,
            mapped_bytes,
            write_pos: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write `samples` at `pos` (mod `len`); safe to cross the wrap point
    /// because of the mirror mapping.
    pub fn write_at(&mut self, pos: usize, samples: &[f32]) {
        assert!(samples.len() <= self.len);
        let pos = pos % self.len;
        let dst = unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(pos), samples.len()) };
        dst.copy_from_slice(samples);
    }

    /// Borrow `count` contiguous samples starting at `pos` (mod `len`).
    /// Valid as long as `count <= len`, regardless of whether the window
    /// crosses the wrap point.
    pub fn read_at(&self, pos: usize, count: usize) -> &[f32] {
        assert!(count <= self.len);
        let pos = pos % self.len;
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(pos), count) }
    }

    /// Append `samples` at the current write cursor, advancing it (mod
    /// `len`), and return the position the samples were written at.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let pos = self.write_pos;
        self.write_at(pos, samples);
        self.write_pos = (pos + samples.len()) % self.len;
        pos
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }
}

impl Drop for MirroredRingBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.mapped_bytes * 2);
        }
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Map `bytes` (already page-aligned) twice back to back using a shared
/// anonymous `memfd`, so writes in the second half alias the first.
unsafe fn double_map(bytes: usize) -> Option<NonNull<f32>> {
    unsafe {
        let fd = libc::memfd_create(c"fcsdr-ringbuf".as_ptr(), 0);
        if fd < 0 {
            return None;
        }
        if libc::ftruncate(fd, bytes as libc::off_t) != 0 {
            libc::close(fd);
            return None;
        }

        // Reserve a 2*bytes region so the kernel won't place anything else there.
        let base = libc::mmap(
            std::ptr::null_mut(),
            bytes * 2,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if base == libc::MAP_FAILED {
            libc::close(fd);
            return None;
        }

        let first = libc::mmap(
            base,
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_FIXED,
            fd,
            0,
        );
        let second = libc::mmap(
            base.add(bytes),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_FIXED,
            fd,
            0,
        );
        libc::close(fd);

        if first == libc::MAP_FAILED || second == libc::MAP_FAILED {
            libc::munmap(base, bytes * 2);
            return None;
        }

        NonNull::new(base as *mut f32)
    }
}

/// Mirrored ring buffer over complex samples: real and imaginary planes
/// each get their own mirrored `f32` mapping so the write side stays
/// branch-free, at the cost of assembling an interleaved `Complex32` slice
/// on read (FFT processing needs a contiguous `[Complex<f32>]` anyway).
pub struct ComplexMirroredRingBuffer {
    re: MirroredRingBuffer,
    im: MirroredRingBuffer,
    write_pos: usize,
}

impl ComplexMirroredRingBuffer {
    pub fn new(len: usize) -> Result<Self, CoreError> {
        Ok(Self {
            re: MirroredRingBuffer::new(len)?,
            im: MirroredRingBuffer::new(len)?,
            write_pos: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.re.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    /// Append `samples`, advancing the write cursor (mod `len`); returns the
    /// position the first sample landed at.
    pub fn push(&mut self, samples: &[ComplexSample]) -> usize {
        let len = self.len();
        let pos = self.write_pos;
        let re: Vec<f32> = samples.iter().map(|c| c.re).collect();
        let im: Vec<f32> = samples.iter().map(|c| c.im).collect();
        self.re.write_at(pos, &re);
        self.im.write_at(pos, &im);
        self.write_pos = (pos + samples.len()) % len;
        pos
    }

    /// Assemble `count` contiguous complex samples starting at `pos`.
    pub fn read_window(&self, pos: usize, count: usize) -> Vec<ComplexSample> {
        let re = self.re.read_at(pos, count);
        let im = self.im.read_at(pos, count);
        re.iter().zip(im.iter()).map(|(&r, &i)| ComplexSample::new(r, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraparound_read_is_contiguous() {
        let mut rb = MirroredRingBuffer::new(1024).unwrap();
        let len = rb.len();
        let tail = &[1.0f32, 2.0, 3.0, 4.0];
        rb.write_at(len - 2, tail);
        let window = rb.read_at(len - 2, 4);
        assert_eq!(window, tail);
    }

    #[test]
    fn push_advances_write_cursor() {
        let mut rb = MirroredRingBuffer::new(4096).unwrap();
        let pos0 = rb.push(&[1.0, 2.0, 3.0]);
        assert_eq!(pos0, 0);
        let pos1 = rb.push(&[4.0, 5.0]);
        assert_eq!(pos1, 3);
        assert_eq!(rb.read_at(0, 5), &[1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn complex_ring_wraps_without_corruption() {
        let mut rb = ComplexMirroredRingBuffer::new(2048).unwrap();
        let len = rb.len();
        let samples: Vec<ComplexSample> = (0..8).map(|i| ComplexSample::new(i as f32, -(i as f32))).collect();
        rb.push(&vec![ComplexSample::new(0.0, 0.0); len - 4]);
        let pos = rb.push(&samples);
        let window = rb.read_window(pos, 8);
        assert_eq!(window, samples);
    }
}
