use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use funty::Unsigned;
use memmap2::{Mmap, MmapMut};

/// An immutable memory-mapped slice of unsigned integers in native byte order.
pub struct MmapSlice<T: Unsigned> {
    mmap: Option<Mmap>,
    _element_type: PhantomData<T>,
}

impl<T: Unsigned> MmapSlice<T> {
    /// Maps a whole file. Empty files map to an empty slice.
    pub fn new(file: &File) -> std::io::Result<Self> {
        let len = file.metadata()?.len() as usize;
        if len % std::mem::size_of::<T>() != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "file size is not a multiple of element size",
            ));
        }
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(file)? })
        };
        Ok(MmapSlice {
            mmap,
            _element_type: PhantomData,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Self::new(&File::open(path)?)
    }

    /// Number of elements of type `T` in the map.
    pub fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len()) / std::mem::size_of::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.mmap {
            // SAFETY: mmaps are page aligned and the length was checked to be a multiple of T.
            Some(mmap) => unsafe {
                std::slice::from_raw_parts(mmap.as_ptr() as *const T, self.len())
            },
            None => &[],
        }
    }
}

impl<T: Unsigned> Deref for MmapSlice<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

/// A writable memory-mapped slice used to lay out a file before it is reopened read-only.
pub struct MmapSliceMut<T: Unsigned> {
    mmap: MmapMut,
    _element_type: PhantomData<T>,
}

impl<T: Unsigned> MmapSliceMut<T> {
    /// Creates (or truncates) `path` to hold `len` zeroed elements and maps it for writing.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((len.max(1) * std::mem::size_of::<T>()) as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(MmapSliceMut {
            mmap,
            _element_type: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.mmap.len() / std::mem::size_of::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.mmap.as_ptr() as *const T, self.len()) }
    }

    pub fn as_slice_mut(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.mmap.as_mut_ptr() as *mut T, self.len()) }
    }

    /// Flushes outstanding writes and returns the number of bytes in the mapping.
    pub fn flush(&self) -> std::io::Result<u64> {
        self.mmap.flush()?;
        Ok(self.mmap.len() as u64)
    }

    pub fn into_read_only(self) -> std::io::Result<MmapSlice<T>> {
        self.mmap.flush()?;
        Ok(MmapSlice {
            mmap: Some(self.mmap.make_read_only()?),
            _element_type: PhantomData,
        })
    }
}

impl<T: Unsigned> Deref for MmapSliceMut<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Unsigned> DerefMut for MmapSliceMut<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_slice_mut()
    }
}
