//! Raw storage - type-erased, aligned, growable byte arrays.
//!
//! A [`Blob`] stores fixed-size items contiguously. Chunks use one blob per
//! chunk for their packed component rows (item = one row) and one
//! [`ArrayBuffer`] per entity per array type for variable-length data.

use std::{alloc::Layout, fmt, ptr::NonNull};

use crate::component::ArrayElement;

/// A contiguous array of fixed-size, type-erased items.
///
/// New items are always zero-filled. Growth reallocates and copies, so
/// item `i` is always at byte `i * item_size` from the start of the buffer.
pub struct Blob {
    /// Pointer to the data array.
    data: NonNull<u8>,
    /// Number of items stored.
    len: usize,
    /// Allocated capacity (in number of items).
    capacity: usize,
    /// Layout of a single item.
    item: Layout,
}

// SAFETY: Blob exclusively owns plain bytes.
unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    /// Create a new empty blob for items of the given layout.
    #[must_use]
    pub fn new(item: Layout) -> Self {
        Self {
            data: Self::dangling(item.align()),
            len: 0,
            capacity: if item.size() == 0 { usize::MAX } else { 0 },
            item,
        }
    }

    /// Create a blob with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(item: Layout, capacity: usize) -> Self {
        let mut blob = Self::new(item);
        blob.reserve(capacity);
        blob
    }

    fn dangling(align: usize) -> NonNull<u8> {
        NonNull::new(std::ptr::without_provenance_mut(align)).unwrap_or(NonNull::dangling())
    }

    /// Get the number of items stored.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the blob is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn item_layout(&self) -> Layout {
        self.item
    }

    #[must_use]
    pub const fn item_size(&self) -> usize {
        self.item.size()
    }

    /// Append one zeroed item and return its index.
    pub fn push_zeroed(&mut self) -> usize {
        self.reserve(1);
        let index = self.len;
        // SAFETY: capacity > len after reserve; the range is inside the allocation.
        unsafe {
            std::ptr::write_bytes(self.item_ptr(index), 0, self.item.size());
        }
        self.len += 1;
        index
    }

    /// Append one item copied from `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len()` differs from the item size.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        assert_eq!(bytes.len(), self.item.size(), "item size mismatch in Blob::push_bytes");
        let index = self.push_zeroed();
        self.get_mut(index).copy_from_slice(bytes);
        index
    }

    /// Grow or shrink to `len` items, zero-filling new ones.
    pub fn resize_zeroed(&mut self, len: usize) {
        if len <= self.len {
            self.len = len;
            return;
        }

        self.reserve(len - self.len);
        // SAFETY: [self.len, len) is inside the allocation after reserve.
        unsafe {
            std::ptr::write_bytes(
                self.item_ptr(self.len),
                0,
                (len - self.len) * self.item.size(),
            );
        }
        self.len = len;
    }

    /// Remove the item at `index` by moving the last item into its place.
    ///
    /// Returns the former index of the item that was moved into `index`,
    /// or `None` if `index` was the last item.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn swap_remove(&mut self, index: usize) -> Option<usize> {
        assert!(index < self.len, "index out of bounds in Blob::swap_remove");

        self.len -= 1;
        if index == self.len {
            return None;
        }

        // SAFETY: index and self.len are distinct, in-bounds items.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.item_ptr(self.len),
                self.item_ptr(index),
                self.item.size(),
            );
        }
        Some(self.len)
    }

    /// Copy item `src` over item `dst`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    pub fn copy_item(&mut self, src: usize, dst: usize) {
        assert!(src < self.len && dst < self.len, "index out of bounds in Blob::copy_item");
        if src == dst {
            return;
        }
        // SAFETY: both items are in bounds and distinct.
        unsafe {
            std::ptr::copy_nonoverlapping(self.item_ptr(src), self.item_ptr(dst), self.item.size());
        }
    }

    /// Bytes of one item.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[must_use]
    pub fn get(&self, index: usize) -> &[u8] {
        assert!(index < self.len, "index out of bounds in Blob::get");
        // SAFETY: index is in bounds and the item is initialized.
        unsafe { std::slice::from_raw_parts(self.item_ptr(index), self.item.size()) }
    }

    /// Mutable bytes of one item.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> &mut [u8] {
        assert!(index < self.len, "index out of bounds in Blob::get_mut");
        // SAFETY: index is in bounds, the item is initialized and we hold &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.item_ptr(index), self.item.size()) }
    }

    /// All stored bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the first len items are initialized.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len * self.item.size()) }
    }

    /// All stored bytes, mutably.
    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: the first len items are initialized and we hold &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len * self.item.size()) }
    }

    /// Pointer to item `index`; may be one past the end.
    #[inline]
    fn item_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index <= self.capacity);
        // SAFETY: index <= capacity keeps the offset inside (or one past) the allocation.
        unsafe { self.data.as_ptr().add(index * self.item.size()) }
    }

    /// Reserve capacity for at least `additional` more items.
    ///
    /// # Panics
    ///
    /// Panics on capacity overflow.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.len.checked_add(additional).expect("capacity overflow");

        if required <= self.capacity {
            return;
        }

        self.grow(required);
    }

    /// Grow the blob to at least `min_capacity`.
    fn grow(&mut self, min_capacity: usize) {
        // Growth strategy: double capacity, but at least 4 items
        let new_capacity = self
            .capacity
            .checked_mul(2)
            .unwrap_or(min_capacity)
            .max(min_capacity)
            .max(4);

        let new_layout = Self::array_layout(self.item, new_capacity);

        // SAFETY: item size is non-zero here (zero-sized items never grow),
        // so both layouts are non-zero.
        let new_data = unsafe {
            if self.capacity == 0 {
                std::alloc::alloc(new_layout)
            } else {
                let old_layout = Self::array_layout(self.item, self.capacity);
                std::alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size())
            }
        };

        let Some(new_data) = NonNull::new(new_data) else {
            std::alloc::handle_alloc_error(new_layout);
        };

        self.data = new_data;
        self.capacity = new_capacity;
    }

    /// Forget all items. Capacity is kept.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Calculate the array layout for `count` items.
    fn array_layout(item: Layout, count: usize) -> Layout {
        let size = item.size().checked_mul(count).expect("layout overflow");
        Layout::from_size_align(size, item.align()).expect("layout overflow")
    }
}

impl Clone for Blob {
    fn clone(&self) -> Self {
        let mut copy = Self::with_capacity(self.item, self.len);
        copy.resize_zeroed(self.len);
        copy.as_bytes_mut().copy_from_slice(self.as_bytes());
        copy
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        if self.capacity > 0 && self.item.size() > 0 {
            let layout = Self::array_layout(self.item, self.capacity);
            // SAFETY: data was allocated with this layout
            unsafe {
                std::alloc::dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("len", &self.len)
            .field("item_size", &self.item.size())
            .field("align", &self.item.align())
            .finish()
    }
}

/// Variable-length array of one element type, owned by one entity.
#[derive(Clone, Debug)]
pub struct ArrayBuffer {
    blob: Blob,
}

impl ArrayBuffer {
    #[must_use]
    pub fn new(element: Layout) -> Self {
        Self {
            blob: Blob::new(element),
        }
    }

    /// A buffer of `len` zeroed elements.
    #[must_use]
    pub fn zeroed(element: Layout, len: usize) -> Self {
        let mut blob = Blob::with_capacity(element, len);
        blob.resize_zeroed(len);
        Self { blob }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.blob.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }

    #[must_use]
    pub const fn element_layout(&self) -> Layout {
        self.blob.item_layout()
    }

    /// Resize in place; new elements are zeroed.
    pub fn resize(&mut self, len: usize) {
        self.blob.resize_zeroed(len);
    }

    pub fn clear(&mut self) {
        self.blob.clear();
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.blob.as_bytes()
    }

    fn check<T: ArrayElement>(&self) {
        debug_assert_eq!(
            Layout::new::<T>(),
            self.blob.item_layout(),
            "element type mismatch in ArrayBuffer"
        );
    }

    /// View the elements as `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not have the element layout of this buffer.
    #[must_use]
    pub fn as_slice<T: ArrayElement>(&self) -> &[T] {
        self.check::<T>();
        bytemuck::cast_slice(self.blob.as_bytes())
    }

    /// View the elements as mutable `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not have the element layout of this buffer.
    #[must_use]
    pub fn as_mut_slice<T: ArrayElement>(&mut self) -> &mut [T] {
        self.check::<T>();
        bytemuck::cast_slice_mut(self.blob.as_bytes_mut())
    }

    /// Append one element.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not have the element layout of this buffer.
    pub fn push<T: ArrayElement>(&mut self, value: T) {
        self.check::<T>();
        self.blob.push_bytes(bytemuck::bytes_of(&value));
    }

    /// Replace the contents with `values`.
    ///
    /// # Panics
    ///
    /// Panics if `T` does not have the element layout of this buffer.
    pub fn assign<T: ArrayElement>(&mut self, values: &[T]) {
        self.blob.resize_zeroed(values.len());
        self.as_mut_slice::<T>().copy_from_slice(values);
    }
}
