//! A minimal [`Allocator`] and [`SystemBus`] used only by this crate's own unit tests.
//!
//! `space_time::SpaceTime` is the allocator meant for real use, but it is not wired up (see its
//! own crate for the snapshot/undo machinery it is expected to eventually provide). Tests that
//! need a working [`Core`] construct one against [`TestAllocator`]/[`TestBus`] instead.

#![cfg(test)]

use std::cell::RefCell;

use space_time::errors::InvalidIdError;

use crate::bus::{Bus, PureAccessResult};
use crate::system_bus::{AccessType, SystemBus};
use crate::{ArrayAccessor, ArrayAccessorMut, Allocator};

use super::{Config, Core};

/// Each [`Allocator::insert`]ed object gets its own heap allocation, identified by a raw pointer.
///
/// Array storage is never used by [`Core`] (it only ever calls [`Allocator::insert`]), so the
/// array-oriented methods are implemented just well enough to type-check.
#[derive(Debug, Default)]
pub(crate) struct TestAllocator;

pub(crate) struct RawId<T>(*mut T);

impl<T> Clone for RawId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RawId<T> {}

impl<T> PartialEq for RawId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for RawId<T> {}

/// Placeholder [`ArrayAccessor`]/[`ArrayAccessorMut`] implementation for the array methods that
/// [`Core`] never calls.
struct UnusedArray;

impl<'a, T: 'a + Copy> ArrayAccessor<'a, T> for UnusedArray {
    fn len(&self) -> usize {
        unreachable!("array storage is not used by Core")
    }

    fn get(&self, _index: usize) -> Option<T> {
        unreachable!("array storage is not used by Core")
    }

    fn get_ref(&self, _index: usize) -> Option<&'a T> {
        unreachable!("array storage is not used by Core")
    }

    fn read(&self, _buf: &mut [T], _index: usize) -> bool {
        unreachable!("array storage is not used by Core")
    }

    fn iter_range<R>(&self, _index_range: R) -> Option<impl IntoIterator<Item = &'a T> + 'a>
    where
        R: std::ops::RangeBounds<usize>,
    {
        unreachable!("array storage is not used by Core")
    }
}

impl<'a, T: 'a + Copy> ArrayAccessorMut<'a, T> for UnusedArray {
    fn get_mut(&self, _index: usize) -> Option<&'a mut T> {
        unreachable!("array storage is not used by Core")
    }

    fn set(&self, _index: usize, _value: T) -> bool {
        unreachable!("array storage is not used by Core")
    }

    fn write(&self, _index: usize, _buf: &[T]) -> bool {
        unreachable!("array storage is not used by Core")
    }

    fn iter_range_mut<R>(&self, _index_range: R) -> Option<impl IntoIterator<Item = &'a mut T> + 'a>
    where
        R: std::ops::RangeBounds<usize>,
    {
        unreachable!("array storage is not used by Core")
    }
}

impl Allocator for TestAllocator {
    type Id<T> = RawId<T>;
    type ArrayId<T> = ();

    fn insert<T: Clone>(&mut self, object: T) -> Self::Id<T> {
        RawId(Box::into_raw(Box::new(object)))
    }

    fn insert_array<T: Copy>(&mut self, _object: T, _n: usize) -> Self::ArrayId<T> {
        unreachable!("array storage is not used by Core")
    }

    fn remove<T: Clone>(&mut self, id: Self::Id<T>) -> Result<(), InvalidIdError> {
        drop(unsafe { Box::from_raw(id.0) });
        Ok(())
    }

    fn remove_array<T: Copy>(&mut self, _id: Self::ArrayId<T>) -> Result<(), InvalidIdError> {
        unreachable!("array storage is not used by Core")
    }

    fn pop<T: Clone>(&mut self, id: Self::Id<T>) -> Result<T, InvalidIdError> {
        Ok(*unsafe { Box::from_raw(id.0) })
    }

    fn get<T: Clone>(&self, id: Self::Id<T>) -> Result<&T, InvalidIdError> {
        Ok(unsafe { &*id.0 })
    }

    fn get_mut<T: Clone>(&mut self, id: Self::Id<T>) -> Result<&mut T, InvalidIdError> {
        Ok(unsafe { &mut *id.0 })
    }

    fn get_array<'a, T: 'a + Copy>(
        &'a self,
        _id: Self::ArrayId<T>,
    ) -> Result<impl ArrayAccessor<'a, T>, InvalidIdError> {
        Ok(UnusedArray)
    }

    fn get_array_mut<'a, T: 'a + Copy>(
        &'a mut self,
        _id: Self::ArrayId<T>,
    ) -> Result<impl ArrayAccessorMut<'a, T>, InvalidIdError> {
        Ok(UnusedArray)
    }
}

/// A flat byte-addressable memory backing a [`SystemBus`], for use only by tests.
///
/// Every `(address, size)` pair fully contained in `0..capacity` is accepted; everything else is
/// rejected, which the MMU surfaces as an access fault.
#[derive(Debug)]
pub(crate) struct TestBus {
    memory: RefCell<Vec<u8>>,
}

impl TestBus {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            memory: RefCell::new(vec![0; capacity]),
        }
    }

    /// Directly pokes `data` into the backing memory, bypassing the bus interface.
    pub(crate) fn poke(&self, address: u64, data: &[u8]) {
        let start = address as usize;
        self.memory.borrow_mut()[start..start + data.len()].copy_from_slice(data);
    }

    fn read_inner(&self, buf: &mut [u8], address: u64) {
        let start = address as usize;
        buf.copy_from_slice(&self.memory.borrow()[start..start + buf.len()]);
    }
}

impl Bus<TestAllocator> for TestBus {
    fn read(&self, buf: &mut [u8], _allocator: &mut TestAllocator, address: u64) {
        self.read_inner(buf, address);
    }

    fn read_pure(
        &self,
        buf: &mut [u8],
        _allocator: &TestAllocator,
        address: u64,
    ) -> PureAccessResult {
        self.read_inner(buf, address);
        Ok(())
    }

    fn write(&self, _allocator: &mut TestAllocator, address: u64, buf: &[u8]) {
        self.poke(address, buf);
    }
}

impl SystemBus<TestAllocator> for TestBus {
    fn accepts(&self, address: u64, size: usize, _access_type: AccessType) -> bool {
        let Some(end) = (address as usize).checked_add(size) else {
            return false;
        };
        end <= self.memory.borrow().len()
    }
}

/// Builds a [`Core`] wired up to a fresh [`TestAllocator`]/[`TestBus`] pair, with `capacity` bytes
/// of backing memory.
pub(crate) fn new_core(capacity: usize) -> (TestAllocator, Core<TestAllocator, TestBus>) {
    let mut allocator = TestAllocator;
    let interrupts = Core::allocate_interrupts(&mut allocator);
    let core = Core::new(
        &mut allocator,
        TestBus::new(capacity),
        Config {
            hart_id: 0,
            mtime_address: u64::MAX - 7,
            mtimecmp_address: u64::MAX - 15,
            support_misaligned_memory_access: false,
            reset_vector: 0,
            nmi_vector: 0,
        },
        interrupts,
    );
    (allocator, core)
}
