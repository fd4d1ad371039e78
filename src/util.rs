use std::fmt::{Debug, Error, Formatter};
use std::iter::{DoubleEndedIterator, Enumerate, Extend, FromIterator};
use std::ops::Sub;
use std::result::Result;
use std::slice::Iter;
use std::vec::IntoIter as VecIntoIter;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector of elements of different logical "widths", where offsets into the vector are given in
/// terms of the sum of the widths of the previous elements (as opposed to the number of preceding
/// elements).
///
/// Classfiles are full of structures that are indexed this way:
///
///   - the constant pool (most entries have width 1, `long`/`double` have width 2)
///   - method code and jump targets (instructions have different encoded sizes)
///   - local variables and frame slots (width 1 or 2 depending on type)
///
#[derive(Clone)]
pub struct OffsetVec<T: Sized> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added
    offset_len: Offset,

    /// Offset for the first element (usually 0, but 1 for the constant pool)
    initial_offset: Offset,
}

/// Offset into an `OffsetVec`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl Sub for Offset {
    type Output = isize;

    fn sub(self, other: Offset) -> isize {
        (self.0 as isize) - (other.0 as isize)
    }
}

impl<T: Sized + Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: Offset(0),
            initial_offset: Offset(0),
        }
    }

    /// New empty offset vector, with a custom starting offset
    pub fn new_starting_at(initial_offset: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: initial_offset,
            initial_offset,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset of the next element to be added
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Add an entry to the back, returning the offset it was placed at
    pub fn push(&mut self, slot: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += slot.width();
        self.entries.push((offset, slot));

        offset
    }

    /// Remove an entry from the back
    pub fn pop(&mut self) -> Option<(Offset, usize, T)> {
        self.entries.pop().map(|(off, elem)| {
            self.offset_len = off;
            (off, self.entries.len(), elem)
        })
    }

    /// Empty the vector
    pub fn clear(&mut self) {
        self.entries.clear();
        self.offset_len = self.initial_offset;
    }

    /// Get an entry (and its index) by its offset in the vector
    ///
    /// Note: this uses binary search to find the offset
    pub fn get_offset(&self, offset: Offset) -> OffsetResult<T> {
        match self.entries.binary_search_by_key(&offset, |(off, _)| *off) {
            Err(insert_at) if insert_at == self.entries.len() => OffsetResult::TooLarge,
            Err(insert_at) => OffsetResult::InvalidOffset(insert_at),
            Ok(found_idx) => OffsetResult::Ok(found_idx, &self.entries[found_idx].1),
        }
    }

    /// Get an entry (and its offset) by its position in the vector
    pub fn get_index(&self, index: usize) -> Option<(Offset, &T)> {
        self.entries.get(index).map(|(offset, t)| (*offset, t))
    }

    /// Get the last entry (and its offset)
    pub fn last(&self) -> Option<(Offset, &T)> {
        self.entries.last().map(|(offset, t)| (*offset, t))
    }

    pub fn iter(&self) -> OffsetVecIter<'_, T> {
        self.into_iter()
    }
}

impl<A: PartialEq> PartialEq for OffsetVec<A> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<A: Eq> Eq for OffsetVec<A> {}

impl<A: Width> Default for OffsetVec<A> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

pub enum OffsetResult<'a, T> {
    /// Element was accessed
    Ok(usize, &'a T),

    /// Offset was invalid, and falls in the middle of the element at this index
    InvalidOffset(usize),

    /// Offset is too big
    TooLarge,
}

impl<'a, T> OffsetResult<'a, T> {
    /// Convert to an `Option` and keep only the value found
    pub fn ok(&self) -> Option<&'a T> {
        match self {
            OffsetResult::Ok(_, found) => Some(found),
            OffsetResult::InvalidOffset(_) | OffsetResult::TooLarge => None,
        }
    }
}

/// Iterator for owned `OffsetVec`
pub struct OffsetVecIntoIter<T>(Enumerate<VecIntoIter<(Offset, T)>>);

impl<T> Iterator for OffsetVecIntoIter<T> {
    type Item = (Offset, usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (off, idx, elem))
    }
}

impl<T> DoubleEndedIterator for OffsetVecIntoIter<T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0
            .next_back()
            .map(|(idx, (off, elem))| (off, idx, elem))
    }
}

impl<T> IntoIterator for OffsetVec<T> {
    type Item = (Offset, usize, T);
    type IntoIter = OffsetVecIntoIter<T>;

    fn into_iter(self) -> OffsetVecIntoIter<T> {
        OffsetVecIntoIter(self.entries.into_iter().enumerate())
    }
}

/// Iterator for borrowed `OffsetVec`
pub struct OffsetVecIter<'a, T>(Enumerate<Iter<'a, (Offset, T)>>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> DoubleEndedIterator for OffsetVecIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0
            .next_back()
            .map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, usize, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        OffsetVecIter(self.entries.iter().enumerate())
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<A: IntoIterator<Item = T>>(elems: A) -> Self {
        let mut offset_vec = OffsetVec::new();
        for elem in elems {
            offset_vec.push(elem);
        }
        offset_vec
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<U: IntoIterator<Item = T>>(&mut self, iter: U) {
        for elem in iter {
            self.push(elem);
        }
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut list = f.debug_list();
        for (off, elem) in &self.entries {
            list.entry(&format_args!("#{} = {:?}", off.0, elem));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Slot {
        OneWide(u8),
        TwoWide(u8),
    }

    impl Width for Slot {
        fn width(&self) -> usize {
            match self {
                Slot::OneWide(_) => 1,
                Slot::TwoWide(_) => 2,
            }
        }
    }

    #[test]
    fn offsets_account_for_widths() {
        let slots: OffsetVec<Slot> = vec![
            Slot::OneWide(1),
            Slot::TwoWide(2),
            Slot::TwoWide(3),
            Slot::OneWide(4),
        ]
        .into_iter()
        .collect();
        assert_eq!(slots.offset_len(), Offset(6));
        assert_eq!(
            slots.into_iter().collect::<Vec<_>>(),
            vec![
                (Offset(0), 0, Slot::OneWide(1)),
                (Offset(1), 1, Slot::TwoWide(2)),
                (Offset(3), 2, Slot::TwoWide(3)),
                (Offset(5), 3, Slot::OneWide(4)),
            ]
        );
    }

    #[test]
    fn custom_initial_offset() {
        let mut slots: OffsetVec<Slot> = OffsetVec::new_starting_at(Offset(1));
        assert_eq!(slots.push(Slot::TwoWide(9)), Offset(1));
        assert_eq!(slots.push(Slot::OneWide(8)), Offset(3));
        assert_eq!(slots.offset_len(), Offset(4));
        assert!(matches!(slots.get_offset(Offset(2)), OffsetResult::InvalidOffset(_)));
        assert!(slots.get_offset(Offset(3)).ok().is_some());
    }
}
