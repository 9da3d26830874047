// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Generation checked slot storage for table entries.
//!
//! Every structure that refers to an installed entry (the order index,
//! the matching algorithms, the timer wheel) holds an [`EntryHandle`]
//! rather than a reference. A handle outlives its entry safely: once
//! the slot is freed its generation moves on and the stale handle
//! resolves to nothing.

use core::fmt;
use core::fmt::Display;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EntryHandle {
    index: u32,
    generation: u32,
}

impl EntryHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    val: Option<T>,
}

#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The handle the next call to [`Arena::insert`] will return.
    pub fn next_handle(&self) -> EntryHandle {
        match self.free.last() {
            Some(&index) => EntryHandle {
                index,
                generation: self.slots[index as usize].generation,
            },
            None => EntryHandle { index: self.slots.len() as u32, generation: 0 },
        }
    }

    pub fn insert(&mut self, val: T) -> EntryHandle {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.val = Some(val);
            return EntryHandle { index, generation: slot.generation };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, val: Some(val) });
        EntryHandle { index, generation: 0 }
    }

    pub fn get(&self, handle: EntryHandle) -> Option<&T> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation => {
                slot.val.as_ref()
            }
            _ => None,
        }
    }

    pub fn contains(&self, handle: EntryHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Free the slot behind `handle`. Every outstanding copy of the
    /// handle is invalidated.
    pub fn remove(&mut self, handle: EntryHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }

        let val = slot.val.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(val)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryHandle, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.val.as_ref().map(|v| {
                (
                    EntryHandle { index: i as u32, generation: slot.generation },
                    v,
                )
            })
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stale_handles() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));

        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);

        // The slot is reused under a new generation.
        assert_eq!(arena.next_handle().index(), a.index());
        let c = arena.insert("c");
        assert_eq!(c.index(), a.index());
        assert_ne!(c, a);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(c), Some(&"c"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);

        let mut seen: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        seen.sort();
        assert_eq!(seen, vec!["b", "c"]);
    }
}
