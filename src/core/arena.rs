//! Generation-checked slot arena.
//!
//! Slots are reused through a free list; every reuse bumps the slot generation so a
//! stale key can never resolve to the value that replaced it.

/// Stable handle into an [`Arena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaKey {
    index: u32,
    generation: u32,
}

impl ArenaKey {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot allocator with O(1) insert and O(1) removal by key.
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
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Key the next [`Arena::insert`] will hand out.
    pub fn next_key(&self) -> ArenaKey {
        match self.free.last() {
            Some(&index) => ArenaKey {
                index,
                generation: self.slots[index as usize].generation.wrapping_add(1),
            },
            None => ArenaKey {
                index: self.slots.len() as u32,
                generation: 0,
            },
        }
    }

    pub fn insert(&mut self, value: T) -> ArenaKey {
        self.insert_with(|_| value)
    }

    /// Insert a value that needs to know its own key (e.g. to hand it to child state).
    pub fn insert_with(&mut self, build: impl FnOnce(ArenaKey) -> T) -> ArenaKey {
        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                ArenaKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("arena exceeded u32 slots");
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                ArenaKey {
                    index,
                    generation: 0,
                }
            }
        };
        self.slots[key.index as usize].value = Some(build(key));
        self.len += 1;
        key
    }

    pub fn remove(&mut self, key: ArenaKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, key: ArenaKey) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, key: ArenaKey) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaKey, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    ArenaKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ArenaKey, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value.as_mut().map(|value| {
                (
                    ArenaKey {
                        index: index as u32,
                        generation,
                    },
                    value,
                )
            })
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = ArenaKey> + '_ {
        self.iter().map(|(key, _)| key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_key_does_not_resolve_after_reuse() {
        let mut arena = Arena::new();
        let old = arena.insert(1);
        arena.remove(old);
        let new = arena.insert(2);
        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn insert_with_sees_its_own_key() {
        let mut arena = Arena::new();
        let key = arena.insert_with(|key| key);
        assert_eq!(arena.get(key), Some(&key));
    }

    #[test]
    fn next_key_predicts_insert() {
        let mut arena = Arena::new();
        assert_eq!(arena.next_key(), arena.insert('a'));
        let b = arena.insert('b');
        arena.remove(b);
        let predicted = arena.next_key();
        assert_eq!(predicted.index(), b.index());
        assert_eq!(predicted, arena.insert('c'));
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut arena = Arena::new();
        let keys: Vec<_> = (0..5).map(|i| arena.insert(i)).collect();
        arena.remove(keys[1]);
        arena.remove(keys[3]);
        let values: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 2, 4]);
        for (_, v) in arena.iter_mut() {
            *v *= 10;
        }
        assert_eq!(arena.get(keys[4]), Some(&40));
    }

    #[test]
    fn double_remove_is_noop() {
        let mut arena = Arena::new();
        let key = arena.insert(());
        assert!(arena.remove(key).is_some());
        assert!(arena.remove(key).is_none());
        assert!(arena.is_empty());
    }
}
