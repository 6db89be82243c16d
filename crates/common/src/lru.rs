use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Fixed-capacity least-recently-used cache.
///
/// Entries live in a slab linked from most to least recently used; the map
/// points into the slab, so `get` and `put` are constant time. Once full, the
/// least recently used slot is reused for the incoming entry. Eviction is
/// silent.
///
/// Not synchronized; wrap it in a lock to share it.
pub struct BoundedLruCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
}

struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K, V> BoundedLruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts or replaces `key`, making it the most recently used entry.
    pub fn put(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        if let Some(&idx) = self.map.get(&key) {
            self.slots[idx].value = value;
            self.move_to_front(idx);
            return;
        }

        if self.slots.len() < self.capacity {
            let idx = self.slots.len();
            self.slots.push(Slot {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            });
            self.link_front(idx);
            self.map.insert(key, idx);
            return;
        }

        let Some(idx) = self.tail else {
            return;
        };
        self.unlink(idx);
        let slot = &mut self.slots[idx];
        let evicted = std::mem::replace(&mut slot.key, key.clone());
        slot.value = value;
        self.map.remove(&evicted);
        self.link_front(idx);
        self.map.insert(key, idx);
    }

    /// Looks up `key`, promoting it to most recently used on a hit. A miss
    /// changes nothing.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        Some(&self.slots[idx].value)
    }

    /// Checks for `key` without touching recency.
    #[cfg(test)]
    fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Removes `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.map.remove(key)?;
        self.unlink(idx);

        // The last slot moves into the hole left behind.
        let last = self.slots.len() - 1;
        if idx != last {
            let (prev, next) = (self.slots[last].prev, self.slots[last].next);
            match prev {
                Some(p) => self.slots[p].next = Some(idx),
                None => self.head = Some(idx),
            }
            match next {
                Some(n) => self.slots[n].prev = Some(idx),
                None => self.tail = Some(idx),
            }
            if let Some(entry) = self.map.get_mut::<K>(&self.slots[last].key) {
                *entry = idx;
            }
        }
        Some(self.slots.swap_remove(idx).value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.head = None;
        self.tail = None;
    }

    /// Entries from most to least recently used.
    #[cfg(test)]
    fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let slot = &self.slots[idx];
            cursor = slot.next;
            Some((&slot.key, &slot.value))
        })
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = &self.slots[idx];
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        let slot = &mut self.slots[idx];
        slot.prev = None;
        slot.next = None;
    }

    fn link_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = &mut self.slots[idx];
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            self.slots[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BoundedLruCache;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = BoundedLruCache::new(2);
        cache.put("A", 1);
        cache.put("B", 2);
        cache.put("C", 3);

        assert_eq!(cache.get("A"), None);
        assert_eq!(cache.get("B"), Some(&2));
        assert_eq!(cache.get("C"), Some(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_changes_eviction_order() {
        let mut cache = BoundedLruCache::new(3);
        cache.put(1, "one");
        cache.put(2, "two");
        cache.put(3, "three");

        assert_eq!(cache.get(&1), Some(&"one"));
        cache.put(4, "four");

        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
        assert!(cache.contains_key(&3));
        let order: Vec<i32> = cache.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![4, 1, 3]);
    }

    #[test]
    fn put_existing_replaces_and_promotes() {
        let mut cache = BoundedLruCache::new(2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("a".to_string(), 10);
        cache.put("c".to_string(), 3);

        assert_eq!(cache.get("a"), Some(&10));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn miss_has_no_side_effects() {
        let mut cache = BoundedLruCache::new(2);
        cache.put(1, 1);
        cache.put(2, 2);
        assert_eq!(cache.get(&9), None);
        let order: Vec<i32> = cache.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn clear_empties_and_cache_stays_usable() {
        let mut cache = BoundedLruCache::new(1);
        cache.put(1, 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
        cache.put(2, 2);
        cache.put(3, 3);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&3), Some(&3));
    }

    #[test]
    fn remove_keeps_order_of_the_rest() {
        let mut cache = BoundedLruCache::new(3);
        cache.put(1, "one");
        cache.put(2, "two");
        cache.put(3, "three");

        assert_eq!(cache.remove(&1), Some("one"));
        assert_eq!(cache.remove(&1), None);
        let order: Vec<i32> = cache.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![3, 2]);

        cache.put(4, "four");
        cache.put(5, "five");
        assert!(!cache.contains_key(&2));
        assert_eq!(cache.get(&3), Some(&"three"));
        let order: Vec<i32> = cache.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![3, 5, 4]);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut cache = BoundedLruCache::new(0);
        cache.put(1, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn capacity_plus_one_evicts_exactly_one() {
        let capacity = 5;
        let mut cache = BoundedLruCache::new(capacity);
        for key in 0..=capacity {
            cache.put(key, key * 10);
        }
        assert_eq!(cache.len(), capacity);
        assert!(!cache.contains_key(&0));
        for key in 1..=capacity {
            assert!(cache.contains_key(&key));
        }
    }
}
