//! Process-wide object cache: a byte-bounded LRU over materialized nodes,
//! ways, and relations. One mutex guards the recency list, the id map, and
//! every refcount. Entries with a positive refcount are pinned and survive
//! `trim`; pins are scope-bound guards that release on drop, so every
//! acquisition is paired with a release on every exit path.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use crate::model::{Node, ObjectId, Relation, Way};
use crate::store::Store;

/// Default residency budget.
pub const CACHE_BYTES: usize = 4 << 30;

#[derive(Clone)]
enum Object {
    Node(Arc<Node>),
    Way(Arc<Way>),
    Rel(Arc<Relation>),
}

impl Object {
    fn residency(&self) -> usize {
        match self {
            Object::Node(n) => n.residency(),
            Object::Way(w) => w.residency(),
            Object::Rel(r) => r.residency(),
        }
    }
}

struct Slot {
    id: ObjectId,
    obj: Object,
    bytes: usize,
    refs: u32,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct Inner {
    map: HashMap<ObjectId, usize>,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    /// LRU end of the recency list.
    head: Option<usize>,
    /// MRU end of the recency list.
    tail: Option<usize>,
    bytes: usize,
}

impl Inner {
    fn slot(&self, idx: usize) -> &Slot {
        self.slots[idx].as_ref().expect("live cache slot")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot {
        self.slots[idx].as_mut().expect("live cache slot")
    }

    fn alloc(&mut self, slot: Slot) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let s = self.slot(idx);
            (s.prev, s.next)
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let s = self.slot_mut(idx);
        s.prev = None;
        s.next = None;
    }

    fn push_tail(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let s = self.slot_mut(idx);
            s.prev = old_tail;
            s.next = None;
        }
        match old_tail {
            Some(t) => self.slot_mut(t).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn move_to_tail(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_tail(idx);
    }

    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        if let Some(slot) = self.slots[idx].take() {
            self.map.remove(&slot.id);
            self.bytes -= slot.bytes;
        }
        self.free.push(idx);
    }

    #[cfg(test)]
    fn list_len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head;
        while let Some(idx) = cur {
            n += 1;
            cur = self.slot(idx).next;
        }
        n
    }
}

pub struct ObjectCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

/// Scope-bound cache handle; dropping it decrements the entry's refcount.
pub struct CachePin<'a, T> {
    cache: &'a ObjectCache,
    id: ObjectId,
    obj: Arc<T>,
}

impl<T> Deref for CachePin<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.obj
    }
}

impl<T> CachePin<'_, T> {
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl<T> Drop for CachePin<'_, T> {
    fn drop(&mut self) {
        self.cache.release(self.id);
    }
}

impl ObjectCache {
    pub fn new(capacity: usize) -> ObjectCache {
        ObjectCache { inner: Mutex::new(Inner::default()), capacity }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("cache mutex")
    }

    /// Hit path: bump recency and refcount under the lock.
    fn hit(&self, id: ObjectId) -> Option<Object> {
        let mut g = self.lock();
        let idx = *g.map.get(&id)?;
        g.move_to_tail(idx);
        g.slot_mut(idx).refs += 1;
        Some(g.slot(idx).obj.clone())
    }

    /// Insert a freshly loaded object pinned once. If another thread won the
    /// load race, its entry is adopted instead.
    fn insert_pinned(&self, id: ObjectId, obj: Object) -> Object {
        let mut g = self.lock();
        if let Some(&idx) = g.map.get(&id) {
            g.move_to_tail(idx);
            g.slot_mut(idx).refs += 1;
            return g.slot(idx).obj.clone();
        }
        let bytes = obj.residency();
        let idx = g.alloc(Slot { id, obj: obj.clone(), bytes, refs: 1, prev: None, next: None });
        g.push_tail(idx);
        g.map.insert(id, idx);
        g.bytes += bytes;
        obj
    }

    fn release(&self, id: ObjectId) {
        let mut g = self.lock();
        if let Some(&idx) = g.map.get(&id) {
            let s = g.slot_mut(idx);
            if s.refs > 0 {
                s.refs -= 1;
            }
        }
    }

    pub fn get_node<'a>(&'a self, store: &Store, nid: i64) -> Result<Option<CachePin<'a, Node>>> {
        let id = ObjectId::Node(nid);
        let obj = match self.hit(id) {
            Some(obj) => obj,
            None => {
                // The row decode runs outside the lock.
                let Some(node) = store.load_node(nid)? else { return Ok(None) };
                self.insert_pinned(id, Object::Node(Arc::new(node)))
            }
        };
        match obj {
            Object::Node(n) => Ok(Some(CachePin { cache: self, id, obj: n })),
            _ => unreachable!("node id resolved to non-node entry"),
        }
    }

    pub fn get_rel<'a>(&'a self, store: &Store, rid: i64) -> Result<Option<CachePin<'a, Relation>>> {
        let id = ObjectId::Rel(rid);
        let obj = match self.hit(id) {
            Some(obj) => obj,
            None => {
                let Some(rel) = store.load_rel(rid)? else { return Ok(None) };
                self.insert_pinned(id, Object::Rel(Arc::new(rel)))
            }
        };
        match obj {
            Object::Rel(r) => Ok(Some(CachePin { cache: self, id, obj: r })),
            _ => unreachable!("rel id resolved to non-rel entry"),
        }
    }

    /// Ways are handed out as independent mutable copies; the canonical
    /// immutable way (always carrying its nds) stays in the cache. A
    /// `with_nds = false` miss loads a skeleton and bypasses the cache.
    pub fn way_copy(&self, store: &Store, wid: i64, with_nds: bool) -> Result<Option<Way>> {
        let id = ObjectId::Way(wid);
        if let Some(obj) = self.hit(id) {
            let Object::Way(w) = obj else {
                unreachable!("way id resolved to non-way entry")
            };
            let mut copy = (*w).clone();
            self.release(id);
            if !with_nds {
                copy.nds.clear();
            }
            return Ok(Some(copy));
        }
        if !with_nds {
            return store.load_way(wid, false);
        }
        let Some(way) = store.load_way(wid, true)? else { return Ok(None) };
        let obj = self.insert_pinned(id, Object::Way(Arc::new(way)));
        let Object::Way(w) = obj else {
            unreachable!("way id resolved to non-way entry")
        };
        let copy = (*w).clone();
        self.release(id);
        Ok(Some(copy))
    }

    /// Advisory eviction, run by the tile driver after each tile: walk from
    /// the LRU head dropping unpinned entries until residency fits.
    pub fn trim(&self) {
        let mut g = self.lock();
        let mut cur = g.head;
        while g.bytes > self.capacity {
            let Some(idx) = cur else { break };
            let next = g.slot(idx).next;
            if g.slot(idx).refs == 0 {
                g.remove(idx);
            }
            cur = next;
        }
    }

    pub fn residency(&self) -> usize {
        self.lock().bytes
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::{params, Connection};

    fn seeded_store(nodes: i64) -> Store {
        let mut conn = Connection::open_in_memory().unwrap();
        db::create_tables(&mut conn).unwrap();
        for nid in 1..=nodes {
            conn.execute(
                "INSERT INTO nodes_coords(nid, lat, lon) VALUES (?1, ?2, ?3)",
                params![nid, nid as f64 * 0.001, nid as f64 * -0.001],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO ways(wid, name, class, selected) VALUES (7, 'Spur', 3, 1)",
            [],
        )
        .unwrap();
        for (idx, nid) in [1i64, 2, 3].iter().enumerate() {
            conn.execute(
                "INSERT INTO ways_nds(wid, idx, nid) VALUES (7, ?1, ?2)",
                params![idx as i64, nid],
            )
            .unwrap();
        }
        Store::from_connection(conn)
    }

    #[test]
    fn miss_then_hit_shares_entry() {
        let store = seeded_store(4);
        let cache = ObjectCache::new(CACHE_BYTES);
        let a = cache.get_node(&store, 1).unwrap().unwrap();
        let b = cache.get_node(&store, 1).unwrap().unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(a.lat, b.lat);
        assert!(cache.get_node(&store, 999).unwrap().is_none());
    }

    #[test]
    fn trim_respects_pins_and_capacity() {
        let store = seeded_store(8);
        // Capacity below two nodes: at most one unpinned entry survives.
        let one = {
            let cache = ObjectCache::new(usize::MAX);
            let pin = cache.get_node(&store, 1).unwrap().unwrap();
            let bytes = cache.residency();
            drop(pin);
            bytes
        };
        let cache = ObjectCache::new(one);

        let pinned = cache.get_node(&store, 1).unwrap().unwrap();
        for nid in 2..=8 {
            let pin = cache.get_node(&store, nid).unwrap().unwrap();
            drop(pin);
        }
        cache.trim();
        // The pinned entry survives even though it is the LRU head; trim
        // stops once only pinned overflow remains.
        assert!(cache.get_node(&store, 1).unwrap().is_some());
        assert!(cache.residency() <= one + pinned.residency());
        drop(pinned);
        cache.trim();
        assert!(cache.residency() <= one);
    }

    #[test]
    fn lru_evicts_oldest_unpinned_first() {
        let store = seeded_store(3);
        let cache = ObjectCache::new(0);
        for nid in 1..=3 {
            drop(cache.get_node(&store, nid).unwrap().unwrap());
        }
        // Touch node 1 so node 2 is the LRU head.
        drop(cache.get_node(&store, 1).unwrap().unwrap());
        {
            let g = cache.lock();
            assert_eq!(g.map.len(), g.list_len());
        }
        cache.trim();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn way_copies_are_independent() {
        let store = seeded_store(4);
        let cache = ObjectCache::new(CACHE_BYTES);
        let mut copy = cache.way_copy(&store, 7, true).unwrap().unwrap();
        copy.nds.push(99);
        let again = cache.way_copy(&store, 7, true).unwrap().unwrap();
        assert_eq!(again.nds, vec![1, 2, 3]);
        // Skeleton load keeps the cached canonical intact.
        let skeleton = cache.way_copy(&store, 7, false).unwrap().unwrap();
        assert!(skeleton.nds.is_empty());
        assert_eq!(cache.way_copy(&store, 7, true).unwrap().unwrap().nds.len(), 3);
        // No pins remain once copies are handed out.
        cache.trim();
    }
}
