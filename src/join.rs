//! Way joining: merge ways that share an endpoint node so long labelled
//! roads render as one polyline. Candidates come from a multimap seeded with
//! each gathered way's head and tail nd; joins retarget the absorbed way's
//! edges so chains merge transitively.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::geom;
use crate::model::Way;

/// cos(30 degrees); sharper turns at the shared node block the join.
const COS_MAX_TURN: f64 = 0.8660254037844387;

#[derive(Default)]
pub struct JoinSet {
    ways: HashMap<i64, Way>,
    order: Vec<i64>,
    endpoints: HashMap<i64, Vec<i64>>,
    ep_order: Vec<i64>,
}

impl JoinSet {
    pub fn new() -> JoinSet {
        JoinSet::default()
    }

    pub fn insert(&mut self, way: Way) {
        if let (Some(head), Some(tail)) = (way.head(), way.tail()) {
            self.edge(head, way.id);
            self.edge(tail, way.id);
        }
        self.order.push(way.id);
        self.ways.insert(way.id, way);
    }

    fn edge(&mut self, nid: i64, wid: i64) {
        if !self.endpoints.contains_key(&nid) {
            self.ep_order.push(nid);
        }
        self.endpoints.entry(nid).or_default().push(wid);
    }

    pub fn len(&self) -> usize {
        self.ways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ways.is_empty()
    }

    /// Run joins to a fixed point. Endpoints are visited in insertion order;
    /// `coord` resolves nd positions for the angle guard.
    pub fn join<F>(&mut self, coord: &mut F) -> Result<()>
    where
        F: FnMut(i64) -> Result<Option<[f64; 3]>>,
    {
        loop {
            let mut progressed = false;
            for i in 0..self.ep_order.len() {
                let n = self.ep_order[i];
                'endpoint: loop {
                    let Some(ids) = self.endpoints.get(&n) else { break };
                    let ids = ids.clone();
                    for a in 0..ids.len() {
                        for b in (a + 1)..ids.len() {
                            if ids[a] == ids[b] {
                                continue;
                            }
                            if self.try_join(ids[a], ids[b], n, coord)? {
                                progressed = true;
                                continue 'endpoint;
                            }
                        }
                    }
                    break;
                }
            }
            if !progressed {
                break;
            }
        }
        Ok(())
    }

    /// Surviving ways in gather order.
    pub fn into_ways(mut self) -> Vec<Way> {
        let mut out = Vec::with_capacity(self.ways.len());
        for id in self.order.iter() {
            if let Some(way) = self.ways.remove(id) {
                out.push(way);
            }
        }
        out
    }

    fn try_join<F>(&mut self, a_id: i64, b_id: i64, n: i64, coord: &mut F) -> Result<bool>
    where
        F: FnMut(i64) -> Result<Option<[f64; 3]>>,
    {
        let Some(b) = self.ways.remove(&b_id) else { return Ok(false) };
        match self.splice(a_id, b, n, coord)? {
            Some(b) => {
                self.ways.insert(b_id, b);
                Ok(false)
            }
            None => {
                // Retarget every edge pointing at the absorbed way so later
                // joins chain through the survivor.
                for ids in self.endpoints.values_mut() {
                    for wid in ids.iter_mut() {
                        if *wid == b_id {
                            *wid = a_id;
                        }
                    }
                    let mut seen = HashSet::new();
                    ids.retain(|wid| seen.insert(*wid));
                }
                Ok(true)
            }
        }
    }

    /// Splice `b` into the way `a_id` at shared node `n` when all join guards
    /// hold. Returns `b` unchanged when the join is rejected.
    fn splice<F>(&mut self, a_id: i64, b: Way, n: i64, coord: &mut F) -> Result<Option<Way>>
    where
        F: FnMut(i64) -> Result<Option<[f64; 3]>>,
    {
        let Some(a) = self.ways.get(&a_id) else { return Ok(Some(b)) };
        if a.nds.len() < 2 || b.nds.len() < 2 || a.is_loop() || b.is_loop() {
            return Ok(Some(b));
        }
        let (Some(a_head), Some(a_tail)) = (a.head(), a.tail()) else { return Ok(Some(b)) };
        let (Some(b_head), Some(b_tail)) = (b.head(), b.tail()) else { return Ok(Some(b)) };
        let n_at_a_head = a_head == n;
        if n_at_a_head == (a_tail == n) {
            return Ok(Some(b));
        }
        let n_at_b_head = b_head == n;
        if n_at_b_head == (b_tail == n) {
            return Ok(Some(b));
        }
        if a.class != b.class
            || a.layer != b.layer
            || a.flags != b.flags
            || a.name != b.name
        {
            return Ok(Some(b));
        }

        // Angle at the shared node, walking from a's side into b's side.
        let a_nb = if n_at_a_head { a.nds[1] } else { a.nds[a.nds.len() - 2] };
        let b_nb = if n_at_b_head { b.nds[1] } else { b.nds[b.nds.len() - 2] };
        let (Some(pn), Some(pa), Some(pb)) = (coord(n)?, coord(a_nb)?, coord(b_nb)?) else {
            return Ok(Some(b));
        };
        let v1 = geom::normalize(geom::sub(pn, pa));
        let v2 = geom::normalize(geom::sub(pb, pn));
        if geom::dot(v1, v2) < COS_MAX_TURN {
            return Ok(Some(b));
        }

        let Some(a) = self.ways.get_mut(&a_id) else { return Ok(Some(b)) };
        match (n_at_a_head, n_at_b_head) {
            // a ends at n, b starts at n: append b past the duplicate.
            (false, true) => a.nds.extend_from_slice(&b.nds[1..]),
            // a ends at n, b ends at n: append b reversed.
            (false, false) => a.nds.extend(b.nds[..b.nds.len() - 1].iter().rev()),
            // a starts at n, b ends at n: prepend b.
            (true, false) => {
                a.nds.splice(0..0, b.nds[..b.nds.len() - 1].iter().copied());
            }
            // a starts at n, b starts at n: prepend b reversed.
            (true, true) => {
                a.nds.splice(0..0, b.nds[1..].iter().rev().copied());
            }
        }
        a.bbox = a.bbox.union(&b.bbox);
        Ok(None)
    }
}
