//! Remote read suites: cross-shard equivalence, dynamic growth, the
//! coherence retry loop, and concurrent reader/writer safety.

mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use support::{bulk_load, cluster, sorted};
use triplemesh_core::{
    partition, AttrTriple, AttrValue, Dir, EdgeKey, Triple, INVALID_EDGES, TYPE_ID, VID_MIN,
};
use triplemesh_fabric::{RegionServer, RemoteMemory, ShardMem, TcpFabric};
use triplemesh_store::GraphStore;

const T: u32 = 2;
const P: u32 = 3;

/// A vid owned by `shard` in a cluster of `n`.
fn vid_on(shard: usize, n: usize, salt: u32) -> u32 {
    let base = VID_MIN + salt * n as u32;
    base + ((shard + n - partition(base, n)) % n) as u32
}

#[test]
fn test_remote_equals_local() {
    // P9: every key reads the same from a peer as it does locally.
    let stores = cluster(2, |_| {});
    let s0 = vid_on(0, 2, 1);
    let s1 = vid_on(1, 2, 2);
    let o1 = vid_on(1, 2, 3);
    let triples = vec![
        Triple::new(s0, TYPE_ID, T),
        Triple::new(s0, P, o1),
        Triple::new(s1, P, o1),
        Triple::new(s1, P + 1, s0),
    ];
    bulk_load(&stores, &triples);

    for shard in 0..2 {
        let local = &stores[shard];
        let peer = &stores[1 - shard];
        let mut checked = 0;
        local.scan_slots(|_, slot| {
            let key = slot.key;
            if key.vid() == 0 {
                return; // index keys are per-shard local
            }
            let here = local.edges_local(key.vid(), key.pid(), key.dir()).unwrap();
            let there = peer
                .edges(0, key.vid(), key.pid(), key.dir())
                .unwrap()
                .expect("remote read found nothing");
            assert_eq!(sorted(here), sorted(there), "divergence at {key:?}");
            checked += 1;
        });
        assert!(checked > 0);
    }
}

#[test]
fn test_remote_not_found_is_none() {
    let stores = cluster(2, |_| {});
    bulk_load(&stores, &[Triple::new(vid_on(1, 2, 1), P, vid_on(1, 2, 2))]);
    // Probe a key owned by shard 1 that does not exist, from shard 0.
    let missing = vid_on(1, 2, 9);
    assert_eq!(stores[0].edges(0, missing, P, Dir::Out).unwrap(), None);
}

#[test]
fn test_dynamic_growth_across_buddy_boundary() {
    let stores = cluster(1, |cfg| {
        cfg.dynamic_gstore = true;
    });
    let store = &stores[0];
    let s = VID_MIN;

    // Bulk-loaded list of three: one class-4 block (3 edges + tag).
    let triples: Vec<Triple> = (0..3).map(|i| Triple::new(s, P, VID_MIN + 10 + i)).collect();
    bulk_load(&stores, &triples);
    let old = store.lookup_local(EdgeKey::new(s, P, Dir::Out)).unwrap();
    assert_eq!(old.ptr.size(), 3);
    assert_eq!(store.free_queue_len(), 0);

    // The fourth edge no longer fits class 4: a class-8 block is
    // allocated, the old tag is invalidated, and the old block parks on
    // the deferred-free queue.
    store
        .insert_triple_out(0, Triple::new(s, P, VID_MIN + 20), true)
        .unwrap();
    let new = store.lookup_local(EdgeKey::new(s, P, Dir::Out)).unwrap();
    assert_eq!(new.ptr.size(), 4);
    assert_ne!(new.ptr.off(), old.ptr.off());
    assert_eq!(store.free_queue_len(), 1);
    assert_eq!(store.mem().edge(old.ptr.off() + 3), INVALID_EDGES);
    assert_eq!(
        sorted(store.edges_local(s, P, Dir::Out).unwrap()),
        vec![VID_MIN + 10, VID_MIN + 11, VID_MIN + 12, VID_MIN + 20]
    );
}

#[test]
fn test_coherence_retry_after_growth() {
    // A cached slot that points at a retired block must mismatch the size
    // tag, forcing exactly one invalidate-and-retry.
    let stores = cluster(2, |cfg| {
        cfg.dynamic_gstore = true;
        cfg.enable_caching = true;
    });
    let writer = &stores[1];
    let reader = &stores[0];
    let s = vid_on(1, 2, 1);

    for i in 0..3 {
        writer
            .insert_triple_out(0, Triple::new(s, P, VID_MIN + 10 + i), true)
            .unwrap();
    }
    // Reader resolves and caches the slot.
    let before = reader.edges(0, s, P, Dir::Out).unwrap().unwrap();
    assert_eq!(before.len(), 3);
    assert_eq!(reader.metrics().snapshot().coherence_retries, 0);

    // Writer grows the list across the buddy boundary; the old block's
    // tag flips to the invalid sentinel.
    writer
        .insert_triple_out(0, Triple::new(s, P, VID_MIN + 20), true)
        .unwrap();

    let after = reader.edges(0, s, P, Dir::Out).unwrap().unwrap();
    assert_eq!(after.len(), 4);
    assert_eq!(reader.metrics().snapshot().coherence_retries, 1);
}

#[test]
fn test_concurrent_growth_never_tears() {
    // P8: a reader on another shard always sees some prefix-consistent
    // list, never a torn one.
    let stores = cluster(2, |cfg| {
        cfg.dynamic_gstore = true;
    });
    let writer = Arc::clone(&stores[1]);
    let reader = Arc::clone(&stores[0]);
    let s = vid_on(1, 2, 1);
    let total: u32 = 200;

    let done = Arc::new(AtomicBool::new(false));
    let write_thread = std::thread::spawn({
        let done = Arc::clone(&done);
        move || {
            for i in 0..total {
                writer
                    .insert_triple_out(0, Triple::new(s, P, VID_MIN + 100 + i), true)
                    .unwrap();
            }
            done.store(true, Ordering::Release);
        }
    });

    let expected: Vec<u32> = (0..total).map(|i| VID_MIN + 100 + i).collect();
    while !done.load(Ordering::Acquire) {
        if let Some(list) = reader.edges(1, s, P, Dir::Out).unwrap() {
            assert!(list.len() <= total as usize);
            assert_eq!(
                &list[..],
                &expected[..list.len()],
                "torn or reordered list"
            );
        }
    }
    write_thread.join().unwrap();
    assert_eq!(
        reader.edges(1, s, P, Dir::Out).unwrap().unwrap(),
        expected
    );
}

#[test]
fn test_remote_attr_reads() {
    let stores = cluster(2, |cfg| {
        cfg.dynamic_gstore = true;
    });
    let s = vid_on(1, 2, 1);
    stores[1]
        .load_attrs(
            &[
                AttrTriple::new(s, 10, AttrValue::Int(41)),
                AttrTriple::new(s, 12, AttrValue::Double(6.25)),
            ],
            0,
        )
        .unwrap();

    assert_eq!(
        stores[0].attr(0, s, 10, Dir::Out).unwrap(),
        Some(AttrValue::Int(41))
    );
    assert_eq!(
        stores[0].attr(0, s, 12, Dir::Out).unwrap(),
        Some(AttrValue::Double(6.25))
    );
    assert_eq!(stores[0].attr(0, s, 13, Dir::Out).unwrap(), None);
}

#[test]
fn test_remote_reads_over_tcp_fabric() {
    // The store is fabric-agnostic: the TCP fallback serves the same
    // remote read protocol.
    let mut cfg = triplemesh_core::StoreConfig {
        num_servers: 2,
        num_engines: 2,
        kvstore_size: 2 * 1024 * 1024,
        ring_size: 4096,
        scratch_size: 8192,
        ..Default::default()
    };
    cfg.use_rdma = false;
    cfg.validate().unwrap();
    let cfg = Arc::new(cfg);

    let mems: Vec<_> = (0..2).map(|_| Arc::new(ShardMem::new(&cfg))).collect();
    let servers: Vec<_> = mems
        .iter()
        .map(|m| RegionServer::spawn("127.0.0.1:0", Arc::clone(m)).unwrap())
        .collect();
    let addrs: Vec<_> = servers.iter().map(|s| s.addr()).collect();
    let stores: Vec<_> = (0..2)
        .map(|sid| {
            let fabric: Arc<dyn RemoteMemory> =
                Arc::new(TcpFabric::new(addrs.clone(), cfg.num_engines));
            Arc::new(GraphStore::new(
                sid,
                Arc::clone(&cfg),
                Arc::clone(&mems[sid]),
                fabric,
            ))
        })
        .collect();

    let s1 = vid_on(1, 2, 1);
    let o1 = vid_on(1, 2, 2);
    bulk_load(&stores, &[Triple::new(s1, P, o1), Triple::new(s1, TYPE_ID, T)]);

    assert_eq!(
        stores[0].edges(0, s1, P, Dir::Out).unwrap(),
        Some(vec![o1])
    );
    assert_eq!(
        stores[0].edges(1, s1, TYPE_ID, Dir::Out).unwrap(),
        Some(vec![T])
    );
}
