//! Shared fixtures: in-process shard clusters and a tiny bulk loader.

use std::sync::Arc;
use triplemesh_core::{partition, Sid, StoreConfig, Triple};
use triplemesh_fabric::{LoopbackFabric, RemoteMemory, ShardMem};
use triplemesh_store::GraphStore;

/// Build an in-process cluster over the loopback fabric.
pub fn cluster(num_servers: usize, tweak: impl FnOnce(&mut StoreConfig)) -> Vec<Arc<GraphStore>> {
    let mut cfg = StoreConfig {
        num_servers,
        num_engines: 2,
        kvstore_size: 2 * 1024 * 1024,
        ring_size: 4096,
        scratch_size: 8192,
        ..Default::default()
    };
    tweak(&mut cfg);
    cfg.validate().expect("test config");
    let cfg = Arc::new(cfg);
    let mems: Vec<_> = (0..num_servers)
        .map(|_| Arc::new(ShardMem::new(&cfg)))
        .collect();
    let fabric: Arc<dyn RemoteMemory> = Arc::new(LoopbackFabric::new(mems.clone()));
    (0..num_servers)
        .map(|sid| {
            Arc::new(GraphStore::new(
                sid,
                Arc::clone(&cfg),
                Arc::clone(&mems[sid]),
                Arc::clone(&fabric),
            ))
        })
        .collect()
}

/// Sort and partition a triple set the way the bulk loader does, then load
/// and index every shard.
pub fn bulk_load(stores: &[Arc<GraphStore>], triples: &[Triple]) {
    let n = stores.len();
    let mut spo: Vec<Vec<Triple>> = vec![Vec::new(); n];
    let mut ops: Vec<Vec<Triple>> = vec![Vec::new(); n];
    for &t in triples {
        spo[partition(t.s, n)].push(t);
        ops[partition(t.o, n)].push(t);
    }
    for shard in 0..n {
        spo[shard].sort_by_key(|t| (t.s, t.p, t.o));
        ops[shard].sort_by_key(|t| (t.o, t.p, t.s));
        stores[shard]
            .load_normal(&spo[shard], &ops[shard], 0)
            .expect("bulk load");
    }
    for store in stores {
        store.build_index().expect("index build");
    }
}

/// Sorted copy, for set comparisons against lookup results.
pub fn sorted(mut v: Vec<Sid>) -> Vec<Sid> {
    v.sort_unstable();
    v
}
