//! End-to-end transport suites: adaptor bundles over the loopback fabric
//! and over the TCP fallback, with identical framing semantics.

use std::sync::Arc;
use triplemesh_core::StoreConfig;
use triplemesh_fabric::{
    select_fabric, Adaptor, Bundle, LoopbackFabric, MessageKind, RegionServer, RemoteMemory,
    RingTransport, ShardMem, TcpFabric,
};

fn cluster_cfg(num_servers: usize, ring_size: u64) -> StoreConfig {
    StoreConfig {
        num_servers,
        num_engines: 2,
        kvstore_size: 256 * 1024,
        ring_size,
        scratch_size: 8192,
        ..Default::default()
    }
}

fn loopback_cluster(cfg: &StoreConfig) -> Vec<Arc<RingTransport>> {
    let shards: Vec<_> = (0..cfg.num_servers)
        .map(|_| Arc::new(ShardMem::new(cfg)))
        .collect();
    let fabric: Arc<dyn RemoteMemory> = Arc::new(LoopbackFabric::new(shards.clone()));
    (0..cfg.num_servers)
        .map(|sid| Arc::new(RingTransport::new(sid, shards[sid].clone(), fabric.clone())))
        .collect()
}

fn tcp_cluster(cfg: &StoreConfig) -> Vec<Arc<RingTransport>> {
    let shards: Vec<_> = (0..cfg.num_servers)
        .map(|_| Arc::new(ShardMem::new(cfg)))
        .collect();
    let servers: Vec<_> = shards
        .iter()
        .map(|mem| RegionServer::spawn("127.0.0.1:0", Arc::clone(mem)).unwrap())
        .collect();
    let addrs: Vec<_> = servers.iter().map(|s| s.addr()).collect();
    (0..cfg.num_servers)
        .map(|sid| {
            let fabric: Arc<dyn RemoteMemory> =
                Arc::new(TcpFabric::new(addrs.clone(), cfg.num_engines));
            Arc::new(RingTransport::new(sid, shards[sid].clone(), fabric))
        })
        .collect()
}

fn bundle_round_trip(rings: &[Arc<RingTransport>]) {
    let src = Adaptor::new(0, rings[0].clone());
    let dst = Adaptor::new(1, rings[1].clone());

    // P6 payload sizes, including the empty bundle payload (the type byte
    // keeps the ring frame non-empty) and the largest frame that fits.
    let ring_size = 4096u64;
    for sz in [0usize, 1, 7, 8, 9, (ring_size / 2) as usize, 4078] {
        let payload: Vec<u8> = (0..sz).map(|i| (i * 7 % 256) as u8).collect();
        let bundle = Bundle::new(MessageKind::Query, payload.clone());
        assert!(src.send(1, 1, &bundle).unwrap(), "payload size {sz}");
        let got = dst.recv().unwrap();
        assert_eq!(got.kind, MessageKind::Query);
        assert_eq!(got.payload, payload, "payload size {sz}");
    }
}

#[test]
fn test_adaptor_round_trip_loopback() {
    let cfg = cluster_cfg(2, 4096);
    bundle_round_trip(&loopback_cluster(&cfg));
}

#[test]
fn test_adaptor_round_trip_tcp() {
    let cfg = cluster_cfg(2, 4096);
    bundle_round_trip(&tcp_cluster(&cfg));
}

#[test]
fn test_fabric_selection_matches_config() {
    let cfg = cluster_cfg(2, 4096);
    let shards: Vec<_> = (0..2).map(|_| Arc::new(ShardMem::new(&cfg))).collect();
    let one: Arc<dyn RemoteMemory> = Arc::new(LoopbackFabric::new(shards.clone()));
    let servers: Vec<_> = shards
        .iter()
        .map(|m| RegionServer::spawn("127.0.0.1:0", Arc::clone(m)).unwrap())
        .collect();
    let tcp: Arc<dyn RemoteMemory> = Arc::new(TcpFabric::new(
        servers.iter().map(|s| s.addr()).collect(),
        cfg.num_engines,
    ));

    let picked = select_fabric(&cfg, Some(one), tcp.clone());
    assert!(picked.is_up());

    let no_rdma = StoreConfig {
        use_rdma: false,
        ..cfg
    };
    let picked = select_fabric(&no_rdma, None, tcp);
    // The TCP fabric reports up; rings run over it with the same frames.
    let rings: Vec<_> = (0..2)
        .map(|sid| Arc::new(RingTransport::new(sid, shards[sid].clone(), picked.clone())))
        .collect();
    assert!(rings[0].send(0, 1, 0, b"over tcp").unwrap());
    assert_eq!(rings[1].recv(0).unwrap(), b"over tcp");
}

#[test]
fn test_overflow_reported_and_recovered_over_tcp() {
    let cfg = cluster_cfg(2, 3072);
    let rings = tcp_cluster(&cfg);
    let payload = vec![3u8; 1024];
    let mut sent = 0;
    while rings[0].send(0, 1, 0, &payload).unwrap() {
        sent += 1;
        assert!(sent < 16, "overflow never reported");
    }
    assert_eq!(sent, 2, "two 1040-byte frames fit a 3072-byte ring");

    assert_eq!(rings[1].recv(0).unwrap(), payload);
    assert!(rings[0].send(0, 1, 0, &payload).unwrap());
}

#[test]
fn test_cross_thread_fanout() {
    let cfg = cluster_cfg(2, 8192);
    let rings = loopback_cluster(&cfg);
    // Every (shard, thread) sends one tagged message to (1, 0).
    for sid in 0..2 {
        for tid in 0..2 {
            let adaptor = Adaptor::new(tid, rings[sid].clone());
            let bundle = Bundle::new(MessageKind::Reply, vec![sid as u8, tid as u8]);
            assert!(adaptor.send(1, 0, &bundle).unwrap());
        }
    }
    let dst = Adaptor::new(0, rings[1].clone());
    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(dst.recv().unwrap().payload);
    }
    seen.sort();
    assert_eq!(
        seen,
        vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
    );
}
