//! Three loopback peers, each proposing two rounds:
//! `[{1},{2}]`, `[{1,3},{2}]`, `[{3},{2,4}]`.
//!
//! Every peer's output must be exactly two lines, emitted in ascending
//! round order regardless of which round's majority completes first:
//! round 0 decides a permutation of `{1,3}`, round 1 a permutation of
//! `{2,4}`.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use da_common::hosts::HostSet;
use da_common::OutputWriter;
use da_io::{ReadinessLoop, WorkerPool};
use da_lattice::LatticeAgreement;

fn free_port() -> u16 {
    let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

struct Node {
    readiness: Arc<ReadinessLoop>,
    lattice: Arc<LatticeAgreement>,
    output_path: std::path::PathBuf,
    read_workers: Vec<thread::JoinHandle<()>>,
}

#[test]
fn rounds_are_output_in_ascending_order_regardless_of_completion_order() {
    da_wire::packet::reset_global_seq_id_for_test();

    let per_peer_proposals: [[Vec<u32>; 2]; 3] = [
        [vec![1], vec![2]],
        [vec![1, 3], vec![2]],
        [vec![3], vec![2, 4]],
    ];

    let ports: Vec<u16> = (0..3).map(|_| free_port()).collect();
    let hosts_text: String = ports
        .iter()
        .enumerate()
        .map(|(i, port)| format!("{} 127.0.0.1 {port}\n", i + 1))
        .collect();
    let hosts: HostSet = hosts_text.parse().unwrap();

    let mut nodes = Vec::new();
    for id in 1..=3u64 {
        let readiness = Arc::new(ReadinessLoop::new().unwrap());
        let write_pool = Arc::new(WorkerPool::new("test-lattice-multi-write", 2));
        let output_path = {
            let mut p = std::env::temp_dir();
            p.push(format!("da-lattice-multi-round-{}-{id}", std::process::id()));
            p
        };
        let output = Arc::new(OutputWriter::create(&output_path).unwrap());
        let lattice = LatticeAgreement::new(id, &hosts, &readiness, write_pool, 2, output).unwrap();

        let read_workers: Vec<_> = (0..2)
            .map(|_| {
                let r = readiness.clone();
                thread::spawn(move || r.run())
            })
            .collect();

        nodes.push(Node {
            readiness,
            lattice,
            output_path,
            read_workers,
        });
    }

    for (node, rounds) in nodes.iter().zip(per_peer_proposals.iter()) {
        let proposals: Vec<(u32, Vec<u32>)> = rounds
            .iter()
            .enumerate()
            .map(|(round, values)| (round as u32, values.clone()))
            .collect();
        node.lattice.propose_many(proposals);
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let all_done = nodes.iter().all(|node| {
            let contents = fs::read_to_string(&node.output_path).unwrap_or_default();
            contents.lines().count() == 2
        });
        if all_done || std::time::Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    for node in &nodes {
        let contents = fs::read_to_string(&node.output_path).unwrap();
        let mut lines = contents.lines();

        let round0: Vec<u32> = {
            let mut v: Vec<u32> = lines
                .next()
                .expect("round 0 should have decided")
                .split_whitespace()
                .map(|tok| tok.parse().unwrap())
                .collect();
            v.sort_unstable();
            v
        };
        let round1: Vec<u32> = {
            let mut v: Vec<u32> = lines
                .next()
                .expect("round 1 should have decided")
                .split_whitespace()
                .map(|tok| tok.parse().unwrap())
                .collect();
            v.sort_unstable();
            v
        };

        assert_eq!(round0, vec![1, 3], "round 0's output line must come first");
        assert_eq!(round1, vec![2, 4], "round 1's output line must come second");
        assert!(lines.next().is_none(), "exactly two rounds were proposed");
    }

    for node in nodes {
        node.lattice.stop();
        node.readiness.stop(node.read_workers.len());
        for worker in node.read_workers {
            worker.join().unwrap();
        }
        let _ = fs::remove_file(&node.output_path);
    }
}
