//! Three loopback peers proposing overlapping sets for a single round;
//! every correct peer must decide the union `{1, 2, 3}`.

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
fn three_peers_with_overlapping_proposals_decide_the_union() {
    da_wire::packet::reset_global_seq_id_for_test();

    let proposals = [vec![1u32, 2], vec![2, 3], vec![1, 3]];
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
        let write_pool = Arc::new(WorkerPool::new("test-lattice-write", 2));
        let output_path = {
            let mut p = std::env::temp_dir();
            p.push(format!("da-lattice-three-peers-{}-{id}", std::process::id()));
            p
        };
        let output = Arc::new(OutputWriter::create(&output_path).unwrap());
        let lattice = LatticeAgreement::new(id, &hosts, &readiness, write_pool, 1, output).unwrap();

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

    for (node, values) in nodes.iter().zip(proposals.iter()) {
        node.lattice.propose(0, values.clone());
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let all_decided = nodes
            .iter()
            .all(|node| !fs::read_to_string(&node.output_path).unwrap_or_default().is_empty());
        if all_decided || std::time::Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    for node in &nodes {
        let contents = fs::read_to_string(&node.output_path).unwrap();
        let mut lines = contents.lines();
        let decided: Vec<u32> = lines
            .next()
            .expect("round 0 should have decided")
            .split_whitespace()
            .map(|tok| tok.parse().unwrap())
            .collect();
        let mut sorted = decided.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3], "every correct peer must decide the union of proposals");
        assert!(lines.next().is_none(), "exactly one round was proposed");
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
