//! Three loopback peers, each FIFO-broadcasting 4 messages to the group.
//! Matches the `num_messages=4`, 3-peer boundary scenario: every peer's
//! output ends up with 4 `b` lines and 12 `d` lines, strictly increasing
//! per origin.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use da_broadcast::{Fifo, Urb};
use da_common::hosts::HostSet;
use da_common::OutputWriter;
use da_io::{ReadinessLoop, WorkerPool};
use da_wire::Packet;

const NUM_MESSAGES: u32 = 4;
const NUM_PEERS: u64 = 3;

fn free_port() -> u16 {
    let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

struct Node {
    readiness: Arc<ReadinessLoop>,
    urb: Arc<Urb>,
    output_path: std::path::PathBuf,
    read_workers: Vec<thread::JoinHandle<()>>,
}

#[test]
fn each_peer_delivers_all_twelve_messages_in_fifo_order() {
    da_wire::packet::reset_global_seq_id_for_test();

    let ports: Vec<u16> = (0..NUM_PEERS).map(|_| free_port()).collect();
    let hosts_text: String = ports
        .iter()
        .enumerate()
        .map(|(i, port)| format!("{} 127.0.0.1 {port}\n", i + 1))
        .collect();
    let hosts: HostSet = hosts_text.parse().unwrap();

    let mut nodes = Vec::new();
    for id in 1..=NUM_PEERS {
        let readiness = Arc::new(ReadinessLoop::new().unwrap());
        let write_pool = Arc::new(WorkerPool::new("test-fifo-write", 2));
        let output_path = {
            let mut p = std::env::temp_dir();
            p.push(format!("da-broadcast-fifo-three-peers-{}-{id}", std::process::id()));
            p
        };
        let output = Arc::new(OutputWriter::create(&output_path).unwrap());

        let fifo = Arc::new(Fifo::new(&hosts, output.clone()));
        let hosts_for_deliver = hosts.clone();
        let fifo_for_deliver = fifo.clone();
        let urb = Urb::new(
            id,
            &hosts,
            &readiness,
            write_pool,
            Arc::new(move |pkt: Packet| {
                fifo_for_deliver.on_urb_deliver(&hosts_for_deliver, pkt);
            }),
        )
        .unwrap();

        let read_workers: Vec<_> = (0..2)
            .map(|_| {
                let r = readiness.clone();
                thread::spawn(move || r.run())
            })
            .collect();

        nodes.push(Node {
            readiness,
            urb,
            output_path,
            read_workers,
        });
    }

    for node in &nodes {
        for _ in 0..NUM_MESSAGES {
            let pkt = Packet::new_data(node.urb.self_id(), Bytes::new());
            node.urb.broadcast(vec![pkt]);
        }
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let all_done = nodes.iter().all(|node| {
            let contents = fs::read_to_string(&node.output_path).unwrap_or_default();
            contents.lines().filter(|l| l.starts_with('d')).count() == (NUM_PEERS as usize) * (NUM_MESSAGES as usize)
        });
        if all_done || std::time::Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    for node in &nodes {
        let contents = fs::read_to_string(&node.output_path).unwrap();
        let mut per_origin: HashMap<u64, Vec<u32>> = HashMap::new();
        let mut delivery_count = 0usize;
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("d") => {
                    let origin: u64 = fields.next().unwrap().parse().unwrap();
                    let seq: u32 = fields.next().unwrap().parse().unwrap();
                    per_origin.entry(origin).or_default().push(seq);
                    delivery_count += 1;
                }
                _ => {}
            }
        }
        assert_eq!(
            delivery_count,
            (NUM_PEERS as usize) * (NUM_MESSAGES as usize),
            "node should observe every peer's FIFO deliveries"
        );
        for origin in 1..=NUM_PEERS {
            let mut seqs = per_origin.remove(&origin).unwrap_or_default();
            seqs.sort_unstable();
            let expected: Vec<u32> = (1..=NUM_MESSAGES).collect();
            assert_eq!(seqs, expected, "origin {origin} must be delivered strictly in order");
        }
    }

    for node in nodes {
        node.urb.stop();
        node.readiness.stop(node.read_workers.len());
        for worker in node.read_workers {
            worker.join().unwrap();
        }
        let _ = fs::remove_file(&node.output_path);
    }
}
