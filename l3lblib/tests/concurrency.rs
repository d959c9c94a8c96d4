//! Readers racing control plane updates must only ever see whole tables

use crossbeam::thread;
use l3lblib::{Backend, BackendTable, Dispatcher, ForwardingDecision, MAX_BACKENDS};
use std::{
	net::Ipv4Addr,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
};

/// Table `tag` has `len` entries, all of them 10.`tag`.0.x
fn table(tag: u8, len: usize) -> Vec<Backend> {
	(0..len)
		.map(|i| {
			let i = i as u8 + 1;
			Backend::new(Ipv4Addr::new(10, tag, 0, i), [0x02, tag, 0, 0, 0, i])
		})
		.collect()
}

fn frame(src: [u8; 4]) -> Vec<u8> {
	let mut f = vec![
		0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x02, 0x08, 0x00, 0x45,
		0x00, 0x00, 0x14, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00,
	];
	f.extend_from_slice(&src);
	f.extend_from_slice(&[10, 10, 1, 1]);
	f
}

#[test]
fn readers_never_see_torn_tables() {
	// tag -> length
	let shapes: [(u8, usize); 4] = [(1, 3), (2, 8), (3, 1), (4, 5)];
	let tables: Vec<_> = shapes.iter().map(|&(tag, len)| table(tag, len)).collect();

	let shared = Arc::new(BackendTable::new());
	let done = AtomicBool::new(false);
	let observed = AtomicU64::new(0);

	thread::scope(|s| {
		s.spawn(|_| {
			for round in 0..2_000 {
				let t = &tables[round % tables.len()];
				shared.replace(t).unwrap();
				if round % 97 == 0 {
					shared.clear();
				}
			}
			done.store(true, Ordering::SeqCst);
		});

		for _ in 0..4 {
			s.spawn(|_| {
				while !done.load(Ordering::SeqCst) {
					let snap = shared.snapshot();
					let count = snap.active_count();
					assert!(count <= MAX_BACKENDS);
					if count == 0 {
						continue;
					}
					let tag = snap.get(0).unwrap().address.octets()[1];
					let expected = shapes.iter().find(|&&(t, _)| t == tag).unwrap().1;
					assert_eq!(count, expected, "count does not match table {}", tag);
					for i in 0..count {
						let b = snap.get(i).unwrap();
						assert_eq!(b.address.octets()[1], tag, "mixed table at {}", i);
						assert_eq!(b.address.octets()[3] as usize, i + 1);
					}
					observed.fetch_add(1, Ordering::Relaxed);
				}
			});
		}
	})
	.unwrap();

	// 2000 replaces plus the clears
	assert_eq!(shared.generation(), 2_000 + 21);
	assert!(observed.load(Ordering::Relaxed) > 0);
}

#[test]
fn dispatch_during_updates_lands_on_installed_backends() {
	let a = table(1, 2);
	let b = table(2, 7);
	let shared = Arc::new(BackendTable::with_backends(&a).unwrap());
	let dispatcher = Dispatcher::new(shared.clone(), ());
	let done = AtomicBool::new(false);

	thread::scope(|s| {
		s.spawn(|_| {
			for round in 0..1_000 {
				let t = if round % 2 == 0 { &b } else { &a };
				shared.replace(t).unwrap();
			}
			done.store(true, Ordering::SeqCst);
		});

		for w in 0..4u8 {
			let dispatcher = &dispatcher;
			let (a, b, done) = (&a, &b, &done);
			s.spawn(move |_| {
				let mut n = 0u8;
				while !done.load(Ordering::SeqCst) {
					n = n.wrapping_add(1);
					let mut f = frame([192, 168, w, n]);
					assert_eq!(dispatcher.process(&mut f), ForwardingDecision::Transmit);
					let dst = Ipv4Addr::new(f[30], f[31], f[32], f[33]);
					let mac = [f[0], f[1], f[2], f[3], f[4], f[5]];
					let hit = a.iter().chain(b.iter()).find(|be| be.address == dst).unwrap();
					// address and MAC come from the same entry
					assert_eq!(hit.link_address, mac);
				}
			});
		}
	})
	.unwrap();
}

#[test]
fn concurrent_writers_get_distinct_generations() {
	let shared = BackendTable::new();
	let gens = thread::scope(|s| {
		let handles: Vec<_> = (1..=4u8)
			.map(|tag| {
				let shared = &shared;
				s.spawn(move |_| {
					let t = table(tag, tag as usize);
					(0..250).map(|_| shared.replace(&t).unwrap()).collect::<Vec<_>>()
				})
			})
			.collect();
		handles
			.into_iter()
			.flat_map(|h| h.join().unwrap())
			.collect::<Vec<_>>()
	})
	.unwrap();

	let mut sorted = gens.clone();
	sorted.sort_unstable();
	sorted.dedup();
	assert_eq!(sorted.len(), 1_000);
	assert_eq!(sorted.first(), Some(&1));
	assert_eq!(sorted.last(), Some(&1_000));
	assert_eq!(shared.generation(), 1_000);
}
