use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::collections::BTreeSet;

use super::*;

#[test]
fn test_mph_empty() {
    let mph = Mph::build::<Vec<u8>>(&[]).unwrap();
    assert!(mph.is_empty());
    assert_eq!(mph.lookup(b"missing"), None);
}

#[test]
fn test_mph_lookup() {
    let seed: u64 = random();
    println!("test_mph_lookup {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for n in [1, 2, 10, 1000, 20_000].iter() {
        let mut keys: BTreeSet<Vec<u8>> = BTreeSet::new();
        while keys.len() < *n {
            let len = 1 + rng.gen::<usize>() % 40;
            keys.insert((0..len).map(|_| rng.gen()).collect());
        }
        let pairs: Vec<(Vec<u8>, u64)> = keys
            .into_iter()
            .enumerate()
            .map(|(i, key)| (key, (i as u64) * 7))
            .collect();

        let mph = Mph::build(&pairs).unwrap();
        assert_eq!(mph.len() as usize, *n);
        for (key, off) in pairs.iter() {
            assert_eq!(mph.lookup(key), Some(*off), "n {}", n);
        }
    }
}

#[test]
fn test_mph_file_roundtrip() {
    let seed: u64 = random();
    println!("test_mph_file_roundtrip {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let pairs: Vec<(Vec<u8>, u64)> = (0..1000_u64)
        .map(|i| {
            let mut key = i.to_be_bytes().to_vec();
            key.push(rng.gen());
            (key, i * 3)
        })
        .collect();
    let mph = Mph::build(&pairs).unwrap();

    let loc = std::env::temp_dir()
        .join("strata-mph-test")
        .join("roundtrip.kvi")
        .into_os_string();
    mph.write(&loc).unwrap();

    let out = Mph::open(&loc).unwrap();
    assert_eq!(out.len(), mph.len());
    for (key, off) in pairs.iter() {
        assert_eq!(out.lookup(key), Some(*off));
    }

    std::fs::remove_file(&loc).unwrap();
}
