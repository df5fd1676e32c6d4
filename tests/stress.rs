//! Larger workloads: bulk loads and randomized churn against a reference map.

use std::collections::BTreeMap;

use cellar::{Key, PageId, Result, Store, StoreOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn value_for(i: u64) -> Vec<u8> {
    let mut value = vec![0u8; 100];
    for (n, byte) in value.iter_mut().enumerate() {
        *byte = (i as usize * 31 + n) as u8;
    }
    value
}

#[test]
fn ten_thousand_fixed_width_records() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("bulk.db");
    let count = 10_000u64;

    {
        let store = Store::create(&path, StoreOptions::default()).unwrap();
        for i in 0..count {
            let key = format!("{i:020}");
            assert!(store.add_record(key.as_bytes(), &value_for(i)).unwrap());
        }
        assert_eq!(store.record_count().unwrap(), count);
        assert_eq!(store.total_bytes().unwrap(), count * 100);
        store.close();
    }

    let store = Store::open(&path, StoreOptions::default()).unwrap();
    assert_eq!(store.record_count().unwrap(), count);

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..500 {
        let i = rng.gen_range(0..count);
        let key = format!("{i:020}");
        assert_eq!(store.get_record(key.as_bytes()).unwrap().unwrap(), value_for(i));
    }

    let mut visited = 0u64;
    let mut last: Option<Vec<u8>> = None;
    let mut check = |key: &Key, _page: PageId| -> Result<()> {
        let bytes = key.as_bytes().to_vec();
        if let Some(prev) = &last {
            assert!(prev < &bytes);
        }
        last = Some(bytes);
        visited += 1;
        Ok(())
    };
    assert!(store.accept(&mut check).unwrap());
    assert_eq!(visited, count);
}

#[test]
fn randomized_churn_matches_reference() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("churn.db");
    let options = StoreOptions::default()
        .page_size(512)
        .max_key_size(24)
        .flush_threshold(64);

    let store = Store::create(&path, options.clone()).unwrap();
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0xCE11A7);

    for _ in 0..5_000 {
        let slot: u16 = rng.gen_range(0..400);
        let key = format!("churn-{slot:04}").into_bytes();
        match rng.gen_range(0..10) {
            0..=5 => {
                let len = rng.gen_range(0..1200);
                let mut value = vec![0u8; len];
                rng.fill(value.as_mut_slice());
                assert!(store.add_record(&key, &value).unwrap());
                model.insert(key, value);
            }
            6..=8 => {
                let expected = model.remove(&key).is_some();
                assert_eq!(store.remove_record(&key).unwrap(), expected);
            }
            _ => {
                assert_eq!(store.get_record(&key).unwrap(), model.get(&key).cloned());
            }
        }
    }

    assert_eq!(store.record_count().unwrap(), model.len() as u64);
    for (key, value) in &model {
        assert_eq!(store.get_record(key).unwrap().as_ref(), Some(value));
    }
    store.close();

    let store = Store::open(&path, options).unwrap();
    assert_eq!(store.record_count().unwrap(), model.len() as u64);
    let mut seen = Vec::new();
    let mut collect = |key: &Key, _page: PageId| -> Result<()> {
        seen.push(key.as_bytes().to_vec());
        Ok(())
    };
    assert!(store.accept(&mut collect).unwrap());
    let expected: Vec<Vec<u8>> = model.keys().cloned().collect();
    assert_eq!(seen, expected);
}
