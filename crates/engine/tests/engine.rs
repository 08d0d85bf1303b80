//! End-to-end exercises of the [`Engine`] facade: write/read round trips,
//! dedup of a repeated fingerprint, and the crash/orphan-chunk paths spec §8
//! calls out by name.

use std::sync::Arc;
use std::time::Duration;

use dedupfs_core::{BlockId, Fingerprint};
use dedupfs_engine::{Engine, EngineConfig};
use dedupfs_storage::ContainerStorageConfig;

fn fp(byte: u8) -> Fingerprint {
    Fingerprint::new(vec![byte; 8]).unwrap()
}

fn engine(dir: &tempfile::TempDir) -> Arc<Engine> {
    let mut config = EngineConfig::default();
    config.block_size = 4096;
    config.storage = ContainerStorageConfig {
        container_size: 65536,
        write_container_count: 2,
        read_cache_slots: 8,
        timeout: Duration::from_secs(60),
        file_count: 1,
        slots_per_file: 16,
    };
    Engine::open(dir.path(), config).unwrap()
}

#[test]
fn write_then_read_a_single_chunk_block() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let block = BlockId(1);

    let payload = vec![7u8; 4096];
    engine.write_block(block, &[(fp(1), payload.clone())]).unwrap();

    let readback = engine.read_block(block).unwrap();
    assert_eq!(readback, payload);
}

#[test]
fn unwritten_block_reads_as_zero_filled() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);

    let readback = engine.read_block(BlockId(99)).unwrap();
    assert_eq!(readback, vec![0u8; 4096]);
}

#[test]
fn empty_data_fingerprint_short_circuits_container_storage() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let block = BlockId(2);

    engine
        .write_block(block, &[(Fingerprint::empty_data(), vec![0u8; 4096])])
        .unwrap();

    let readback = engine.read_block(block).unwrap();
    assert_eq!(readback, vec![0u8; 4096]);
}

#[test]
fn rewriting_a_chunk_fingerprint_deduplicates_storage() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);

    let payload = vec![5u8; 4096];
    engine.write_block(BlockId(10), &[(fp(5), payload.clone())]).unwrap();
    engine.write_block(BlockId(11), &[(fp(5), payload.clone())]).unwrap();

    let a = engine.read_block_mapping(BlockId(10)).unwrap();
    let b = engine.read_block_mapping(BlockId(11)).unwrap();
    assert_eq!(a.items[0].data_address, b.items[0].data_address);
}

#[test]
fn second_write_to_same_block_is_visible_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let block = BlockId(3);

    engine.write_block(block, &[(fp(1), vec![1u8; 4096])]).unwrap();
    engine.write_block(block, &[(fp(2), vec![2u8; 4096])]).unwrap();

    let readback = engine.read_block(block).unwrap();
    assert_eq!(readback, vec![2u8; 4096]);
    assert_eq!(engine.read_block_mapping(block).unwrap().version, 1);
}

#[test]
fn shutdown_runs_every_stage_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    engine.write_block(BlockId(4), &[(fp(9), vec![9u8; 4096])]).unwrap();

    engine.shutdown().unwrap();
    assert!(engine.shutdown_stage().is_complete());
}

#[test]
fn restart_after_clean_shutdown_preserves_block_contents() {
    let dir = tempfile::tempdir().unwrap();
    let payload = vec![3u8; 4096];
    {
        let engine = engine(&dir);
        engine.write_block(BlockId(5), &[(fp(3), payload.clone())]).unwrap();
        engine.shutdown().unwrap();
    }

    let engine = engine(&dir);
    let readback = engine.read_block(BlockId(5)).unwrap();
    assert_eq!(readback, payload);
}
