//! Black-box exercise of the public `dedupfs` facade — everything here goes
//! through re-exported types only, the way an embedder would use the crate.

use dedupfs::{Engine, EngineConfig};

#[test]
fn write_and_read_through_the_public_facade() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();

    let block = dedupfs::BlockId(1);
    let payload = vec![9u8; engine.block_size() as usize];
    let fp = dedupfs::Fingerprint::new(vec![1, 2, 3, 4]).unwrap();
    engine.write_block(block, &[(fp, payload.clone())]).unwrap();

    assert_eq!(engine.read_block(block).unwrap(), payload);
    engine.shutdown().unwrap();
}

#[test]
fn reopening_after_shutdown_keeps_data_dir_usable() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        let block = dedupfs::BlockId(2);
        let fp = dedupfs::Fingerprint::new(vec![5, 6, 7, 8]).unwrap();
        engine
            .write_block(block, &[(fp, vec![4u8; engine.block_size() as usize])])
            .unwrap();
        engine.shutdown().unwrap();
    }

    let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
    assert_eq!(
        engine.read_block(dedupfs::BlockId(2)).unwrap(),
        vec![4u8; engine.block_size() as usize]
    );
}
