use anyhow::Result;
use rand::Rng;

#[path = "../common/mod.rs"]
mod common;

use common::{TestDb, PAGE_SIZE};
use redorecv::redo::format::align_down;
use redorecv::{MtrBuilder, PageId, RecoveryError, RecvSys};

const N_PAGES: u32 = 20;

fn fill(i: u32) -> Vec<u8> {
    vec![(i % 251) as u8 + 1; 200]
}

#[test]
fn test_early_batches_when_buffer_fills() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let mut last = 0;
    for i in 0..100u32 {
        last = db.append(
            MtrBuilder::new()
                .write(PageId::new(1, i % N_PAGES), 200, &fill(i))
                .finish(),
        )?;
    }

    let mut config = db.config();
    config.max_log_blocks = Some(2);
    let stats = db.recover(config, None)?;
    assert!(stats.n_batches > 1, "expected early batches, got {}", stats.n_batches);
    assert_eq!(stats.end_lsn, last);
    assert_eq!(stats.n_mtrs, 100);

    for p in 0..N_PAGES {
        let page = db.read_page(PageId::new(1, p))?;
        // The last writer of page p was mtr 80 + p
        assert_eq!(&page.data[200..400], &fill(80 + p)[..], "page {}", p);
    }

    Ok(())
}

#[test]
fn test_buffer_stays_within_limit() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    for i in 0..60u32 {
        db.append(
            MtrBuilder::new()
                .write(PageId::new(1, i % N_PAGES), 200, &fill(i))
                .finish(),
        )?;
    }

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let mut config = db.config();
    config.max_log_blocks = Some(2);
    let recv_sys = RecvSys::create(config, pool, disk, None)?;
    recv_sys.recovery_from_checkpoint_start(0)?;
    assert!(recv_sys.n_log_blocks() <= 2);
    assert!(recv_sys.stats().n_batches >= 1);
    assert!(!recv_sys.is_applying());

    recv_sys.apply_hashed_log_recs(true)?;
    assert_eq!(recv_sys.n_log_blocks(), 0);
    recv_sys.recovery_from_checkpoint_finish()?;
    recv_sys.close();

    Ok(())
}

#[test]
fn test_random_workload_matches_unbounded_run() -> Result<()> {
    let mut rng = rand::thread_rng();
    let mut db = TestDb::new()?;
    db.create_space(1)?;

    let mut expected = vec![vec![0u8; PAGE_SIZE]; N_PAGES as usize];
    for _ in 0..150 {
        let page_no = rng.gen_range(0..N_PAGES);
        let offset = rng.gen_range(24..(PAGE_SIZE - 300)) as u16;
        let len = rng.gen_range(1..300usize);
        let byte = rng.gen_range(1..=255u8);
        db.append(
            MtrBuilder::new()
                .write(PageId::new(1, page_no), offset, &vec![byte; len])
                .finish(),
        )?;
        let start = offset as usize;
        expected[page_no as usize][start..start + len].fill(byte);
    }

    let mut config = db.config();
    config.max_log_blocks = Some(3);
    db.recover(config, None)?;

    for p in 0..N_PAGES {
        let page = db.read_page(PageId::new(1, p))?;
        assert_eq!(&page.data[24..], &expected[p as usize][24..], "page {}", p);
    }

    Ok(())
}

#[test]
fn test_corrupt_tail_after_early_batches() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let mut commits = Vec::new();
    for i in 0..100u32 {
        commits.push(db.append(
            MtrBuilder::new()
                .write(PageId::new(1, i), 200, &fill(i))
                .finish(),
        )?);
    }

    let bad_block = align_down(commits[90]);
    db.corrupt_log_block(bad_block)?;

    let mut config = db.config();
    config.max_log_blocks = Some(2);
    match db.recover(config.clone(), None) {
        Err(RecoveryError::LogCorrupted(lsn)) => assert_eq!(lsn, bad_block),
        other => panic!("expected LogCorrupted, got {:?}", other),
    }

    config.force_recovery = 1;
    let stats = db.recover(config, None)?;
    assert!(stats.n_batches > 1, "expected early batches, got {}", stats.n_batches);
    assert!(stats.end_lsn < bad_block);
    let last_good = commits.iter().copied().filter(|&c| c < bad_block).max();
    assert_eq!(Some(stats.end_lsn), last_good);

    for (i, &commit) in commits.iter().enumerate() {
        let page = db.read_page(PageId::new(1, i as u32))?;
        if commit < bad_block {
            assert_eq!(&page.data[200..400], &fill(i as u32)[..], "page {}", i);
        } else {
            assert!(page.is_all_zero(), "page {} must not be recovered", i);
        }
    }

    Ok(())
}

#[test]
fn test_oversized_mtr_exhausts_memory() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    db.append(
        MtrBuilder::new()
            .write(PageId::new(1, 0), 100, &[1; 3000])
            .write(PageId::new(1, 1), 100, &[2; 3000])
            .finish(),
    )?;

    let mut config = db.config();
    config.max_log_blocks = Some(1);
    match db.recover(config, None) {
        Err(RecoveryError::MemoryExhausted) => {}
        other => panic!("expected MemoryExhausted, got {:?}", other),
    }

    Ok(())
}
