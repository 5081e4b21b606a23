use std::sync::Arc;

use anyhow::Result;

#[path = "../common/mod.rs"]
mod common;

use common::{stamped_page, RecordingObserver, TestDb, PAGE_SIZE};
use redorecv::recovery::FileOpObserver;
use redorecv::redo::format::align_down;
use redorecv::{MtrBuilder, PageId, RecoveryError, RecvSys};

#[test]
fn test_buffer_and_apply_three_mtrs() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let p1 = PageId::new(1, 1);
    let p2 = PageId::new(1, 2);

    let l1 = db.append(MtrBuilder::new().write(p1, 100, b"aaaa").write(p1, 200, b"bbbb").finish())?;
    let l2 = db.append(MtrBuilder::new().write(p2, 100, b"cccc").finish())?;
    let l3 = db.append(MtrBuilder::new().write(p1, 300, b"dddd").finish())?;
    assert!(l1 < l2 && l2 < l3);

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = RecvSys::create(db.config(), pool, disk, None)?;
    recv_sys.recovery_from_checkpoint_start(0)?;

    assert!(recv_sys.needed_recovery());
    assert_eq!(recv_sys.recovered_lsn(), l3);
    assert_eq!(recv_sys.n_pending_pages(), 2);
    assert_eq!(recv_sys.buffered_lsns(p1), vec![l1, l1, l3]);
    assert_eq!(recv_sys.buffered_lsns(p2), vec![l2]);

    recv_sys.apply_hashed_log_recs(true)?;
    assert_eq!(recv_sys.n_pending_pages(), 0);
    assert!(recv_sys.buffered_lsns(p1).is_empty());

    let stats = recv_sys.recovery_from_checkpoint_finish()?;
    recv_sys.close();
    assert_eq!(stats.n_mtrs, 3);
    assert_eq!(stats.n_records, 4);
    assert_eq!(stats.n_records_applied, 4);
    assert_eq!(stats.n_pages_applied, 2);
    assert_eq!(stats.end_lsn, l3);

    let page = db.read_page(p1)?;
    assert_eq!(&page.data[100..104], b"aaaa");
    assert_eq!(&page.data[200..204], b"bbbb");
    assert_eq!(&page.data[300..304], b"dddd");
    assert_eq!(page.lsn(), l3);
    assert!(page.checksum_ok());

    let page = db.read_page(p2)?;
    assert_eq!(&page.data[100..104], b"cccc");
    assert_eq!(page.lsn(), l2);

    Ok(())
}

#[test]
fn test_clean_log_needs_no_recovery() -> Result<()> {
    let db = TestDb::new()?;

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = RecvSys::create(db.config(), pool, disk, None)?;
    recv_sys.recovery_from_checkpoint_start(0)?;
    assert!(!recv_sys.needed_recovery());
    assert_eq!(recv_sys.n_pending_pages(), 0);

    recv_sys.apply_hashed_log_recs(true)?;
    let stats = recv_sys.recovery_from_checkpoint_finish()?;
    assert_eq!(stats.n_records_applied, 0);
    assert!(!recv_sys.recovery_on());
    recv_sys.close();

    Ok(())
}

#[test]
fn test_second_recovery_applies_nothing() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    for i in 0..10u8 {
        db.append(
            MtrBuilder::new()
                .write(PageId::new(1, (i % 3) as u32), 64 + i as u16 * 8, &[i + 1; 8])
                .finish(),
        )?;
    }

    let first = db.recover(db.config(), None)?;
    assert_eq!(first.n_records_applied, 10);
    let before = db.read_page(PageId::new(1, 0))?;

    let second = db.recover(db.config(), None)?;
    assert_eq!(second.n_records, 10);
    assert_eq!(second.n_records_applied, 0);
    assert_eq!(db.read_page(PageId::new(1, 0))?, before);

    Ok(())
}

#[test]
fn test_init_page_discards_older_records() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(2)?;
    let page_id = PageId::new(2, 5);

    db.append(MtrBuilder::new().write(page_id, 100, b"old").finish())?;
    let l2 = db.append(MtrBuilder::new().init_page(page_id).finish())?;
    let l3 = db.append(MtrBuilder::new().write(page_id, 200, b"new").finish())?;

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = RecvSys::create(db.config(), pool, disk, None)?;
    recv_sys.recovery_from_checkpoint_start(0)?;
    assert_eq!(recv_sys.buffered_lsns(page_id), vec![l2, l3]);
    recv_sys.apply_hashed_log_recs(true)?;
    recv_sys.recovery_from_checkpoint_finish()?;
    recv_sys.close();

    let page = db.read_page(page_id)?;
    assert_eq!(&page.data[100..103], &[0, 0, 0]);
    assert_eq!(&page.data[200..203], b"new");
    assert_eq!(page.lsn(), l3);

    Ok(())
}

#[test]
fn test_memset_record() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let page_id = PageId::new(1, 0);
    db.append(MtrBuilder::new().memset(page_id, 1000, 64, 0xAB).finish())?;

    db.recover(db.config(), None)?;

    let page = db.read_page(page_id)?;
    assert!(page.data[1000..1064].iter().all(|&b| b == 0xAB));
    assert_eq!(page.data[1064], 0);

    Ok(())
}

#[test]
fn test_corrupted_log_block() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let mut commits = Vec::new();
    for i in 0..20u8 {
        commits.push(db.append(
            MtrBuilder::new()
                .write(PageId::new(1, i as u32), 100, &[i + 1; 100])
                .finish(),
        )?);
    }

    let bad_block = align_down(commits[10]);
    assert!(commits[0] < bad_block);
    db.corrupt_log_block(bad_block)?;

    match db.recover(db.config(), None) {
        Err(RecoveryError::LogCorrupted(lsn)) => assert_eq!(lsn, bad_block),
        other => panic!("expected LogCorrupted, got {:?}", other),
    }

    let mut config = db.config();
    config.force_recovery = 1;
    let stats = db.recover(config, None)?;
    assert!(stats.end_lsn < bad_block);

    for (i, &commit) in commits.iter().enumerate() {
        let page = db.read_page(PageId::new(1, i as u32))?;
        if commit < bad_block {
            assert_eq!(&page.data[100..200], &[i as u8 + 1; 100][..], "page {}", i);
        } else {
            assert!(page.is_all_zero(), "page {} must not be recovered", i);
        }
    }

    Ok(())
}

#[test]
fn test_torn_page_restored_from_doublewrite() -> Result<()> {
    let mut db = TestDb::with_doublewrite()?;
    db.create_space(1)?;
    let page_id = PageId::new(1, 0);
    db.write_pages(&[stamped_page(page_id, 500, b"hello")])?;

    db.tear_page(page_id, 1000, &[0x5A; 100])?;
    assert!(!db.read_page(page_id)?.checksum_ok());

    db.append(MtrBuilder::new().write(page_id, 2000, b"redo").finish())?;
    let stats = db.recover(db.config(), None)?;
    assert_eq!(stats.n_records_applied, 1);

    let page = db.read_page(page_id)?;
    assert!(page.checksum_ok());
    assert_eq!(&page.data[500..505], b"hello");
    assert!(page.data[1000..1100].iter().all(|&b| b == 0));
    assert_eq!(&page.data[2000..2004], b"redo");

    Ok(())
}

#[test]
fn test_corrupted_page_needs_force_recovery() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let torn = PageId::new(1, 0);
    let healthy = PageId::new(1, 1);
    db.write_pages(&[stamped_page(torn, 500, b"hello")])?;
    db.tear_page(torn, 1000, &[0x5A; 100])?;

    db.append(
        MtrBuilder::new()
            .write(torn, 2000, b"lost")
            .write(healthy, 2000, b"kept")
            .finish(),
    )?;

    match db.recover(db.config(), None) {
        Err(RecoveryError::CorruptedPage(page_id)) => assert_eq!(page_id, torn),
        other => panic!("expected CorruptedPage, got {:?}", other),
    }

    let mut config = db.config();
    config.force_recovery = 1;
    let stats = db.recover(config, None)?;
    assert_eq!(stats.n_records_applied, 1);

    assert_eq!(&db.read_page(healthy)?.data[2000..2004], b"kept");
    let page = db.read_page(torn)?;
    assert!(!page.checksum_ok());
    assert_eq!(&page.data[2000..2004], &[0, 0, 0, 0]);

    Ok(())
}

#[test]
fn test_missing_tablespace() -> Result<()> {
    let mut db = TestDb::new()?;
    db.append(MtrBuilder::new().write(PageId::new(7, 0), 100, b"x").finish())?;

    match db.recover(db.config(), None) {
        Err(RecoveryError::FilesystemInconsistency(_)) => {}
        other => panic!("expected FilesystemInconsistency, got {:?}", other),
    }
    assert!(!db.open_disk()?.space_exists(7));

    Ok(())
}

#[test]
fn test_file_create_and_rename() -> Result<()> {
    let mut db = TestDb::new()?;
    let page_id = PageId::new(5, 0);
    db.append(MtrBuilder::new().file_create(5, "t5.ibd").finish())?;
    db.append(
        MtrBuilder::new()
            .init_page(page_id)
            .write(page_id, 100, b"new")
            .finish(),
    )?;
    db.append(MtrBuilder::new().file_rename(5, "t5.ibd", "t6.ibd").finish())?;

    let observer = Arc::new(RecordingObserver::default());
    let stats = db.recover(
        db.config(),
        Some(observer.clone() as Arc<dyn FileOpObserver>),
    )?;
    assert_eq!(stats.n_file_ops, 2);

    let ops = observer.ops.lock().clone();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].space, 5);
    assert!(ops[0].create);
    assert_eq!(ops[0].name, "t5.ibd");
    assert_eq!(ops[0].new_name, None);
    assert!(!ops[1].create);
    assert_eq!(ops[1].name, "t5.ibd");
    assert_eq!(ops[1].new_name.as_deref(), Some("t6.ibd"));

    assert!(db.open_disk()?.space_exists(5));
    assert_eq!(&db.read_page(page_id)?.data[100..103], b"new");

    Ok(())
}

#[test]
fn test_file_delete_drops_buffered_records() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(3)?;
    db.append(MtrBuilder::new().write(PageId::new(3, 1), 100, b"gone").finish())?;
    db.append(MtrBuilder::new().file_delete(3, "t3.ibd").finish())?;

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = RecvSys::create(db.config(), pool, disk, None)?;
    recv_sys.recovery_from_checkpoint_start(0)?;
    assert_eq!(recv_sys.n_pending_pages(), 0);
    recv_sys.apply_hashed_log_recs(true)?;
    let stats = recv_sys.recovery_from_checkpoint_finish()?;
    recv_sys.close();
    assert_eq!(stats.n_records_applied, 0);

    Ok(())
}

#[test]
fn test_trim_space_drops_records_past_new_size() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let kept = PageId::new(1, 5);
    let cut = PageId::new(1, 10);
    let later = PageId::new(1, 12);

    let l1 = db.append(MtrBuilder::new().write(kept, 100, b"keep").finish())?;
    db.append(MtrBuilder::new().write(cut, 100, b"cut!").finish())?;
    db.append(MtrBuilder::new().trim_space(1, 8).finish())?;
    let l4 = db.append(MtrBuilder::new().write(later, 100, b"grow").finish())?;

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = RecvSys::create(db.config(), pool, disk, None)?;
    recv_sys.recovery_from_checkpoint_start(0)?;
    assert_eq!(recv_sys.buffered_lsns(kept), vec![l1]);
    assert!(recv_sys.buffered_lsns(cut).is_empty());
    assert_eq!(recv_sys.buffered_lsns(later), vec![l4]);
    recv_sys.apply_hashed_log_recs(true)?;
    let stats = recv_sys.recovery_from_checkpoint_finish()?;
    recv_sys.close();
    assert_eq!(stats.n_records_applied, 2);

    assert_eq!(&db.read_page(kept)?.data[100..104], b"keep");
    assert!(db.read_page(cut)?.is_all_zero());
    assert_eq!(&db.read_page(later)?.data[100..104], b"grow");

    Ok(())
}

#[test]
fn test_undo_space_truncation() -> Result<()> {
    let mut db = TestDb::new()?;
    let undo = 100;
    db.create_space(undo)?;
    let pages: Vec<_> = (0..6).map(|p| stamped_page(PageId::new(undo, p), 24, &[])).collect();
    db.write_pages(&pages)?;
    let page_id = PageId::new(undo, 1);

    // Everything logged before the re-creation of the undo space is void
    db.append(MtrBuilder::new().write(page_id, 100, b"old").finish())?;
    db.append(MtrBuilder::new().file_create(undo, "undo_001").finish())?;
    let l3 = db.append(MtrBuilder::new().write(page_id, 200, b"new").finish())?;
    db.append(MtrBuilder::new().trim_space(undo, 2).finish())?;

    let mut config = db.config();
    config.undo_space_start = undo;
    let stats = db.recover(config, None)?;
    assert_eq!(stats.n_file_ops, 1);
    assert_eq!(stats.n_records_applied, 1);

    let page = db.read_page(page_id)?;
    assert_eq!(&page.data[100..103], &[0, 0, 0]);
    assert_eq!(&page.data[200..203], b"new");
    assert_eq!(page.lsn(), l3);
    assert_eq!(db.open_disk()?.space_size(undo)?, 2);

    Ok(())
}

#[test]
fn test_file_checkpoint_matches_checkpoint_lsn() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let checkpoint_lsn = db.writer.lsn();

    db.append(MtrBuilder::new().write(PageId::new(1, 0), 100, b"x").finish())?;
    db.append(MtrBuilder::new().file_checkpoint(checkpoint_lsn + 1).finish())?;
    let matching = db.append(MtrBuilder::new().file_checkpoint(checkpoint_lsn).finish())?;

    let stats = db.recover(db.config(), None)?;
    assert_eq!(stats.checkpoint_lsn, checkpoint_lsn);
    assert_eq!(stats.file_checkpoint_lsn, Some(matching));
    assert_eq!(stats.n_file_ops, 0);

    Ok(())
}

#[test]
fn test_free_page_resets_page() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let page_id = PageId::new(1, 3);
    db.write_pages(&[stamped_page(page_id, 100, b"hello")])?;

    db.append(MtrBuilder::new().write(page_id, 300, b"lost").finish())?;
    let freed = db.append(MtrBuilder::new().free_page(page_id).finish())?;

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = RecvSys::create(db.config(), pool, disk, None)?;
    recv_sys.recovery_from_checkpoint_start(0)?;
    assert_eq!(recv_sys.buffered_lsns(page_id), vec![freed]);
    recv_sys.apply_hashed_log_recs(true)?;
    recv_sys.recovery_from_checkpoint_finish()?;
    recv_sys.close();

    let page = db.read_page(page_id)?;
    assert!(page.data[24..].iter().all(|&b| b == 0));
    assert_eq!(page.lsn(), freed);
    assert!(page.checksum_ok());

    Ok(())
}

#[test]
fn test_flush_lsn_in_the_future() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let end = db.append(MtrBuilder::new().write(PageId::new(1, 0), 100, b"x").finish())?;

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = RecvSys::create(db.config(), pool, disk, None)?;
    match recv_sys.recovery_from_checkpoint_start(end + 10_000) {
        Err(RecoveryError::FilesystemInconsistency(_)) => {}
        other => panic!("expected FilesystemInconsistency, got {:?}", other),
    }
    assert!(recv_sys.found_corrupt_fs());
    recv_sys.close();

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = RecvSys::create(db.config(), pool, disk, None)?;
    recv_sys.recovery_from_checkpoint_start(end)?;
    recv_sys.apply_hashed_log_recs(true)?;
    recv_sys.recovery_from_checkpoint_finish()?;
    recv_sys.close();

    Ok(())
}

#[test]
fn test_log_spanning_several_files() -> Result<()> {
    // Four blocks of payload per file
    let mut db = TestDb::with_log(4096, 4, false)?;
    db.create_space(1)?;
    let mut last = 0;
    for i in 0..30u8 {
        last = db.append(
            MtrBuilder::new()
                .write(PageId::new(1, i as u32), 100, &[i + 1; 100])
                .finish(),
        )?;
    }
    assert!(db.writer.block_location(last).0 != db.writer.paths()[0]);

    let stats = db.recover(db.config(), None)?;
    assert_eq!(stats.end_lsn, last);
    assert_eq!(stats.n_records_applied, 30);
    for i in 0..30u8 {
        let page = db.read_page(PageId::new(1, i as u32))?;
        assert_eq!(&page.data[100..200], &[i + 1; 100][..]);
    }

    Ok(())
}

#[test]
fn test_page_size_mismatch_rejected() -> Result<()> {
    let db = TestDb::new()?;
    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let mut config = db.config();
    config.page_size = PAGE_SIZE * 2;
    config.parsing_buf_size = 128 * 1024;

    assert!(matches!(
        RecvSys::create(config, pool, disk, None),
        Err(RecoveryError::InvalidConfig(_))
    ));

    Ok(())
}
