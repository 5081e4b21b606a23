use anyhow::Result;

#[path = "../common/mod.rs"]
mod common;

use common::{flip_byte, write_at, TestDb, BASE_NAME};
use redorecv::redo::checkpoint::{Checkpoint, CheckpointField};
use redorecv::redo::files::LogFileHeader;
use redorecv::redo::find_max_checkpoint;
use redorecv::redo::format::{LOG_CHECKPOINT_2, LOG_START_LSN};
use redorecv::{LogFiles, LogWriter, MtrBuilder, PageId, RecoveryError};

#[test]
fn test_checkpoint_slots_alternate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = LogWriter::create(dir.path(), BASE_NAME, 64 * 1024, 1)?;
    let lsn = writer.lsn();

    assert_eq!(writer.checkpoint(lsn)?, CheckpointField::First);
    assert_eq!(writer.checkpoint(lsn)?, CheckpointField::Second);
    assert_eq!(writer.checkpoint(lsn)?, CheckpointField::First);

    let files = LogFiles::open(dir.path(), BASE_NAME)?;
    let cp = find_max_checkpoint(&files)?;
    assert_eq!(cp.lsn, lsn);
    // Equal LSNs resolve to the first slot
    assert_eq!(cp.field, CheckpointField::First);
    assert_eq!(cp.no, 2);

    Ok(())
}

#[test]
fn test_latest_checkpoint_bounds_recovery() -> Result<()> {
    let mut db = TestDb::new()?;
    db.create_space(1)?;
    let before = PageId::new(1, 0);
    let after = PageId::new(1, 1);

    let cp_lsn = db.append(MtrBuilder::new().write(before, 100, b"before").finish())?;
    assert_eq!(db.writer.checkpoint(cp_lsn)?, CheckpointField::Second);
    db.append(MtrBuilder::new().write(after, 100, b"after").finish())?;

    let files = LogFiles::open(&db.log_dir(), BASE_NAME)?;
    let cp = find_max_checkpoint(&files)?;
    assert_eq!(cp.lsn, cp_lsn);
    assert_eq!(cp.field, CheckpointField::Second);

    let stats = db.recover(db.config(), None)?;
    assert_eq!(stats.checkpoint_lsn, cp_lsn);
    assert_eq!(stats.n_records_applied, 1);
    assert!(db.read_page(before)?.is_all_zero());
    assert_eq!(&db.read_page(after)?.data[100..105], b"after");

    Ok(())
}

#[test]
fn test_invalid_slot_is_ignored() -> Result<()> {
    let mut db = TestDb::new()?;
    let first = db.writer.lsn();
    db.append(MtrBuilder::new().write(PageId::new(1, 0), 100, b"x").finish())?;
    let later = db.writer.lsn();
    db.writer.write_checkpoint_slot(&Checkpoint {
        field: CheckpointField::Second,
        no: 1,
        lsn: later,
        end_lsn: later,
    })?;

    let files = LogFiles::open(&db.log_dir(), BASE_NAME)?;
    assert_eq!(find_max_checkpoint(&files)?.lsn, later);

    // A torn second slot leaves the first one in charge
    flip_byte(&db.writer.paths()[0], LOG_CHECKPOINT_2 as u64 + 8)?;
    let cp = find_max_checkpoint(&files)?;
    assert_eq!(cp.field, CheckpointField::First);
    assert_eq!(cp.lsn, first);

    Ok(())
}

#[test]
fn test_missing_checkpoint() -> Result<()> {
    let db = TestDb::new()?;
    let path = db.writer.paths()[0].clone();
    flip_byte(&path, CheckpointField::First.offset() as u64 + 8)?;

    match db.recover(db.config(), None) {
        Err(RecoveryError::CheckpointNotFound) => {}
        other => panic!("expected CheckpointNotFound, got {:?}", other),
    }

    Ok(())
}

#[test]
fn test_checkpoint_outside_block_payload() -> Result<()> {
    let mut db = TestDb::new()?;
    // Points at a block header
    let lsn = LOG_START_LSN + 512;
    db.writer.checkpoint(lsn)?;

    match db.recover(db.config(), None) {
        Err(RecoveryError::LogCorrupted(at)) => assert_eq!(at, lsn),
        other => panic!("expected LogCorrupted, got {:?}", other),
    }

    Ok(())
}

#[test]
fn test_unsupported_log_format() -> Result<()> {
    let db = TestDb::new()?;
    let mut header = LogFileHeader::new(LOG_START_LSN, 0);
    header.version = LogFileHeader::VERSION + 1;
    write_at(&db.writer.paths()[0], 0, &header.encode())?;

    match db.recover(db.config(), None) {
        Err(RecoveryError::UnsupportedFormat) => {}
        other => panic!("expected UnsupportedFormat, got {:?}", other),
    }

    Ok(())
}

#[test]
fn test_scan_only_reports_log_end() -> Result<()> {
    let mut db = TestDb::new()?;
    let start = db.writer.lsn();
    let end = db.append(MtrBuilder::new().write(PageId::new(1, 0), 100, b"x").finish())?;

    let disk = db.open_disk()?;
    let pool = db.open_pool(disk.clone())?;
    let recv_sys = redorecv::RecvSys::create(db.config(), pool, disk, None)?;
    assert_eq!(recv_sys.scan_only()?, (start, end));
    assert_eq!(recv_sys.n_pending_pages(), 0);
    recv_sys.close();

    Ok(())
}
