//! Full-session scenarios against the simulated target.

use alloc::string::ToString;
use alloc::vec::Vec;

use orca_dl::config::ENTRY_NOOP;
use orca_dl::sim::SimEnvironment;
use orca_dl::{Aperture, DlError, DlManager};

use crate::fixtures::{
    self, ALPHA2_EXE, ALPHA_EXE, ALPHA_POST, ALPHA_PRE, BASE_PATH, BETA_EXE,
};

fn manager() -> DlManager<SimEnvironment> {
    DlManager::new(BASE_PATH, fixtures::demo_environment())
}

#[test]
fn test_full_session_lifecycle() {
    let mut m = manager();

    // Session setup: metadata, acquire, reference, load.
    let mut parsed_names = Vec::new();
    m.parse_metadata(fixtures::session_metadata(), None, Some(&mut parsed_names))
        .unwrap();
    assert_eq!(parsed_names, ["alpha".to_string(), "beta".to_string()]);

    let handles = m.acquire(&["alpha", "beta"]).unwrap();
    m.inc_ref(&handles);
    m.load(&handles).unwrap();

    let alpha_out = m.registry().get("alpha").unwrap().loader_out().unwrap();
    let beta_out = m.registry().get("beta").unwrap().loader_out().unwrap();
    let target = &m.environment().target;

    // Alpha's two resolved kernel records.
    assert_eq!(target.word(Aperture::LoaderOut, alpha_out.base + 4), ALPHA_PRE);
    assert_eq!(target.word(Aperture::LoaderOut, alpha_out.base + 8), ALPHA_EXE);
    assert_eq!(
        target.word(Aperture::LoaderOut, alpha_out.base + 12),
        ALPHA_POST
    );
    assert_eq!(
        target.word(Aperture::LoaderOut, alpha_out.base + 16),
        ENTRY_NOOP
    );
    assert_eq!(
        target.word(Aperture::LoaderOut, alpha_out.base + 20),
        ALPHA2_EXE
    );
    assert_eq!(
        target.word(Aperture::LoaderOut, alpha_out.base + 24),
        ENTRY_NOOP
    );

    // Beta's single record, preceded by its pointer-table base stamp.
    assert_eq!(target.word(Aperture::LoaderOut, beta_out.base), 0x100);
    assert_eq!(target.word(Aperture::LoaderOut, beta_out.base + 4), ENTRY_NOOP);
    assert_eq!(target.word(Aperture::LoaderOut, beta_out.base + 8), BETA_EXE);
    assert_eq!(
        target.word(Aperture::LoaderOut, beta_out.base + 12),
        ENTRY_NOOP
    );

    // Program memory is word-swapped; plain data verbatim; shared-SFR
    // swapped; BSS cleared through the smear.
    assert_eq!(
        target.bytes(Aperture::Program, 0, 8),
        &[0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05]
    );
    assert_eq!(
        target.bytes(Aperture::Program, 8, 4),
        &[0xDD, 0xCC, 0xBB, 0xAA]
    );
    assert_eq!(
        target.bytes(Aperture::Data, 0x100, 4),
        &[0x10, 0x20, 0x30, 0x40]
    );
    assert_eq!(
        target.bytes(Aperture::SharedSfr, 0x40, 4),
        &[0xEF, 0xBE, 0xAD, 0xDE]
    );
    assert_eq!(target.bytes(Aperture::Tcm, 0x80, 16), &[0u8; 16]);
    assert_eq!(target.bytes(Aperture::Tcm, 0x90, 1), &[0x5A]);

    // Session teardown: release references, then collect.
    m.dec_ref(&handles);
    assert_eq!(m.registry().get("alpha").unwrap().ref_count(), 0);

    let evicted = m.delete_zero_reference();
    assert_eq!(evicted, 2);
    assert_eq!(m.registry().count(), 0);
    assert_eq!(m.environment().program_pool.frees, 2);
}

#[test]
fn test_second_session_reuses_resident_library() {
    let mut m = manager();
    m.parse_metadata(fixtures::session_metadata(), None, None)
        .unwrap();

    // Session 1 loads both and releases its references without collecting.
    let first = m.acquire(&["alpha", "beta"]).unwrap();
    m.inc_ref(&first);
    m.load(&first).unwrap();
    m.dec_ref(&first);

    let allocs = (
        m.environment().program_pool.allocs,
        m.environment().pointer_pool.allocs,
        m.environment().out_pool.allocs,
    );

    // Session 2 re-acquires the resident libraries: no reloading, no new
    // allocator traffic.
    let second = m.acquire(&["alpha", "beta"]).unwrap();
    m.inc_ref(&second);
    m.load(&second).unwrap();
    assert_eq!(
        allocs,
        (
            m.environment().program_pool.allocs,
            m.environment().pointer_pool.allocs,
            m.environment().out_pool.allocs,
        )
    );

    // Still referenced by session 2: the GC pass must not touch them.
    assert_eq!(m.delete_zero_reference(), 0);
    assert_eq!(m.registry().count(), 2);
}

#[test]
fn test_failed_batch_rolls_back_cleanly() {
    let mut m = manager();
    m.parse_metadata(fixtures::session_metadata(), None, None)
        .unwrap();

    // "gamma" has metadata missing entirely; the batch fails on it after
    // "alpha" already loaded.
    let handles = m.acquire(&["alpha", "gamma"]).unwrap();
    m.inc_ref(&handles);
    let result = m.load(&handles);
    assert_eq!(result, Err(DlError::MetadataMissing("gamma".to_string())));

    // Rollback: the unloaded entry goes away, the loaded one stays.
    m.dec_ref(&handles);
    m.delete_unloaded(&handles);
    assert!(!m.registry().contains("gamma"));
    assert!(m.registry().contains("alpha"));

    // The surviving library is still usable by the next session.
    let retry = m.acquire(&["alpha"]).unwrap();
    m.inc_ref(&retry);
    m.load(&retry).unwrap();
}

#[test]
fn test_allocator_pressure_then_collect() {
    let mut m = manager();
    m.parse_metadata(fixtures::session_metadata(), None, None)
        .unwrap();

    // Fill the loader-out pool so beta's allocation fails.
    m.environment_mut().out_pool.fail_at(1);

    let handles = m.acquire(&["alpha", "beta"]).unwrap();
    m.inc_ref(&handles);
    assert_eq!(m.load(&handles), Err(DlError::OutOfMemory("loader-out")));

    // Roll back the failed member, release alpha, collect it.
    m.delete_unloaded(&handles);
    m.dec_ref(&[handles[0].clone()]);
    assert_eq!(m.delete_zero_reference(), 1);
    assert_eq!(m.registry().count(), 0);
}

#[test]
fn test_disambiguated_instances_load_independently() {
    let mut m = manager();

    // The same logical library parsed twice under different instance ids.
    m.parse_metadata(fixtures::session_metadata(), Some(0), None)
        .unwrap();
    m.parse_metadata(fixtures::session_metadata(), Some(1), None)
        .unwrap();
    assert!(m.metadata().kernel_table("alpha_0").is_some());
    assert!(m.metadata().kernel_table("alpha_1").is_some());

    // Backing fixtures exist under the suffixed names too.
    let mut entry_points = orca_dl::LinkTable::new();
    entry_points.define_symbol("alpha_pre", ALPHA_PRE);
    entry_points.define_symbol("alpha_exe", ALPHA_EXE);
    entry_points.define_symbol("alpha_post", ALPHA_POST);
    entry_points.define_symbol("alpha2_exe", ALPHA2_EXE);
    let env = m.environment_mut();
    env.install("alpha_0", orca_dl::ObjectImage::default(), entry_points.clone());
    env.install("alpha_1", orca_dl::ObjectImage::default(), entry_points);

    let handles = m.acquire(&["alpha_0", "alpha_1"]).unwrap();
    m.inc_ref(&handles);
    m.load(&handles).unwrap();
    assert!(m.registry().get("alpha_0").unwrap().is_loaded());
    assert!(m.registry().get("alpha_1").unwrap().is_loaded());

    // Distinct instances own distinct loader-output regions.
    let out0 = m.registry().get("alpha_0").unwrap().loader_out().unwrap();
    let out1 = m.registry().get("alpha_1").unwrap().loader_out().unwrap();
    assert_ne!(out0.base, out1.base);
}
