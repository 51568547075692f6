use relink::{Propagation, SubmitOptions, TargetTypes, DEFAULT_PAGE_SIZE};
use std::fs;
use std::path::PathBuf;

#[test]
fn defaults_and_builder_clamps() {
    let opts = SubmitOptions::default();
    assert_eq!(opts.page_size, DEFAULT_PAGE_SIZE);
    assert_eq!(opts.propagation, Propagation::Required);
    assert_eq!(opts.types.iter().collect::<Vec<_>>(), vec!["Patient", "Practitioner"]);

    let opts = SubmitOptions::default()
        .with_page_size(0)
        .with_io_buffers(1, 1)
        .with_propagation(Propagation::RequiresNew)
        .with_types(["Device"]);
    assert_eq!(opts.page_size, 1);
    assert_eq!(opts.read_buffer_bytes, 8 * 1024);
    assert_eq!(opts.write_buffer_bytes, 8 * 1024);
    assert_eq!(opts.propagation, Propagation::RequiresNew);
    assert!(opts.types.contains("Device"));
    assert!(!opts.types.contains("Patient"));
    assert_eq!(TargetTypes::default().len(), 2);
}

/// Only test in this binary that touches the process environment.
#[test]
fn reads_store_and_types_from_env() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("types.txt");
    fs::write(&list, "Device\nPatient\n").unwrap();

    std::env::set_var("RELINK_STORE", " /data/store ");
    std::env::set_var("RELINK_TYPES", "Practitioner; Patient,");
    std::env::set_var("RELINK_TYPES_FILE", &list);
    let opts = SubmitOptions::from_env();
    std::env::remove_var("RELINK_STORE");
    std::env::remove_var("RELINK_TYPES");
    std::env::remove_var("RELINK_TYPES_FILE");

    assert_eq!(opts.store_dir, PathBuf::from("/data/store"));
    assert_eq!(opts.types.iter().collect::<Vec<_>>(), vec!["Practitioner", "Patient", "Device"]);

    let opts = SubmitOptions::from_env();
    assert_eq!(opts.store_dir, PathBuf::from("./store"));
    assert_eq!(opts.types.len(), 2);
}
