// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

use std::io::Write;

use tempfile::{NamedTempFile, TempDir};
use wsim::loader::{MAX_DESCRIPTOR_FILE_SIZE, load_descriptor};

#[test]
fn inline_descriptor() {
    assert_eq!(
        load_descriptor("0.RCS.100.0.0,d.10").unwrap(),
        "0.RCS.100.0.0,d.10"
    );
}

#[test]
fn descriptor_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# Render then copy, waiting for the copy").unwrap();
    writeln!(file, "0.RCS.1000.0.0").unwrap();
    writeln!(file, "0.BCS.500.-1.1").unwrap();
    writeln!(file).unwrap();

    assert_eq!(
        load_descriptor(file.path().to_str().unwrap()).unwrap(),
        "# Render then copy; waiting for the copy,0.RCS.1000.0.0,0.BCS.500.-1.1"
    );
}

#[test]
fn directory_is_not_a_file() {
    let dir = TempDir::new().unwrap();
    let name = dir.path().to_str().unwrap();
    assert_eq!(load_descriptor(name).unwrap(), name);
}

#[test]
fn oversized_file() {
    let mut file = NamedTempFile::new().unwrap();
    let line = "d.1000\n".repeat(1024);
    while file.as_file().metadata().unwrap().len() < MAX_DESCRIPTOR_FILE_SIZE {
        file.write_all(line.as_bytes()).unwrap();
    }
    file.flush().unwrap();

    let err = load_descriptor(file.path().to_str().unwrap()).unwrap_err();
    assert!(err.0.ends_with("is too large!"));
}
