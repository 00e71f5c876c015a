// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Workload descriptors given either inline or as a file.

use std::fs;
use std::path::Path;

use wsim_engine::sim_error;
use wsim_engine::types::SimError;

/// Descriptor files must be smaller than this.
pub const MAX_DESCRIPTOR_FILE_SIZE: u64 = 1024 * 1024;

/// Return the descriptor named by `arg`.
///
/// If `arg` is the path of a regular file its contents are converted with
/// [`file_to_descriptor`]. Anything else is taken to be an inline
/// descriptor.
pub fn load_descriptor(arg: &str) -> Result<String, SimError> {
    let path = Path::new(arg);
    let metadata = match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Ok(arg.to_string()),
    };
    if metadata.len() >= MAX_DESCRIPTOR_FILE_SIZE {
        return sim_error!(format!("Workload file '{arg}' is too large!"));
    }

    let text =
        fs::read_to_string(path).map_err(|e| SimError(format!("Unable to read '{arg}': {e}")))?;
    Ok(file_to_descriptor(&text))
}

/// Turn the contents of a descriptor file into a single-line descriptor.
///
/// Lines become steps. Commas after a `#` are replaced by `;` so that a
/// comment stays within one step.
#[must_use]
pub fn file_to_descriptor(text: &str) -> String {
    let mut in_comment = false;
    let mut desc: String = text
        .chars()
        .map(|c| match c {
            '#' => {
                in_comment = true;
                c
            }
            '\n' => {
                in_comment = false;
                ','
            }
            ',' if in_comment => ';',
            c => c,
        })
        .collect();

    let len = desc.trim_end_matches(',').len();
    desc.truncate(len);
    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_become_steps() {
        assert_eq!(
            file_to_descriptor("0.RCS.100.0.0\nd.10\n\n"),
            "0.RCS.100.0.0,d.10"
        );
    }

    #[test]
    fn comment_commas_are_replaced() {
        assert_eq!(
            file_to_descriptor("# render, then copy\n0.RCS.100.0.0,0.BCS.100.0.0\n"),
            "# render; then copy,0.RCS.100.0.0,0.BCS.100.0.0"
        );
    }
}
