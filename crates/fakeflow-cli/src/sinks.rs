use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use fakeflow_generate::CompiledSchema;
use tracing::debug;

use crate::CliError;

/// Write buffer in front of every output file.
pub const SINK_BUFFER_BYTES: usize = 32 * 1024;

/// Open one buffered output file per entity, in entity order. Existing files
/// are an error unless `force` is set, in which case they are truncated.
pub fn open_sinks(schema: &CompiledSchema, force: bool) -> Result<Vec<BufWriter<File>>, CliError> {
    schema
        .entities()
        .iter()
        .map(|entity| open_sink(entity.target(), force))
        .collect()
}

pub fn open_sink(path: &Path, force: bool) -> Result<BufWriter<File>, CliError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let file = options.open(path).map_err(|err| match err.kind() {
        io::ErrorKind::AlreadyExists => CliError::OutputExists(path.to_path_buf()),
        _ => CliError::Io(err),
    })?;
    debug!(event = "sink_opened", path = %path.display(), force);
    Ok(BufWriter::with_capacity(SINK_BUFFER_BYTES, file))
}

/// Write `data` next to `path` and rename it into place.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<(), CliError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> Result<PathBuf, CliError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| CliError::InvalidPath(path.to_path_buf()))?;
    let tmp_name = format!("{}.tmp", file_name.to_string_lossy());
    Ok(path.with_file_name(tmp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fakeflow_cli_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn existing_output_needs_force() {
        let dir = temp_dir();
        let path = dir.join("nested").join("users.json");

        let mut sink = open_sink(&path, false).expect("create new");
        sink.write_all(b"first\n").expect("write");
        drop(sink);

        assert!(matches!(
            open_sink(&path, false),
            Err(CliError::OutputExists(_))
        ));

        let sink = open_sink(&path, true).expect("force");
        drop(sink);
        assert_eq!(fs::read_to_string(&path).expect("read"), "");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = temp_dir();
        let path = dir.join("report.json");
        write_bytes_atomic(&path, b"{}").expect("first write");
        write_bytes_atomic(&path, b"{\"ok\":true}").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "{\"ok\":true}");
        assert!(!dir.join("report.json.tmp").exists());
        fs::remove_dir_all(dir).ok();
    }
}
