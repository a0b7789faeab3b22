use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Decode bytes as UTF-8, replacing invalid sequences with U+FFFD.
///
/// A leading byte order mark is kept; the require scanner tolerates it.
#[must_use]
pub fn decode_lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Read a host file as text, lossily.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    fs::read(path).map(decode_lossy)
}

/// Write bytes through a sibling temp file and rename it into place.
///
/// Missing parent directories are created first. Readers see either the old
/// contents or the new contents.
///
/// # Errors
/// Returns an error if the directory, the temp file, or the rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let temp_path = parent.join(format!(
        ".{name}.{}.{}.partial",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        if cfg!(windows) {
            // Rename onto an existing file fails on Windows.
            fs::copy(&temp_path, path)?;
            let _ = fs::remove_file(&temp_path);
            return Ok(());
        }
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}
