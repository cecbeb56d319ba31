// SPDX-License-Identifier: GPL-3.0-only

//! Named-pipe creation for the muxer's audio input
//!
//! The muxer process reads interleaved PCM from a FIFO while raw video
//! arrives on its stdin. This is the only unsafe interop in the crate; keep
//! it that way.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Create a FIFO at `path` with owner read/write permissions
///
/// Fails if the path already exists.
pub fn create_fifo(path: &Path) -> io::Result<()> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Remove a FIFO, ignoring a missing file
pub fn remove_fifo(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove fifo"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::fs::FileTypeExt;

    #[test]
    fn test_create_fifo_makes_a_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.fifo");
        create_fifo(&path).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
    }

    #[test]
    fn test_create_fifo_rejects_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken");
        std::fs::write(&path, b"x").unwrap();
        assert!(create_fifo(&path).is_err());
    }

    #[test]
    fn test_create_fifo_rejects_interior_nul() {
        let path = Path::new("bad\0name");
        assert!(create_fifo(path).is_err());
    }

    #[test]
    fn test_fifo_carries_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe");
        create_fifo(&path).unwrap();

        let reader_path = path.clone();
        let reader = std::thread::spawn(move || {
            let mut data = Vec::new();
            std::fs::File::open(reader_path)
                .unwrap()
                .read_to_end(&mut data)
                .unwrap();
            data
        });

        let mut writer = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"pcm pcm pcm").unwrap();
        drop(writer);

        assert_eq!(reader.join().unwrap(), b"pcm pcm pcm");
    }

    #[test]
    fn test_remove_fifo_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        create_fifo(&path).unwrap();
        remove_fifo(&path);
        remove_fifo(&path);
        assert!(!path.exists());
    }
}
