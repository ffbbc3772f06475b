// Whole-file replacement for the durable text stores.
//
// The ban list, the temporary access records and the restore output files
// are all rewritten in full on every change. Each rewrite goes to a
// temporary file in the destination directory, is synced, and is then
// renamed over the destination. A crash or a failed write part way through
// leaves the previous contents in place, never a truncated file.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::StoreError;

/// Replace `path` with whatever `fill` writes. The destination is untouched
/// unless `fill` succeeds and the rename goes through.
pub(crate) fn replace_file<F>(path: &Path, fill: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let write_error = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(write_error)?;
    fill(temp.as_file_mut())
        .and_then(|()| temp.as_file_mut().flush())
        .and_then(|()| temp.as_file().sync_all())
        .map_err(write_error)?;
    temp.persist(path).map_err(|e| write_error(e.error))?;
    Ok(())
}

/// Rewrite `path` with one line per entry.
pub(crate) fn write_lines<I, S>(path: &Path, lines: I) -> Result<(), StoreError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut text = String::new();
    for line in lines {
        text.push_str(line.as_ref());
        text.push('\n');
    }
    write_text(path, &text)
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<(), StoreError> {
    replace_file(path, |out| out.write_all(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    /// Names of the entries in `dir`, to check that no temporary file is
    /// left behind.
    fn entry_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn lines_are_newline_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        write_lines(&path, ["a", "b"]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
        write_lines(&path, Vec::<String>::new()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn failed_rewrite_keeps_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("globalban.txt");
        write_lines(&path, ["alpha", "beta"]).unwrap();

        let result = replace_file(&path, |out| {
            out.write_all(b"gam")?;
            Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"))
        });

        let err = result.unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(err.to_string().contains("disk full"), "{err}");
        assert_eq!(fs::read_to_string(&path).unwrap(), "alpha\nbeta\n");
        assert_eq!(entry_names(dir.path()), vec!["globalban.txt"]);
    }

    #[test]
    fn directory_in_the_way_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bans");
        fs::create_dir(&path).unwrap();
        assert!(matches!(
            write_text(&path, "x\n"),
            Err(StoreError::Write { .. })
        ));
        assert_eq!(entry_names(dir.path()), vec!["bans"]);
    }

    #[test]
    fn missing_directory_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("list.txt");
        assert!(write_text(&path, "x\n").is_err());
    }
}
