use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writes `text` to a sibling temp file, then swaps it into place so the
/// document at `path` is never observable half-written.
pub(crate) fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, text)?;

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(error);
        }
    }

    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("saves.tmp");
    let tmp_name = format!("{file_name}.tmp");
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn replaces_existing_content() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("doc.json");
        fs::write(&path, "old").expect("seed");

        write_text_atomic(&path, "new").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "new");
        assert!(!temp.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn creates_missing_file() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("fresh.json");

        write_text_atomic(&path, "content").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "content");
    }
}
