use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use lazy_static::lazy_static;

lazy_static! {
    static ref FILE_MUTEX: Mutex<()> = Mutex::new(());
}

pub fn open_with_create_append<P: AsRef<Path>>(path: P) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
}

/// Append `content` and a trailing newline to `filename`, creating the file if needed.
pub fn append_to_file<P: AsRef<Path>>(filename: P, content: &str) -> std::io::Result<()> {
    // a poisoned lock only means another writer panicked, the file is still usable
    let _guard = FILE_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let mut f = open_with_create_append(filename)?;
    writeln!(f, "{}", content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_twice() {
        let path = std::env::temp_dir().join(format!("utils_fs_test_{}.txt", std::process::id()));
        let _ = std::fs::remove_file(&path);
        append_to_file(&path, "a b").unwrap();
        append_to_file(&path, "c").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "a b\nc\n");
        std::fs::remove_file(&path).unwrap();
    }
}
