use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes the rendered stub files into the output directory.
///
/// The directory is created if absent and existing files are overwritten
/// unconditionally: a following run always regenerates the full set. Any
/// filesystem failure aborts the run with the offending path.
pub fn write_stub_files(
    files: &BTreeMap<PathBuf, String>,
    target_dir: impl AsRef<Path>,
) -> Result<()> {
    let target_dir = target_dir.as_ref();
    fs::create_dir_all(target_dir).with_context(|| {
        format!(
            "Failed to create the output directory {}",
            target_dir.display()
        )
    })?;
    for (file_name, content) in files {
        let path = target_dir.join(file_name);
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_overwrites_files() {
        let target_dir = tempfile::tempdir().unwrap();
        let files = BTreeMap::from([
            (PathBuf::from("app.pypredef"), "class Image:\n    pass\n".to_string()),
            (PathBuf::from("app.pdb.pypredef"), "def f():\n    pass\n".to_string()),
        ]);
        write_stub_files(&files, target_dir.path()).unwrap();
        let files = BTreeMap::from([(PathBuf::from("app.pypredef"), "VERSION = str\n".to_string())]);
        write_stub_files(&files, target_dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(target_dir.path().join("app.pypredef")).unwrap(),
            "VERSION = str\n"
        );
        // Files from the previous run are left alone
        assert!(target_dir.path().join("app.pdb.pypredef").exists());
    }

    #[test]
    fn creates_missing_directories() {
        let target_dir = tempfile::tempdir().unwrap();
        let nested = target_dir.path().join("stubs").join("pypredefs");
        let files = BTreeMap::from([(PathBuf::from("app.pypredef"), String::new())]);
        write_stub_files(&files, &nested).unwrap();
        assert!(nested.join("app.pypredef").exists());
    }

    #[test]
    fn reports_the_offending_path_on_failure() {
        let target_dir = tempfile::tempdir().unwrap();
        // A regular file where the output directory should be
        let blocking_file = target_dir.path().join("out");
        fs::write(&blocking_file, "").unwrap();
        let files = BTreeMap::from([(PathBuf::from("app.pypredef"), String::new())]);
        let error = write_stub_files(&files, &blocking_file).unwrap_err();
        assert!(error.to_string().contains("out"), "{error}");
    }
}
