//! Stage script helpers
//!
//! Pipeline tests run real processes; these helpers drop small shell
//! scripts into a temporary directory.

use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// Write an executable `sh` script named `name` into `dir`.
///
/// The body is prefixed with a shebang and `set -e`.
pub fn write_stage_script(dir: &TempDir, name: &str, body: &str) -> std::io::Result<PathBuf> {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path)?;
    writeln!(file, "#!/bin/sh\nset -e\n{body}")?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_has_shebang() {
        let dir = TempDir::new().unwrap();
        let path = write_stage_script(&dir, "ok.sh", "exit 0").unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("#!/bin/sh"));
        assert!(content.contains("exit 0"));
    }
}
