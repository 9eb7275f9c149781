//! Barrel-file emission
//!
//! The barrel lives at the scan root and exists only to pull every folder's
//! generated module into the build and offer one `register_all` entry point.
//! Module declarations are sorted by path so the file is stable across runs.

use std::path::{Path, PathBuf};

use crate::cache::write_atomic;
use crate::error::Result;
use crate::generate::HEADER;
use crate::{BARREL_FILE_NAME, GENERATED_FILE_NAME};

/// Rewrite the barrel for the given folders (each known to hold a generated
/// file). An empty list removes the barrel entirely.
pub fn write(root: &Path, folders: &[PathBuf]) -> Result<()> {
    let barrel_path = root.join(BARREL_FILE_NAME);
    if folders.is_empty() {
        let _ = std::fs::remove_file(&barrel_path);
        return Ok(());
    }

    let mut entries: Vec<(String, String)> = folders
        .iter()
        .map(|folder| {
            let rel = folder
                .strip_prefix(root)
                .unwrap_or(folder)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>();
            let file = if rel.is_empty() {
                GENERATED_FILE_NAME.to_string()
            } else {
                format!("{}/{}", rel.join("/"), GENERATED_FILE_NAME)
            };
            let module = if rel.is_empty() {
                "zz_gen".to_string()
            } else {
                format!("zz_gen_{}", rel.join("_").replace(['-', '.'], "_"))
            };
            (file, module)
        })
        .collect();
    entries.sort();

    let mut out = String::new();
    out.push_str(HEADER);
    out.push_str("\n\n");
    for (file, module) in &entries {
        out.push_str(&format!("#[path = \"{file}\"]\npub mod {module};\n"));
    }
    out.push('\n');
    out.push_str("pub fn register_all(reg: &lokstra::registry::Registry) {\n");
    for (_, module) in &entries {
        out.push_str(&format!("    {module}::register(reg);\n"));
    }
    out.push_str("}\n");

    write_atomic(&barrel_path, out.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrel_content() {
        let dir = tempfile::tempdir().unwrap();
        let folders = vec![dir.path().join("users"), dir.path().join("db")];
        write(dir.path(), &folders).unwrap();

        let text = std::fs::read_to_string(dir.path().join(BARREL_FILE_NAME)).unwrap();
        assert!(text.contains("#[path = \"db/zz_generated.lokstra.rs\"]\npub mod zz_gen_db;"));
        assert!(text.contains("#[path = \"users/zz_generated.lokstra.rs\"]\npub mod zz_gen_users;"));
        let db = text.find("zz_gen_db").unwrap();
        let users = text.find("zz_gen_users").unwrap();
        assert!(db < users);
        assert!(text.contains("zz_gen_db::register(reg);"));
    }

    #[test]
    fn test_root_folder_module() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &[dir.path().to_path_buf()]).unwrap();
        let text = std::fs::read_to_string(dir.path().join(BARREL_FILE_NAME)).unwrap();
        assert!(text.contains("#[path = \"zz_generated.lokstra.rs\"]\npub mod zz_gen;"));
    }

    #[test]
    fn test_empty_list_removes_barrel() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &[dir.path().join("users")]).unwrap();
        assert!(dir.path().join(BARREL_FILE_NAME).exists());
        write(dir.path(), &[]).unwrap();
        assert!(!dir.path().join(BARREL_FILE_NAME).exists());
    }
}
