//! Folder scanner
//!
//! Walks a source root, groups files by folder, and decides per folder what
//! changed since the last run: `updated` files are re-parsed, `skipped` files
//! keep their generated sections, `deleted` files drop out of the cache. A
//! hand-edited generated file is detected through the cached checksum and
//! forces full regeneration of its folder, restoring the canonical content.
//!
//! Folders are processed by a bounded worker pool. A failure in one folder
//! does not stop the others, but the failing folder's cache and generated
//! file are deleted before the error is reported, so the next run starts
//! clean there.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::cache::{self, FileEntry, FolderCache};
use crate::error::{GenError, Result};
use crate::generate::{self, FileGeneration, PreservedSection};
use crate::{annotation, barrel, model, source};
use crate::{BARREL_FILE_NAME, CACHE_FILE_NAME, GENERATED_FILE_NAME};

/// Fast pre-filter: only files mentioning a service annotation are parsed.
const PREFILTER: [&str; 2] = ["@Service", "@EndpointService"];

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub root: PathBuf,
    /// Worker count override; defaults to twice the hardware threads.
    pub workers: Option<usize>,
}

impl ScanOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workers: None,
        }
    }
}

/// Outcome for one folder.
#[derive(Debug)]
pub struct FolderReport {
    pub folder: PathBuf,
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
    /// Whether a generated file exists for this folder after processing.
    pub has_generated: bool,
    pub error: Option<String>,
}

/// Outcome for a whole run.
#[derive(Debug)]
pub struct ScanReport {
    pub folders: Vec<FolderReport>,
}

impl ScanReport {
    pub fn failed(&self) -> usize {
        self.folders.iter().filter(|f| f.error.is_some()).count()
    }

    pub fn ok(&self) -> bool {
        self.failed() == 0
    }
}

/// Run a full scan + generate pass over the root.
pub fn run(opts: &ScanOptions) -> Result<ScanReport> {
    let folders = collect_folders(&opts.root)?;
    let worker_count = opts
        .workers
        .unwrap_or_else(default_workers)
        .clamp(1, folders.len().max(1));

    tracing::debug!(
        target: "lokstra_codegen",
        root = %opts.root.display(),
        folders = folders.len(),
        workers = worker_count,
        "starting scan"
    );

    let (folder_tx, folder_rx) = crossbeam_channel::unbounded::<(PathBuf, Vec<String>)>();
    let (report_tx, report_rx) = crossbeam_channel::unbounded::<FolderReport>();
    for entry in folders {
        folder_tx.send(entry).expect("send on open channel");
    }
    drop(folder_tx);

    let root = opts.root.clone();
    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let folder_rx = folder_rx.clone();
            let report_tx = report_tx.clone();
            let root = root.clone();
            scope.spawn(move || {
                while let Ok((folder, files)) = folder_rx.recv() {
                    let report = process_folder(&root, &folder, &files);
                    if report_tx.send(report).is_err() {
                        break;
                    }
                }
            });
        }
        drop(report_tx);
    });

    let mut reports: Vec<FolderReport> = report_rx.iter().collect();
    reports.sort_by(|a, b| a.folder.cmp(&b.folder));

    for report in &reports {
        match &report.error {
            Some(err) => tracing::error!(
                target: "lokstra_codegen",
                folder = %report.folder.display(),
                error = %err,
                "folder failed"
            ),
            None => tracing::debug!(
                target: "lokstra_codegen",
                folder = %report.folder.display(),
                updated = report.updated,
                skipped = report.skipped,
                deleted = report.deleted,
                "folder processed"
            ),
        }
    }

    // The barrel is rewritten in one pass after all workers finish.
    let generated: Vec<PathBuf> = reports
        .iter()
        .filter(|r| r.error.is_none() && r.has_generated)
        .map(|r| r.folder.clone())
        .collect();
    barrel::write(&opts.root, &generated)?;

    Ok(ScanReport { folders: reports })
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

/// Group source files by folder. Folders holding only a stale cache (all
/// sources gone) are included so their outputs get cleaned up.
fn collect_folders(root: &Path) -> Result<BTreeMap<PathBuf, Vec<String>>> {
    let mut folders: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.file_type().is_dir() && e.depth() > 0 {
                let name = e.file_name().to_string_lossy();
                return name != "target" && name != "tests" && !name.starts_with('.');
            }
            true
        });
    for entry in walker {
        let entry = entry.map_err(|e| GenError::Cache {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let folder = path.parent().unwrap_or(root).to_path_buf();
        if name == CACHE_FILE_NAME {
            folders.entry(folder).or_default();
            continue;
        }
        if !name.ends_with(".rs")
            || name == GENERATED_FILE_NAME
            || name == BARREL_FILE_NAME
            || name.ends_with("_test.rs")
        {
            continue;
        }
        folders.entry(folder).or_default().push(name.to_string());
    }
    for files in folders.values_mut() {
        files.sort();
    }
    Ok(folders)
}

// =============================================================================
// Per-folder processing
// =============================================================================

fn process_folder(root: &Path, folder: &Path, files: &[String]) -> FolderReport {
    match try_process_folder(root, folder, files) {
        Ok(report) => report,
        Err(err) => {
            // Cleanup-on-error: a failing folder never keeps stale outputs.
            cache::remove(folder);
            let _ = std::fs::remove_file(folder.join(GENERATED_FILE_NAME));
            FolderReport {
                folder: folder.to_path_buf(),
                updated: 0,
                skipped: 0,
                deleted: 0,
                has_generated: false,
                error: Some(err.to_string()),
            }
        }
    }
}

fn try_process_folder(root: &Path, folder: &Path, files: &[String]) -> Result<FolderReport> {
    let cached = cache::load(folder);
    let generated_path = folder.join(GENERATED_FILE_NAME);
    let prev_generated = std::fs::read_to_string(&generated_path).ok();

    // A generated file that no longer matches the cache was edited by hand
    // (or deleted); regenerate the whole folder from source.
    let force_regen = match (&cached, &prev_generated) {
        (Some(c), Some(text)) => cache::checksum(text.as_bytes()) != c.generated_checksum,
        (Some(_), None) => true,
        (None, _) => false,
    };

    let mut updated: Vec<(String, Vec<u8>)> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for name in files {
        seen.push(name.as_str());
        let path = folder.join(name);
        let bytes = std::fs::read(&path).map_err(|e| GenError::io(&path, e))?;
        let mentions = {
            let text = String::from_utf8_lossy(&bytes);
            PREFILTER.iter().any(|p| text.contains(p))
        };
        let entry = cached.as_ref().and_then(|c| c.files.get(name));
        if !mentions {
            if entry.is_some() {
                // Previously annotated, annotations gone: reprocess so the
                // file drops out of the generated output.
                updated.push((name.clone(), bytes));
            }
            continue;
        }
        match entry {
            Some(e) if !force_regen && e.checksum == cache::checksum(&bytes) => {
                skipped.push(name.clone());
            }
            _ => updated.push((name.clone(), bytes)),
        }
    }

    let deleted: Vec<String> = cached
        .as_ref()
        .map(|c| {
            c.files
                .keys()
                .filter(|k| !seen.contains(&k.as_str()))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if updated.is_empty() && deleted.is_empty() && !force_regen {
        let has_generated = prev_generated.is_some();
        return Ok(FolderReport {
            folder: folder.to_path_buf(),
            updated: 0,
            skipped: skipped.len(),
            deleted: 0,
            has_generated,
            error: None,
        });
    }

    // Under forced regeneration nothing is preserved; everything annotated
    // gets re-parsed.
    if force_regen {
        for name in skipped.drain(..) {
            let path = folder.join(&name);
            let bytes = std::fs::read(&path).map_err(|e| GenError::io(&path, e))?;
            updated.push((name, bytes));
        }
        updated.sort_by(|a, b| a.0.cmp(&b.0));
    }

    // Parse updated files.
    let mut file_generations: Vec<FileGeneration> = Vec::new();
    let mut new_entries: BTreeMap<String, FileEntry> = BTreeMap::new();
    for (name, bytes) in &updated {
        let text = String::from_utf8_lossy(bytes);
        let annotations = annotation::scan(name, &text)?;
        let info = source::harvest(&text);
        let generations = model::collect(name, &annotations, &info)?;
        if generations.is_empty() {
            continue;
        }
        new_entries.insert(
            name.clone(),
            FileEntry {
                checksum: cache::checksum(bytes),
                annotation_count: annotations.len(),
                last_scan: cache::now_rfc3339(),
                generated: generations.iter().map(|g| g.struct_name.clone()).collect(),
            },
        );
        file_generations.push(FileGeneration {
            file_name: name.clone(),
            generations,
            local_structs: info.structs.keys().cloned().collect(),
        });
    }

    // Preserved sections come verbatim from the previous generated file.
    let mut preserved: Vec<PreservedSection> = Vec::new();
    let mut prev_imports: Vec<(String, String)> = Vec::new();
    if !skipped.is_empty() {
        if let (Some(prev), Some(c)) = (&prev_generated, &cached) {
            let (imports, sections) = generate::split_generated(prev);
            prev_imports = imports;
            for name in &skipped {
                let Some((_, text)) = sections.iter().find(|(n, _)| n == name) else {
                    continue;
                };
                let entry = c.files.get(name).cloned();
                preserved.push(PreservedSection {
                    file_name: name.clone(),
                    text: text.clone(),
                    struct_names: entry.as_ref().map(|e| e.generated.clone()).unwrap_or_default(),
                });
                if let Some(entry) = entry {
                    new_entries.insert(name.clone(), entry);
                }
            }
        }
    }

    let report_updated = updated.len();
    let report_skipped = skipped.len();
    let report_deleted = deleted.len();

    if file_generations.is_empty() && preserved.is_empty() {
        // Nothing annotated remains in this folder.
        cache::remove(folder);
        let _ = std::fs::remove_file(&generated_path);
        return Ok(FolderReport {
            folder: folder.to_path_buf(),
            updated: report_updated,
            skipped: report_skipped,
            deleted: report_deleted,
            has_generated: false,
            error: None,
        });
    }

    let module_prefix = module_prefix(root, folder);
    let content = generate::generate_folder(
        &module_prefix,
        &file_generations,
        &preserved,
        &prev_imports,
    );
    cache::write_atomic(&generated_path, content.as_bytes())?;

    let mut new_cache = FolderCache::new();
    new_cache.files = new_entries;
    new_cache.generated_checksum = cache::checksum(content.as_bytes());
    cache::save(folder, &new_cache)?;

    Ok(FolderReport {
        folder: folder.to_path_buf(),
        updated: report_updated,
        skipped: report_skipped,
        deleted: report_deleted,
        has_generated: true,
        error: None,
    })
}

/// Module path of a folder relative to the scan root.
pub fn module_prefix(root: &Path, folder: &Path) -> String {
    let rel = folder.strip_prefix(root).unwrap_or(folder);
    let mut out = String::from("crate");
    for component in rel.components() {
        out.push_str("::");
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS_SRC: &str = r#"
use crate::models::User;

// @EndpointService name="users", prefix="/api/users"
pub struct UserService {
    pub hits: u64,
}

impl UserService {
    // @Route "GET /list"
    pub async fn list(&self) -> Result<Vec<User>, String> {
        Ok(vec![])
    }
}
"#;

    const MAILER_SRC: &str = "// @Service name=\"mailer\"\npub struct Mailer {\n    pub retries: u32,\n}\n";

    fn write_tree(root: &Path) {
        std::fs::create_dir_all(root.join("users")).unwrap();
        std::fs::create_dir_all(root.join("mail")).unwrap();
        std::fs::write(root.join("users/user_service.rs"), USERS_SRC).unwrap();
        std::fs::write(root.join("mail/mailer.rs"), MAILER_SRC).unwrap();
    }

    fn scan(root: &Path) -> ScanReport {
        run(&ScanOptions::new(root)).unwrap()
    }

    #[test]
    fn test_first_run_generates() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let report = scan(dir.path());
        assert!(report.ok());
        assert!(dir.path().join("users").join(GENERATED_FILE_NAME).exists());
        assert!(dir.path().join("mail").join(GENERATED_FILE_NAME).exists());
        assert!(dir.path().join("users").join(CACHE_FILE_NAME).exists());
        let barrel = std::fs::read_to_string(dir.path().join(BARREL_FILE_NAME)).unwrap();
        assert!(barrel.contains("zz_gen_mail"));
        assert!(barrel.contains("zz_gen_users"));
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        scan(dir.path());
        let first = std::fs::read(dir.path().join("users").join(GENERATED_FILE_NAME)).unwrap();
        let first_barrel = std::fs::read(dir.path().join(BARREL_FILE_NAME)).unwrap();

        let report = scan(dir.path());
        assert!(report.ok());
        // All folders report skipped, no new work.
        for folder in &report.folders {
            assert_eq!(folder.updated, 0, "folder {:?}", folder.folder);
            assert_eq!(folder.deleted, 0);
        }
        let second = std::fs::read(dir.path().join("users").join(GENERATED_FILE_NAME)).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first_barrel,
            std::fs::read(dir.path().join(BARREL_FILE_NAME)).unwrap()
        );
    }

    #[test]
    fn test_edit_invalidates_only_its_folder() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        scan(dir.path());

        let path = dir.path().join("users/user_service.rs");
        let mut src = std::fs::read_to_string(&path).unwrap();
        src.push('\n');
        std::fs::write(&path, src).unwrap();

        let report = scan(dir.path());
        let users = report
            .folders
            .iter()
            .find(|f| f.folder.ends_with("users"))
            .unwrap();
        let mail = report
            .folders
            .iter()
            .find(|f| f.folder.ends_with("mail"))
            .unwrap();
        assert_eq!(users.updated, 1);
        assert_eq!(mail.updated, 0);
        assert_eq!(mail.skipped, 1);
    }

    #[test]
    fn test_manual_edit_of_generated_file_is_reversed() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        scan(dir.path());

        let generated = dir.path().join("users").join(GENERATED_FILE_NAME);
        let canonical = std::fs::read_to_string(&generated).unwrap();
        std::fs::write(&generated, format!("{canonical}\n// sneaky edit\n")).unwrap();

        let report = scan(dir.path());
        let users = report
            .folders
            .iter()
            .find(|f| f.folder.ends_with("users"))
            .unwrap();
        assert_eq!(users.updated, 1, "manual edit forces full regeneration");
        let restored = std::fs::read_to_string(&generated).unwrap();
        assert_eq!(restored, canonical, "manual edits disappear");
    }

    #[test]
    fn test_removing_annotation_removes_generated_file() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        scan(dir.path());
        assert!(dir.path().join("mail").join(GENERATED_FILE_NAME).exists());

        // Drop the @Service annotation; the struct stays.
        std::fs::write(
            dir.path().join("mail/mailer.rs"),
            "pub struct Mailer {\n    pub retries: u32,\n}\n",
        )
        .unwrap();
        let report = scan(dir.path());
        assert!(report.ok());
        assert!(!dir.path().join("mail").join(GENERATED_FILE_NAME).exists());
        assert!(!dir.path().join("mail").join(CACHE_FILE_NAME).exists());
        let barrel = std::fs::read_to_string(dir.path().join(BARREL_FILE_NAME)).unwrap();
        assert!(!barrel.contains("zz_gen_mail"));
        assert!(barrel.contains("zz_gen_users"));
    }

    #[test]
    fn test_failing_folder_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        // @Service on a function is a validation error.
        std::fs::create_dir_all(dir.path().join("bad")).unwrap();
        std::fs::write(
            dir.path().join("bad/bad.rs"),
            "// @Service name=\"oops\"\npub fn not_a_struct() {}\n",
        )
        .unwrap();

        let report = scan(dir.path());
        assert_eq!(report.failed(), 1);
        let bad = report
            .folders
            .iter()
            .find(|f| f.folder.ends_with("bad"))
            .unwrap();
        assert!(bad.error.as_deref().unwrap().contains("struct declaration"));
        assert!(!dir.path().join("bad").join(GENERATED_FILE_NAME).exists());
        assert!(!dir.path().join("bad").join(CACHE_FILE_NAME).exists());
        // Siblings still completed.
        assert!(dir.path().join("users").join(GENERATED_FILE_NAME).exists());
    }

    #[test]
    fn test_test_files_are_not_scanned() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        std::fs::write(
            dir.path().join("mail/mailer_test.rs"),
            "// @Service name=\"ghost\"\npub struct Ghost {}\n",
        )
        .unwrap();
        let report = scan(dir.path());
        assert!(report.ok());
        let generated =
            std::fs::read_to_string(dir.path().join("mail").join(GENERATED_FILE_NAME)).unwrap();
        assert!(!generated.contains("Ghost"));
    }

    #[test]
    fn test_barrel_sorted_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        scan(dir.path());
        let barrel = std::fs::read_to_string(dir.path().join(BARREL_FILE_NAME)).unwrap();
        let mail_pos = barrel.find("zz_gen_mail").unwrap();
        let users_pos = barrel.find("zz_gen_users").unwrap();
        assert!(mail_pos < users_pos, "imports sorted alphabetically");

        scan(dir.path());
        assert_eq!(
            barrel,
            std::fs::read_to_string(dir.path().join(BARREL_FILE_NAME)).unwrap()
        );
    }

    #[test]
    fn test_module_prefix() {
        let root = Path::new("/src");
        assert_eq!(module_prefix(root, Path::new("/src")), "crate");
        assert_eq!(module_prefix(root, Path::new("/src/users")), "crate::users");
        assert_eq!(module_prefix(root, Path::new("/src/a/b")), "crate::a::b");
    }
}
