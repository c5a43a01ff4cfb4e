use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use log::{debug, info, warn};

/// Video extensions recognized when no configuration overrides them
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".ts"];

/// A video file found under a library root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Full path to the file
    pub path: PathBuf,
    /// File name including extension
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Directory containing the file
    pub directory: PathBuf,
}

/// True when `name` ends with one of `extensions`, ignoring case.
/// Extensions carry their leading dot (".mkv").
pub fn has_extension<S: AsRef<str>>(name: &str, extensions: &[S]) -> bool {
    let lower = name.to_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.as_ref().to_lowercase()))
}

/// Walk `root` recursively and collect every file with a recognized video
/// extension.
///
/// A missing or unreadable root yields an empty list: an absent library is
/// a configuration state, not a scan failure. Entries that cannot be read
/// are logged and skipped. This does blocking I/O; async callers should run
/// it on a blocking worker.
pub fn find_video_files<S: AsRef<str>>(root: &Path, extensions: &[S]) -> Vec<ScannedFile> {
    let mut results = Vec::new();

    if !root.is_dir() {
        warn!("Library root does not exist or is not a directory: {}", root.display());
        return results;
    }

    info!("Scanning directory: {}", root.display());

    let mut entry_count = 0;
    let walker = WalkDir::new(root).follow_links(false);
    for entry in walker.into_iter() {
        entry_count += 1;

        // Log progress every 1000 entries
        if entry_count % 1000 == 0 {
            info!("Scanned {} entries so far in {}...", entry_count, root.display());
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let name = match entry.file_name().to_str() {
            Some(n) => n.to_string(),
            None => {
                warn!("Skipping non UTF-8 file name: {}", entry.path().display());
                continue;
            }
        };

        if !has_extension(&name, extensions) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Failed to stat file {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let path = entry.path().to_path_buf();
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf());

        debug!("Found video file: {} ({} bytes)", path.display(), size);
        results.push(ScannedFile {
            path,
            name,
            size,
            directory,
        });
    }

    info!(
        "Finished scanning {}: {} total entries, {} video files found",
        root.display(),
        entry_count,
        results.len()
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::fs;

    fn touch(path: &Path, bytes: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn missing_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let files = find_video_files(&dir.path().join("nope"), DEFAULT_VIDEO_EXTENSIONS);
        assert!(files.is_empty());
    }

    #[test]
    fn finds_videos_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a.mkv"), 3);
        touch(&root.join("show/season1/e01.MP4"), 5);
        touch(&root.join("show/season1/e01.srt"), 1);
        touch(&root.join("deep/er/and/deeper/clip.ts"), 7);
        touch(&root.join("notes.txt"), 1);
        touch(&root.join("movie.mkv.part"), 1);

        let files = find_video_files(root, DEFAULT_VIDEO_EXTENSIONS);
        let names: BTreeSet<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, BTreeSet::from(["a.mkv", "e01.MP4", "clip.ts"]));

        let episode = files.iter().find(|f| f.name == "e01.MP4").unwrap();
        assert_eq!(episode.size, 5);
        assert_eq!(episode.directory, root.join("show/season1"));
        assert_eq!(episode.path, root.join("show/season1/e01.MP4"));
    }

    #[test]
    fn extension_match_ignores_case() {
        assert!(has_extension("Movie.MKV", DEFAULT_VIDEO_EXTENSIONS));
        assert!(has_extension("x.Ts", &[".TS"]));
        assert!(!has_extension("movie.mkv.srt", DEFAULT_VIDEO_EXTENSIONS));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Scanning returns exactly the recognized-extension files,
        /// regardless of how deep they are nested.
        #[test]
        fn scan_returns_exactly_recognized_files(
            files in proptest::collection::btree_map(
                "[a-z]{1,8}",
                (0usize..4, prop::sample::select(vec!["mkv", "MP4", "ts", "srt", "txt", "nfo", "mkv2"])),
                1..12,
            )
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut expected = BTreeSet::new();
            for (stem, (depth, ext)) in &files {
                let mut path = dir.path().to_path_buf();
                for level in 0..*depth {
                    path.push(format!("d{}", level));
                }
                let name = format!("{}.{}", stem, ext);
                path.push(&name);
                touch(&path, 1);
                if has_extension(&name, DEFAULT_VIDEO_EXTENSIONS) {
                    expected.insert(path);
                }
            }

            let found: BTreeSet<_> = find_video_files(dir.path(), DEFAULT_VIDEO_EXTENSIONS)
                .into_iter()
                .map(|f| f.path)
                .collect();
            prop_assert_eq!(found, expected);
        }
    }
}
