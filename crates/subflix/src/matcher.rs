//! Subtitle matching heuristic.
//!
//! A subtitle belongs to a video when it sits in the same directory and its
//! stem starts with the video's stem. Among those candidates the language
//! tags are tried in a fixed order; tags are plain substrings, so `.ar`
//! also hits `.ara` and `.en` also hits `.eng`.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::scan::has_extension;

/// Subtitle extensions recognized when no configuration overrides them
pub const DEFAULT_SUBTITLE_EXTENSIONS: &[&str] = &[".srt", ".vtt", ".sub"];

/// Language tags in priority order
pub const LANGUAGE_TAGS: &[&str] = &[".ar", ".en", ".ara", ".eng"];

/// Language recorded when a candidate carries no known tag
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// The subtitle chosen for a video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleMatch {
    pub path: PathBuf,
    pub language: String,
}

/// Find the best subtitle for `video_path` among its siblings.
///
/// Returns `None` when the directory holds no candidate or cannot be read.
pub fn find_subtitle_for_video<S: AsRef<str>>(
    video_path: &Path,
    subtitle_extensions: &[S],
) -> Option<SubtitleMatch> {
    let dir = video_path.parent()?;
    let video_stem = video_path.file_stem()?.to_str()?;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {} for subtitles: {}", dir.display(), e);
            return None;
        }
    };

    let mut siblings = Vec::new();
    for entry in entries.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            siblings.push(name.to_string());
        }
    }

    let chosen = select_subtitle(video_stem, &siblings, subtitle_extensions)?;
    debug!(
        "Matched subtitle {} ({}) for {}",
        chosen.0,
        chosen.1,
        video_path.display()
    );
    Some(SubtitleMatch {
        path: dir.join(chosen.0),
        language: chosen.1,
    })
}

/// Pure ranking step: pick one sibling name and its language
pub fn select_subtitle<'a, S: AsRef<str>>(
    video_stem: &str,
    siblings: &'a [String],
    subtitle_extensions: &[S],
) -> Option<(&'a str, String)> {
    let mut candidates: Vec<(&str, String)> = siblings
        .iter()
        .filter(|name| has_extension(name, subtitle_extensions))
        .filter_map(|name| {
            let stem = Path::new(name.as_str()).file_stem()?.to_str()?;
            if stem.starts_with(video_stem) {
                Some((name.as_str(), stem.to_lowercase()))
            } else {
                None
            }
        })
        .collect();

    if candidates.is_empty() {
        return None;
    }

    // Listing order is arbitrary; rank by name so "first" is stable
    candidates.sort_by(|a, b| a.0.cmp(b.0));

    for tag in LANGUAGE_TAGS {
        if let Some((name, _)) = candidates.iter().find(|(_, stem)| stem.contains(tag)) {
            return Some((*name, tag.trim_start_matches('.').to_string()));
        }
    }

    Some((candidates[0].0, UNKNOWN_LANGUAGE.to_string()))
}
