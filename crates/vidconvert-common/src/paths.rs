//! Path utilities for container detection and output naming.

use std::path::{Path, PathBuf};

/// Extensions of the ISO base media containers the demuxer understands.
const MP4_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "3gp"];

/// Check if a path has an MP4-family extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use vidconvert_common::paths::is_mp4_file;
///
/// assert!(is_mp4_file(Path::new("clip.MP4")));
/// assert!(is_mp4_file(Path::new("/sdcard/DCIM/VID_0001.3gp")));
/// assert!(!is_mp4_file(Path::new("movie.mkv")));
/// ```
pub fn is_mp4_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MP4_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Derive an output path next to `input`: `<stem>_converted.mp4`.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use vidconvert_common::paths::default_output_path;
///
/// assert_eq!(
///     default_output_path(Path::new("/tmp/VID_1.mov")),
///     PathBuf::from("/tmp/VID_1_converted.mp4")
/// );
/// ```
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{stem}_converted.mp4"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mp4_file_no_extension() {
        assert!(!is_mp4_file(Path::new("video")));
        assert!(!is_mp4_file(Path::new("/path/to/dir/")));
    }

    #[test]
    fn test_default_output_path_without_parent() {
        assert_eq!(
            default_output_path(Path::new("a.mp4")),
            PathBuf::from("a_converted.mp4")
        );
    }

    #[test]
    fn test_default_output_path_without_stem() {
        assert_eq!(
            default_output_path(Path::new("/")),
            PathBuf::from("/output_converted.mp4")
        );
    }
}
