//! Numbered image fragments (`<name>.partN`).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Extension of whole images.
pub const IMAGE_EXTENSION: &str = "iso";

const PART_MARKER: &str = ".part";

/// One piece of a split image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub path: PathBuf,
    /// Position of this piece, from the `partN` suffix.
    pub number: u64,
    pub size: u64,
}

/// Extract `N` from a fragment file name.
///
/// Names starting with `_` or `.` are system artifacts (AppleDouble files and
/// the like) and never count as fragments.
pub fn part_number(file_name: &str) -> Option<u64> {
    if file_name.starts_with(['_', '.']) {
        return None;
    }
    let idx = file_name.rfind(PART_MARKER)?;
    if idx == 0 {
        return None;
    }
    let digits = &file_name[idx + PART_MARKER.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Whether `file_name` names a whole image.
pub fn is_image_file(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(IMAGE_EXTENSION))
}

/// Sort fragments into concatenation order.
///
/// The numeric suffix is the only ordering that matters; the file name
/// breaks ties so the result is deterministic.
pub fn sort_fragments(fragments: &mut [Fragment]) {
    fragments.sort_by(|a, b| {
        a.number
            .cmp(&b.number)
            .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
    });
}

/// Find all fragments directly inside `dir`, in concatenation order.
pub fn collect_fragments(dir: &Path) -> std::io::Result<Vec<Fragment>> {
    let mut fragments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(number) = name.to_str().and_then(part_number) else {
            continue;
        };
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        fragments.push(Fragment {
            path: entry.path(),
            number,
            size: metadata.len(),
        });
    }

    sort_fragments(&mut fragments);
    for pair in fragments.windows(2) {
        if pair[0].number == pair[1].number {
            warn!(
                first = %pair[0].path.display(),
                second = %pair[1].path.display(),
                "Two fragments share part number {}",
                pair[0].number
            );
        }
    }
    Ok(fragments)
}

/// Sum of fragment sizes.
pub fn total_size(fragments: &[Fragment]) -> u64 {
    fragments.iter().map(|f| f.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_number() {
        assert_eq!(part_number("win.iso.part1"), Some(1));
        assert_eq!(part_number("disk.part12"), Some(12));
        assert_eq!(part_number("a.part.part007"), Some(7));
        assert_eq!(part_number("disk.part"), None);
        assert_eq!(part_number("disk.part1a"), None);
        assert_eq!(part_number("disk.iso"), None);
        assert_eq!(part_number(".part3"), None);
        assert_eq!(part_number("._disk.part1"), None);
        assert_eq!(part_number("_disk.part1"), None);
        assert_eq!(part_number(".disk.part1"), None);
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file("Win11.iso"));
        assert!(is_image_file("WIN11.ISO"));
        assert!(!is_image_file("Win11.iso.part1"));
        assert!(!is_image_file("iso"));
    }

    #[test]
    fn test_numeric_order_not_lexicographic() {
        let mut fragments: Vec<Fragment> = (1..=12)
            .rev()
            .map(|n| Fragment {
                path: PathBuf::from(format!("x.part{n}")),
                number: n,
                size: 0,
            })
            .collect();
        sort_fragments(&mut fragments);

        let order: Vec<u64> = fragments.iter().map(|f| f.number).collect();
        assert_eq!(order, (1..=12).collect::<Vec<_>>());
        let pos2 = fragments.iter().position(|f| f.number == 2).unwrap();
        let pos10 = fragments.iter().position(|f| f.number == 10).unwrap();
        assert!(pos2 < pos10);
    }

    #[test]
    fn test_collect_fragments_skips_non_fragments() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["x.part10", "x.part2", "x.part1", "._x.part3", "x.iso", "readme"] {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        fs::create_dir(dir.path().join("y.part4")).unwrap();

        let fragments = collect_fragments(dir.path()).unwrap();
        let names: Vec<_> = fragments
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["x.part1", "x.part2", "x.part10"]);
        assert_eq!(total_size(&fragments), 7 + 7 + 8);
    }
}
