//! Path helpers shared by the walker, the scorer and the storage adapter.

use std::path::{Component, MAIN_SEPARATOR, Path};

/// Number of normal segments in a path (`/a/b/c.txt` has 3).
#[inline]
pub fn path_depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

/// True when the file name itself starts with a dot.
#[inline]
pub fn is_hidden_file_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n != "." && n != "..")
}

/// True when any segment of the path is a dot-file or dot-directory.
pub fn is_hidden_path(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(segment) => segment
            .to_str()
            .is_some_and(|s| s.starts_with('.') && s.len() > 1),
        _ => false,
    })
}

/// Lexicographic bounds `[lower, upper)` covering every strict descendant of `path`
/// when paths are compared as strings.
///
/// The upper bound replaces the trailing separator with the next byte value so the
/// range can be served by the unique index on `indexed_file.path` without `LIKE`.
pub fn descendant_bounds(path: &Path) -> (String, String) {
    let mut base = path.to_string_lossy().into_owned();
    while base.len() > 1 && base.ends_with(MAIN_SEPARATOR) {
        base.pop();
    }

    let lower = if base.ends_with(MAIN_SEPARATOR) {
        base.clone()
    } else {
        format!("{base}{MAIN_SEPARATOR}")
    };

    let mut upper = lower.clone();
    upper.pop();
    upper.push((MAIN_SEPARATOR as u8 + 1) as char);

    (lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_family = "windows"))]
    fn depth_counts_normal_segments() {
        assert_eq!(path_depth(Path::new("/")), 0);
        assert_eq!(path_depth(Path::new("/home")), 1);
        assert_eq!(path_depth(Path::new("/home/user/doc.txt")), 3);
    }

    #[test]
    fn hidden_detection() {
        assert!(is_hidden_file_name(Path::new("/home/user/.bashrc")));
        assert!(!is_hidden_file_name(Path::new("/home/user/.config/app.toml")));
        assert!(is_hidden_path(Path::new("/home/user/.config/app.toml")));
        assert!(!is_hidden_path(Path::new("/home/user/config/app.toml")));
        assert!(!is_hidden_path(Path::new("../user/app.toml")));
    }

    #[test]
    #[cfg(not(target_family = "windows"))]
    fn descendant_bounds_cover_children_only() {
        let (lower, upper) = descendant_bounds(Path::new("/srv/data/"));
        assert_eq!(lower, "/srv/data/");
        assert_eq!(upper, "/srv/data0");

        let inside = "/srv/data/file.txt";
        let sibling = "/srv/data-old/file.txt";
        assert!(inside >= lower.as_str() && inside < upper.as_str());
        assert!(!(sibling >= lower.as_str() && sibling < upper.as_str()));

        let (lower, upper) = descendant_bounds(Path::new("/"));
        assert_eq!(lower, "/");
        assert_eq!(upper, "0");
    }
}
