use std::{borrow::Cow, path::Path};

/// Expands a leading `~` in a source handle.
pub fn normalise_path(path: &Path) -> Cow<'_, Path> {
    let Ok(relative) = path.strip_prefix("~") else {
        return Cow::Borrowed(path);
    };
    match dirs::home_dir() {
        Some(home) => Cow::Owned(home.join(relative)),
        None => {
            tracing::warn!(path = %path.display(), "no home directory to expand against");
            Cow::Borrowed(path)
        }
    }
}

/// Whether two paths name the same source file. Files that exist locally are
/// compared by their canonical paths.
pub fn same_file(a: &Path, b: &Path) -> bool {
    let a = normalise_path(a);
    let b = normalise_path(b);
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::{normalise_path, same_file};
    use std::path::Path;

    #[test]
    fn home_relative_handles() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(normalise_path(Path::new("~/src/main.c")), home.join("src/main.c"));
        assert_eq!(normalise_path(Path::new("/src/main.c")), Path::new("/src/main.c"));
    }

    #[test]
    fn canonical_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.c");
        std::fs::write(&file, "int main() {}\n").unwrap();
        let indirect = dir.path().join(".").join("main.c");

        assert!(same_file(&file, &indirect));
        assert!(!same_file(&file, &dir.path().join("other.c")));
    }

    #[test]
    fn missing_files_compare_literally() {
        assert!(same_file(Path::new("/no/such/main.c"), Path::new("/no/such/main.c")));
        assert!(!same_file(Path::new("/no/such/main.c"), Path::new("/no/such/util.c")));
    }
}
