//! Pure path syntax, parameterized by [`OsType`]. Nothing in this module
//! touches a filesystem — `abspath`/`realpath` require backend access and
//! live on the `Backend` trait instead, per spec §3.

use typed_path::{Utf8TypedPath, Utf8UnixPath, Utf8WindowsPath};

use crate::os::OsType;

/// A string whose separator and rules follow a backend's [`OsType`].
///
/// Cheap to construct; every method takes `&str` and returns an owned
/// `String` rather than borrowing, since the underlying `typed-path` views
/// are themselves transient.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PathSyntax {
    os: OsType,
}

impl PathSyntax {
    pub fn new(os: OsType) -> Self {
        Self { os }
    }

    fn derive<'a>(&self, path: &'a str) -> Utf8TypedPath<'a> {
        if self.os.is_unix() {
            Utf8TypedPath::Unix(Utf8UnixPath::new(path))
        } else {
            Utf8TypedPath::Windows(Utf8WindowsPath::new(path))
        }
    }

    /// Joins `base` with each of `parts` in turn, following this syntax's
    /// separator conventions.
    pub fn join(&self, base: &str, parts: &[&str]) -> String {
        let mut current = self.derive(base).to_path_buf();
        for part in parts {
            current = current.join(part);
        }
        current.to_string()
    }

    /// The final path component, e.g. `basename("a/b/f.txt") == "f.txt"`.
    pub fn basename(&self, path: &str) -> String {
        self.derive(path)
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    /// Everything but the final component, e.g. `dirname("a/b/f.txt") == "a/b"`.
    pub fn dirname(&self, path: &str) -> String {
        self.derive(path)
            .parent()
            .map(|p| p.to_string())
            .unwrap_or_default()
    }

    /// The extension of the final path component, including the leading dot
    /// (`ext("a/b.tar.gz") == ".gz"`), or an empty string if there is none.
    pub fn ext(&self, path: &str) -> String {
        match self.derive(path).extension() {
            Some(ext) => format!(".{ext}"),
            None => String::new(),
        }
    }

    /// Replaces the extension of `path` with `new_ext` (including the dot,
    /// e.g. `new_ext = ".zip"`). Used when naming an archive after the file
    /// or directory being compressed (spec §6: "File archives replace the
    /// file's extension with `.zip`").
    pub fn with_ext(&self, path: &str, new_ext: &str) -> String {
        let stem_ext = new_ext.trim_start_matches('.');
        self.derive(path)
            .with_extension(stem_ext)
            .to_string()
    }

    pub fn is_absolute(&self, path: &str) -> bool {
        self.derive(path).is_absolute()
    }

    /// Re-renders `path` (written in this syntax) using `other`'s
    /// separator conventions. Purely syntactic — used when mirroring a
    /// relative directory path computed on one backend onto another
    /// backend during a transfer (`pyrc.remote.transfer.transfer_dir`'s
    /// `to_fs.convert(...)` call).
    pub fn convert(&self, path: &str, other: OsType) -> String {
        let typed = self.derive(path);
        if other.is_unix() {
            typed.with_unix_encoding().to_string()
        } else {
            typed.with_windows_encoding().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_split_follow_posix_conventions() {
        let p = PathSyntax::new(OsType::Linux);
        let joined = p.join("a", &["b", "f.txt"]);
        assert_eq!(joined, "a/b/f.txt");
        assert_eq!(p.basename(&joined), "f.txt");
        assert_eq!(p.dirname(&joined), "a/b");
    }

    #[test]
    fn join_and_split_follow_windows_conventions() {
        let p = PathSyntax::new(OsType::Windows);
        let joined = p.join("C:\\a", &["b", "f.txt"]);
        assert_eq!(p.basename(&joined), "f.txt");
        assert_eq!(p.dirname(&joined), "C:\\a\\b");
    }

    #[test]
    fn ext_returns_last_extension_with_dot() {
        let p = PathSyntax::new(OsType::Linux);
        assert_eq!(p.ext("a/b.tar.gz"), ".gz");
        assert_eq!(p.ext("a/b"), "");
    }

    #[test]
    fn with_ext_replaces_extension_for_archiving() {
        let p = PathSyntax::new(OsType::Linux);
        assert_eq!(p.with_ext("a/b.txt", ".zip"), "a/b.zip");
        assert_eq!(p.with_ext("a/b", ".zip"), "a/b.zip");
    }

    #[test]
    fn convert_rerenders_separators_between_conventions() {
        let p = PathSyntax::new(OsType::Linux);
        let converted = p.convert("a/b/c", OsType::Windows);
        assert_eq!(converted, "a\\b\\c");
    }

    #[test]
    fn is_absolute_respects_syntax() {
        assert!(PathSyntax::new(OsType::Linux).is_absolute("/a/b"));
        assert!(!PathSyntax::new(OsType::Linux).is_absolute("a/b"));
        assert!(PathSyntax::new(OsType::Windows).is_absolute("C:\\a\\b"));
    }
}
