//! A small, self-contained extension-to-content-type table.
//!
//! Repository content is dominated by a handful of well-known archive and
//! metadata formats; a general-purpose MIME-sniffing crate is unnecessary.

/// Extensions are matched longest-suffix-first so multi-part extensions like
/// `.tar.gz` win over the bare `.gz`.
const TABLE: &[(&str, &str)] = &[
    (".tar.gz", "application/gzip"),
    (".tar.xz", "application/x-xz"),
    (".tar.zst", "application/zstd"),
    (".tar.bz2", "application/x-bzip2"),
    (".json", "application/json"),
    (".xml", "application/xml"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".txt", "text/plain"),
    (".yaml", "application/yaml"),
    (".yml", "application/yaml"),
    (".toml", "application/toml"),
    (".gz", "application/gzip"),
    (".xz", "application/x-xz"),
    (".zst", "application/zstd"),
    (".bz2", "application/x-bzip2"),
    (".zip", "application/zip"),
    (".deb", "application/vnd.debian.binary-package"),
    (".rpm", "application/x-rpm"),
    (".whl", "application/zip"),
    (".asc", "text/plain"),
    (".sig", "application/octet-stream"),
    (".sha256", "text/plain"),
];

/// Returns a `Content-Type` for `path`, or `None` when no extension is recognized
/// (the caller then falls back to whatever default the framework applies).
pub fn get_type(path: &str) -> Option<&'static str> {
    let lower = path.to_ascii_lowercase();
    TABLE
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(_, mime)| *mime)
}

#[test]
fn test_longest_suffix_wins() {
    assert_eq!(get_type("Packages.tar.gz"), Some("application/gzip"));
    assert_eq!(get_type("archive.gz"), Some("application/gzip"));
}

#[test]
fn test_unknown_extension() {
    assert_eq!(get_type("README"), None);
}

#[test]
fn test_case_insensitive() {
    assert_eq!(get_type("FILE.JSON"), Some("application/json"));
}
