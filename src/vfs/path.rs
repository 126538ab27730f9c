/// A normalized path inside the mounted archive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    /// Path segments (e.g., ["docs", "guide", "intro.txt"])
    segments: Vec<String>,
}

impl VirtualPath {
    /// Parse a path string. Leading and trailing slashes, empty segments and
    /// `.` are dropped, so `/`, `""` and `/./` all denote the root.
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(String::from)
            .collect();

        VirtualPath { segments }
    }

    /// The root path
    pub fn root() -> Self {
        VirtualPath {
            segments: Vec::new(),
        }
    }

    /// Get the path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Check if this path is the root
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append one child name
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        VirtualPath { segments }
    }

    /// Slash-joined form without a leading slash, as used for index lookups
    pub fn key(&self) -> String {
        self.segments.join("/")
    }
}

impl std::fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute() {
        let path = VirtualPath::parse("/dir/sub/file.txt");
        assert_eq!(path.segments(), &["dir", "sub", "file.txt"]);
        assert_eq!(path.key(), "dir/sub/file.txt");
    }

    #[test]
    fn test_root_forms() {
        for p in ["/", "", "//", "/./"] {
            assert!(VirtualPath::parse(p).is_root(), "{p:?} should be root");
        }
        assert_eq!(VirtualPath::root().to_string(), "/");
        assert_eq!(VirtualPath::root().key(), "");
    }

    #[test]
    fn test_trailing_slash_ignored() {
        assert_eq!(VirtualPath::parse("/dir/"), VirtualPath::parse("dir"));
    }

    #[test]
    fn test_child_and_display() {
        let path = VirtualPath::parse("/dir").child("b.txt");
        assert_eq!(path.segments(), &["dir", "b.txt"]);
        assert_eq!(path.to_string(), "/dir/b.txt");
    }
}
