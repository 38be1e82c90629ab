use std::collections::HashSet;
use std::path::Path;

use pgclone_catalog::QualifiedName;
use pgclone_common::Error;

/// A filter file: one qualified name per line, `#`-prefixed comments
/// ignored. Syntax beyond this is explicitly out of scope (spec.md §1); the
/// schema inspector only needs to know which objects to mark excluded.
#[derive(Debug, Clone, Default)]
pub struct FilterFile {
    excluded: HashSet<String>,
}

impl FilterFile {
    pub fn empty() -> Self {
        FilterFile::default()
    }

    pub fn parse(contents: &str) -> Self {
        let excluded = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        FilterFile { excluded }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Other(anyhow::anyhow!("reading filter file {:?}: {e}", path.as_ref())))?;
        Ok(Self::parse(&contents))
    }

    pub fn is_excluded(&self, name: &QualifiedName) -> bool {
        self.excluded.contains(&name.to_string())
    }

    /// A cheap fingerprint recorded in Setup so a resumed run can detect
    /// that the filter file changed underneath it (spec.md §3: Setup
    /// carries a "filter fingerprint").
    pub fn fingerprint(&self) -> String {
        let mut sorted: Vec<&str> = self.excluded.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let joined = sorted.join("\n");
        format!("{:016x}", fnv1a(joined.as_bytes()))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_comments_and_blank_lines() {
        let filter = FilterFile::parse("# exclude these\npublic.audit_log\n\npublic.sessions\n");
        assert!(filter.is_excluded(&QualifiedName {
            schema: "public".into(),
            name: "audit_log".into(),
        }));
        assert!(!filter.is_excluded(&QualifiedName {
            schema: "public".into(),
            name: "rental".into(),
        }));
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_line_order() {
        let a = FilterFile::parse("public.a\npublic.b\n");
        let b = FilterFile::parse("public.b\npublic.a\n");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
