//! Lexical path handling shared by the resolver and the archive codec.

/// Lexically clean a `/`-separated path relative to a tree root.
///
/// Empty and `.` segments are dropped and `..` pops the previous segment.
/// Returns `None` for absolute paths and for paths that climb above the
/// root. The root itself cleans to `"."`.
pub fn clean(path: &str) -> Option<String> {
  if path.starts_with('/') || path.contains('\\') {
    return None;
  }

  let mut segments: Vec<&str> = Vec::new();
  for segment in path.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        segments.pop()?;
      }
      s => segments.push(s),
    }
  }

  if segments.is_empty() {
    Some(".".to_string())
  } else {
    Some(segments.join("/"))
  }
}

/// Split a leading `<scheme>:` off a location.
///
/// A scheme is two or more ASCII letters, so `c:/x` style drive letters and
/// plain relative paths are never mistaken for one.
pub(crate) fn split_scheme(location: &str) -> (Option<&str>, &str) {
  if let Some((scheme, rest)) = location.split_once(':')
    && scheme.len() >= 2
    && scheme.chars().all(|c| c.is_ascii_alphabetic())
  {
    return (Some(scheme), rest);
  }
  (None, location)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clean() {
    assert_eq!(clean("a/b.py").as_deref(), Some("a/b.py"));
    assert_eq!(clean("./a//b/./c").as_deref(), Some("a/b/c"));
    assert_eq!(clean("a/../b").as_deref(), Some("b"));
    assert_eq!(clean("").as_deref(), Some("."));
    assert_eq!(clean(".").as_deref(), Some("."));
  }

  #[test]
  fn test_clean_rejects_escapes() {
    assert_eq!(clean("../etc/passwd"), None);
    assert_eq!(clean("a/../../b"), None);
    assert_eq!(clean("/abs/path"), None);
    assert_eq!(clean("a\\b"), None);
  }

  #[test]
  fn test_split_scheme() {
    assert_eq!(split_scheme("file:a.py"), (Some("file"), "a.py"));
    assert_eq!(split_scheme("https://x/y"), (Some("https"), "//x/y"));
    assert_eq!(split_scheme("a.py"), (None, "a.py"));
    assert_eq!(split_scheme("c:/x"), (None, "c:/x"));
  }
}
