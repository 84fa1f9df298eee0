//! Build archive reader and writer.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use kiln_build::{BuildFile, RuntimeData, RuntimeInfo, Symbol, clean};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::ArchiveError;

/// Archive format version. Reading fails on anything else.
pub const VERSION: &str = "kiln-build/1";

const VERSION_ENTRY: &str = "version.txt";
const INFO_ENTRY: &str = "info.json";
const REQUIREMENTS_ENTRY: &str = "requirements.json";
const EXPORTS_ENTRY: &str = "exports.json";
const RESOURCES_ENTRY: &str = "resources.json";
const COMPILED_DIR: &str = "compiled";

/// The whole-tree compiled-data key, stored as the bare `compiled` entry.
const WHOLE_TREE_KEY: &str = ".";

/// Serialize a build file to an in-memory archive.
pub fn write(build: &BuildFile) -> Result<Vec<u8>, ArchiveError> {
  let mut out = Vec::new();
  write_to(build, &mut out)?;
  Ok(out)
}

/// Serialize a build file to a writer.
#[instrument(name = "archive_write", skip_all, fields(runtimes = build.runtimes.len()))]
pub fn write_to<W: Write>(build: &BuildFile, writer: W) -> Result<(), ArchiveError> {
  let encoder = GzEncoder::new(writer, Compression::default());
  let mut tar = tar::Builder::new(encoder);

  append(&mut tar, VERSION_ENTRY, VERSION.as_bytes())?;
  append_json(&mut tar, INFO_ENTRY, &build.info)?;
  append_json(&mut tar, REQUIREMENTS_ENTRY, &build.runtime_requirements)?;

  for runtime in &build.runtimes {
    let dir = runtime.name().as_str();
    let artifact = &runtime.artifact;

    append_json(&mut tar, &format!("{dir}/{INFO_ENTRY}"), &runtime.info)?;
    append_json(&mut tar, &format!("{dir}/{EXPORTS_ENTRY}"), &artifact.exports)?;
    append_json(
      &mut tar,
      &format!("{dir}/{REQUIREMENTS_ENTRY}"),
      &artifact.requirements,
    )?;
    append(&mut tar, &format!("{dir}/{RESOURCES_ENTRY}"), b"")?;

    for (key, data) in &artifact.compiled_data {
      let entry = compiled_entry(dir, key)?;
      debug!(entry = %entry, size = data.len(), "writing compiled entry");
      append(&mut tar, &entry, data)?;
    }
  }

  tar.into_inner()?.finish()?.flush()?;
  Ok(())
}

/// Deserialize a build file from an in-memory archive.
pub fn read(data: &[u8]) -> Result<BuildFile, ArchiveError> {
  read_from(data)
}

/// Deserialize a build file from a reader.
///
/// Entries may appear in any order and any of them except `version.txt` may
/// be missing; missing fields stay empty.
#[instrument(name = "archive_read", skip_all)]
pub fn read_from<R: Read>(reader: R) -> Result<BuildFile, ArchiveError> {
  let mut archive = tar::Archive::new(GzDecoder::new(reader));
  let mut build = BuildFile::default();
  let mut version_seen = false;

  for entry in archive.entries()? {
    let mut entry = entry?;
    if !entry.header().entry_type().is_file() {
      continue;
    }

    let raw = {
      let bytes = entry.path_bytes();
      match std::str::from_utf8(&bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
          return Err(ArchiveError::InvalidEntryPath {
            path: String::from_utf8_lossy(&bytes).into_owned(),
          });
        }
      }
    };
    let path = clean(&raw)
      .filter(|p| p != ".")
      .ok_or(ArchiveError::InvalidEntryPath { path: raw })?;

    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;

    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
      [VERSION_ENTRY] => {
        if data != VERSION.as_bytes() {
          return Err(ArchiveError::VersionMismatch {
            expected: VERSION.to_string(),
            found: String::from_utf8_lossy(&data).into_owned(),
          });
        }
        version_seen = true;
      }
      [INFO_ENTRY] => build.info = parse_json(&path, &data)?,
      [REQUIREMENTS_ENTRY] => {
        if !data.is_empty() {
          build.runtime_requirements = parse_json(&path, &data)?;
        }
      }
      [dir, rest @ ..] if !rest.is_empty() => read_runtime_entry(&mut build, &path, dir, rest, data)?,
      _ => warn!(entry = %path, "skipping unknown archive entry"),
    }
  }

  if !version_seen {
    return Err(ArchiveError::MissingVersion);
  }

  Ok(build)
}

fn read_runtime_entry(
  build: &mut BuildFile,
  path: &str,
  dir: &str,
  rest: &[&str],
  data: Vec<u8>,
) -> Result<(), ArchiveError> {
  let name = Symbol::new(dir).map_err(|e| ArchiveError::InvalidEntry {
    path: path.to_string(),
    message: e.to_string(),
  })?;
  let runtime: &mut RuntimeData = build.runtime_mut_or_insert(&name);

  match rest {
    [INFO_ENTRY] => {
      let info: RuntimeInfo = parse_json(path, &data)?;
      if info.name != name {
        return Err(ArchiveError::InvalidEntry {
          path: path.to_string(),
          message: format!("runtime '{}' stored under '{}'", info.name, name),
        });
      }
      runtime.info = info;
    }
    [EXPORTS_ENTRY] => {
      if !data.is_empty() {
        runtime.artifact.exports = parse_json(path, &data)?;
      }
    }
    [REQUIREMENTS_ENTRY] => {
      if !data.is_empty() {
        runtime.artifact.requirements = parse_json(path, &data)?;
      }
    }
    [RESOURCES_ENTRY] => {
      if !data.is_empty() {
        parse_json::<serde_json::Value>(path, &data)?;
      }
    }
    [COMPILED_DIR] => {
      runtime
        .artifact
        .compiled_data
        .insert(WHOLE_TREE_KEY.to_string(), data);
    }
    [COMPILED_DIR, key @ ..] => {
      runtime.artifact.compiled_data.insert(key.join("/"), data);
    }
    _ => warn!(entry = %path, "skipping unknown runtime entry"),
  }

  Ok(())
}

/// Entry name for a compiled-data key. Keys must be clean relative paths.
fn compiled_entry(dir: &str, key: &str) -> Result<String, ArchiveError> {
  if key == WHOLE_TREE_KEY {
    return Ok(format!("{dir}/{COMPILED_DIR}"));
  }

  match clean(key) {
    Some(cleaned) if cleaned == key => Ok(format!("{dir}/{COMPILED_DIR}/{key}")),
    _ => Err(ArchiveError::InvalidEntryPath {
      path: key.to_string(),
    }),
  }
}

fn append<W: Write>(tar: &mut tar::Builder<W>, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
  let mut header = tar::Header::new_gnu();
  header.set_size(data.len() as u64);
  header.set_mode(0o644);
  header.set_mtime(0);
  tar.append_data(&mut header, path, data)?;
  Ok(())
}

fn append_json<W: Write, T: Serialize>(
  tar: &mut tar::Builder<W>,
  path: &str,
  value: &T,
) -> Result<(), ArchiveError> {
  let data = serde_json::to_vec(value).map_err(|source| ArchiveError::Json {
    entry: path.to_string(),
    source,
  })?;
  append(tar, path, &data)
}

fn parse_json<T: DeserializeOwned>(path: &str, data: &[u8]) -> Result<T, ArchiveError> {
  serde_json::from_slice(data).map_err(|source| ArchiveError::Json {
    entry: path.to_string(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use kiln_build::{BuildArtifact, BuildInfo, Requirement};
  use std::collections::{BTreeMap, HashSet};

  fn sym(text: &str) -> Symbol {
    Symbol::new(text).unwrap()
  }

  fn sample() -> BuildFile {
    let mut py = RuntimeData::new(sym("py"));
    py.artifact = BuildArtifact {
      compiled_data: BTreeMap::from([
        ("main.py".to_string(), b"main-bytecode".to_vec()),
        ("lib/deep/util.py".to_string(), b"util-bytecode".to_vec()),
      ]),
      requirements: vec![Requirement::path("lib/deep/util.py")],
      exports: vec![sym("handler")],
    };

    let mut cfg = RuntimeData::new(sym("cfg"));
    cfg.artifact.compiled_data.insert(".".to_string(), b"whole tree".to_vec());

    BuildFile {
      info: BuildInfo {
        memo: BTreeMap::from([("commit".to_string(), "abc123".to_string())]),
      },
      runtimes: vec![py, cfg],
      runtime_requirements: vec![
        Requirement::symbol(sym("os.getenv")),
        Requirement::path("data.csv"),
      ],
    }
  }

  /// Build a raw archive, bypassing the path checks `append_data` performs.
  fn raw_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let entries: Vec<(&[u8], &[u8])> = entries.iter().map(|(path, data)| (path.as_bytes(), *data)).collect();
    raw_archive_bytes(&entries)
  }

  fn raw_archive_bytes(entries: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut tar = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in entries {
      let mut header = tar::Header::new_old();
      let name = &mut header.as_old_mut().name;
      name[..path.len()].copy_from_slice(path);
      header.set_size(data.len() as u64);
      header.set_mode(0o644);
      header.set_entry_type(tar::EntryType::Regular);
      header.set_cksum();
      tar.append(&header, *data).unwrap();
    }
    tar.into_inner().unwrap().finish().unwrap()
  }

  #[test]
  fn test_round_trip() {
    let build = sample();
    let restored = read(&write(&build).unwrap()).unwrap();

    assert_eq!(restored.info, build.info);

    let names: HashSet<_> = restored.runtime_names().into_iter().cloned().collect();
    assert_eq!(names, HashSet::from([sym("py"), sym("cfg")]));
    for runtime in &build.runtimes {
      assert_eq!(
        restored.runtime(runtime.name().as_str()).unwrap(),
        runtime
      );
    }

    let requirements: HashSet<_> = restored.runtime_requirements.iter().cloned().collect();
    assert_eq!(
      requirements,
      build.runtime_requirements.iter().cloned().collect()
    );
  }

  #[test]
  fn test_whole_tree_key_stored_as_bare_entry() {
    let restored = read(&write(&sample()).unwrap()).unwrap();
    assert_eq!(
      restored.runtime("cfg").unwrap().artifact.compiled_data["."],
      b"whole tree"
    );
  }

  #[test]
  fn test_version_mismatch() {
    let data = raw_archive(&[("version.txt", b"kiln-build/0"), ("info.json", b"{}")]);
    let err = read(&data).unwrap_err();
    assert!(matches!(
      err,
      ArchiveError::VersionMismatch { ref found, .. } if found == "kiln-build/0"
    ));
  }

  #[test]
  fn test_missing_version() {
    let data = raw_archive(&[("info.json", b"{}")]);
    assert!(matches!(read(&data), Err(ArchiveError::MissingVersion)));
  }

  #[test]
  fn test_partial_archive_is_valid() {
    let data = raw_archive(&[("version.txt", VERSION.as_bytes())]);
    let build = read(&data).unwrap();
    assert_eq!(build, BuildFile::default());
  }

  #[test]
  fn test_unknown_runtime_created_on_first_sight() {
    let data = raw_archive(&[
      ("version.txt", VERSION.as_bytes()),
      ("lua/compiled/a.lua", b"chunk"),
      ("lua/exports.json", b""),
    ]);
    let build = read(&data).unwrap();
    let lua = build.runtime("lua").unwrap();
    assert_eq!(lua.artifact.compiled_data["a.lua"], b"chunk");
    assert!(lua.artifact.exports.is_empty());
  }

  #[test]
  fn test_traversal_rejected() {
    for path in ["../evil", "py/../../evil", "/etc/passwd"] {
      let data = raw_archive(&[("version.txt", VERSION.as_bytes()), (path, b"x")]);
      assert!(
        matches!(read(&data), Err(ArchiveError::InvalidEntryPath { .. })),
        "{path} should be rejected"
      );
    }
  }

  #[test]
  fn test_non_utf8_entry_path_rejected() {
    let data = raw_archive_bytes(&[
      (b"version.txt", VERSION.as_bytes()),
      (b"py/compiled/a\xff.py", b"x"),
      (b"py/compiled/a\xfe.py", b"y"),
    ]);
    assert!(matches!(read(&data), Err(ArchiveError::InvalidEntryPath { .. })));
  }

  #[test]
  fn test_corrupt_json() {
    let data = raw_archive(&[("version.txt", VERSION.as_bytes()), ("info.json", b"{not json")]);
    assert!(matches!(read(&data), Err(ArchiveError::Json { ref entry, .. }) if entry == "info.json"));
  }

  #[test]
  fn test_mismatched_runtime_info() {
    let data = raw_archive(&[
      ("version.txt", VERSION.as_bytes()),
      ("py/info.json", br#"{"name":"js"}"#),
    ]);
    assert!(matches!(read(&data), Err(ArchiveError::InvalidEntry { .. })));
  }

  #[test]
  fn test_not_gzip() {
    assert!(matches!(read(b"plain bytes"), Err(ArchiveError::Io(_))));
  }

  #[test]
  fn test_write_rejects_unclean_key() {
    let mut build = BuildFile::default();
    build
      .runtime_mut_or_insert(&sym("py"))
      .artifact
      .compiled_data
      .insert("../x.py".to_string(), vec![]);
    assert!(matches!(write(&build), Err(ArchiveError::InvalidEntryPath { .. })));
  }
}
