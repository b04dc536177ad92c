use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use layerpack_domain::{LayeringError, PathEntry, Perm, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header, HeaderMode};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use super::{LayerArchiver, LayerTar};

/// Timestamp stamped on directories that do not exist on disk, matching the
/// one `HeaderMode::Deterministic` uses for real entries.
const DETERMINISTIC_MTIME: u64 = 1_153_704_088;

/// Archives store paths as deterministic GNU tarballs hashed with SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarArchiver;

impl LayerArchiver for TarArchiver {
    fn sum(&self, paths: &[PathEntry]) -> Result<LayerTar> {
        let writer = archive(paths, io::sink())?;
        Ok(LayerTar {
            digest: writer.digest(),
            size: writer.bytes_written,
            path: None,
        })
    }

    fn write(&self, paths: &[PathEntry], directory: &Path) -> Result<LayerTar> {
        fs::create_dir_all(directory)
            .map_err(|err| LayeringError::digest(directory.display().to_string(), err))?;
        let temp = NamedTempFile::new_in(directory)
            .map_err(|err| LayeringError::digest(directory.display().to_string(), err))?;
        let writer = archive(paths, temp)?;
        finalize_layer(writer, directory)
    }
}

fn finalize_layer(writer: HashingWriter<NamedTempFile>, directory: &Path) -> Result<LayerTar> {
    let digest = writer.digest();
    let HashingWriter {
        inner: temp,
        hasher,
        bytes_written: size,
    } = writer;
    let layer_path = directory.join(format!("{}.tar", hex::encode(hasher.finalize())));
    if !layer_path.exists() {
        if let Err(err) = temp.persist_noclobber(&layer_path) {
            if err.error.kind() != io::ErrorKind::AlreadyExists {
                return Err(LayeringError::digest(
                    layer_path.display().to_string(),
                    err.error,
                ));
            }
        }
    }
    Ok(LayerTar {
        digest,
        size,
        path: Some(layer_path),
    })
}

fn archive<W: Write>(paths: &[PathEntry], writer: W) -> Result<HashingWriter<W>> {
    let mut builder = Builder::new(HashingWriter::new(writer));
    let mut emitted_dirs = HashSet::new();
    for entry in paths {
        let rules = EntryRules::compile(entry)?;
        append_store_path(&mut builder, entry, &rules, &mut emitted_dirs)?;
    }
    builder
        .into_inner()
        .map_err(|err| LayeringError::digest("layer tarball", err))
}

/// Rewrite and permission rules of one path, compiled once per layer.
struct EntryRules<'a> {
    rewrite: Option<(Regex, &'a str)>,
    perms: Vec<(Regex, &'a Perm)>,
}

impl<'a> EntryRules<'a> {
    fn compile(entry: &'a PathEntry) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| LayeringError::digest(entry.path.as_str(), err))
        };
        let rewrite = entry
            .rewrite()
            .map(|rewrite| compile(&rewrite.regex).map(|regex| (regex, rewrite.repl.as_str())))
            .transpose()?;
        let perms = entry
            .perms()
            .iter()
            .map(|perm| compile(&perm.regex).map(|regex| (regex, perm)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rewrite, perms })
    }

    fn archive_name(&self, source: &str) -> String {
        let name = match &self.rewrite {
            Some((regex, repl)) => regex.replace_all(source, *repl).into_owned(),
            None => source.to_string(),
        };
        name.trim_start_matches('/').to_string()
    }

    fn apply_perms(&self, source: &str, header: &mut Header) -> Result<()> {
        for (regex, perm) in &self.perms {
            if !regex.is_match(source) {
                continue;
            }
            if !perm.mode.is_empty() {
                let mode = u32::from_str_radix(perm.mode.trim_start_matches("0o"), 8)
                    .map_err(|err| {
                        LayeringError::digest(source, format!("invalid mode '{}': {err}", perm.mode))
                    })?;
                header.set_mode(mode);
            }
            header.set_uid(perm.uid);
            header.set_gid(perm.gid);
            if !perm.uname.is_empty() {
                header
                    .set_username(&perm.uname)
                    .map_err(|err| LayeringError::digest(source, err))?;
            }
            if !perm.gname.is_empty() {
                header
                    .set_groupname(&perm.gname)
                    .map_err(|err| LayeringError::digest(source, err))?;
            }
        }
        Ok(())
    }
}

fn append_store_path<W: Write>(
    builder: &mut Builder<W>,
    entry: &PathEntry,
    rules: &EntryRules<'_>,
    emitted_dirs: &mut HashSet<String>,
) -> Result<()> {
    let walker = WalkDir::new(&entry.path)
        .follow_links(false)
        .sort_by_file_name();
    for item in walker {
        let item = item.map_err(|err| LayeringError::digest(entry.path.as_str(), err))?;
        let source = item.path().to_string_lossy();
        let name = rules.archive_name(&source);
        if name.is_empty() {
            debug!(path = %source, "skipping entry with an empty archive name");
            continue;
        }
        append_ancestors(builder, &name, emitted_dirs)?;
        append_path(builder, item.path(), &source, &name, rules, emitted_dirs)?;
    }
    Ok(())
}

fn append_ancestors<W: Write>(
    builder: &mut Builder<W>,
    name: &str,
    emitted_dirs: &mut HashSet<String>,
) -> Result<()> {
    let mut ancestor = String::new();
    let mut parts = name.split('/').filter(|part| !part.is_empty()).peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            break;
        }
        if !ancestor.is_empty() {
            ancestor.push('/');
        }
        ancestor.push_str(part);
        if emitted_dirs.contains(&ancestor) {
            continue;
        }
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_mtime(DETERMINISTIC_MTIME);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(0);
        builder
            .append_data(&mut header, &ancestor, io::empty())
            .map_err(|err| LayeringError::digest(ancestor.as_str(), err))?;
        emitted_dirs.insert(ancestor.clone());
    }
    Ok(())
}

fn append_path<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    source: &str,
    name: &str,
    rules: &EntryRules<'_>,
    emitted_dirs: &mut HashSet<String>,
) -> Result<()> {
    let metadata = fs::symlink_metadata(path).map_err(|err| LayeringError::digest(source, err))?;
    let file_type = metadata.file_type();
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&metadata, HeaderMode::Deterministic);
    if file_type.is_dir() {
        if !emitted_dirs.insert(name.to_string()) {
            debug!(path = %source, "directory already in layer");
            return Ok(());
        }
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        rules.apply_perms(source, &mut header)?;
        builder
            .append_data(&mut header, name, io::empty())
            .map_err(|err| LayeringError::digest(source, err))?;
    } else if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|err| LayeringError::digest(source, err))?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        rules.apply_perms(source, &mut header)?;
        builder
            .append_link(&mut header, name, &target)
            .map_err(|err| LayeringError::digest(source, err))?;
    } else if file_type.is_file() {
        let file = File::open(path).map_err(|err| LayeringError::digest(source, err))?;
        header.set_entry_type(EntryType::Regular);
        header.set_size(metadata.len());
        rules.apply_perms(source, &mut header)?;
        builder
            .append_data(&mut header, name, file)
            .map_err(|err| LayeringError::digest(source, err))?;
    } else {
        debug!(path = %source, "skipping special file");
    }
    Ok(())
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    fn digest(&self) -> String {
        format!("sha256:{}", hex::encode(self.hasher.clone().finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes_written = self
            .bytes_written
            .saturating_add(written.try_into().unwrap_or(u64::MAX));
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerpack_domain::{PathOptions, Rewrite};
    use std::io::Read;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::tempdir;

    struct Store {
        _temp: tempfile::TempDir,
        root: String,
    }

    impl Store {
        fn path(&self, name: &str) -> String {
            format!("{}/{name}", self.root)
        }
    }

    fn store() -> anyhow::Result<Store> {
        let temp = tempdir()?;
        let root = temp.path().join("store");
        let hello = root.join("aaa-hello");
        fs::create_dir_all(hello.join("bin"))?;
        fs::create_dir_all(hello.join("share"))?;
        fs::write(hello.join("bin/hello"), "#!/bin/sh\necho hello\n")?;
        fs::set_permissions(hello.join("bin/hello"), fs::Permissions::from_mode(0o700))?;
        fs::write(hello.join("share/greeting"), "hello\n")?;
        symlink("../bin/hello", hello.join("share/link"))?;
        fs::write(root.join("bbb-config"), "key = value\n")?;
        Ok(Store {
            root: root.to_string_lossy().into_owned(),
            _temp: temp,
        })
    }

    struct Listed {
        name: String,
        mode: u32,
        uid: u64,
        uname: Option<String>,
        kind: EntryType,
        content: String,
    }

    fn list(bytes: &[u8]) -> anyhow::Result<Vec<Listed>> {
        let mut archive = tar::Archive::new(bytes);
        let mut listed = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let header = entry.header().clone();
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            listed.push(Listed {
                name: entry.path()?.to_string_lossy().into_owned(),
                mode: header.mode()?,
                uid: header.uid()?,
                uname: header.username()?.map(ToString::to_string),
                kind: header.entry_type(),
                content,
            });
        }
        Ok(listed)
    }

    fn archived(paths: &[PathEntry]) -> anyhow::Result<Vec<Listed>> {
        let writer = archive(paths, Vec::new())?;
        list(&writer.inner)
    }

    fn find<'a>(listed: &'a [Listed], suffix: &str) -> &'a Listed {
        listed
            .iter()
            .find(|entry| entry.name.ends_with(suffix))
            .unwrap_or_else(|| panic!("no entry ending in {suffix}"))
    }

    #[test]
    fn digests_are_stable_and_order_sensitive() -> anyhow::Result<()> {
        let store = store()?;
        let hello = PathEntry::new(store.path("aaa-hello"));
        let config = PathEntry::new(store.path("bbb-config"));

        let first = TarArchiver.sum(&[hello.clone(), config.clone()])?;
        let second = TarArchiver.sum(&[hello.clone(), config.clone()])?;
        let swapped = TarArchiver.sum(&[config, hello])?;

        assert_eq!(first, second);
        assert!(first.digest.starts_with("sha256:"));
        assert_eq!(first.digest.len(), "sha256:".len() + 64);
        assert_eq!(first.size % 512, 0);
        assert_ne!(first.digest, swapped.digest);
        Ok(())
    }

    #[test]
    fn entries_are_sorted_with_ancestors_emitted_once() -> anyhow::Result<()> {
        let store = store()?;
        let listed = archived(&[
            PathEntry::new(store.path("aaa-hello")),
            PathEntry::new(store.path("bbb-config")),
        ])?;

        let names: Vec<&str> = listed.iter().map(|entry| entry.name.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len(), "{names:?}");
        assert!(names.iter().all(|name| !name.starts_with('/')));

        let hello_at = |suffix: &str| {
            names
                .iter()
                .position(|name| name.ends_with(suffix))
                .unwrap_or(usize::MAX)
        };
        assert!(hello_at("aaa-hello") < hello_at("aaa-hello/bin"));
        assert!(hello_at("aaa-hello/bin/hello") < hello_at("aaa-hello/share"));
        assert!(hello_at("share/greeting") < hello_at("share/link"));
        assert!(hello_at("share/link") < hello_at("bbb-config"));
        Ok(())
    }

    #[test]
    fn headers_are_normalized() -> anyhow::Result<()> {
        let store = store()?;
        let listed = archived(&[PathEntry::new(store.path("aaa-hello"))])?;

        let script = find(&listed, "bin/hello");
        assert_eq!(script.mode, 0o755);
        assert_eq!(script.uid, 0);
        assert_eq!(script.content, "#!/bin/sh\necho hello\n");
        assert_eq!(find(&listed, "share/greeting").mode, 0o644);
        assert_eq!(find(&listed, "share/link").kind, EntryType::Symlink);
        assert_eq!(find(&listed, "aaa-hello/share").kind, EntryType::Directory);
        Ok(())
    }

    #[test]
    fn rewrite_renames_entries() -> anyhow::Result<()> {
        let store = store()?;
        let entry = PathEntry::new(store.path("aaa-hello")).with_options(PathOptions {
            perms: Vec::new(),
            rewrite: Some(Rewrite {
                regex: "^.*/aaa-hello".into(),
                repl: "/opt/hello".into(),
            }),
        });

        let listed = archived(&[entry])?;

        let names: Vec<&str> = listed.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "opt",
                "opt/hello",
                "opt/hello/bin",
                "opt/hello/bin/hello",
                "opt/hello/share",
                "opt/hello/share/greeting",
                "opt/hello/share/link",
            ]
        );
        Ok(())
    }

    #[test]
    fn matching_perms_override_ownership() -> anyhow::Result<()> {
        let store = store()?;
        let perm = |regex: &str, mode: &str, uid| Perm {
            regex: regex.into(),
            mode: mode.into(),
            uid,
            gid: uid,
            uname: "app".into(),
            gname: "app".into(),
        };
        let entry = PathEntry::new(store.path("aaa-hello")).with_options(PathOptions {
            perms: vec![perm(".*/share/.*", "0600", 1000), perm(".*/greeting$", "0640", 2000)],
            rewrite: None,
        });

        let listed = archived(&[entry])?;

        let greeting = find(&listed, "share/greeting");
        assert_eq!(greeting.mode, 0o640);
        assert_eq!(greeting.uid, 2000);
        assert_eq!(greeting.uname.as_deref(), Some("app"));
        let script = find(&listed, "bin/hello");
        assert_eq!(script.mode, 0o755);
        assert_eq!(script.uid, 0);
        Ok(())
    }

    #[test]
    fn written_layer_is_named_after_its_digest() -> anyhow::Result<()> {
        let store = store()?;
        let out = tempdir()?;
        let paths = [PathEntry::new(store.path("bbb-config"))];

        let written = TarArchiver.write(&paths, out.path())?;
        let summed = TarArchiver.sum(&paths)?;

        assert_eq!(written.digest, summed.digest);
        let layer_path = written.path.expect("written layers have a path");
        let hex = written.digest.trim_start_matches("sha256:");
        assert_eq!(layer_path, out.path().join(format!("{hex}.tar")));
        let bytes = fs::read(&layer_path)?;
        assert_eq!(bytes.len() as u64, written.size);
        assert_eq!(hex::encode(Sha256::digest(&bytes)), hex);
        assert_eq!(fs::read_dir(out.path())?.count(), 1);

        TarArchiver.write(&paths, out.path())?;
        assert_eq!(fs::read_dir(out.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn missing_store_path_is_a_digest_error() -> anyhow::Result<()> {
        let store = store()?;
        let err = TarArchiver
            .sum(&[PathEntry::new(store.path("ccc-missing"))])
            .unwrap_err();

        assert!(matches!(err, LayeringError::Digest { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn invalid_rules_are_digest_errors() -> anyhow::Result<()> {
        let store = store()?;
        let bad_regex = PathEntry::new(store.path("bbb-config")).with_options(PathOptions {
            perms: Vec::new(),
            rewrite: Some(Rewrite {
                regex: "(".into(),
                repl: String::new(),
            }),
        });
        let bad_mode = PathEntry::new(store.path("bbb-config")).with_options(PathOptions {
            perms: vec![Perm {
                regex: ".*".into(),
                mode: "rwx".into(),
                ..Perm::default()
            }],
            rewrite: None,
        });

        for entry in [bad_regex, bad_mode] {
            let err = TarArchiver.sum(&[entry]).unwrap_err();
            assert!(matches!(err, LayeringError::Digest { .. }), "{err}");
        }
        Ok(())
    }
}
