//! Minimal BagIt support: load, validate, tag, update and package bags.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::checksum::{checksums_match, hash_file_with, ChecksumAlgorithm};
use crate::error::{PipelineError, Result};
use crate::paths::remove_path;

const DECLARATION: &str = "bagit.txt";
const BAG_INFO: &str = "bag-info.txt";
const DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagError {
    pub message: String,
    /// Bag-relative path the problem was found in or refers to.
    pub file: String,
    pub line: Option<usize>,
}

impl BagError {
    fn new(file: impl Into<String>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: file.into(),
            line,
        }
    }
}

#[derive(Debug, Clone)]
struct Manifest {
    file_name: String,
    algorithm: ChecksumAlgorithm,
    /// Bag-relative path to (line number, checksum).
    entries: BTreeMap<String, (usize, String)>,
}

#[derive(Debug, Clone)]
pub struct Bag {
    root: PathBuf,
    declaration: Option<Vec<(String, String)>>,
    info: Vec<(String, String)>,
    manifests: Vec<Manifest>,
    tag_manifests: Vec<Manifest>,
    load_errors: Vec<BagError>,
}

impl Bag {
    /// Read the tag files of the bag rooted at `root`. Structural problems are
    /// kept and reported by [`Bag::validate`]; only I/O failures are errors.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(PipelineError::Bag(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut load_errors = Vec::new();

        let declaration_path = root.join(DECLARATION);
        let declaration = if declaration_path.is_file() {
            Some(read_tag_file(&declaration_path, DECLARATION, &mut load_errors)?)
        } else {
            None
        };

        let info_path = root.join(BAG_INFO);
        let info = if info_path.is_file() {
            read_tag_file(&info_path, BAG_INFO, &mut load_errors)?
        } else {
            Vec::new()
        };

        let mut manifests = Vec::new();
        let mut tag_manifests = Vec::new();
        let mut names: Vec<String> = fs::read_dir(&root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();

        for name in names {
            let (is_tag, algorithm) = if let Some(rest) = name.strip_prefix("tagmanifest-") {
                (true, rest.strip_suffix(".txt"))
            } else if let Some(rest) = name.strip_prefix("manifest-") {
                (false, rest.strip_suffix(".txt"))
            } else {
                continue;
            };
            let Some(algorithm) = algorithm else {
                continue;
            };
            let Some(algorithm) = ChecksumAlgorithm::from_manifest(algorithm) else {
                load_errors.push(BagError::new(
                    name.clone(),
                    None,
                    format!("Unsupported manifest algorithm {algorithm}"),
                ));
                continue;
            };
            let manifest = read_manifest(&root.join(&name), &name, algorithm, &mut load_errors)?;
            if is_tag {
                tag_manifests.push(manifest);
            } else {
                manifests.push(manifest);
            }
        }

        Ok(Self {
            root,
            declaration,
            info,
            manifests,
            tag_manifests,
            load_errors,
        })
    }

    /// Unzip `archive` next to `cache`, locate the bag root inside it and
    /// move that root to `cache`, replacing whatever was there.
    pub fn read_compressed(archive: &Path, cache: &Path) -> Result<Self> {
        let parent = cache.parent().ok_or_else(|| {
            PipelineError::Bag(format!("{} has no parent directory", cache.display()))
        })?;
        fs::create_dir_all(parent)?;

        let scratch = tempfile::Builder::new()
            .prefix(".unpack-")
            .tempdir_in(parent)?;
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        zip.extract(scratch.path())?;

        let root = find_bag_root(scratch.path())?;
        remove_path(cache)?;
        fs::rename(&root, cache)?;
        drop(scratch);

        Self::load(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// First value of a bag-info tag. Tag names compare case-insensitively.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.info
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn add_tag(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value: String = value.into();
        // Tag values are single-line in bag-info.txt.
        let value = value.replace(['\r', '\n'], " ");
        self.info.push((name.into(), value));
    }

    pub fn remove_tag(&mut self, name: &str) {
        self.info.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    /// Write a payload file at `data/<relative>`.
    pub fn create_file(&self, relative: &str, contents: &[u8]) -> Result<PathBuf> {
        let relative = safe_relative(relative).ok_or_else(|| {
            PipelineError::Bag(format!("{relative} is not a bag-relative path"))
        })?;
        let path = self.data_dir().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Payload file paths relative to the bag root (`data/...`), sorted.
    pub fn payload_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let data = self.data_dir();
        if data.is_dir() {
            collect_files(&self.root, &data, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    /// Check the bag and return every problem found.
    pub fn validate(&self) -> Result<Vec<BagError>> {
        let mut errors = self.load_errors.clone();

        match &self.declaration {
            None => errors.push(BagError::new(
                DECLARATION,
                None,
                "Bag declaration file is missing.",
            )),
            Some(tags) => {
                for required in ["BagIt-Version", "Tag-File-Character-Encoding"] {
                    if !tags.iter().any(|(key, _)| key == required) {
                        errors.push(BagError::new(
                            DECLARATION,
                            None,
                            format!("Required tag {required} is missing."),
                        ));
                    }
                }
            }
        }

        if self.manifests.is_empty() {
            errors.push(BagError::new(
                "manifest-<algorithm>.txt",
                None,
                "No payload manifest found.",
            ));
        }

        let mut listed = BTreeSet::new();
        for manifest in &self.manifests {
            self.verify_manifest(manifest, &mut errors)?;
            listed.extend(manifest.entries.keys().cloned());
        }

        if !self.manifests.is_empty() {
            for file in self.payload_files()? {
                if !listed.contains(&file) {
                    errors.push(BagError::new(
                        file,
                        None,
                        "File is not listed in any payload manifest.",
                    ));
                }
            }
        }

        for manifest in &self.tag_manifests {
            self.verify_manifest(manifest, &mut errors)?;
        }

        Ok(errors)
    }

    fn verify_manifest(&self, manifest: &Manifest, errors: &mut Vec<BagError>) -> Result<()> {
        for (path, (line, expected)) in &manifest.entries {
            let full = self.root.join(path);
            if !full.is_file() {
                errors.push(BagError::new(
                    path.clone(),
                    Some(*line),
                    format!("File listed in {} is missing.", manifest.file_name),
                ));
                continue;
            }
            let actual = hash_file_with(manifest.algorithm, &full)?;
            if !checksums_match(expected, &actual) {
                errors.push(BagError::new(
                    path.clone(),
                    Some(*line),
                    format!(
                        "Checksum mismatch in {}: expected {} but found {}.",
                        manifest.file_name,
                        expected,
                        actual.to_lowercase()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Rewrite the declaration, bag-info and all manifests so they describe
    /// the current payload.
    pub fn update(&mut self) -> Result<()> {
        let declaration = match &self.declaration {
            Some(tags) if !tags.is_empty() => tags.clone(),
            _ => vec![
                ("BagIt-Version".to_string(), "0.97".to_string()),
                ("Tag-File-Character-Encoding".to_string(), "UTF-8".to_string()),
            ],
        };
        write_tag_file(&self.root.join(DECLARATION), &declaration)?;
        self.declaration = Some(declaration);

        let payload = self.payload_files()?;
        let mut octets = 0u64;
        for file in &payload {
            octets += fs::metadata(self.root.join(file))?.len();
        }
        self.remove_tag("Payload-Oxum");
        self.remove_tag("Bagging-Date");
        self.add_tag("Payload-Oxum", format!("{octets}.{}", payload.len()));
        self.add_tag("Bagging-Date", Utc::now().format("%Y-%m-%d").to_string());
        write_tag_file(&self.root.join(BAG_INFO), &self.info)?;

        let mut algorithms: Vec<ChecksumAlgorithm> =
            self.manifests.iter().map(|m| m.algorithm).collect();
        if algorithms.is_empty() {
            algorithms.push(ChecksumAlgorithm::Sha1);
        }
        let mut tag_algorithms: Vec<ChecksumAlgorithm> =
            self.tag_manifests.iter().map(|m| m.algorithm).collect();
        if tag_algorithms.is_empty() {
            tag_algorithms = algorithms.clone();
        }

        for manifest in self.manifests.iter().chain(self.tag_manifests.iter()) {
            remove_path(&self.root.join(&manifest.file_name))?;
        }

        self.manifests = algorithms
            .into_iter()
            .map(|algorithm| {
                write_manifest(
                    &self.root,
                    &format!("manifest-{}.txt", algorithm.as_str()),
                    algorithm,
                    &payload,
                )
            })
            .collect::<Result<_>>()?;

        let mut tag_files = Vec::new();
        collect_files(&self.root, &self.root, &mut tag_files)?;
        tag_files.retain(|file| {
            !file.starts_with("data/") && !file.starts_with("tagmanifest-")
        });
        tag_files.sort();

        self.tag_manifests = tag_algorithms
            .into_iter()
            .map(|algorithm| {
                write_manifest(
                    &self.root,
                    &format!("tagmanifest-{}.txt", algorithm.as_str()),
                    algorithm,
                    &tag_files,
                )
            })
            .collect::<Result<_>>()?;

        self.load_errors.clear();
        Ok(())
    }

    /// Zip the bag to `destination`. Entries live under a top-level directory
    /// named after the destination's file stem.
    pub fn package(&self, destination: &Path) -> Result<()> {
        let prefix = destination
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                PipelineError::Bag(format!("{} has no file name", destination.display()))
            })?
            .to_string();

        let mut files = Vec::new();
        collect_files(&self.root, &self.root, &mut files)?;
        files.sort();

        let mut zip = ZipWriter::new(File::create(destination)?);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.add_directory(format!("{prefix}/"), options)?;

        for file in files {
            zip.start_file(format!("{prefix}/{file}"), options)?;
            std::io::copy(&mut File::open(self.root.join(&file))?, &mut zip)?;
        }

        zip.finish()?;
        Ok(())
    }
}

fn find_bag_root(scratch: &Path) -> Result<PathBuf> {
    if scratch.join(DECLARATION).is_file() {
        return Ok(scratch.to_path_buf());
    }

    let entries: Vec<PathBuf> = fs::read_dir(scratch)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();

    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(scratch.to_path_buf()),
    }
}

fn read_tag_file(
    path: &Path,
    name: &str,
    errors: &mut Vec<BagError>,
) -> Result<Vec<(String, String)>> {
    let contents = fs::read_to_string(path)?;
    let contents = contents.strip_prefix('\u{feff}').unwrap_or(&contents);
    let mut tags: Vec<(String, String)> = Vec::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        if raw.trim().is_empty() {
            continue;
        }
        if raw.starts_with(' ') || raw.starts_with('\t') {
            match tags.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(raw.trim());
                }
                None => errors.push(BagError::new(
                    name,
                    Some(line),
                    "Continuation line without a preceding tag.",
                )),
            }
            continue;
        }
        match raw.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                tags.push((key.trim().to_string(), value.trim().to_string()));
            }
            _ => errors.push(BagError::new(name, Some(line), "Malformed tag line.")),
        }
    }

    Ok(tags)
}

fn write_tag_file(path: &Path, tags: &[(String, String)]) -> Result<()> {
    let mut out = String::new();
    for (key, value) in tags {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

fn read_manifest(
    path: &Path,
    name: &str,
    algorithm: ChecksumAlgorithm,
    errors: &mut Vec<BagError>,
) -> Result<Manifest> {
    let contents = fs::read_to_string(path)?;
    let mut entries = BTreeMap::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim_end();
        if raw.is_empty() {
            continue;
        }
        let Some((checksum, file)) = raw.split_once(char::is_whitespace) else {
            errors.push(BagError::new(name, Some(line), "Malformed manifest line."));
            continue;
        };
        let file = file.trim_start();
        match safe_relative(file) {
            Some(relative) if !file.is_empty() => {
                let key = relative.to_string_lossy().replace('\\', "/");
                entries.insert(key, (line, checksum.to_string()));
            }
            _ => errors.push(BagError::new(
                name,
                Some(line),
                format!("Manifest path {file} is outside the bag."),
            )),
        }
    }

    Ok(Manifest {
        file_name: name.to_string(),
        algorithm,
        entries,
    })
}

fn write_manifest(
    root: &Path,
    name: &str,
    algorithm: ChecksumAlgorithm,
    files: &[String],
) -> Result<Manifest> {
    let mut out = String::new();
    let mut entries = BTreeMap::new();
    for (index, file) in files.iter().enumerate() {
        let checksum = hash_file_with(algorithm, &root.join(file))?.to_lowercase();
        out.push_str(&format!("{checksum}  {file}\n"));
        entries.insert(file.clone(), (index + 1, checksum));
    }
    fs::write(root.join(name), out)?;
    Ok(Manifest {
        file_name: name.to_string(),
        algorithm,
        entries,
    })
}

/// Accept only plain relative paths that stay inside the bag.
fn safe_relative(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    let mut out = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
