use std::path::{Path, PathBuf};

use crate::error::{MatchError, Result};
use crate::ust::{CodeFile, Language};

/// Suffix of unified-tree dump files.
pub const UST_DUMP_SUFFIX: &str = ".ust.json";

/// Default per-file size cap (1 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_048_576;

/// Where the workflow gets its input files.
pub trait SourceRepository: Send + Sync {
    /// Names of all candidate files, relative to the repository root.
    fn file_names(&self) -> Result<Vec<String>>;

    /// Checked before any read; ignored files produce no statistics.
    fn is_file_ignored(&self, name: &str) -> bool;

    fn read_file(&self, name: &str) -> Result<CodeFile>;

    /// Languages the run is restricted to.
    fn languages(&self) -> &[Language];
}

/// Shared extension rule: files with a known extension outside `languages`
/// or with an unrecognized extension are ignored; files without an
/// extension are left to language detection.
fn ignored_by_extension(name: &str, languages: &[Language], ust_dumps: bool) -> bool {
    if ust_dumps {
        return !name.ends_with(UST_DUMP_SUFFIX);
    }
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file_name.rsplit_once('.') {
        None => false,
        Some(("", _)) => true,
        Some((_, ext)) => {
            let language = Language::from_extension(ext);
            language == Language::Unknown || !languages.contains(&language)
        }
    }
}

/// A file or a directory tree on disk, walked with `.gitignore` support.
#[derive(Debug, Clone)]
pub struct FilesRepository {
    root: PathBuf,
    single_file: Option<String>,
    languages: Vec<Language>,
    exclude: Vec<glob::Pattern>,
    max_file_size: u64,
    ust_dumps: bool,
}

impl FilesRepository {
    pub fn new(path: impl AsRef<Path>, languages: Vec<Language>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MatchError::Config(format!(
                "input path not found: {}",
                path.display()
            )));
        }
        let (root, single_file) = if path.is_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (root, Some(name))
        } else {
            (path.to_path_buf(), None)
        };
        Ok(Self {
            root,
            single_file,
            languages,
            exclude: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            ust_dumps: false,
        })
    }

    /// Exclude relative paths matching any of `patterns`.
    pub fn with_exclude(mut self, patterns: &[String]) -> Result<Self> {
        for pattern in patterns {
            let compiled = glob::Pattern::new(pattern).map_err(|e| {
                MatchError::Config(format!("invalid exclude pattern {pattern:?}: {e}"))
            })?;
            self.exclude.push(compiled);
        }
        Ok(self)
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Accept only unified-tree dumps instead of source files.
    pub fn with_ust_dumps(mut self, enabled: bool) -> Self {
        self.ust_dumps = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceRepository for FilesRepository {
    fn file_names(&self) -> Result<Vec<String>> {
        if let Some(name) = &self.single_file {
            return Ok(vec![name.clone()]);
        }
        let walker = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .build();

        let mut names = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "walk error");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            names.push(relative);
        }
        names.sort();
        Ok(names)
    }

    fn is_file_ignored(&self, name: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(name)) {
            return true;
        }
        if ignored_by_extension(name, &self.languages, self.ust_dumps) {
            return true;
        }
        match std::fs::metadata(self.root.join(name)) {
            Ok(meta) => meta.len() > self.max_file_size,
            Err(_) => false,
        }
    }

    fn read_file(&self, name: &str) -> Result<CodeFile> {
        let bytes = std::fs::read(self.root.join(name))?;
        let code = String::from_utf8_lossy(&bytes).into_owned();
        Ok(CodeFile::new(name, code).with_root(&self.root))
    }

    fn languages(&self) -> &[Language] {
        &self.languages
    }
}

/// Sources held in memory, keyed by relative path.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    files: Vec<(String, String)>,
    languages: Vec<Language>,
}

impl MemoryRepository {
    pub fn new(languages: Vec<Language>) -> Self {
        Self {
            files: Vec::new(),
            languages,
        }
    }

    pub fn with_file(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        self.files.push((name.into(), code.into()));
        self
    }
}

impl SourceRepository for MemoryRepository {
    fn file_names(&self) -> Result<Vec<String>> {
        Ok(self.files.iter().map(|(name, _)| name.clone()).collect())
    }

    fn is_file_ignored(&self, name: &str) -> bool {
        ignored_by_extension(name, &self.languages, false)
    }

    fn read_file(&self, name: &str) -> Result<CodeFile> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, code)| CodeFile::new(n.clone(), code.clone()))
            .ok_or_else(|| {
                MatchError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{name} not in memory repository"),
                ))
            })
    }

    fn languages(&self) -> &[Language] {
        &self.languages
    }
}
