use crate::query::DEFAULT_PAGE_SIZE;
use crate::tx::Propagation;
use ahash::AHashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Types that may be submitted, in the order the driver visits them.
#[derive(Clone, Debug)]
pub struct TargetTypes {
    ordered: Vec<String>,
    set: AHashSet<String>,
}

impl TargetTypes {
    /// Keeps first-seen order; duplicates and blanks are dropped. Matching is case-sensitive.
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut set = AHashSet::new();
        for t in types {
            let t: String = t.into().trim().to_string();
            if !t.is_empty() && set.insert(t.clone()) {
                ordered.push(t);
            }
        }
        Self { ordered, set }
    }

    #[inline]
    pub fn contains(&self, record_type: &str) -> bool {
        self.set.contains(record_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl Default for TargetTypes {
    fn default() -> Self {
        Self::new(["Patient", "Practitioner"])
    }
}

/// User-facing options with sensible defaults and builder chaining.
#[derive(Clone, Debug)]
pub struct SubmitOptions {
    pub store_dir: PathBuf,
    pub types: TargetTypes,
    pub page_size: usize,             // identifiers per cursor advance
    pub propagation: Propagation,     // how submit_type scopes relate to an outer one
    pub progress: bool,               // show a spinner per type
    pub progress_label: Option<String>,

    // IO tuning
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./store"),
            types: TargetTypes::default(),
            page_size: DEFAULT_PAGE_SIZE,
            propagation: Propagation::Required,
            progress: true,
            progress_label: None,
            read_buffer_bytes: 64 * 1024,
            write_buffer_bytes: 64 * 1024,
        }
    }
}

impl SubmitOptions {
    /// Defaults, then `RELINK_STORE`, `RELINK_TYPES` and `RELINK_TYPES_FILE` when set.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Ok(dir) = std::env::var("RELINK_STORE") {
            if !dir.trim().is_empty() {
                opts = opts.with_store_dir(dir.trim());
            }
        }
        if let Some(types) = types_from_env() {
            opts = opts.with_types(types);
        }
        opts
    }

    pub fn with_store_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.store_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = TargetTypes::new(types);
        self
    }
    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }
    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }
    pub fn with_io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self {
        self.read_buffer_bytes = read_bytes.max(8 * 1024);
        self.write_buffer_bytes = write_bytes.max(8 * 1024);
        self
    }
}

/// Collect the allow-list from the environment.
/// - RELINK_TYPES: comma/semicolon/space separated type names
/// - RELINK_TYPES_FILE: path to a newline-separated file of type names
/// Returns None when neither yields a name.
fn types_from_env() -> Option<Vec<String>> {
    let mut out = Vec::new();

    if let Ok(s) = std::env::var("RELINK_TYPES") {
        out.extend(split_type_list(&s));
    }

    if let Ok(path) = std::env::var("RELINK_TYPES_FILE") {
        if !path.trim().is_empty() {
            match File::open(&path) {
                Ok(f) => {
                    for line in BufReader::new(f).lines().map_while(Result::ok) {
                        out.extend(split_type_list(&line));
                    }
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "RELINK_TYPES_FILE is set but cannot be opened"),
            }
        }
    }

    if out.is_empty() { None } else { Some(out) }
}

fn split_type_list(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
