//! Content resolver
//!
//! Layout of the content root:
//! ```text
//! content/
//!   01-python-basics/
//!     01-variables.mdx
//!     01-variables-quiz.json
//!     02-control-flow.mdx
//! ```
//! One directory per unit, one `.mdx` file per section, and an optional
//! `<section>-quiz.json` next to it.

pub mod blocks;

use regex::Regex;
use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::utils::cached_regex;
use crate::quiz::QuizData;

pub use blocks::{extract_code_blocks, CodeBlockSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMeta {
    pub slug: String,
    pub title: String,
    /// Numeric filename prefix, if any
    pub order: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitMeta {
    pub slug: String,
    pub title: String,
    pub sections: Vec<SectionMeta>,
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("section {unit}/{section} not found")]
    NotFound { unit: String, section: String },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Turn `01-data-frames` into `Data Frames`
pub fn title_from_slug(slug: &str) -> String {
    let without_prefix = match slug.split_once('-') {
        Some((prefix, rest)) if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) => {
            rest
        }
        _ => slug,
    };

    without_prefix
        .split('-')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Leading digits of the first dash-separated segment
fn order_from_slug(slug: &str) -> Option<u32> {
    let first = slug.split('-').next()?;
    let digits: String = first.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn frontmatter() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"^---\s*([\s\S]*?)\s*---")
}

fn frontmatter_title() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r#"(?m)title:\s*['"]?(.*?)['"]?\s*$"#)
}

/// `title:` from the frontmatter block, if any
pub fn frontmatter_title_of(source: &str) -> Option<String> {
    let block = frontmatter()?.captures(source)?.get(1)?.as_str();
    let title = frontmatter_title()?.captures(block)?.get(1)?.as_str().trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Sort by order, unordered sections last
fn compare_sections(a: &SectionMeta, b: &SectionMeta) -> Ordering {
    match (a.order, b.order) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Reads units, sections and quizzes from the content root
#[derive(Debug, Clone)]
pub struct ContentResolver {
    root: PathBuf,
}

impl ContentResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ContentError + '_ {
        move |source| ContentError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Every unit with its sections, sorted by slug
    pub fn list_units(&self) -> Result<Vec<UnitMeta>, ContentError> {
        let mut slugs = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(Self::io_error(&self.root))? {
            let entry = entry.map_err(Self::io_error(&self.root))?;
            if entry.path().is_dir() {
                slugs.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        slugs.sort();

        slugs
            .into_iter()
            .map(|slug| {
                Ok(UnitMeta {
                    title: self.unit_title(&slug),
                    sections: self.list_sections(&slug)?,
                    slug,
                })
            })
            .collect()
    }

    /// Sections of `unit`; a missing unit has none
    pub fn list_sections(&self, unit: &str) -> Result<Vec<SectionMeta>, ContentError> {
        let unit_dir = self.root.join(unit);
        if !unit_dir.is_dir() {
            debug!("Unit {} not found under {:?}", unit, self.root);
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&unit_dir).map_err(Self::io_error(&unit_dir))? {
            let path = entry.map_err(Self::io_error(&unit_dir))?.path();
            if path.extension().is_some_and(|ext| ext == "mdx") {
                files.push(path);
            }
        }
        files.sort();

        let mut sections = Vec::with_capacity(files.len());
        for path in files {
            let slug = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let source = fs::read_to_string(&path).map_err(Self::io_error(&path))?;

            sections.push(SectionMeta {
                title: frontmatter_title_of(&source).unwrap_or_else(|| title_from_slug(&slug)),
                order: order_from_slug(&slug),
                slug,
            });
        }

        sections.sort_by(compare_sections);
        Ok(sections)
    }

    /// Raw MDX source of a section
    pub fn load_section_body(&self, unit: &str, section: &str) -> Result<String, ContentError> {
        let path = self.root.join(unit).join(format!("{}.mdx", section));
        match fs::read_to_string(&path) {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ContentError::NotFound {
                unit: unit.to_string(),
                section: section.to_string(),
            }),
            Err(e) => Err(Self::io_error(&path)(e)),
        }
    }

    /// Quiz attached to a section
    ///
    /// A missing file means no quiz. An unreadable or malformed file is
    /// logged and treated the same way.
    pub fn load_quiz(&self, unit: &str, section: &str) -> Option<QuizData> {
        let path = self.root.join(unit).join(format!("{}-quiz.json", section));
        if !path.exists() {
            return None;
        }

        match read_quiz(&path) {
            Ok(quiz) => Some(quiz),
            Err(e) => {
                warn!("Error loading quiz for {}/{}: {}", unit, section, e);
                None
            }
        }
    }

    /// Every `(unit, section)` pair, for pre-rendering all pages
    pub fn static_params(&self) -> Result<Vec<(String, String)>, ContentError> {
        Ok(self
            .list_units()?
            .into_iter()
            .flat_map(|unit| {
                let slug = unit.slug;
                unit.sections
                    .into_iter()
                    .map(move |section| (slug.clone(), section.slug))
            })
            .collect())
    }

    pub fn unit_title(&self, slug: &str) -> String {
        title_from_slug(slug)
    }
}

fn read_quiz(path: &Path) -> Result<QuizData, ContentError> {
    let raw = fs::read_to_string(path).map_err(|source| ContentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ContentError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
