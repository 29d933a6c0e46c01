use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RuleLoadError {
    #[error("Rule path does not exist: {}", .0.display())]
    MissingPath(PathBuf),
    #[error("No rule files (*.yaml, *.yml) found in {}", .0.display())]
    NoRuleFiles(PathBuf),
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed rule file {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Rule #{index} in {} is missing '{field}'", .path.display())]
    MissingField {
        path: PathBuf,
        index: usize,
        field: &'static str,
    },
    #[error("Invalid pattern for rule '{rule}' in {}: {source}", .path.display())]
    InvalidPattern {
        path: PathBuf,
        rule: String,
        #[source]
        source: regex::Error,
    },
    #[error("Empty tag in {}", .path.display())]
    EmptyTag { path: PathBuf },
}

/// On-disk shape of a rule file.
#[derive(Debug, Deserialize)]
struct RuleDocument {
    #[serde(default)]
    tags: Option<Vec<String>>,
    data: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    name: Option<String>,
    #[serde(rename = "match")]
    pattern: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// A named pattern. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    pattern: Regex,
    tags: BTreeSet<String>,
}

impl Rule {
    pub fn new<I, S>(name: &str, pattern: &str, tags: I) -> Result<Rule, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pattern = RegexBuilder::new(pattern.trim())
            .case_insensitive(true)
            .build()?;
        Ok(Rule {
            name: name.to_string(),
            pattern,
            tags: tags.into_iter().map(Into::into).collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Unanchored search unless the pattern anchors itself.
    pub fn is_match(&self, lowered_desc: &str) -> bool {
        self.pattern.is_match(lowered_desc)
    }
}

/// Rules from one document, sharing the document's tags.
#[derive(Debug, Clone)]
pub struct RuleFile {
    name: String,
    tags: BTreeSet<String>,
    rules: Vec<Rule>,
}

impl RuleFile {
    /// Parses one YAML document. `path` is only used in error reports.
    pub fn parse(name: &str, path: &Path, content: &str) -> Result<RuleFile, RuleLoadError> {
        let doc: RuleDocument =
            serde_yaml::from_str(content).map_err(|source| RuleLoadError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let file_tags = checked_tags(doc.tags, path)?;
        let mut rules = Vec::with_capacity(doc.data.len());

        for (index, entry) in doc.data.into_iter().enumerate() {
            let missing = |field| RuleLoadError::MissingField {
                path: path.to_path_buf(),
                index,
                field,
            };
            let rule_name = entry
                .name
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| missing("name"))?;
            let pattern = entry.pattern.ok_or_else(|| missing("match"))?;
            let tags = checked_tags(entry.tags, path)?;

            let rule = Rule::new(&rule_name, &pattern, tags).map_err(|source| {
                RuleLoadError::InvalidPattern {
                    path: path.to_path_buf(),
                    rule: rule_name.clone(),
                    source,
                }
            })?;
            rules.push(rule);
        }

        Ok(RuleFile {
            name: name.to_string(),
            tags: file_tags,
            rules,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

fn checked_tags(tags: Option<Vec<String>>, path: &Path) -> Result<BTreeSet<String>, RuleLoadError> {
    let tags = tags.unwrap_or_default();
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(RuleLoadError::EmptyTag {
            path: path.to_path_buf(),
        });
    }
    Ok(tags.into_iter().collect())
}

/// The first rule that matched a description, and the file it came from.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    pub file: &'a RuleFile,
    pub rule: &'a Rule,
}

impl<'a> RuleMatch<'a> {
    pub fn name(&self) -> &'a str {
        self.rule.name()
    }

    /// File tags and rule tags combined. May be empty.
    pub fn tags(&self) -> BTreeSet<&'a str> {
        self.file
            .tags
            .iter()
            .chain(self.rule.tags.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Every loaded rule, in precedence order: files in load order, rules in
/// declaration order. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct RuleDatabase {
    files: Vec<RuleFile>,
}

fn is_rule_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

impl RuleDatabase {
    /// Loads a single rule file, or every `*.yaml` / `*.yml` file in a
    /// directory ordered by file name. Any failure aborts the whole load.
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        let paths = if path.is_dir() {
            let entries = fs::read_dir(path).map_err(|source| RuleLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut paths = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| RuleLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let candidate = entry.path();
                if is_rule_file(&candidate) {
                    paths.push(candidate);
                }
            }
            paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
            if paths.is_empty() {
                return Err(RuleLoadError::NoRuleFiles(path.to_path_buf()));
            }
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(RuleLoadError::MissingPath(path.to_path_buf()));
        };

        let mut files = Vec::with_capacity(paths.len());
        for file_path in &paths {
            let content = fs::read_to_string(file_path).map_err(|source| RuleLoadError::Io {
                path: file_path.clone(),
                source,
            })?;
            let name = file_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let file = RuleFile::parse(&name, file_path, &content)?;
            debug!("Loaded {} rules from {}", file.rules.len(), file_path.display());
            files.push(file);
        }

        let db = RuleDatabase { files };
        info!(
            "Rule database ready: {} files, {} rules from {}",
            db.files.len(),
            db.rule_count(),
            path.display()
        );
        Ok(db)
    }

    /// Builds a database from in-memory `(name, yaml)` documents, in the
    /// order given.
    pub fn from_documents<'s, I>(documents: I) -> Result<Self, RuleLoadError>
    where
        I: IntoIterator<Item = (&'s str, &'s str)>,
    {
        let files = documents
            .into_iter()
            .map(|(name, content)| RuleFile::parse(name, Path::new(name), content))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RuleDatabase { files })
    }

    pub fn files(&self) -> &[RuleFile] {
        &self.files
    }

    pub fn rule_count(&self) -> usize {
        self.files.iter().map(|f| f.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }

    /// First rule whose pattern occurs in the lowercased description.
    /// `None` means the description stays uncategorized.
    pub fn find_match(&self, desc: &str) -> Option<RuleMatch<'_>> {
        let lowered = desc.to_lowercase();
        self.files.iter().find_map(|file| {
            file.rules
                .iter()
                .find(|rule| rule.is_match(&lowered))
                .map(|rule| RuleMatch { file, rule })
        })
    }
}
