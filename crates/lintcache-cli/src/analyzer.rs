use lintcache_core::cache::Result;
use lintcache_core::{hash_config, Analyzer, CacheConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One rule violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    /// 1-based line number
    pub line: usize,
    pub message: String,
}

impl Finding {
    fn new(rule: &str, line: usize, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            line,
            message,
        }
    }
}

/// Line based rules; their settings form the per-result config identity
#[derive(Debug, Clone, Serialize)]
pub struct LineRules {
    pub max_line_length: usize,
    #[serde(skip)]
    identity: String,
}

impl LineRules {
    pub fn new(max_line_length: usize) -> Result<Self> {
        let mut rules = Self {
            max_line_length,
            identity: String::new(),
        };
        rules.identity = hash_config(&rules)?;
        Ok(rules)
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(config.max_line_length)
    }
}

impl Analyzer<Vec<Finding>> for LineRules {
    fn config_identity(&self) -> String {
        self.identity.clone()
    }

    fn analyze(&self, _unit: &Path, text: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let number = i + 1;
            let length = line.chars().count();
            if length > self.max_line_length {
                findings.push(Finding::new(
                    "max-line-length",
                    number,
                    format!("line is {} characters long, the limit is {}", length, self.max_line_length),
                ));
            }
            if line.ends_with([' ', '\t']) {
                findings.push(Finding::new(
                    "no-trailing-whitespace",
                    number,
                    "trailing whitespace".to_string(),
                ));
            }
            if let Some(comment) = line.find("//").map(|at| &line[at + 2..]) {
                if comment.trim_start().starts_with("TODO") {
                    findings.push(Finding::new(
                        "no-todo-comment",
                        number,
                        "unresolved TODO comment".to_string(),
                    ));
                }
            }
        }
        findings
    }
}
