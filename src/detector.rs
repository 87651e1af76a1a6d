//! # Framework Detection Module
//!
//! Pattern registry and confidence scoring shared by all framework detectors
//!
//! ## Key Components
//! - [`FrameworkDetector`] - Trait every concrete detector implements
//! - [`DetectionResult`] - Scored evidence plus extracted components
//! - [`score_evidence`] - Weighted confidence scoring with fixed thresholds

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Repository snapshot handed to the detectors: the path list plus a
/// path → full-text map. Ordered map so detection output is deterministic.
#[derive(Debug, Default, Clone)]
pub struct FileSet {
    pub paths: Vec<String>,
    pub contents: BTreeMap<String, String>,
}

impl FileSet {
    pub fn new(paths: Vec<String>, contents: BTreeMap<String, String>) -> Self {
        Self { paths, contents }
    }
}

/// Detection certainty tiers, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            Confidence::High
        } else if score >= 40.0 {
            Confidence::Medium
        } else if score >= 10.0 {
            Confidence::Low
        } else {
            Confidence::None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Glob-style pattern matched against repository paths.
#[derive(Debug, Clone)]
pub struct FilePattern {
    regex: Regex,
    on_basename: bool,
    pub description: &'static str,
}

impl FilePattern {
    /// Build from a glob pattern. `**/` matches any directory prefix;
    /// `*` matches within one path segment. A pattern without a slash is
    /// matched against the basename, like relative glob matching.
    pub fn new(pattern: &str, description: &'static str) -> Self {
        let stripped = pattern.strip_prefix("**/").unwrap_or(pattern);
        let on_basename = !stripped.contains('/');

        let mut re = String::from("^");
        if !on_basename && pattern.starts_with("**/") {
            re.push_str("(?:.*/)?");
        }
        for ch in stripped.chars() {
            match ch {
                '*' => re.push_str("[^/]*"),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');

        Self {
            regex: Regex::new(&re).expect("glob pattern translates to valid regex"),
            on_basename,
            description,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let candidate = if self.on_basename {
            basename(path)
        } else {
            path
        };
        self.regex.is_match(candidate)
    }
}

/// Regex matched against file content, scoped to file extensions.
#[derive(Debug, Clone)]
pub struct CodePattern {
    regex: Regex,
    pub extensions: &'static [&'static str],
    pub description: &'static str,
}

impl CodePattern {
    pub fn new(pattern: &str, extensions: &'static [&'static str], description: &'static str) -> Self {
        Self {
            regex: Regex::new(&format!("(?mi){}", pattern)).expect("valid code pattern"),
            extensions,
            description,
        }
    }

    fn applies_to(&self, path: &str) -> bool {
        self.extensions.is_empty() || self.extensions.iter().any(|ext| path.ends_with(ext))
    }
}

/// The four pattern tables a detector is configured with.
#[derive(Debug, Default, Clone)]
pub struct DetectorPatterns {
    pub file_patterns: Vec<FilePattern>,
    pub code_patterns: Vec<CodePattern>,
    pub import_patterns: Vec<&'static str>,
    pub config_files: Vec<&'static str>,
}

/// A detected unit of LLM-driven work.
#[derive(Debug, Clone, Serialize)]
pub struct Component {
    pub name: String,
    pub kind: ComponentKind,
    pub file_path: String,
    pub line_number: usize,
    pub model: Option<String>,
    pub estimated_tokens: Option<u64>,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Agent,
    Chain,
    Tool,
    Llm,
    Prompt,
    Memory,
    #[serde(rename = "groupchat")]
    GroupChat,
}

impl ComponentKind {
    pub fn label(self) -> &'static str {
        match self {
            ComponentKind::Agent => "agent",
            ComponentKind::Chain => "chain",
            ComponentKind::Tool => "tool",
            ComponentKind::Llm => "llm",
            ComponentKind::Prompt => "prompt",
            ComponentKind::Memory => "memory",
            ComponentKind::GroupChat => "groupchat",
        }
    }
}

/// Directed call/flow relations inferred from source patterns.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowPattern {
    /// A known component is executed (`run`/`invoke`/`call`/`predict`).
    Execution {
        component: String,
        component_kind: ComponentKind,
        file: String,
    },
    /// Chains recorded as an explicit sequential pipeline.
    Sequential { chains: Vec<String>, file: String },
    /// One agent initiating a chat with another.
    Chat {
        from: String,
        to: String,
        file: String,
    },
    /// A group construct with a participant count.
    GroupChat { agents_count: usize, file: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub framework: String,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub components: Vec<Component>,
    pub file_patterns_matched: Vec<String>,
    pub code_patterns_matched: Vec<String>,
    pub imports_found: Vec<String>,
    pub config_files: Vec<String>,
    pub workflow_patterns: Vec<WorkflowPattern>,
}

impl DetectionResult {
    pub fn new(framework: &str) -> Self {
        Self {
            framework: framework.to_string(),
            confidence: Confidence::None,
            confidence_score: 0.0,
            components: Vec::new(),
            file_patterns_matched: Vec::new(),
            code_patterns_matched: Vec::new(),
            imports_found: Vec::new(),
            config_files: Vec::new(),
            workflow_patterns: Vec::new(),
        }
    }

    /// Merge another result into this one: lists are unioned and the
    /// higher confidence wins.
    pub fn merge(&mut self, other: DetectionResult) {
        self.components.extend(other.components);
        self.file_patterns_matched.extend(other.file_patterns_matched);
        self.code_patterns_matched.extend(other.code_patterns_matched);
        self.imports_found.extend(other.imports_found);
        self.config_files.extend(other.config_files);
        self.workflow_patterns.extend(other.workflow_patterns);

        if other.confidence_score > self.confidence_score {
            self.confidence = other.confidence;
            self.confidence_score = other.confidence_score;
        }
    }
}

/// Weighted evidence score. Explicit declarations outrank incidental
/// naming: config files > imports > code patterns > file patterns.
pub fn score_evidence(
    file_matches: usize,
    code_matches: usize,
    import_matches: usize,
    config_matches: usize,
) -> (Confidence, f64) {
    let mut score = 0.0;

    if config_matches > 0 {
        score += 40.0;
    }
    if import_matches > 0 {
        score += 35.0;
    }
    if code_matches > 0 {
        score += (code_matches as f64 * 5.0).min(20.0);
    }
    if file_matches > 0 {
        score += (file_matches as f64).min(5.0);
    }

    let score = score.min(100.0);
    (Confidence::from_score(score), score)
}

pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub trait FrameworkDetector {
    fn framework_name(&self) -> &'static str;

    fn patterns(&self) -> &DetectorPatterns;

    /// Extract framework-specific components from one file.
    fn extract_components(&self, content: &str, path: &str) -> Vec<Component>;

    /// Extract call/flow relations across the whole file set.
    fn extract_workflow(
        &self,
        _components: &[Component],
        _files: &FileSet,
    ) -> Vec<WorkflowPattern> {
        Vec::new()
    }

    /// Framework-specific score bonus for secondary signals. Must be >= 0
    /// so detection confidence stays monotonic.
    fn confidence_bonus(&self, _files: &FileSet) -> f64 {
        0.0
    }

    /// The uniform detection pipeline: match the four pattern tables,
    /// extract components, score the evidence, then let the framework add
    /// workflow relations and secondary-signal bonuses.
    fn detect(&self, files: &FileSet) -> DetectionResult {
        let patterns = self.patterns();
        let mut result = DetectionResult::new(self.framework_name());

        result.file_patterns_matched = match_file_patterns(patterns, &files.paths);
        result.config_files = check_config_files(patterns, &files.paths);

        for (path, content) in &files.contents {
            result
                .imports_found
                .extend(find_imports(patterns, content, path));
            result
                .code_patterns_matched
                .extend(match_code_patterns(patterns, content, path));
            result.components.extend(self.extract_components(content, path));
        }

        result.imports_found.sort_unstable();
        result.imports_found.dedup();
        result.code_patterns_matched.sort_unstable();
        result.code_patterns_matched.dedup();

        let (confidence, score) = score_evidence(
            result.file_patterns_matched.len(),
            result.code_patterns_matched.len(),
            result.imports_found.len(),
            result.config_files.len(),
        );
        result.confidence = confidence;
        result.confidence_score = score;

        if !result.components.is_empty() {
            result.workflow_patterns = self.extract_workflow(&result.components, files);
        }

        let bonus = self.confidence_bonus(files);
        if bonus > 0.0 {
            result.confidence_score = (result.confidence_score + bonus).min(100.0);
            result.confidence = Confidence::from_score(result.confidence_score);
        }

        result
    }
}

fn match_file_patterns(patterns: &DetectorPatterns, paths: &[String]) -> Vec<String> {
    let mut matched: Vec<String> = Vec::new();
    for path in paths {
        for pattern in &patterns.file_patterns {
            if pattern.matches(path) {
                matched.push(pattern.description.to_string());
            }
        }
    }
    matched.sort_unstable();
    matched.dedup();
    matched
}

fn check_config_files(patterns: &DetectorPatterns, paths: &[String]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for path in paths {
        for config in &patterns.config_files {
            if basename(path) == *config {
                found.push(config.to_string());
            }
        }
    }
    found.sort_unstable();
    found.dedup();
    found
}

/// Find module-level `import X` / `from X import` statements referencing
/// any of the detector's import names. Python sources only.
fn find_imports(patterns: &DetectorPatterns, content: &str, path: &str) -> Vec<String> {
    let mut imports = Vec::new();

    if !path.ends_with(".py") {
        return imports;
    }

    for name in &patterns.import_patterns {
        let escaped = regex::escape(name);
        let import_regex = Regex::new(&format!(
            "(?m)(?:^import\\s+{}|^from\\s+{}\\s+import)",
            escaped, escaped
        ))
        .expect("import name escapes to valid regex");

        if import_regex.is_match(content) {
            imports.push(name.to_string());
        }
    }

    imports
}

fn match_code_patterns(patterns: &DetectorPatterns, content: &str, path: &str) -> Vec<String> {
    patterns
        .code_patterns
        .iter()
        .filter(|pattern| pattern.applies_to(path))
        .filter(|pattern| pattern.regex.is_match(content))
        .map(|pattern| pattern.description.to_string())
        .collect()
}

/// Every registered detector, in fixed order.
pub fn all_detectors() -> Vec<Box<dyn FrameworkDetector>> {
    vec![
        Box::new(crate::langchain::LangChainDetector::new()),
        Box::new(crate::autogen::AutoGenDetector::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_weights() {
        // config only: 40 -> MEDIUM
        let (confidence, score) = score_evidence(0, 0, 0, 1);
        assert_eq!(score, 40.0);
        assert_eq!(confidence, Confidence::Medium);

        // imports only: 35 -> LOW
        let (confidence, score) = score_evidence(0, 0, 2, 0);
        assert_eq!(score, 35.0);
        assert_eq!(confidence, Confidence::Low);

        // code patterns saturate at 20
        let (_, score) = score_evidence(0, 10, 0, 0);
        assert_eq!(score, 20.0);

        // file patterns saturate at 5
        let (_, score) = score_evidence(10, 0, 0, 0);
        assert_eq!(score, 5.0);

        // everything: 40 + 35 + 20 + 5 = 100
        let (confidence, score) = score_evidence(10, 10, 1, 1);
        assert_eq!(score, 100.0);
        assert_eq!(confidence, Confidence::High);
    }

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(Confidence::from_score(75.0), Confidence::High);
        assert_eq!(Confidence::from_score(74.9), Confidence::Medium);
        assert_eq!(Confidence::from_score(40.0), Confidence::Medium);
        assert_eq!(Confidence::from_score(10.0), Confidence::Low);
        assert_eq!(Confidence::from_score(9.0), Confidence::None);
    }

    #[test]
    fn test_score_monotonicity() {
        // Adding one more match of any kind never lowers the score
        let cases = [(0usize, 0usize, 0usize, 0usize), (1, 2, 1, 0), (5, 4, 0, 1), (10, 10, 3, 2)];
        for (f, c, i, cfg) in cases {
            let (_, base) = score_evidence(f, c, i, cfg);
            assert!(score_evidence(f + 1, c, i, cfg).1 >= base);
            assert!(score_evidence(f, c + 1, i, cfg).1 >= base);
            assert!(score_evidence(f, c, i + 1, cfg).1 >= base);
            assert!(score_evidence(f, c, i, cfg + 1).1 >= base);
        }
    }

    #[test]
    fn test_file_pattern_glob() {
        let pattern = FilePattern::new("**/chain*.py", "Chain files");
        assert!(pattern.matches("src/flows/chain_builder.py"));
        assert!(pattern.matches("chain.py"));
        assert!(!pattern.matches("src/chains/runner.py"));

        // Pattern without a slash matches the basename anywhere
        let pattern = FilePattern::new("agent*.py", "Agent files");
        assert!(pattern.matches("deep/nested/agent_factory.py"));
        assert!(!pattern.matches("deep/nested/my_agent.py"));
    }

    #[test]
    fn test_import_matching() {
        let patterns = DetectorPatterns {
            import_patterns: vec!["langchain", "langchain.chains"],
            ..Default::default()
        };

        let content = "import os\nfrom langchain.chains import LLMChain\n";
        let found = find_imports(&patterns, content, "app.py");
        assert_eq!(found, vec!["langchain.chains".to_string()]);

        // Non-Python files are skipped
        assert!(find_imports(&patterns, content, "app.js").is_empty());
    }

    #[test]
    fn test_config_file_matching() {
        let patterns = DetectorPatterns {
            config_files: vec![".env", "config_list.json"],
            ..Default::default()
        };
        let paths = vec![
            "project/.env".to_string(),
            "project/src/main.py".to_string(),
            "config_list.json".to_string(),
        ];

        let found = check_config_files(&patterns, &paths);
        assert_eq!(found, vec![".env".to_string(), "config_list.json".to_string()]);
    }

    #[test]
    fn test_merge_takes_higher_confidence() {
        let mut a = DetectionResult::new("langchain");
        a.confidence = Confidence::Low;
        a.confidence_score = 15.0;
        a.imports_found = vec!["langchain".to_string()];

        let mut b = DetectionResult::new("langchain");
        b.confidence = Confidence::High;
        b.confidence_score = 80.0;
        b.config_files = vec![".env".to_string()];

        a.merge(b);
        assert_eq!(a.confidence, Confidence::High);
        assert_eq!(a.confidence_score, 80.0);
        assert_eq!(a.imports_found.len(), 1);
        assert_eq!(a.config_files.len(), 1);
    }
}
