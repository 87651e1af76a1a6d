//! # LangChain Detector Module
//!
//! Detects LangChain usage and extracts chains, models, prompts and tools
//!
//! ## Key Components
//! - [`LangChainDetector`] - Concrete detector with LangChain pattern tables
//! - Structural extraction via [`PySource`] with a regex fallback scan
//! - Chain-flow extraction (`run`/`invoke`/`call`/`predict`, sequential chains)

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;

use crate::calculator;
use crate::detector::{
    CodePattern, Component, ComponentKind, DetectorPatterns, FilePattern, FileSet,
    FrameworkDetector, WorkflowPattern,
};
use crate::pyscan::{ArgValue, CallSite, PySource};

pub struct LangChainDetector {
    patterns: DetectorPatterns,
}

impl LangChainDetector {
    pub fn new() -> Self {
        let patterns = DetectorPatterns {
            file_patterns: vec![
                FilePattern::new("**/langchain*.py", "LangChain-named files"),
                FilePattern::new("**/chain*.py", "Chain files"),
                FilePattern::new("**/agent*.py", "Agent files"),
                FilePattern::new("**/prompt*.py", "Prompt files"),
                FilePattern::new("**/memory*.py", "Memory files"),
            ],
            code_patterns: vec![
                CodePattern::new(r"LLMChain\s*\(", &[".py"], "LLMChain usage"),
                CodePattern::new(r"ChatOpenAI\s*\(", &[".py"], "ChatOpenAI model"),
                CodePattern::new(r"OpenAI\s*\(", &[".py"], "OpenAI model"),
                CodePattern::new(r"PromptTemplate\s*\(", &[".py"], "PromptTemplate usage"),
                CodePattern::new(
                    r"ChatPromptTemplate\s*\(",
                    &[".py"],
                    "ChatPromptTemplate usage",
                ),
                CodePattern::new(
                    r"ConversationChain\s*\(",
                    &[".py"],
                    "ConversationChain usage",
                ),
                CodePattern::new(r"RetrievalQA\s*\(", &[".py"], "RetrievalQA chain"),
                CodePattern::new(r"create_.*_agent\s*\(", &[".py"], "Agent creation"),
                CodePattern::new(r"Tool\s*\(", &[".py"], "Tool definition"),
                CodePattern::new(
                    r"ConversationBufferMemory\s*\(",
                    &[".py"],
                    "Memory usage",
                ),
            ],
            import_patterns: vec![
                "langchain",
                "langchain.llms",
                "langchain.chat_models",
                "langchain.chains",
                "langchain.agents",
                "langchain.prompts",
                "langchain.memory",
                "langchain.tools",
                "langchain.vectorstores",
                "langchain.embeddings",
                "langchain_community",
                "langchain_openai",
            ],
            config_files: vec![".env", "langchain.yaml", "config.yaml"],
        };

        Self { patterns }
    }

    fn structural_extract(&self, source: &PySource, path: &str) -> Vec<Component> {
        source
            .calls()
            .iter()
            .filter_map(|call| component_from_call(call, path))
            .collect()
    }

    /// Line-scanning fallback for source the structural scanner rejects.
    fn fallback_extract(&self, content: &str, path: &str) -> Vec<Component> {
        let mut components = Vec::new();
        let lines: Vec<&str> = content.lines().collect();

        for (i, line) in lines.iter().enumerate() {
            for (pattern, constructor, kind) in FALLBACK_PATTERNS.iter() {
                let Some(caps) = pattern.captures(line) else {
                    continue;
                };
                let name = caps[1].to_string();

                // Model parameter usually sits within the next few lines
                let mut model = None;
                if *kind == ComponentKind::Llm {
                    for scan_line in lines.iter().skip(i).take(5) {
                        if let Some(model_caps) = MODEL_KWARG.captures(scan_line) {
                            model = Some(model_caps[1].to_string());
                            break;
                        }
                    }
                }

                components.push(Component {
                    name,
                    kind: *kind,
                    file_path: path.to_string(),
                    line_number: i + 1,
                    model,
                    estimated_tokens: None,
                    metadata: HashMap::from([(
                        "component_class".to_string(),
                        json!(constructor),
                    )]),
                });
            }
        }

        components
    }
}

impl Default for LangChainDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameworkDetector for LangChainDetector {
    fn framework_name(&self) -> &'static str {
        "langchain"
    }

    fn patterns(&self) -> &DetectorPatterns {
        &self.patterns
    }

    fn extract_components(&self, content: &str, path: &str) -> Vec<Component> {
        if !path.ends_with(".py") {
            return Vec::new();
        }

        match PySource::parse(content) {
            Some(source) => self.structural_extract(&source, path),
            None => {
                debug!("structural parse failed for {}, using fallback scan", path);
                self.fallback_extract(content, path)
            }
        }
    }

    /// Chain executions and explicit sequential pipelines.
    fn extract_workflow(
        &self,
        components: &[Component],
        files: &FileSet,
    ) -> Vec<WorkflowPattern> {
        let mut flows = Vec::new();

        for (path, content) in &files.contents {
            for pattern in RUN_PATTERNS.iter() {
                for caps in pattern.captures_iter(content) {
                    let name = &caps[1];
                    if let Some(component) = components.iter().find(|c| c.name == name) {
                        flows.push(WorkflowPattern::Execution {
                            component: name.to_string(),
                            component_kind: component.kind,
                            file: path.clone(),
                        });
                    }
                }
            }

            for caps in SEQUENTIAL_PATTERN.captures_iter(content) {
                let chains = caps[1]
                    .split(',')
                    .map(|name| name.trim().to_string())
                    .collect();
                flows.push(WorkflowPattern::Sequential {
                    chains,
                    file: path.clone(),
                });
            }
        }

        flows
    }

    /// Secondary LangChain signals: LCEL piping, runnable combinators and
    /// vector-store usage.
    fn confidence_bonus(&self, files: &FileSet) -> f64 {
        let mut bonus = 0.0;

        for content in files.contents.values() {
            if content.contains('|') && (content.contains("invoke") || content.contains("stream"))
            {
                bonus += 10.0;
            }
            if content.contains("RunnablePassthrough") || content.contains("RunnableParallel") {
                bonus += 15.0;
            }
            if ["FAISS", "Chroma", "Pinecone", "Weaviate"]
                .iter()
                .any(|store| content.contains(store))
            {
                bonus += 5.0;
            }
        }

        bonus
    }
}

fn component_kind_for(callee: &str) -> Option<ComponentKind> {
    match callee {
        "LLMChain" | "ConversationChain" | "RetrievalQA" => Some(ComponentKind::Chain),
        "ChatOpenAI" | "OpenAI" => Some(ComponentKind::Llm),
        "PromptTemplate" | "ChatPromptTemplate" => Some(ComponentKind::Prompt),
        "ConversationBufferMemory" => Some(ComponentKind::Memory),
        "Tool" => Some(ComponentKind::Tool),
        _ if callee.to_lowercase().contains("agent") => Some(ComponentKind::Agent),
        _ => None,
    }
}

fn default_model_for(callee: &str) -> Option<String> {
    match callee {
        "ChatOpenAI" => Some("gpt-3.5-turbo".to_string()),
        "OpenAI" => Some("text-davinci-003".to_string()),
        _ => None,
    }
}

fn component_from_call(call: &CallSite, path: &str) -> Option<Component> {
    let kind = component_kind_for(&call.callee)?;

    // Prefer the assignment target: it is the name chain flows refer to
    let name = call
        .target
        .clone()
        .unwrap_or_else(|| format!("{}_{}", call.callee, call.line));

    let mut metadata = HashMap::from([("function".to_string(), json!(call.callee))]);
    let mut model = None;
    let mut estimated_tokens = None;

    match kind {
        ComponentKind::Llm => {
            model = call
                .kwarg_str("model")
                .or_else(|| call.kwarg_str("model_name"))
                .map(str::to_string)
                .or_else(|| default_model_for(&call.callee));
            if let Some(ArgValue::Number(temperature)) = call.kwarg("temperature") {
                metadata.insert("temperature".to_string(), json!(temperature));
            }
        }
        ComponentKind::Prompt => {
            let template = call
                .kwarg_str("template")
                .or_else(|| call.first_positional_str());
            if let Some(template) = template {
                estimated_tokens = Some(calculator::estimate_prompt_tokens(template));
                metadata.insert("template".to_string(), json!(template));
            }
        }
        ComponentKind::Chain => {
            if let Some(ArgValue::Ident(llm)) = call.kwarg("llm") {
                metadata.insert("llm".to_string(), json!(llm));
            }
            if let Some(ArgValue::Ident(prompt)) = call.kwarg("prompt") {
                metadata.insert("prompt".to_string(), json!(prompt));
            }
        }
        _ => {}
    }

    Some(Component {
        name,
        kind,
        file_path: path.to_string(),
        line_number: call.line,
        model,
        estimated_tokens,
        metadata,
    })
}

lazy_static! {
    static ref FALLBACK_PATTERNS: Vec<(Regex, &'static str, ComponentKind)> = vec![
        (
            Regex::new(r"(\w+)\s*=\s*LLMChain\s*\(").unwrap(),
            "LLMChain",
            ComponentKind::Chain,
        ),
        (
            Regex::new(r"(\w+)\s*=\s*ChatOpenAI\s*\(").unwrap(),
            "ChatOpenAI",
            ComponentKind::Llm,
        ),
        (
            Regex::new(r"(\w+)\s*=\s*OpenAI\s*\(").unwrap(),
            "OpenAI",
            ComponentKind::Llm,
        ),
        (
            Regex::new(r"(\w+)\s*=\s*PromptTemplate\s*\(").unwrap(),
            "PromptTemplate",
            ComponentKind::Prompt,
        ),
        (
            Regex::new(r"(\w+)\s*=\s*ConversationChain\s*\(").unwrap(),
            "ConversationChain",
            ComponentKind::Chain,
        ),
        (
            Regex::new(r"(\w+)\s*=\s*RetrievalQA\s*\(").unwrap(),
            "RetrievalQA",
            ComponentKind::Chain,
        ),
    ];
    static ref MODEL_KWARG: Regex = Regex::new(r#"model\s*=\s*["'](.+?)["']"#).unwrap();
    static ref RUN_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(\w+)\.run\s*\(").unwrap(),
        Regex::new(r"(\w+)\.invoke\s*\(").unwrap(),
        Regex::new(r"(\w+)\.call\s*\(").unwrap(),
        Regex::new(r"(\w+)\.predict\s*\(").unwrap(),
    ];
    static ref SEQUENTIAL_PATTERN: Regex =
        Regex::new(r"SequentialChain\s*\([^)]*chains\s*=\s*\[([^\]]+)\]").unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Confidence;
    use std::collections::BTreeMap;

    fn file_set(files: &[(&str, &str)]) -> FileSet {
        let paths = files.iter().map(|(p, _)| p.to_string()).collect();
        let contents = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect::<BTreeMap<_, _>>();
        FileSet::new(paths, contents)
    }

    #[test]
    fn test_structural_extraction() {
        let detector = LangChainDetector::new();
        let source = r#"
llm = ChatOpenAI(model="gpt-4", temperature=0.3)
prompt = PromptTemplate(template="Classify the sentiment of {text}")
chain = LLMChain(llm=llm, prompt=prompt)
"#;
        let components = detector.extract_components(source, "app.py");
        assert_eq!(components.len(), 3);

        let llm = components.iter().find(|c| c.name == "llm").unwrap();
        assert_eq!(llm.kind, ComponentKind::Llm);
        assert_eq!(llm.model.as_deref(), Some("gpt-4"));

        let prompt = components.iter().find(|c| c.name == "prompt").unwrap();
        assert_eq!(prompt.kind, ComponentKind::Prompt);
        assert!(prompt.estimated_tokens.unwrap() > 0);

        let chain = components.iter().find(|c| c.name == "chain").unwrap();
        assert_eq!(chain.kind, ComponentKind::Chain);
        assert_eq!(chain.metadata["llm"], json!("llm"));
    }

    #[test]
    fn test_default_models() {
        let detector = LangChainDetector::new();
        let components =
            detector.extract_components("a = ChatOpenAI()\nb = OpenAI()\n", "models.py");

        assert_eq!(components[0].model.as_deref(), Some("gpt-3.5-turbo"));
        assert_eq!(components[1].model.as_deref(), Some("text-davinci-003"));
    }

    #[test]
    fn test_fallback_extraction_on_malformed_source() {
        let detector = LangChainDetector::new();
        // Unterminated call forces the fallback scan
        let source = "classifier = ChatOpenAI(\n    model=\"gpt-4\"\nbroken = LLMChain(llm=llm\n";
        let components = detector.extract_components(source, "broken.py");

        let llm = components.iter().find(|c| c.name == "classifier").unwrap();
        assert_eq!(llm.kind, ComponentKind::Llm);
        assert_eq!(llm.model.as_deref(), Some("gpt-4"));

        assert!(components.iter().any(|c| c.name == "broken"));
    }

    #[test]
    fn test_non_python_files_skipped() {
        let detector = LangChainDetector::new();
        assert!(
            detector
                .extract_components("chain = LLMChain(llm=llm)", "notes.md")
                .is_empty()
        );
    }

    #[test]
    fn test_workflow_execution_and_sequential() {
        let detector = LangChainDetector::new();
        let files = file_set(&[(
            "flow.py",
            "chain = LLMChain(llm=llm, prompt=prompt)\n\
             result = chain.run(text)\n\
             overall = SequentialChain(chains=[chain_a, chain_b], verbose=True)\n",
        )]);
        let components = detector.extract_components(&files.contents["flow.py"], "flow.py");
        let flows = detector.extract_workflow(&components, &files);

        assert!(flows.iter().any(|f| matches!(
            f,
            WorkflowPattern::Execution { component, .. } if component == "chain"
        )));
        assert!(flows.iter().any(|f| matches!(
            f,
            WorkflowPattern::Sequential { chains, .. }
                if chains == &vec!["chain_a".to_string(), "chain_b".to_string()]
        )));
    }

    #[test]
    fn test_detect_scores_imports_and_config() {
        let detector = LangChainDetector::new();
        let files = file_set(&[
            (
                "app/chain_builder.py",
                "from langchain.chains import LLMChain\n\
                 chain = LLMChain(llm=llm, prompt=prompt)\n",
            ),
            (".env", "OPENAI_API_KEY=sk-test\n"),
        ]);

        let result = detector.detect(&files);

        // config (40) + imports (35) + code patterns + file pattern
        assert!(result.confidence_score >= 75.0);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.components.len(), 1);
        assert!(result.imports_found.contains(&"langchain.chains".to_string()));
        assert!(result.config_files.contains(&".env".to_string()));
    }

    #[test]
    fn test_lcel_bonus_is_monotonic() {
        let detector = LangChainDetector::new();

        let base_files = file_set(&[("app.py", "from langchain.chains import LLMChain\n")]);
        let base = detector.detect(&base_files);

        let bonus_files = file_set(&[(
            "app.py",
            "from langchain.chains import LLMChain\n\
             pipeline = prompt | model\n\
             pipeline.invoke(data)\n\
             store = FAISS.from_documents(docs, embeddings)\n",
        )]);
        let boosted = detector.detect(&bonus_files);

        assert!(boosted.confidence_score >= base.confidence_score);
    }
}
