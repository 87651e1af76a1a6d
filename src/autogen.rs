//! # AutoGen Detector Module
//!
//! Detects Microsoft AutoGen usage and extracts agents and group chats
//!
//! ## Key Components
//! - [`AutoGenDetector`] - Concrete detector with AutoGen pattern tables
//! - Agent extraction with `llm_config` parsing and a regex fallback scan
//! - Conversation-flow extraction from `initiate_chat` call sites

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::calculator;
use crate::detector::{
    CodePattern, Component, ComponentKind, DetectorPatterns, FilePattern, FileSet,
    FrameworkDetector, WorkflowPattern,
};
use crate::pyscan::{ArgValue, CallSite, PySource};

const AGENT_CONSTRUCTORS: &[&str] = &["AssistantAgent", "UserProxyAgent", "ConversableAgent"];

pub struct AutoGenDetector {
    patterns: DetectorPatterns,
}

impl AutoGenDetector {
    pub fn new() -> Self {
        let patterns = DetectorPatterns {
            file_patterns: vec![
                FilePattern::new("**/autogen*.py", "AutoGen-named files"),
                FilePattern::new("**/agent*.py", "Agent files"),
                FilePattern::new("**/groupchat*.py", "Group chat files"),
                FilePattern::new(".cache/", "AutoGen cache directory"),
            ],
            code_patterns: vec![
                CodePattern::new(
                    r"AssistantAgent\s*\(",
                    &[".py"],
                    "AssistantAgent initialization",
                ),
                CodePattern::new(
                    r"UserProxyAgent\s*\(",
                    &[".py"],
                    "UserProxyAgent initialization",
                ),
                CodePattern::new(r"GroupChat\s*\(", &[".py"], "GroupChat usage"),
                CodePattern::new(r"GroupChatManager\s*\(", &[".py"], "GroupChatManager usage"),
                CodePattern::new(r"initiate_chat\s*\(", &[".py"], "Chat initiation"),
                CodePattern::new(r"register_reply\s*\(", &[".py"], "Reply registration"),
                CodePattern::new(r"ConversableAgent\s*\(", &[".py"], "ConversableAgent usage"),
            ],
            import_patterns: vec!["autogen", "autogen.agentchat", "autogen.oai", "ag2"],
            config_files: vec!["OAI_CONFIG_LIST", ".env", "config_list.json"],
        };

        Self { patterns }
    }

    fn structural_extract(&self, source: &PySource, path: &str) -> Vec<Component> {
        source
            .calls()
            .iter()
            .filter_map(|call| {
                if AGENT_CONSTRUCTORS.contains(&call.callee.as_str()) {
                    Some(agent_from_call(call, path))
                } else if call.callee == "GroupChat" {
                    Some(groupchat_from_call(call, path))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Line-scanning fallback for source the structural scanner rejects.
    fn fallback_extract(&self, content: &str, path: &str) -> Vec<Component> {
        let mut components = Vec::new();
        let lines: Vec<&str> = content.lines().collect();

        for (i, line) in lines.iter().enumerate() {
            let Some(caps) = FALLBACK_AGENT_PATTERN.captures(line) else {
                continue;
            };
            let name = caps[1].to_string();
            let agent_type = caps[2].to_string();

            // System message usually sits within the constructor body below
            let mut system_message = None;
            for scan_line in lines.iter().skip(i).take(20) {
                if let Some(msg_caps) = SYSTEM_MESSAGE_KWARG.captures(scan_line) {
                    system_message = Some(msg_caps[1].to_string());
                    break;
                }
            }

            let estimated_tokens = system_message
                .as_deref()
                .map(calculator::estimate_prompt_tokens);

            components.push(Component {
                name,
                kind: ComponentKind::Agent,
                file_path: path.to_string(),
                line_number: i + 1,
                model: None,
                estimated_tokens,
                metadata: HashMap::from([
                    ("agent_type".to_string(), json!(agent_type)),
                    ("system_message".to_string(), json!(system_message)),
                ]),
            });
        }

        components
    }
}

impl Default for AutoGenDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameworkDetector for AutoGenDetector {
    fn framework_name(&self) -> &'static str {
        "autogen"
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

    /// Conversation edges between agents plus group-chat participation.
    fn extract_workflow(
        &self,
        components: &[Component],
        files: &FileSet,
    ) -> Vec<WorkflowPattern> {
        let mut flows = Vec::new();

        for (path, content) in &files.contents {
            for caps in CHAT_PATTERN.captures_iter(content) {
                flows.push(WorkflowPattern::Chat {
                    from: caps[1].to_string(),
                    to: caps[2].to_string(),
                    file: path.clone(),
                });
            }
        }

        for component in components {
            if component.kind != ComponentKind::GroupChat {
                continue;
            }
            if let Some(agents_count) = component
                .metadata
                .get("agents_count")
                .and_then(Value::as_u64)
            {
                flows.push(WorkflowPattern::GroupChat {
                    agents_count: agents_count as usize,
                    file: component.file_path.clone(),
                });
            }
        }

        flows
    }

    /// Secondary AutoGen signals: config lists naming OpenAI models and the
    /// TERMINATE convention next to chat initiation.
    fn confidence_bonus(&self, files: &FileSet) -> f64 {
        let mut bonus = 0.0;

        for content in files.contents.values() {
            if content.contains("config_list")
                && (content.contains("gpt-4") || content.contains("gpt-3"))
            {
                bonus += 10.0;
            }
            if content.contains("TERMINATE") && content.contains("initiate_chat") {
                bonus += 5.0;
            }
        }

        bonus
    }
}

fn agent_from_call(call: &CallSite, path: &str) -> Component {
    let name = call
        .kwarg_str("name")
        .map(str::to_string)
        .or_else(|| call.first_positional_str().map(str::to_string))
        .or_else(|| call.target.clone())
        .unwrap_or_else(|| format!("{}_{}", call.callee, call.line));

    let system_message = call.kwarg_str("system_message").map(str::to_string);
    let estimated_tokens = system_message
        .as_deref()
        .map(calculator::estimate_prompt_tokens);

    let llm_config = call.kwarg("llm_config");
    let model = llm_config.and_then(extract_model);

    Component {
        name,
        kind: ComponentKind::Agent,
        file_path: path.to_string(),
        line_number: call.line,
        model,
        estimated_tokens,
        metadata: HashMap::from([
            ("agent_type".to_string(), json!(call.callee)),
            ("system_message".to_string(), json!(system_message)),
            (
                "llm_config".to_string(),
                llm_config.map(argvalue_to_json).unwrap_or(Value::Null),
            ),
        ]),
    }
}

fn groupchat_from_call(call: &CallSite, path: &str) -> Component {
    let agents_count = match call.kwarg("agents") {
        Some(ArgValue::List(items)) => items.len(),
        _ => 0,
    };

    Component {
        name: format!("GroupChat_{}", call.line),
        kind: ComponentKind::GroupChat,
        file_path: path.to_string(),
        line_number: call.line,
        model: None,
        estimated_tokens: None,
        metadata: HashMap::from([("agents_count".to_string(), json!(agents_count))]),
    }
}

/// Model from an `llm_config` dict: a plain string, or the first entry of a
/// model list.
fn extract_model(config: &ArgValue) -> Option<String> {
    let ArgValue::Dict(entries) = config else {
        return None;
    };

    entries.iter().find_map(|(key, value)| {
        if key != "model" {
            return None;
        }
        match value {
            ArgValue::Str(model) => Some(model.clone()),
            ArgValue::List(items) => items.iter().find_map(|item| item.as_str().map(str::to_string)),
            _ => None,
        }
    })
}

fn argvalue_to_json(value: &ArgValue) -> Value {
    match value {
        ArgValue::Str(s) => json!(s),
        ArgValue::Number(n) => json!(n),
        ArgValue::Ident(name) => json!(name),
        ArgValue::List(items) => Value::Array(items.iter().map(argvalue_to_json).collect()),
        ArgValue::Dict(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), argvalue_to_json(value)))
                .collect(),
        ),
        ArgValue::Other(text) => json!(text),
    }
}

lazy_static! {
    static ref FALLBACK_AGENT_PATTERN: Regex =
        Regex::new(r"(\w+)\s*=\s*(AssistantAgent|UserProxyAgent|ConversableAgent)\s*\(").unwrap();
    static ref SYSTEM_MESSAGE_KWARG: Regex =
        Regex::new(r#"system_message\s*=\s*["'](.+?)["']"#).unwrap();
    static ref CHAT_PATTERN: Regex = Regex::new(r"(\w+)\.initiate_chat\s*\(\s*(\w+)").unwrap();
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
    fn test_structural_agent_extraction() {
        let detector = AutoGenDetector::new();
        let source = r#"
assistant = AssistantAgent(
    name="researcher",
    system_message="You summarize research papers into briefs",
    llm_config={"model": ["gpt-4", "gpt-3.5-turbo"], "temperature": 0.1},
)
"#;
        let components = detector.extract_components(source, "agents.py");
        assert_eq!(components.len(), 1);

        let agent = &components[0];
        assert_eq!(agent.name, "researcher");
        assert_eq!(agent.kind, ComponentKind::Agent);
        // First entry of the model list wins
        assert_eq!(agent.model.as_deref(), Some("gpt-4"));
        assert!(agent.estimated_tokens.unwrap() > 0);
        assert_eq!(agent.metadata["agent_type"], json!("AssistantAgent"));
    }

    #[test]
    fn test_positional_name_and_fallback_name() {
        let detector = AutoGenDetector::new();
        let source = "a = UserProxyAgent(\"operator\")\nConversableAgent(llm_config=cfg)\n";
        let components = detector.extract_components(source, "agents.py");

        assert_eq!(components[0].name, "operator");
        assert_eq!(components[1].name, "ConversableAgent_2");
    }

    #[test]
    fn test_groupchat_participant_count() {
        let detector = AutoGenDetector::new();
        let source = "gc = GroupChat(agents=[alice, bob, carol], messages=[], max_round=8)\n";
        let components = detector.extract_components(source, "chat.py");

        assert_eq!(components[0].kind, ComponentKind::GroupChat);
        assert_eq!(components[0].metadata["agents_count"], json!(3));
    }

    #[test]
    fn test_fallback_extraction_on_malformed_source() {
        let detector = AutoGenDetector::new();
        let source = "\
critic = AssistantAgent(
    name=\"critic\",
    system_message=\"Validate the generated answers\",
";
        let components = detector.extract_components(source, "broken.py");

        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "critic");
        assert!(components[0].estimated_tokens.unwrap() > 0);
        assert_eq!(
            components[0].metadata["system_message"],
            json!("Validate the generated answers")
        );
    }

    #[test]
    fn test_chat_flow_edges() {
        let detector = AutoGenDetector::new();
        let files = file_set(&[(
            "run.py",
            "user = UserProxyAgent(name=\"user\")\n\
             assistant = AssistantAgent(name=\"assistant\")\n\
             user.initiate_chat(assistant, message=task)\n",
        )]);
        let components = detector.extract_components(&files.contents["run.py"], "run.py");
        let flows = detector.extract_workflow(&components, &files);

        assert!(flows.iter().any(|f| matches!(
            f,
            WorkflowPattern::Chat { from, to, .. } if from == "user" && to == "assistant"
        )));
    }

    #[test]
    fn test_detect_with_config_and_bonus() {
        let detector = AutoGenDetector::new();
        let files = file_set(&[
            (
                "team/agents.py",
                "import autogen\n\
                 config_list = [{\"model\": \"gpt-4\"}]\n\
                 assistant = AssistantAgent(name=\"planner\", llm_config={\"model\": \"gpt-4\"})\n\
                 user = UserProxyAgent(name=\"user\", is_termination_msg=lambda m: \"TERMINATE\" in m)\n\
                 user.initiate_chat(assistant)\n",
            ),
            ("OAI_CONFIG_LIST", "[{\"model\": \"gpt-4\"}]\n"),
        ]);

        let result = detector.detect(&files);

        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.components.len(), 2);
        assert!(result.config_files.contains(&"OAI_CONFIG_LIST".to_string()));
        assert!(
            result
                .workflow_patterns
                .iter()
                .any(|f| matches!(f, WorkflowPattern::Chat { .. }))
        );
    }
}
