//! # Summary Display Module
//!
//! Renders the analysis result as a terminal summary
//!
//! ## Key Components
//! - [`format_summary`] - Full text summary of detection plus optimization
//! - [`format_number`] - Thousands-separated token counts

use crate::calculator;
use crate::detector::DetectionResult;
use crate::optimizer::{OptimizedWorkflow, ParallelOpportunity};

pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut result = String::new();
    for (i, c) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let kept: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

pub fn format_summary(detection: &DetectionResult, workflow: &OptimizedWorkflow) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "Framework: {} ({} confidence, score {:.0}/100)\n",
        detection.framework,
        detection.confidence.label(),
        detection.confidence_score
    ));
    out.push_str(&format!(
        "Evidence: {} config file(s), {} import(s), {} code pattern(s), {} file pattern(s)\n",
        detection.config_files.len(),
        detection.imports_found.len(),
        detection.code_patterns_matched.len(),
        detection.file_patterns_matched.len()
    ));
    if !detection.workflow_patterns.is_empty() {
        out.push_str(&format!(
            "Workflow relations: {}\n",
            detection.workflow_patterns.len()
        ));
    }
    out.push('\n');

    // Per-component cost table
    out.push_str(&format!(
        "{:<24} {:<10} {:<24} {:>10} {:>12} {:>12}\n",
        "Component", "Type", "Model", "Tokens", "Baseline", "Optimized"
    ));
    out.push_str(&format!("{}\n", "-".repeat(98)));

    for (i, component) in workflow.optimized_components.iter().enumerate() {
        let baseline = &workflow.original_calculations[i];
        let optimized = &workflow.optimized_calculations[i];
        out.push_str(&format!(
            "{:<24} {:<10} {:<24} {:>10} {:>12} {:>12}\n",
            truncate(&component.name, 24),
            component.kind.label(),
            truncate(component.model.as_deref().unwrap_or("(default)"), 24),
            format_number(component.estimated_tokens.unwrap_or(0)),
            format!("${:.4}", baseline.total_cost),
            format!("${:.4}", optimized.total_cost),
        ));
    }

    out.push_str(&format!("{}\n", "-".repeat(98)));
    out.push_str(&format!(
        "Total: ${:.4} -> ${:.4}  (saves ${:.4}, {:.1}%)\n\n",
        workflow.total_original_cost,
        workflow.total_optimized_cost,
        workflow.total_savings,
        workflow.savings_percentage
    ));

    if !workflow.strategies_applied.is_empty() {
        out.push_str("Strategies applied:\n");
        for strategy in &workflow.strategies_applied {
            out.push_str(&format!("  - {}: {}\n", strategy.name, strategy.description));
        }
        out.push('\n');
    }

    if !workflow.parallel_opportunities.is_empty() {
        out.push_str("Parallel opportunities:\n");
        for opportunity in &workflow.parallel_opportunities {
            let label = match opportunity {
                ParallelOpportunity::ParallelAgents { .. } => "agents",
                ParallelOpportunity::ParallelChains { .. } => "chains",
            };
            out.push_str(&format!(
                "  - {} [{}] (~{:.0}% time saved)\n",
                label,
                opportunity.names().join(", "),
                opportunity.estimated_time_savings() * 100.0
            ));
        }
        out.push('\n');
    }

    if !workflow.cache_opportunities.is_empty() {
        out.push_str("Cache opportunities:\n");
        for cache in &workflow.cache_opportunities {
            let potential = match cache.cache_potential {
                crate::optimizer::CachePotential::High => "high",
                crate::optimizer::CachePotential::Medium => "medium",
                crate::optimizer::CachePotential::Low => "low",
            };
            out.push_str(&format!(
                "  - {} ({}): {} potential, ~{:.0}% hit rate\n",
                cache.component,
                cache.task.as_str(),
                potential,
                cache.estimated_hit_rate * 100.0
            ));
        }

        // Advisory model picks for the observed task types
        let mut seen_tasks = Vec::new();
        for cache in &workflow.cache_opportunities {
            let task = cache.task.as_str();
            if !seen_tasks.contains(&task) {
                seen_tasks.push(task);
            }
        }
        out.push_str("Suggested models by task:\n");
        for task in seen_tasks {
            for suggestion in calculator::model_suggestions(task) {
                out.push_str(&format!(
                    "  - {}: {} ({})\n",
                    task, suggestion.model, suggestion.reason
                ));
            }
        }
        out.push('\n');
    }

    if !workflow.recommendations.is_empty() {
        out.push_str("Recommendations:\n");
        for (i, recommendation) in workflow.recommendations.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, recommendation));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Component, ComponentKind};
    use crate::optimizer::OptimizationEngine;
    use std::collections::HashMap;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1500), "1,500");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a_very_long_component_name", 10), "a_very_lo…");
    }

    #[test]
    fn test_summary_contains_key_sections() {
        let mut detection = DetectionResult::new("autogen");
        detection.confidence_score = 80.0;
        detection.components = vec![Component {
            name: "classify_tickets".to_string(),
            kind: ComponentKind::Agent,
            file_path: "app.py".to_string(),
            line_number: 3,
            model: Some("gpt-4".to_string()),
            estimated_tokens: Some(1500),
            metadata: HashMap::new(),
        }];

        let workflow = OptimizationEngine::new().optimize_workflow(&detection);
        let summary = format_summary(&detection, &workflow);

        assert!(summary.contains("Framework: autogen"));
        assert!(summary.contains("classify_tickets"));
        assert!(summary.contains("Strategies applied:"));
        assert!(summary.contains("Smart Model Routing"));
        assert!(summary.contains("Recommendations:"));
    }
}
