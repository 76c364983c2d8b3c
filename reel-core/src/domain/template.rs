//! Pipeline template domain types
//!
//! Templates are authored as a nested tree of steps and compiled into an
//! arena (flat node list with index-based child references) before use.
//! All structural validation happens once at compile/load time: unique step
//! names, known step kinds, in-bounds child indexes, no cycles, well-formed
//! conditions. The executor walks a validated arena and never re-checks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::condition::Condition;

/// The kind of work a step performs
///
/// Doubles as the step's context category: a search step's output lands
/// under the `search` key of the execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Search,
    Download,
    Transcode,
    Deliver,
}

impl StepKind {
    /// Context key this step kind's output is merged under.
    pub fn category(self) -> &'static str {
        match self {
            StepKind::Search => "search",
            StepKind::Download => "download",
            StepKind::Transcode => "transcode",
            StepKind::Deliver => "deliver",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.category())
    }
}

fn default_true() -> bool {
    true
}

/// Declarative description of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub kind: StepKind,
    pub name: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub condition: Option<Condition>,
    /// A failed required step fails the whole execution (after retries).
    #[serde(default = "default_true")]
    pub required: bool,
    /// Whether failures of this step may be retried at all.
    #[serde(default = "default_true")]
    pub retryable: bool,
    /// Log the failure and move to the next sibling instead of failing.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Per-step timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One node in the compiled arena
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepNode {
    pub spec: StepSpec,
    /// Indexes into the owning template's node list, in declaration order.
    #[serde(default)]
    pub children: Vec<usize>,
}

/// A compiled, validated pipeline template
///
/// Immutable once referenced by a running execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTemplate {
    pub id: Uuid,
    pub name: String,
    pub nodes: Vec<StepNode>,
    /// Top-level steps in declaration order.
    pub roots: Vec<usize>,
}

/// Nested authoring form of a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    pub steps: Vec<StepTree>,
}

/// One authored step with optional sequential sub-steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTree {
    #[serde(flatten)]
    pub spec: StepSpec,
    #[serde(default)]
    pub steps: Vec<StepTree>,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template has no steps")]
    Empty,
    #[error("duplicate step name: {0}")]
    DuplicateName(String),
    #[error("step {name}: invalid condition: {reason}")]
    InvalidCondition { name: String, reason: String },
    #[error("node index {0} out of bounds")]
    IndexOutOfBounds(usize),
    #[error("step tree contains a cycle through node {0}")]
    Cycle(usize),
    #[error("node {0} is referenced more than once")]
    SharedNode(usize),
}

impl PipelineTemplate {
    /// Compile a nested authoring spec into a validated arena.
    ///
    /// Authoring an empty template is rejected here; an empty arena loaded
    /// from storage is still walkable (it completes immediately).
    pub fn compile(spec: TemplateSpec) -> Result<Self, TemplateError> {
        if spec.steps.is_empty() {
            return Err(TemplateError::Empty);
        }
        let mut nodes = Vec::new();
        let mut roots = Vec::new();
        for tree in spec.steps {
            let idx = push_tree(&mut nodes, tree);
            roots.push(idx);
        }
        let template = Self {
            id: Uuid::new_v4(),
            name: spec.name,
            nodes,
            roots,
        };
        template.validate()?;
        Ok(template)
    }

    /// Structural validation of the arena.
    ///
    /// Templates loaded from storage are arbitrary JSON, so the arena form
    /// is re-checked even though `compile` cannot produce a bad one:
    /// in-bounds indexes, every node referenced exactly once, no cycles,
    /// unique names, valid conditions. Runs once at load, not per walk.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.nodes.is_empty() && !self.roots.is_empty() {
            return Err(TemplateError::IndexOutOfBounds(self.roots[0]));
        }

        let mut seen_names = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen_names.insert(node.spec.name.clone()) {
                return Err(TemplateError::DuplicateName(node.spec.name.clone()));
            }
            if let Some(condition) = &node.spec.condition {
                condition.validate().map_err(|reason| {
                    TemplateError::InvalidCondition {
                        name: node.spec.name.clone(),
                        reason,
                    }
                })?;
            }
        }

        // Walk from the roots; every node must be visited exactly once.
        let mut visited = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = Vec::new();
        for &root in &self.roots {
            stack.push(root);
        }
        while let Some(idx) = stack.pop() {
            let node = self
                .nodes
                .get(idx)
                .ok_or(TemplateError::IndexOutOfBounds(idx))?;
            if visited[idx] {
                // A node reachable twice is either shared or part of a cycle.
                return Err(TemplateError::SharedNode(idx));
            }
            visited[idx] = true;
            for &child in &node.children {
                if child >= self.nodes.len() {
                    return Err(TemplateError::IndexOutOfBounds(child));
                }
                if visited[child] {
                    return Err(TemplateError::Cycle(child));
                }
                stack.push(child);
            }
        }

        Ok(())
    }

    /// Pre-order traversal of the whole template.
    ///
    /// The executor's walk order; also defines the cursor positions used for
    /// crash resumption.
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            self.preorder_from(root, &mut order);
        }
        order
    }

    fn preorder_from(&self, idx: usize, order: &mut Vec<usize>) {
        order.push(idx);
        for &child in &self.nodes[idx].children {
            self.preorder_from(child, order);
        }
    }

    /// Collect the indexes of `idx`'s subtree, the node itself included.
    pub fn subtree(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        self.preorder_from(idx, &mut out);
        out
    }
}

fn push_tree(nodes: &mut Vec<StepNode>, tree: StepTree) -> usize {
    // Reserve the parent slot first so siblings stay in declaration order.
    let idx = nodes.len();
    nodes.push(StepNode {
        spec: tree.spec,
        children: Vec::new(),
    });
    let mut children = Vec::new();
    for child in tree.steps {
        children.push(push_tree(nodes, child));
    }
    nodes[idx].children = children;
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(kind: StepKind, name: &str) -> StepTree {
        StepTree {
            spec: StepSpec {
                kind,
                name: name.to_string(),
                config: Map::new(),
                condition: None,
                required: true,
                retryable: true,
                continue_on_error: false,
                timeout_secs: None,
            },
            steps: Vec::new(),
        }
    }

    #[test]
    fn test_compile_preserves_declaration_order() {
        let spec = TemplateSpec {
            name: "acquire".to_string(),
            steps: vec![
                StepTree {
                    steps: vec![leaf(StepKind::Download, "grab")],
                    ..leaf(StepKind::Search, "find")
                },
                leaf(StepKind::Transcode, "encode"),
            ],
        };
        let template = PipelineTemplate::compile(spec).unwrap();
        let order: Vec<&str> = template
            .preorder()
            .into_iter()
            .map(|i| template.nodes[i].spec.name.as_str())
            .collect();
        assert_eq!(order, vec!["find", "grab", "encode"]);
    }

    #[test]
    fn test_empty_authoring_spec_rejected() {
        let spec = TemplateSpec {
            name: "empty".to_string(),
            steps: vec![],
        };
        assert!(matches!(
            PipelineTemplate::compile(spec),
            Err(TemplateError::Empty)
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let spec = TemplateSpec {
            name: "dup".to_string(),
            steps: vec![leaf(StepKind::Search, "find"), leaf(StepKind::Search, "find")],
        };
        assert!(matches!(
            PipelineTemplate::compile(spec),
            Err(TemplateError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_cycle_detected_in_stored_arena() {
        let mut template = PipelineTemplate::compile(TemplateSpec {
            name: "t".to_string(),
            steps: vec![leaf(StepKind::Search, "a"), leaf(StepKind::Download, "b")],
        })
        .unwrap();
        // Corrupt the arena: b points back at a.
        template.nodes[1].children = vec![0];
        template.roots = vec![0];
        template.nodes[0].children = vec![1];
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_out_of_bounds_child_rejected() {
        let mut template = PipelineTemplate::compile(TemplateSpec {
            name: "t".to_string(),
            steps: vec![leaf(StepKind::Search, "a")],
        })
        .unwrap();
        template.nodes[0].children = vec![7];
        assert!(matches!(
            template.validate(),
            Err(TemplateError::IndexOutOfBounds(7))
        ));
    }

    #[test]
    fn test_invalid_condition_rejected() {
        let mut tree = leaf(StepKind::Search, "a");
        tree.spec.condition = Some(
            serde_json::from_value(json!({ "field": "x", "op": "matches", "value": "(" }))
                .unwrap(),
        );
        let spec = TemplateSpec {
            name: "t".to_string(),
            steps: vec![tree],
        };
        assert!(matches!(
            PipelineTemplate::compile(spec),
            Err(TemplateError::InvalidCondition { .. })
        ));
    }

    #[test]
    fn test_authoring_json_round_trip() {
        let raw = json!({
            "name": "acquire-episode",
            "steps": [
                {
                    "kind": "search", "name": "find-release",
                    "config": { "min_seeders": 5 },
                    "steps": [
                        { "kind": "download", "name": "grab-release",
                          "condition": { "field": "search.results_count", "op": ">", "value": 0 } }
                    ]
                },
                { "kind": "transcode", "name": "encode-hevc", "timeout_secs": 7200 },
                { "kind": "deliver", "name": "ship", "continue_on_error": true }
            ]
        });
        let spec: TemplateSpec = serde_json::from_value(raw).unwrap();
        let template = PipelineTemplate::compile(spec).unwrap();
        assert_eq!(template.nodes.len(), 4);
        assert_eq!(template.roots.len(), 3);
        assert!(template.nodes[3].spec.continue_on_error);
        assert_eq!(template.nodes[2].spec.timeout_secs, Some(7200));
        // Defaults
        assert!(template.nodes[0].spec.required);
        assert!(template.nodes[0].spec.retryable);
    }
}
