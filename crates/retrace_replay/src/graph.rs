//! Typed step dependency graph for invalidation traversal.
//!
//! Three edge kinds connect steps: structural parent->child edges,
//! `llm_call` -> emitted `tool_call` edges, and `tool_call` -> consuming
//! `llm_call` edges. The hybrid replay strategy walks all three from the
//! pivot to find every step whose recorded result is no longer
//! trustworthy.

use retrace_model::{StepType, Trace};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Dependency graph over one trace's steps, built once per replay
/// invocation.
#[derive(Debug)]
pub struct DependencyGraph {
    /// parent step id -> child step ids, in trace order
    children: HashMap<String, Vec<String>>,
    /// tool-call id -> the `tool_call` step carrying it
    tool_step_by_call: HashMap<String, String>,
    /// `llm_call` step id -> tool-call ids it emitted
    emitted_by_step: HashMap<String, Vec<String>>,
    /// tool-call id -> `llm_call` step ids that consumed it
    consumers_by_call: HashMap<String, Vec<String>>,
    /// step id -> (type, own tool-call id)
    nodes: HashMap<String, (StepType, Option<String>)>,
}

impl DependencyGraph {
    /// Build the graph from a trace's steps.
    #[must_use]
    pub fn build(trace: &Trace) -> Self {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut tool_step_by_call = HashMap::new();
        let mut emitted_by_step: HashMap<String, Vec<String>> = HashMap::new();
        let mut consumers_by_call: HashMap<String, Vec<String>> = HashMap::new();
        let mut nodes = HashMap::new();

        for step in &trace.steps {
            nodes.insert(step.id.clone(), (step.step_type, step.tool_call_id.clone()));
            if let Some(parent_id) = &step.parent_step_id {
                children
                    .entry(parent_id.clone())
                    .or_default()
                    .push(step.id.clone());
            }
            if step.step_type == StepType::ToolCall {
                if let Some(call_id) = &step.tool_call_id {
                    tool_step_by_call.insert(call_id.clone(), step.id.clone());
                }
            }
            if step.step_type == StepType::LlmCall {
                if let Some(io) = &step.io {
                    emitted_by_step.insert(step.id.clone(), io.emitted_tool_call_ids.clone());
                    for call_id in &io.consumed_tool_call_ids {
                        consumers_by_call
                            .entry(call_id.clone())
                            .or_default()
                            .push(step.id.clone());
                    }
                }
            }
        }

        Self {
            children,
            tool_step_by_call,
            emitted_by_step,
            consumers_by_call,
            nodes,
        }
    }

    /// All steps transitively dependent on the pivot, pivot excluded.
    ///
    /// Breadth-first over the three edge kinds. An unknown pivot yields an
    /// empty set; callers validate pivot existence at the service boundary.
    #[must_use]
    pub fn dependents_of(&self, pivot_id: &str) -> BTreeSet<String> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        if !self.nodes.contains_key(pivot_id) {
            return visited;
        }
        visited.insert(pivot_id.to_string());
        queue.push_back(pivot_id.to_string());

        while let Some(current) = queue.pop_front() {
            let Some((step_type, tool_call_id)) = self.nodes.get(&current) else {
                continue;
            };

            if let Some(child_ids) = self.children.get(&current) {
                for child_id in child_ids {
                    if visited.insert(child_id.clone()) {
                        queue.push_back(child_id.clone());
                    }
                }
            }

            if *step_type == StepType::LlmCall {
                if let Some(call_ids) = self.emitted_by_step.get(&current) {
                    for call_id in call_ids {
                        if let Some(tool_step_id) = self.tool_step_by_call.get(call_id) {
                            if visited.insert(tool_step_id.clone()) {
                                queue.push_back(tool_step_id.clone());
                            }
                        }
                    }
                }
            }

            if *step_type == StepType::ToolCall {
                if let Some(call_id) = tool_call_id {
                    if let Some(consumer_ids) = self.consumers_by_call.get(call_id) {
                        for consumer_id in consumer_ids {
                            if visited.insert(consumer_id.clone()) {
                                queue.push_back(consumer_id.clone());
                            }
                        }
                    }
                }
            }
        }

        visited.remove(pivot_id);
        visited
    }
}
