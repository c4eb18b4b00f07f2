//! Dependency resolver: DAG construction and cycle validation.

use std::collections::BTreeMap;

use tracing::instrument;
use workflow_runtime_common::error::{Error, Result};
use workflow_runtime_common::types::{Dag, DagNode, TaskId, TaskSpec};
use workflow_runtime_core::DependencyResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Default dependency resolver. Cycle detection is a hand-rolled
/// three-color DFS over forward edges rather than a graph-library
/// traversal, so self-loops and back-edges surface exactly the cases
/// the scheduler's pending-count invariant depends on.
#[derive(Debug, Default)]
pub struct DefaultDependencyResolver;

impl DefaultDependencyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DependencyResolver for DefaultDependencyResolver {
    #[instrument(skip(self, tasks))]
    fn build_dag(&self, tasks: &[TaskSpec]) -> Result<Dag> {
        let mut nodes: BTreeMap<TaskId, DagNode> = BTreeMap::new();
        let known: std::collections::BTreeSet<&TaskId> = tasks.iter().map(|t| &t.id).collect();

        for task in tasks {
            for dep in &task.deps {
                if !known.contains(dep) {
                    return Err(Error::DepNotFound(dep.to_string()));
                }
            }
            nodes.insert(
                task.id.clone(),
                DagNode {
                    id: task.id.clone(),
                    dependencies: task.deps.clone(),
                    dependents: Vec::new(),
                    pending: u32::try_from(task.deps.len()).unwrap_or(u32::MAX),
                },
            );
        }

        let forward: Vec<(TaskId, TaskId)> = tasks
            .iter()
            .flat_map(|t| t.deps.iter().map(move |d| (d.clone(), t.id.clone())))
            .collect();
        for (from, to) in forward {
            if let Some(node) = nodes.get_mut(&from) {
                node.dependents.push(to);
            }
        }

        Ok(Dag { nodes })
    }

    #[instrument(skip(self, dag))]
    fn validate(&self, dag: &Dag) -> Result<()> {
        let mut colors: BTreeMap<&TaskId, Color> =
            dag.nodes.keys().map(|id| (id, Color::White)).collect();

        for id in dag.nodes.keys() {
            if colors[id] == Color::White {
                self.visit(dag, id, &mut colors)?;
            }
        }
        Ok(())
    }
}

impl DefaultDependencyResolver {
    fn visit<'a>(
        &self,
        dag: &'a Dag,
        id: &'a TaskId,
        colors: &mut BTreeMap<&'a TaskId, Color>,
    ) -> Result<()> {
        colors.insert(id, Color::Gray);
        if let Some(node) = dag.nodes.get(id) {
            for dependent in &node.dependents {
                match colors.get(dependent).copied() {
                    Some(Color::Gray) => return Err(Error::DagCycle),
                    Some(Color::White) => self.visit(dag, dependent, colors)?,
                    Some(Color::Black) | None => {}
                }
            }
        }
        colors.insert(id, Color::Black);
        Ok(())
    }
}
