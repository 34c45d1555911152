//! Task dependency graph and goal resolution.
//!
//! The graph is filled once at startup and only read afterwards. Resolution is
//! a depth-first topological sort with three-color marking; dependencies are
//! visited in registration order so the same goal always yields the same order.

use std::collections::HashMap;

use tracing::debug;

use crate::core::task::Task;
use crate::errors::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Dependencies may name tasks registered later.
    pub fn register(&mut self, task: Task) -> Result<(), GraphError> {
        if self.index.contains_key(&task.name) {
            return Err(GraphError::DuplicateTaskName { name: task.name });
        }
        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&idx| &self.tasks[idx])
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Check every dependency exists and no cycle is reachable from any task.
    pub fn validate(&self) -> Result<(), GraphError> {
        let names: Vec<&str> = self.tasks.iter().map(|t| t.name.as_str()).collect();
        self.resolve_all(names.as_slice())?;
        Ok(())
    }

    /// Every transitive dependency of `goal` followed by `goal` itself.
    pub fn resolve(&self, goal: &str) -> Result<Vec<&Task>, GraphError> {
        self.resolve_all(&[goal])
    }

    /// Merge the orders of several goals, keeping request order and listing
    /// each task once.
    pub fn resolve_all<S: AsRef<str>>(&self, goals: &[S]) -> Result<Vec<&Task>, GraphError> {
        let mut marks = vec![Mark::Unvisited; self.tasks.len()];
        let mut stack = Vec::new();
        let mut order = Vec::new();
        for goal in goals {
            let goal = goal.as_ref();
            let idx = *self.index.get(goal).ok_or_else(|| GraphError::UnknownTask {
                name: goal.to_string(),
            })?;
            self.visit(idx, &mut marks, &mut stack, &mut order)?;
        }
        debug!(
            goals = goals.len(),
            tasks = order.len(),
            "resolved task order"
        );
        Ok(order.into_iter().map(|idx| &self.tasks[idx]).collect())
    }

    fn visit(
        &self,
        idx: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        match marks[idx] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = stack.iter().position(|&i| i == idx).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..]
                    .iter()
                    .map(|&i| self.tasks[i].name.clone())
                    .collect();
                cycle.push(self.tasks[idx].name.clone());
                return Err(GraphError::CyclicDependency { cycle });
            }
            Mark::Unvisited => {}
        }

        marks[idx] = Mark::InProgress;
        stack.push(idx);
        for dep in self.dependency_indices(idx)? {
            self.visit(dep, marks, stack, order)?;
        }
        stack.pop();
        marks[idx] = Mark::Done;
        order.push(idx);
        Ok(())
    }

    fn dependency_indices(&self, idx: usize) -> Result<Vec<usize>, GraphError> {
        let task = &self.tasks[idx];
        let mut deps = Vec::with_capacity(task.dependencies.len());
        for name in &task.dependencies {
            let dep = self
                .index
                .get(name)
                .ok_or_else(|| GraphError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: name.clone(),
                })?;
            deps.push(*dep);
        }
        deps.sort_unstable();
        Ok(deps)
    }
}
