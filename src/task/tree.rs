// src/task/tree.rs

//! Arena of configuration tasks linked by success and failure edges.

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::TaskTreeError;
use crate::task::ConfigTask;

/// Index of a task inside its [`TaskTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

impl TaskId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Progress of a single task within its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Pending,
    Active,
    Succeeded,
    Failed,
}

#[derive(Debug)]
struct TaskNode {
    task: Box<dyn ConfigTask>,
    on_success: Option<TaskId>,
    on_failure: Option<TaskId>,
    state: TaskState,
}

/// The tasks of one job.
///
/// The first task added is the root. Each task has at most one successor
/// taken when it succeeds and at most one fallback taken when it fails.
#[derive(Debug, Default)]
pub struct TaskTree {
    nodes: Vec<TaskNode>,
    root: Option<TaskId>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a linear tree: every task continues with the next one when it
    /// succeeds, a failure ends the walk.
    pub fn sequence(tasks: impl IntoIterator<Item = Box<dyn ConfigTask>>) -> Self {
        let mut tree = Self::new();
        let mut previous: Option<TaskId> = None;
        for task in tasks {
            let id = tree.add_boxed(task);
            if let Some(prev) = previous {
                tree.nodes[prev.0].on_success = Some(id);
            }
            previous = Some(id);
        }
        tree
    }

    pub fn add(&mut self, task: impl ConfigTask + 'static) -> TaskId {
        self.add_boxed(Box::new(task))
    }

    pub fn add_boxed(&mut self, task: Box<dyn ConfigTask>) -> TaskId {
        let id = TaskId(self.nodes.len());
        self.nodes.push(TaskNode {
            task,
            on_success: None,
            on_failure: None,
            state: TaskState::Pending,
        });
        self.root.get_or_insert(id);
        id
    }

    pub fn set_root(&mut self, id: TaskId) -> Result<(), TaskTreeError> {
        self.check(id)?;
        self.root = Some(id);
        Ok(())
    }

    pub fn set_next_on_success(&mut self, from: TaskId, to: TaskId) -> Result<(), TaskTreeError> {
        self.check_link(from, to)?;
        self.nodes[from.0].on_success = Some(to);
        Ok(())
    }

    pub fn set_next_on_failure(&mut self, from: TaskId, to: TaskId) -> Result<(), TaskTreeError> {
        self.check_link(from, to)?;
        self.nodes[from.0].on_failure = Some(to);
        Ok(())
    }

    /// Continue with `to` whatever the outcome of `from`.
    pub fn set_next_unconditional(
        &mut self,
        from: TaskId,
        to: TaskId,
    ) -> Result<(), TaskTreeError> {
        self.check_link(from, to)?;
        let node = &mut self.nodes[from.0];
        node.on_success = Some(to);
        node.on_failure = Some(to);
        Ok(())
    }

    pub fn root(&self) -> Option<TaskId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn next_on_success(&self, id: TaskId) -> Result<Option<TaskId>, TaskTreeError> {
        self.check(id)?;
        Ok(self.nodes[id.0].on_success)
    }

    pub fn next_on_failure(&self, id: TaskId) -> Result<Option<TaskId>, TaskTreeError> {
        self.check(id)?;
        Ok(self.nodes[id.0].on_failure)
    }

    pub fn task(&self, id: TaskId) -> Option<&dyn ConfigTask> {
        self.nodes.get(id.0).map(|node| &*node.task as &dyn ConfigTask)
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Option<&mut dyn ConfigTask> {
        match self.nodes.get_mut(id.0) {
            Some(node) => Some(node.task.as_mut()),
            None => None,
        }
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.nodes.get(id.0).map(|node| node.state)
    }

    pub(crate) fn set_state(&mut self, id: TaskId, state: TaskState) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.state = state;
        }
    }

    /// All tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &dyn ConfigTask, TaskState)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (TaskId(idx), &*node.task as &dyn ConfigTask, node.state))
    }

    /// Reject trees the executor could loop on forever.
    pub fn validate(&self) -> Result<(), TaskTreeError> {
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

        for (idx, node) in self.nodes.iter().enumerate() {
            graph.add_node(idx);
            for next in [node.on_success, node.on_failure].into_iter().flatten() {
                self.check(next)?;
                if next.0 == idx {
                    return Err(TaskTreeError::SelfLink(next));
                }
                graph.add_edge(idx, next.0, ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(TaskTreeError::Cycle(TaskId(cycle.node_id()))),
        }
    }

    fn check(&self, id: TaskId) -> Result<(), TaskTreeError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(TaskTreeError::UnknownTask(id))
        }
    }

    fn check_link(&self, from: TaskId, to: TaskId) -> Result<(), TaskTreeError> {
        self.check(from)?;
        self.check(to)?;
        if from == to {
            return Err(TaskTreeError::SelfLink(from));
        }
        Ok(())
    }
}
