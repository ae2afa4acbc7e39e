//! Observability: tracing subscriber setup and task count views.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::domain::TaskState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global fmt subscriber. `RUST_LOG` overrides the `info` default.
///
/// A second call is a no-op (the first subscriber stays installed).
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Number of task records per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub create: usize,
    pub published: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retry: usize,
}

impl TaskCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Create => self.create += 1,
            TaskState::Published => self.published += 1,
            TaskState::Processing => self.processing += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Retry => self.retry += 1,
        }
    }

    pub fn get(&self, state: TaskState) -> usize {
        match state {
            TaskState::Create => self.create,
            TaskState::Published => self.published,
            TaskState::Processing => self.processing,
            TaskState::Completed => self.completed,
            TaskState::Failed => self.failed,
            TaskState::Retry => self.retry,
        }
    }

    pub fn total(&self) -> usize {
        TaskState::ALL.iter().map(|state| self.get(*state)).sum()
    }
}

impl FromIterator<TaskState> for TaskCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = TaskCounts::default();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_collect_from_states() {
        let counts: TaskCounts = [TaskState::Create, TaskState::Retry, TaskState::Retry]
            .into_iter()
            .collect();
        assert_eq!(counts.get(TaskState::Retry), 2);
        assert_eq!(counts.create, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn init_tracing_twice_does_not_panic() {
        init_tracing(LogFormat::Json);
        init_tracing(LogFormat::Pretty);
    }
}
