//! Backlog loader and DAG compiler
//!
//! Validates the backlog input, computes topological phases by iterative
//! in-degree peeling (Kahn's algorithm) and seeds the state store. Fails
//! fast on an empty backlog; a dependency cycle is reported with the ids
//! involved and the shortest cycle path.

use crate::audit;
use crate::error::BacklogError;
use crate::phase::Phase;
use crate::store::{keys, StateStore};
use crate::task::{Priority, Task, TaskKind, TaskStatus};
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{info, warn};

/// Top-level backlog file. An optional `sprintSchedule` ordering is accepted
/// but advisory only; the phase compiler is authoritative.
#[derive(Debug, Deserialize)]
struct BacklogFile {
    #[serde(default)]
    backlog: Vec<RawTask>,
    #[serde(default, rename = "sprintSchedule")]
    sprint_schedule: Option<serde_yaml::Value>,
}

/// Loosely-typed backlog record; validation produces the typed [`Task`].
#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
    #[serde(default, alias = "pri")]
    priority: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "acceptanceCriteria")]
    acceptance_criteria: Option<String>,
    #[serde(default)]
    dependencies: Option<serde_yaml::Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// Parse and validate a YAML backlog into pending tasks.
pub fn load_backlog(yaml: &str) -> Result<Vec<Task>, BacklogError> {
    let file: BacklogFile = serde_yaml::from_str(yaml)?;
    if file.sprint_schedule.is_some() {
        info!("backlog carries a sprintSchedule; using computed phases instead");
    }
    validate(file.backlog)
}

fn validate(records: Vec<RawTask>) -> Result<Vec<Task>, BacklogError> {
    if records.is_empty() {
        return Err(BacklogError::Empty);
    }

    let mut tasks = Vec::with_capacity(records.len());
    let mut seen = HashSet::new();

    for (index, raw) in records.into_iter().enumerate() {
        let index = index + 1;
        let id = raw
            .id
            .filter(|v| !v.is_empty())
            .ok_or(BacklogError::MissingField { index, field: "id" })?;
        let title = raw
            .title
            .filter(|v| !v.is_empty())
            .ok_or(BacklogError::MissingField {
                index,
                field: "title",
            })?;
        let kind_str = raw
            .kind
            .filter(|v| !v.is_empty())
            .ok_or(BacklogError::MissingField {
                index,
                field: "kind",
            })?;

        if !seen.insert(id.clone()) {
            return Err(BacklogError::DuplicateId(id));
        }

        let kind = TaskKind::parse(&kind_str).ok_or_else(|| BacklogError::InvalidKind {
            task: id.clone(),
            kind: kind_str,
        })?;

        let priority = match raw.priority {
            None => Priority::default(),
            Some(value) => {
                Priority::parse(&value).ok_or_else(|| BacklogError::InvalidPriority {
                    task: id.clone(),
                    value,
                })?
            }
        };

        let dependencies = match raw.dependencies {
            None | Some(serde_yaml::Value::Null) => Vec::new(),
            Some(serde_yaml::Value::Sequence(seq)) => {
                let mut deps = Vec::with_capacity(seq.len());
                for entry in seq {
                    match entry {
                        serde_yaml::Value::String(dep) => deps.push(dep),
                        _ => return Err(BacklogError::InvalidDependencies { task: id }),
                    }
                }
                deps
            }
            Some(_) => return Err(BacklogError::InvalidDependencies { task: id }),
        };

        // Unknown fields are preserved but never interpreted.
        let mut extra = serde_json::Map::new();
        for (key, value) in raw.extra {
            match serde_json::to_value(&value) {
                Ok(json) => {
                    extra.insert(key, json);
                }
                Err(_) => warn!(task = %id, field = %key, "dropping non-JSON backlog field"),
            }
        }

        tasks.push(Task {
            id,
            title,
            description: raw.description.unwrap_or_default(),
            kind,
            priority,
            dependencies,
            acceptance_criteria: raw.acceptance_criteria,
            status: TaskStatus::Pending,
            assigned_agent: None,
            branch_name: None,
            pr_handle: None,
            retry_count: 0,
            blocked_reason: None,
            created_at: Some(Utc::now()),
            claimed_at: None,
            completed_at: None,
            merged_at: None,
            extra,
        });
    }

    // Every referenced dependency must exist in the same backlog.
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in &tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(BacklogError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    info!(count = tasks.len(), "backlog validation passed");
    Ok(tasks)
}

/// Compute execution phases via Kahn's algorithm.
///
/// Phase 1 holds all tasks with no dependencies; each subsequent phase holds
/// the tasks whose remaining dependencies emptied when the previous phase was
/// removed. Tasks within a phase have no ordering relation.
pub fn compute_phases(tasks: &[Task]) -> Result<Vec<Phase>, BacklogError> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    // dependency -> dependents
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for task in tasks {
        in_degree.insert(task.id.as_str(), task.dependencies.len());
        for dep in &task.dependencies {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(task.id.as_str());
        }
    }

    let mut phases: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    current.sort_unstable();

    while !current.is_empty() {
        let mut next = Vec::new();
        for id in &current {
            for dependent in dependents.get(id).map_or(&[][..], Vec::as_slice) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }
        next.sort_unstable();
        phases.push(std::mem::replace(&mut current, next));
    }

    let remaining: Vec<String> = {
        let mut ids: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| (*id).to_string())
            .collect();
        ids.sort_unstable();
        ids
    };
    if !remaining.is_empty() {
        let path = shortest_cycle(&remaining, &by_id);
        return Err(BacklogError::Cycle {
            tasks: remaining,
            path,
        });
    }

    Ok(phases
        .into_iter()
        .enumerate()
        .map(|(i, task_ids)| {
            let index = (i + 1) as u32;
            let name = phase_name(index, &task_ids, &by_id);
            Phase::new(index, name, task_ids.iter().map(|s| s.to_string()).collect())
        })
        .collect())
}

/// A phase whose tasks share one kind is named after it; mixed phases get a
/// positional name.
fn phase_name(index: u32, task_ids: &[&str], by_id: &HashMap<&str, &Task>) -> String {
    let kinds: HashSet<TaskKind> = task_ids
        .iter()
        .filter_map(|id| by_id.get(id).map(|t| t.kind))
        .collect();
    if kinds.len() == 1 {
        let kind = kinds.into_iter().next().unwrap_or(TaskKind::Development);
        let mut name = kind.as_str().to_string();
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        name
    } else {
        format!("Phase {index}")
    }
}

/// BFS over dependency edges restricted to the unresolved set, returning the
/// shortest closed cycle path found.
fn shortest_cycle(remaining: &[String], by_id: &HashMap<&str, &Task>) -> Vec<String> {
    let in_cycle: HashSet<&str> = remaining.iter().map(String::as_str).collect();
    let mut best: Vec<String> = Vec::new();

    for start in remaining {
        let start = start.as_str();
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);
        let mut visited: HashSet<&str> = HashSet::from([start]);
        let mut closed: Option<&str> = None;

        'search: while let Some(node) = queue.pop_front() {
            let Some(task) = by_id.get(node) else {
                continue;
            };
            for dep in &task.dependencies {
                let dep = dep.as_str();
                if !in_cycle.contains(dep) {
                    continue;
                }
                if dep == start {
                    closed = Some(node);
                    break 'search;
                }
                if visited.insert(dep) {
                    parents.insert(dep, node);
                    queue.push_back(dep);
                }
            }
        }

        if let Some(mut node) = closed {
            let mut path = vec![start.to_string()];
            let mut reversed = Vec::new();
            while node != start {
                reversed.push(node.to_string());
                match parents.get(node) {
                    Some(parent) => node = *parent,
                    None => break,
                }
            }
            path.extend(reversed.into_iter().rev());
            path.push(start.to_string());
            if best.is_empty() || path.len() < best.len() {
                best = path;
            }
        }
    }

    best
}

/// Seed the state store from a validated backlog: write all tasks as pending,
/// store the phase list and activate phase 1.
pub async fn seed_store(
    store: &dyn StateStore,
    tasks: &[Task],
    phases: &mut [Phase],
) -> Result<(), BacklogError> {
    for task in tasks {
        let payload = serde_json::to_string(task).map_err(crate::error::StoreError::from)?;
        store.hset(keys::TASKS, &task.id, &payload).await?;
    }

    if let Some(first) = phases.first_mut() {
        first.activate(Utc::now());
    }
    let phases_json =
        serde_json::to_string(&*phases).map_err(crate::error::StoreError::from)?;
    store.set(keys::PHASES, &phases_json).await?;

    if let Some(first) = phases.first() {
        let current =
            serde_json::to_string(first).map_err(crate::error::StoreError::from)?;
        store.set(keys::CURRENT_PHASE, &current).await?;
        info!(phase = first.index, name = %first.name, "phase activated");
    }

    audit::record(
        store,
        "coordinator",
        "backlog_initialized",
        serde_json::json!({ "tasks": tasks.len(), "phases": phases.len() }),
    )
    .await?;

    Ok(())
}

/// Load, validate, compile and seed in one step. Returns the number of tasks
/// and phases written. Skips seeding when the store already holds a backlog,
/// so a coordinator restart resumes instead of resetting state.
pub async fn initialize(
    store: &dyn StateStore,
    yaml: &str,
) -> Result<(usize, usize), BacklogError> {
    let tasks = load_backlog(yaml)?;
    let mut phases = compute_phases(&tasks)?;

    if store.hlen(keys::TASKS).await? > 0 {
        info!("state store already holds a backlog; resuming without reseeding");
        let existing = store.hlen(keys::TASKS).await?;
        return Ok((existing, phases.len()));
    }

    seed_store(store, &tasks, &mut phases).await?;
    info!(
        tasks = tasks.len(),
        phases = phases.len(),
        "orchestrator initialized"
    );
    Ok((tasks.len(), phases.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseStatus;
    use crate::store::MemoryStore;

    fn backlog_yaml() -> &'static str {
        r#"
backlog:
  - id: T001
    title: Set up database
    kind: setup
  - id: T002
    title: Implement API
    kind: development
    pri: H
    dependencies: [T001]
  - id: T003
    title: Write integration tests
    type: testing
    dependencies: [T002]
  - id: T004
    title: Implement CLI
    kind: development
    dependencies: [T001]
"#
    }

    #[test]
    fn test_load_valid_backlog() {
        let tasks = load_backlog(backlog_yaml()).unwrap();
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[1].priority, Priority::High);
        // `type` alias accepted
        assert_eq!(tasks[2].kind, TaskKind::Testing);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn test_empty_backlog_fails_fast() {
        assert!(matches!(
            load_backlog("backlog: []"),
            Err(BacklogError::Empty)
        ));
    }

    #[test]
    fn test_missing_title_rejected() {
        let yaml = "backlog:\n  - id: T001\n    kind: setup\n";
        assert!(matches!(
            load_backlog(yaml),
            Err(BacklogError::MissingField { index: 1, field: "title" })
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let yaml = r#"
backlog:
  - { id: T001, title: A, kind: setup }
  - { id: T001, title: B, kind: setup }
"#;
        assert!(matches!(
            load_backlog(yaml),
            Err(BacklogError::DuplicateId(id)) if id == "T001"
        ));
    }

    #[test]
    fn test_invalid_kind_rejected() {
        let yaml = "backlog:\n  - { id: T001, title: A, kind: deploy }\n";
        assert!(matches!(
            load_backlog(yaml),
            Err(BacklogError::InvalidKind { kind, .. }) if kind == "deploy"
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let yaml = "backlog:\n  - { id: T001, title: A, kind: setup, dependencies: [T999] }\n";
        assert!(matches!(
            load_backlog(yaml),
            Err(BacklogError::UnknownDependency { dependency, .. }) if dependency == "T999"
        ));
    }

    #[test]
    fn test_non_list_dependencies_rejected() {
        let yaml = "backlog:\n  - { id: T001, title: A, kind: setup, dependencies: T000 }\n";
        assert!(matches!(
            load_backlog(yaml),
            Err(BacklogError::InvalidDependencies { .. })
        ));
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let yaml = "backlog:\n  - { id: T001, title: A, kind: setup, estimate: 3d }\n";
        let tasks = load_backlog(yaml).unwrap();
        assert_eq!(tasks[0].extra["estimate"], "3d");
    }

    #[test]
    fn test_phase_computation() {
        let tasks = load_backlog(backlog_yaml()).unwrap();
        let phases = compute_phases(&tasks).unwrap();
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0].tasks, vec!["T001"]);
        assert_eq!(phases[1].tasks, vec!["T002", "T004"]);
        assert_eq!(phases[2].tasks, vec!["T003"]);
        assert_eq!(phases[0].name, "Setup");
        assert_eq!(phases[1].name, "Development");
        assert_eq!(phases[2].name, "Testing");
    }

    #[test]
    fn test_mixed_phase_gets_positional_name() {
        let tasks = vec![
            Task::new("A", "a", TaskKind::Setup),
            Task::new("B", "b", TaskKind::Development),
        ];
        let phases = compute_phases(&tasks).unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].name, "Phase 1");
    }

    #[test]
    fn test_flattened_phases_are_topological() {
        // Round-trip property: concatenating phases in order yields a valid
        // topological order of the original DAG.
        let tasks = load_backlog(backlog_yaml()).unwrap();
        let phases = compute_phases(&tasks).unwrap();
        let order: Vec<&str> = phases
            .iter()
            .flat_map(|p| p.tasks.iter().map(String::as_str))
            .collect();
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        for task in &tasks {
            for dep in &task.dependencies {
                assert!(
                    position[dep.as_str()] < position[task.id.as_str()],
                    "{dep} must precede {}",
                    task.id
                );
            }
        }
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let yaml = r#"
backlog:
  - { id: T001, title: A, kind: setup, dependencies: [T003] }
  - { id: T002, title: B, kind: setup, dependencies: [T001] }
  - { id: T003, title: C, kind: setup, dependencies: [T002] }
  - { id: T004, title: D, kind: setup }
"#;
        let tasks = load_backlog(yaml).unwrap();
        let err = compute_phases(&tasks).unwrap_err();
        match err {
            BacklogError::Cycle { tasks, path } => {
                assert_eq!(tasks, vec!["T001", "T002", "T003"]);
                assert_eq!(path.len(), 4);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_self_cycle_shortest_path() {
        let a = Task::new("A", "a", TaskKind::Setup).with_dependency("B");
        let b = Task::new("B", "b", TaskKind::Setup)
            .with_dependency("A")
            .with_dependency("C");
        let c = Task::new("C", "c", TaskKind::Setup).with_dependency("B");
        let err = compute_phases(&[a, b, c]).unwrap_err();
        match err {
            BacklogError::Cycle { path, .. } => {
                // A<->B and B<->C are both length-2 cycles; the reported
                // path must be one of them, closed.
                assert_eq!(path.len(), 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_initialize_seeds_store() {
        let store = MemoryStore::new();
        let (task_count, phase_count) = initialize(&store, backlog_yaml()).await.unwrap();
        assert_eq!(task_count, 4);
        assert_eq!(phase_count, 3);

        assert_eq!(store.hlen(keys::TASKS).await.unwrap(), 4);
        let current = store.get(keys::CURRENT_PHASE).await.unwrap().unwrap();
        let phase: Phase = serde_json::from_str(&current).unwrap();
        assert_eq!(phase.index, 1);
        assert_eq!(phase.status, PhaseStatus::Active);
    }

    #[tokio::test]
    async fn test_initialize_resumes_without_reseeding() {
        let store = MemoryStore::new();
        initialize(&store, backlog_yaml()).await.unwrap();

        // Mutate a task, then re-initialize: the mutation must survive.
        let raw = store.hget(keys::TASKS, "T001").await.unwrap().unwrap();
        let mut task: Task = serde_json::from_str(&raw).unwrap();
        task.status = TaskStatus::Merged;
        store
            .hset(keys::TASKS, "T001", &serde_json::to_string(&task).unwrap())
            .await
            .unwrap();

        initialize(&store, backlog_yaml()).await.unwrap();
        let raw = store.hget(keys::TASKS, "T001").await.unwrap().unwrap();
        let task: Task = serde_json::from_str(&raw).unwrap();
        assert_eq!(task.status, TaskStatus::Merged);
    }
}
