//! Next-phase inference for pending tasks.
//!
//! A pending task waits until every earlier task of its pipeline is complete,
//! then either starts or is skipped depending on where it sits in the block
//! structure:
//!
//! | Section      | Runs when                                         |
//! |--------------|---------------------------------------------------|
//! | `rescue`     | a task in the same block's main section failed   |
//! | `always`     | always                                            |
//! | anything else| no earlier failure is left unrescued             |

use std::collections::HashMap;

use crate::task::{TaskPhase, TaskRecord};
use crate::vars::{LocationId, LocationKind, VariableStore};

/// Sections a task belongs to, as `(block location, section kind)` pairs,
/// nearest first.
type Sections = Vec<(LocationId, LocationKind)>;

fn sections(store: &VariableStore, location: LocationId) -> Sections {
    store
        .ancestry(location)
        .unwrap_or_default()
        .iter()
        .map(|node| (node.parent, node.kind))
        .collect()
}

fn in_section(sections: &Sections, block: LocationId, kind: LocationKind) -> bool {
    sections.iter().any(|&(b, k)| b == block && k == kind)
}

/// Infer the phase a pending `task` moves to.
///
/// `tasks` are all tasks of the pipeline in document order. Returns
/// [`TaskPhase::Pending`] while an earlier task is still in flight.
pub fn infer_phase(task: &TaskRecord, tasks: &[TaskRecord], store: &VariableStore) -> TaskPhase {
    let position = tasks
        .iter()
        .position(|t| t.metadata.uid == task.metadata.uid)
        .unwrap_or(tasks.len());
    let earlier = &tasks[..position];

    if earlier.iter().any(|t| !t.is_complete()) {
        return TaskPhase::Pending;
    }

    let mut cache: HashMap<LocationId, Sections> = HashMap::new();
    let mut sections_of = |location: LocationId| {
        cache
            .entry(location)
            .or_insert_with(|| sections(store, location))
            .clone()
    };

    let own = sections_of(task.spec.location);
    let enclosing = own.iter().find(|(_, kind)| *kind != LocationKind::Block);

    match enclosing {
        Some(&(block, LocationKind::Rescue)) => {
            let main_failed = earlier.iter().any(|t| {
                t.is_failed()
                    && in_section(&sections_of(t.spec.location), block, LocationKind::Block)
            });
            if main_failed {
                TaskPhase::Running
            } else {
                TaskPhase::Skipped
            }
        }
        Some(&(_, LocationKind::Always)) => TaskPhase::Running,
        _ => {
            let failed: Vec<&TaskRecord> = earlier.iter().filter(|t| t.is_failed()).collect();
            let unrescued = failed.iter().any(|f| {
                let failed_sections = sections_of(f.spec.location);
                !failed_sections.iter().any(|&(block, kind)| {
                    kind == LocationKind::Block
                        && earlier.iter().any(|r| {
                            matches!(r.status.phase, TaskPhase::Succeeded | TaskPhase::Ignored)
                                && in_section(
                                    &sections_of(r.spec.location),
                                    block,
                                    LocationKind::Rescue,
                                )
                        })
                })
            });
            if unrescued {
                TaskPhase::Skipped
            } else {
                TaskPhase::Running
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ObjectMeta, TaskSpec, TaskStatus};
    use crate::vars::Location;

    struct Fixture {
        store: VariableStore,
        tasks: Vec<TaskRecord>,
    }

    impl Fixture {
        /// play(1) -> block(2) with main(3), rescue(4), always(5); then a
        /// sibling leaf(6) under the play.
        fn new() -> Self {
            let store = VariableStore::default();
            let merge = |id: u64, parent: u64, kind: LocationKind| {
                store
                    .merge_location(Location::new(
                        LocationId::new(id),
                        LocationId::new(parent),
                        kind,
                        format!("loc{}", id),
                    ))
                    .unwrap();
            };
            merge(1, 0, LocationKind::Block);
            merge(2, 1, LocationKind::Block);
            merge(3, 2, LocationKind::Block);
            merge(4, 2, LocationKind::Rescue);
            merge(5, 2, LocationKind::Always);
            merge(6, 1, LocationKind::Block);

            let tasks = [3u64, 4, 5, 6]
                .iter()
                .map(|&loc| TaskRecord {
                    metadata: ObjectMeta {
                        uid: format!("uid-{}", loc),
                        ..ObjectMeta::default()
                    },
                    spec: TaskSpec {
                        location: LocationId::new(loc),
                        ..TaskSpec::default()
                    },
                    status: TaskStatus::default(),
                })
                .collect();
            Self { store, tasks }
        }

        fn set(&mut self, index: usize, phase: TaskPhase) {
            self.tasks[index].status.phase = phase;
        }

        fn infer(&self, index: usize) -> TaskPhase {
            infer_phase(&self.tasks[index], &self.tasks, &self.store)
        }
    }

    #[test]
    fn test_first_task_runs() {
        let f = Fixture::new();
        assert_eq!(f.infer(0), TaskPhase::Running);
    }

    #[test]
    fn test_waits_for_earlier_tasks() {
        let f = Fixture::new();
        assert_eq!(f.infer(1), TaskPhase::Pending);
    }

    #[test]
    fn test_rescue_skipped_without_failure() {
        let mut f = Fixture::new();
        f.set(0, TaskPhase::Succeeded);
        assert_eq!(f.infer(1), TaskPhase::Skipped);
        f.set(1, TaskPhase::Skipped);
        assert_eq!(f.infer(2), TaskPhase::Running);
        f.set(2, TaskPhase::Succeeded);
        assert_eq!(f.infer(3), TaskPhase::Running);
    }

    #[test]
    fn test_rescue_runs_after_failure_and_recovers() {
        let mut f = Fixture::new();
        f.set(0, TaskPhase::Failed);
        assert_eq!(f.infer(1), TaskPhase::Running);
        f.set(1, TaskPhase::Succeeded);
        assert_eq!(f.infer(2), TaskPhase::Running);
        f.set(2, TaskPhase::Succeeded);
        assert_eq!(f.infer(3), TaskPhase::Running);
    }

    #[test]
    fn test_unrescued_failure_skips_later_tasks() {
        let mut f = Fixture::new();
        f.set(0, TaskPhase::Failed);
        f.set(1, TaskPhase::Failed);
        assert_eq!(f.infer(2), TaskPhase::Running);
        f.set(2, TaskPhase::Succeeded);
        assert_eq!(f.infer(3), TaskPhase::Skipped);
    }

    #[test]
    fn test_failed_with_retries_left_blocks() {
        let mut f = Fixture::new();
        f.set(0, TaskPhase::Failed);
        f.tasks[0].spec.retries = 1;
        assert_eq!(f.infer(1), TaskPhase::Pending);
    }
}
