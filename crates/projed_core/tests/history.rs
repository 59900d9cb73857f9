use projed_core::{ConceptSnapshot, History, StateLog};
use uuid::Uuid;

fn snapshot(index: usize) -> ConceptSnapshot {
    ConceptSnapshot {
        id: Uuid::new_v4(),
        name: format!("Step{index}"),
        attributes: Vec::new(),
        components: Vec::new(),
    }
}

#[test]
fn state_log_keeps_the_last_eight() {
    let mut log = StateLog::new();
    let concept = Uuid::new_v4();
    let ids: Vec<_> = (0..9)
        .map(|index| log.add_state(concept, snapshot(index), None))
        .collect();

    assert_eq!(log.capacity(), 8);
    assert_eq!(log.len(), 8);
    assert!(log.get(ids[0]).is_none());
    assert!(ids[1..].iter().all(|id| log.get(*id).is_some()));

    let names: Vec<&str> = log.entries().map(|state| state.value.name.as_str()).collect();
    assert_eq!(names.first(), Some(&"Step1"));
    assert_eq!(names.last(), Some(&"Step8"));
}

#[test]
fn undo_and_redo_are_noops_at_boundaries() {
    let mut history = History::new(vec![1]);
    assert!(!history.has_undo());
    assert_eq!(history.undo(), None);

    history.set(&vec![1, 2]);
    history.set(&vec![1, 2, 3]);
    assert_eq!(history.undo(), Some(&vec![1, 2]));
    assert_eq!(history.undo(), Some(&vec![1]));
    assert_eq!(history.undo(), None);
    assert_eq!(history.current(), &vec![1]);

    assert_eq!(history.redo(), Some(&vec![1, 2]));
    assert_eq!(history.redo(), Some(&vec![1, 2, 3]));
    assert_eq!(history.redo(), None);
    assert!(!history.has_redo());
}

#[test]
fn set_stores_a_copy() {
    let mut value = String::from("draft");
    let mut history = History::new(String::new());
    history.set(&value);
    value.push_str(" edited");

    assert_eq!(history.current(), "draft");
    assert_eq!(history.undo().map(String::as_str), Some(""));
}
