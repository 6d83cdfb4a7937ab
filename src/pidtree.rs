//! Transitive descendant-pid enumeration (§3 "Tree topology"). Reads the
//! kernel's per-task children list recursively; a vanished pid contributes
//! no descendants rather than aborting the walk, matching
//! `examples/original_source/src/resource_tracker/tracker.py::get_pid_children`.

use std::collections::HashSet;

use crate::procfsapi::ProcfsAPI;

/// Direct children of `pid`, read from `/proc/<pid>/task/<pid>/children`.
fn direct_children(fs: &dyn ProcfsAPI, pid: usize) -> HashSet<usize> {
    let path = format!("{pid}/task/{pid}/children");
    match fs.read_to_string(&path) {
        Ok(contents) => contents
            .split_whitespace()
            .filter_map(|s| s.parse::<usize>().ok())
            .collect(),
        Err(_) => HashSet::new(),
    }
}

/// All descendants of `pid` (not including `pid` itself), re-walked from
/// scratch every call. There is no attempt at stable identity across
/// cycles (§3): each sampling cycle re-evaluates tree membership.
pub fn descendants(fs: &dyn ProcfsAPI, pid: usize) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut frontier = vec![pid];
    while let Some(current) = frontier.pop() {
        for child in direct_children(fs, current) {
            if seen.insert(child) {
                frontier.push(child);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfsapi::MockFS;
    use std::collections::HashMap;

    #[test]
    fn walks_multi_level_tree() {
        let mut files = HashMap::new();
        files.insert("100/task/100/children".to_string(), "200 201".to_string());
        files.insert("200/task/200/children".to_string(), "300".to_string());
        files.insert("201/task/201/children".to_string(), "".to_string());
        files.insert("300/task/300/children".to_string(), "".to_string());
        let fs = MockFS::new(files, 0);

        let mut expected = HashSet::new();
        expected.insert(200);
        expected.insert(201);
        expected.insert(300);
        assert_eq!(descendants(&fs, 100), expected);
    }

    #[test]
    fn vanished_pid_yields_no_descendants() {
        let fs = MockFS::new(HashMap::new(), 0);
        assert!(descendants(&fs, 999).is_empty());
    }
}
