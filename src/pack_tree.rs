use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A file inside a pack as enumerated by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackEntry {
    /// Slash-delimited path inside the pack, e.g. `db/land_units_tables/data`.
    pub id: String,
    pub label: String,
    pub source_file_id: String,
    pub source_path: String,
    #[serde(default)]
    pub preview_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub label: String,
    pub source_file_id: String,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn children(&self) -> &[TreeNode] {
        self.children.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackTree {
    pub roots: Vec<TreeNode>,
}

impl PackTree {
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        let mut level = self.roots.as_slice();
        let mut found = None;
        for prefix in get_parent_paths(id).into_iter().chain(std::iter::once(normalize(id))) {
            let node = level.iter().find(|node| node.id == prefix)?;
            level = node.children();
            found = Some(node);
        }
        found
    }

    /// Every node id, depth first in child order.
    pub fn flatten_ids(&self) -> Vec<String> {
        fn walk(nodes: &[TreeNode], out: &mut Vec<String>) {
            for node in nodes {
                out.push(node.id.clone());
                walk(node.children(), out);
            }
        }

        let mut ids = Vec::new();
        walk(&self.roots, &mut ids);
        ids
    }

    /// Ancestor ids that must be expanded to reveal `id`, or nothing when `id`
    /// is not in the tree.
    pub fn expand_to(&self, id: &str) -> Vec<String> {
        if self.find(id).is_none() {
            return Vec::new();
        }
        get_parent_paths(id)
    }
}

struct Slot {
    node: TreeNode,
    children: Vec<usize>,
    has_leaf_meta: bool,
}

/// Rebuilds the folder hierarchy of a pack from its flat file list. Children
/// keep the order in which they were first seen.
pub fn build_tree<I>(entries: I) -> PackTree
where
    I: IntoIterator<Item = PackEntry>,
{
    let mut slots: Vec<Slot> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut roots: Vec<usize> = Vec::new();

    for entry in entries {
        let segments: Vec<&str> = entry.id.split('/').filter(|segment| !segment.is_empty()).collect();
        let Some(last) = segments.len().checked_sub(1) else {
            tracing::debug!(id = %entry.id, "skipping pack entry without path segments");
            continue;
        };

        let mut parent: Option<usize> = None;
        let mut path = String::new();
        for (depth, segment) in segments.iter().enumerate() {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);

            let index = match by_id.get(&path) {
                Some(index) => *index,
                None => {
                    let index = slots.len();
                    slots.push(Slot {
                        node: TreeNode {
                            id: path.clone(),
                            label: segment.to_string(),
                            source_file_id: entry.source_file_id.clone(),
                            source_path: entry.source_path.clone(),
                            preview_ref: None,
                            children: None,
                        },
                        children: Vec::new(),
                        has_leaf_meta: false,
                    });
                    by_id.insert(path.clone(), index);
                    match parent {
                        Some(parent) => slots[parent].children.push(index),
                        None => roots.push(index),
                    }
                    index
                }
            };

            if depth == last && !slots[index].has_leaf_meta {
                let slot = &mut slots[index];
                slot.node.label = entry.label.clone();
                slot.node.source_file_id = entry.source_file_id.clone();
                slot.node.source_path = entry.source_path.clone();
                slot.node.preview_ref = entry.preview_ref.clone();
                slot.has_leaf_meta = true;
            }
            parent = Some(index);
        }
    }

    PackTree {
        roots: roots.into_iter().map(|index| materialize(&slots, index)).collect(),
    }
}

fn materialize(slots: &[Slot], index: usize) -> TreeNode {
    let slot = &slots[index];
    let mut node = slot.node.clone();
    if !slot.children.is_empty() {
        node.children = Some(slot.children.iter().map(|child| materialize(slots, *child)).collect());
    }
    node
}

/// Every strict ancestor id of `id`, outermost first. `"a/b/c"` gives
/// `["a", "a/b"]`; a root-level id gives `[]`.
pub fn get_parent_paths(id: &str) -> Vec<String> {
    let segments: Vec<&str> = id.split('/').filter(|segment| !segment.is_empty()).collect();
    let mut paths = Vec::with_capacity(segments.len().saturating_sub(1));
    let mut current = String::new();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        paths.push(current.clone());
    }
    paths
}

fn normalize(id: &str) -> String {
    id.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::{build_tree, get_parent_paths, PackEntry, TreeNode};
    use std::collections::BTreeSet;

    fn entry(id: &str) -> PackEntry {
        PackEntry {
            id: id.to_string(),
            label: format!("leaf:{}", id.rsplit('/').next().unwrap_or(id)),
            source_file_id: "sfo_grimhammer.pack".to_string(),
            source_path: "/workshop/1142710/sfo_grimhammer.pack".to_string(),
            preview_ref: Some(format!("preview:{}", id)),
        }
    }

    fn collect<'a>(nodes: &'a [TreeNode], out: &mut Vec<&'a TreeNode>) {
        for node in nodes {
            out.push(node);
            if let Some(children) = &node.children {
                collect(children, out);
            }
        }
    }

    #[test]
    fn parent_paths_are_prefixes() {
        assert_eq!(get_parent_paths("a/b/c"), vec!["a".to_string(), "a/b".to_string()]);
        assert!(get_parent_paths("a").is_empty());
        assert!(get_parent_paths("").is_empty());
    }

    #[test]
    fn flattening_reproduces_ids_and_prefixes() {
        let ids = [
            "db/land_units_tables/data__",
            "db/land_units_tables/sfo_units",
            "db/main_units_tables/sfo_units",
            "text/db/sfo.loc",
            "ui/skins/default/button.png",
            "script/campaign/mod/sfo.lua",
        ];
        let tree = build_tree(ids.iter().map(|id| entry(id)));

        let flattened: BTreeSet<String> = tree.flatten_ids().into_iter().collect();
        let mut expected: BTreeSet<String> = BTreeSet::new();
        for id in ids {
            expected.insert(id.to_string());
            expected.extend(get_parent_paths(id));
        }
        assert_eq!(flattened, expected);

        let leaves: BTreeSet<String> = {
            let mut nodes = Vec::new();
            collect(&tree.roots, &mut nodes);
            nodes.iter().filter(|node| node.is_leaf()).map(|node| node.id.clone()).collect()
        };
        let expected_leaves: BTreeSet<String> = ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(leaves, expected_leaves);

        let mut nodes = Vec::new();
        collect(&tree.roots, &mut nodes);
        let all: BTreeSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
        assert_eq!(all.len(), nodes.len(), "ids are unique");
        for node in nodes {
            for parent in get_parent_paths(&node.id) {
                assert!(all.contains(parent.as_str()));
                assert!(node.id.starts_with(&format!("{}/", parent)));
            }
        }
    }

    #[test]
    fn children_keep_first_encounter_order() {
        let tree = build_tree(["zeta/1", "alpha/1", "zeta/0", "mid"].into_iter().map(entry));
        let root_ids: Vec<&str> = tree.roots.iter().map(|node| node.id.as_str()).collect();
        assert_eq!(root_ids, vec!["zeta", "alpha", "mid"]);

        let zeta = tree.find("zeta").expect("zeta");
        let child_ids: Vec<&str> = zeta
            .children
            .as_ref()
            .expect("folder")
            .iter()
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(child_ids, vec!["zeta/1", "zeta/0"]);
    }

    #[test]
    fn leaf_metadata_only_at_terminal_segment() {
        let tree = build_tree([entry("db/units/data")]);
        let folder = tree.find("db/units").expect("folder");
        assert_eq!(folder.label, "units");
        assert!(folder.preview_ref.is_none());
        assert_eq!(folder.source_file_id, "sfo_grimhammer.pack");

        let leaf = tree.find("db/units/data").expect("leaf");
        assert!(leaf.is_leaf());
        assert_eq!(leaf.label, "leaf:data");
        assert_eq!(leaf.preview_ref.as_deref(), Some("preview:db/units/data"));
    }

    #[test]
    fn entry_that_is_also_a_folder_keeps_its_metadata() {
        let tree = build_tree([entry("a/b/c"), entry("a/b")]);
        let node = tree.find("a/b").expect("node");
        assert_eq!(node.label, "leaf:b");
        assert!(!node.is_leaf());
    }

    #[test]
    fn expand_to_reveals_known_nodes_only() {
        let tree = build_tree([entry("db/units/data")]);
        assert_eq!(tree.expand_to("db/units/data"), vec!["db".to_string(), "db/units".to_string()]);
        assert!(tree.expand_to("db/missing/data").is_empty());
        assert!(tree.find("").is_none());
    }

    #[test]
    fn empty_segments_are_ignored() {
        let tree = build_tree([entry("/db//units/"), entry("")]);
        assert_eq!(tree.flatten_ids(), vec!["db".to_string(), "db/units".to_string()]);
    }
}
