//! Script tree: directories and the scripts found in them.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]; each node
//! keeps the index of its parent so breadcrumbs can be built without
//! back-references.

use crate::types::ScriptDescriptor;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Index of a node inside its [`ScriptTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryNode {
    pub path: PathBuf,
    pub name: String,
    parent: Option<NodeId>,
    /// Child directories, sorted by name
    children: Vec<NodeId>,
    /// Scripts directly in this directory, sorted by name
    scripts: Vec<ScriptDescriptor>,
    /// Own scripts plus all descendants' scripts
    script_count: usize,
}

impl DirectoryNode {
    fn new(path: PathBuf, parent: Option<NodeId>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            parent,
            children: Vec::new(),
            scripts: Vec::new(),
            script_count: 0,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn scripts(&self) -> &[ScriptDescriptor] {
        &self.scripts
    }

    pub fn script_count(&self) -> usize {
        self.script_count
    }
}

/// Tree of one configured root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptTree {
    nodes: Vec<DirectoryNode>,
}

impl ScriptTree {
    pub fn new(root: PathBuf) -> Self {
        Self {
            nodes: vec![DirectoryNode::new(root, None)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root_node(&self) -> &DirectoryNode {
        &self.nodes[0]
    }

    pub fn root_path(&self) -> &Path {
        &self.nodes[0].path
    }

    pub fn node(&self, id: NodeId) -> &DirectoryNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script_count() == 0
    }

    /// Total scripts in the tree
    pub fn script_count(&self) -> usize {
        self.nodes[0].script_count
    }

    /// Add a child directory under `parent`, keeping siblings sorted
    pub fn add_child(&mut self, parent: NodeId, path: PathBuf) -> NodeId {
        let id = NodeId(self.nodes.len());
        let node = DirectoryNode::new(path, Some(parent));
        let pos = {
            let nodes = &self.nodes;
            nodes[parent.0]
                .children
                .partition_point(|c| nodes[c.0].name < node.name)
        };
        self.nodes.push(node);
        self.nodes[parent.0].children.insert(pos, id);
        id
    }

    /// Insert a script into `node`, replacing one with the same path
    pub fn upsert_script(&mut self, node: NodeId, script: ScriptDescriptor) {
        let scripts = &mut self.nodes[node.0].scripts;
        if let Some(existing) = scripts.iter_mut().find(|s| s.path == script.path) {
            *existing = script;
        } else {
            let pos = scripts.partition_point(|s| s.name < script.name);
            scripts.insert(pos, script);
        }
        self.recount_from(node);
    }

    /// Remove the script with the given path from wherever it sits
    pub fn remove_script(&mut self, path: &Path) -> Option<ScriptDescriptor> {
        let (node, index) = self.locate(path)?;
        let removed = self.nodes[node.0].scripts.remove(index);
        self.recount_from(node);
        Some(removed)
    }

    pub fn find_script(&self, path: &Path) -> Option<&ScriptDescriptor> {
        self.locate(path)
            .map(|(node, index)| &self.nodes[node.0].scripts[index])
    }

    /// Directory node whose path equals `path`
    pub fn find_dir(&self, path: &Path) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.path == path).map(NodeId)
    }

    /// Ancestors of `id` from the root down to `id` itself
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.nodes[parent.0].parent;
        }
        chain.reverse();
        chain
    }

    /// Names from the root down to `id`, for breadcrumb display
    pub fn breadcrumbs(&self, id: NodeId) -> Vec<&str> {
        self.ancestors(id)
            .into_iter()
            .map(|n| self.nodes[n.0].name.as_str())
            .collect()
    }

    /// All scripts, depth first, in sorted order
    pub fn scripts(&self) -> Vec<&ScriptDescriptor> {
        let mut out = Vec::with_capacity(self.script_count());
        self.collect_scripts(self.root(), &mut out);
        out
    }

    fn collect_scripts<'a>(&'a self, id: NodeId, out: &mut Vec<&'a ScriptDescriptor>) {
        let node = &self.nodes[id.0];
        out.extend(node.scripts.iter());
        for child in &node.children {
            self.collect_scripts(*child, out);
        }
    }

    // Scripts reached through a followed symlink keep their canonical path,
    // which need not match the directory they are listed under.
    fn locate(&self, path: &Path) -> Option<(NodeId, usize)> {
        self.nodes.iter().enumerate().find_map(|(i, node)| {
            node.scripts
                .iter()
                .position(|s| s.path == path)
                .map(|index| (NodeId(i), index))
        })
    }

    /// Recompute aggregate counts from `id` up to the root
    fn recount_from(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(n) = current {
            let children_total: usize = self.nodes[n.0]
                .children
                .iter()
                .map(|c| self.nodes[c.0].script_count)
                .sum();
            let node = &mut self.nodes[n.0];
            node.script_count = node.scripts.len() + children_total;
            current = node.parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScriptType;
    use chrono::{TimeZone, Utc};

    fn script(path: &str) -> ScriptDescriptor {
        let path = PathBuf::from(path);
        ScriptDescriptor {
            id: ScriptDescriptor::id_for(&path),
            name: path.file_name().unwrap().to_string_lossy().to_string(),
            path,
            script_type: ScriptType::Shell,
            size: 1,
            modified: Utc.timestamp_opt(0, 0).unwrap(),
            is_executable: false,
            description: None,
            tags: vec![],
            interpreter: None,
            line_count: 1,
        }
    }

    #[test]
    fn test_counts_propagate_bottom_up() {
        let mut tree = ScriptTree::new(PathBuf::from("/r"));
        let sub = tree.add_child(tree.root(), PathBuf::from("/r/sub"));
        let deep = tree.add_child(sub, PathBuf::from("/r/sub/deep"));

        tree.upsert_script(deep, script("/r/sub/deep/x.sh"));
        tree.upsert_script(tree.root(), script("/r/a.sh"));
        assert_eq!(tree.node(deep).script_count(), 1);
        assert_eq!(tree.node(sub).script_count(), 1);
        assert_eq!(tree.script_count(), 2);

        let removed = tree.remove_script(Path::new("/r/sub/deep/x.sh"));
        assert!(removed.is_some());
        assert_eq!(tree.node(sub).script_count(), 0);
        assert_eq!(tree.script_count(), 1);
    }

    #[test]
    fn test_children_and_scripts_sorted() {
        let mut tree = ScriptTree::new(PathBuf::from("/r"));
        let root = tree.root();
        tree.add_child(root, PathBuf::from("/r/zeta"));
        tree.add_child(root, PathBuf::from("/r/alpha"));
        tree.upsert_script(root, script("/r/b.sh"));
        tree.upsert_script(root, script("/r/a.sh"));

        let names: Vec<_> = tree
            .root_node()
            .children()
            .iter()
            .map(|c| tree.node(*c).name.clone())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        let scripts: Vec<_> = tree.scripts().iter().map(|s| s.name.clone()).collect();
        assert_eq!(scripts, vec!["a.sh", "b.sh"]);
    }

    #[test]
    fn test_upsert_replaces_same_path() {
        let mut tree = ScriptTree::new(PathBuf::from("/r"));
        let root = tree.root();
        tree.upsert_script(root, script("/r/a.sh"));

        let mut updated = script("/r/a.sh");
        updated.size = 42;
        tree.upsert_script(root, updated);

        assert_eq!(tree.script_count(), 1);
        assert_eq!(tree.find_script(Path::new("/r/a.sh")).unwrap().size, 42);
    }

    #[test]
    fn test_breadcrumbs() {
        let mut tree = ScriptTree::new(PathBuf::from("/r"));
        let sub = tree.add_child(tree.root(), PathBuf::from("/r/sub"));
        let deep = tree.add_child(sub, PathBuf::from("/r/sub/deep"));
        assert_eq!(tree.breadcrumbs(deep), vec!["r", "sub", "deep"]);
        assert_eq!(tree.ancestors(tree.root()), vec![tree.root()]);
    }
}
