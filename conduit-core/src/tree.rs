//! Recursive directory snapshot model ([`Tree`]).
//!
//! A tree is a snapshot, not a live view: it is built once via repeated
//! `walk0` calls against a backend and never re-synced — callers must
//! re-snapshot after mutating the backend. Grounded in
//! `pyrc.system.system.FileSystemTree` (and its richer cousin
//! `pyrc.system.filesystemtree.FileSystemTree`), reworked as an arena of
//! nodes referenced by index rather than a parent/child `Rc` graph, per
//! the "implement as an arena... to avoid cyclic ownership" design note:
//! a `Tree` exclusively owns its nodes, and ancestor traversal walks
//! `parent` indices rather than following owning pointers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use log::debug;

use crate::backend::Backend;
use crate::error::Result;

struct Node {
    /// Absolute path of this node's directory on the backend it was
    /// snapshotted from.
    root: String,
    parent: Option<usize>,
    files: Vec<String>,
    dirs: HashMap<String, usize>,
    level: u32,
}

/// A recursive snapshot of a directory, rooted at index `0`.
pub struct Tree {
    nodes: Vec<Node>,
    /// Absolute file path -> size in bytes, populated at snapshot time so
    /// [`Tree::total_size`] doesn't need a live backend afterward.
    sizes: HashMap<String, u64>,
}

impl Tree {
    /// Builds a fully realized tree via depth-first `walk0` calls,
    /// mirroring `FileSystemTree.get_tree`.
    pub async fn snapshot(backend: &mut dyn Backend, directory: &str) -> Result<Tree> {
        let root = backend.abspath(directory).await?;
        debug!("snapshotting tree rooted at {root}");
        let mut nodes = Vec::new();
        let mut sizes = HashMap::new();
        build_node(backend, &root, None, 0, &mut nodes, &mut sizes).await?;
        debug!("tree at {root} has {} nodes", nodes.len());
        Ok(Tree { nodes, sizes })
    }

    /// Builds only the top-level node, with subdirectory names as plain
    /// strings rather than nested trees, mirroring `FileSystemTree.get_root`.
    pub async fn root_only(backend: &mut dyn Backend, directory: &str) -> Result<Tree> {
        let root = backend.abspath(directory).await?;
        let (_, dirnames, filenames) = backend.walk0(&root).await?;
        let mut sizes = HashMap::new();
        for file in &filenames {
            let path = format!("{root}/{file}");
            sizes.insert(path.clone(), backend.getsize(&path).await.unwrap_or(0).max(0) as u64);
        }
        let node = Node {
            root,
            parent: None,
            files: filenames,
            dirs: dirnames.into_iter().map(|name| (name, usize::MAX)).collect(),
            level: 0,
        };
        Ok(Tree {
            nodes: vec![node],
            sizes,
        })
    }

    pub fn root_path(&self) -> &str {
        &self.nodes[0].root
    }

    /// All nodes, ordered by level (breadth-first), root first.
    pub fn nodes(&self) -> Vec<NodeRef<'_>> {
        let mut indices: Vec<usize> = (0..self.nodes.len()).collect();
        indices.sort_by_key(|&i| self.nodes[i].level);
        indices.into_iter().map(|i| NodeRef { tree: self, index: i }).collect()
    }

    pub fn root(&self) -> NodeRef<'_> {
        NodeRef { tree: self, index: 0 }
    }

    /// Total count of files and directories across the entire tree,
    /// mirroring `FileSystemTree.__len__`.
    pub fn len(&self) -> usize {
        self.nodes.iter().map(|n| n.files.len() + n.dirs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of every contained file's size.
    pub fn total_size(&self) -> u64 {
        self.sizes.values().sum()
    }
}

/// A lightweight view onto one node of a [`Tree`].
#[derive(Copy, Clone)]
pub struct NodeRef<'a> {
    tree: &'a Tree,
    index: usize,
}

impl<'a> NodeRef<'a> {
    fn node(&self) -> &'a Node {
        &self.tree.nodes[self.index]
    }

    pub fn path(&self) -> &'a str {
        &self.node().root
    }

    pub fn level(&self) -> u32 {
        self.node().level
    }

    pub fn files(&self) -> &'a [String] {
        &self.node().files
    }

    pub fn dir_names(&self) -> impl Iterator<Item = &'a str> {
        self.node().dirs.keys().map(|s| s.as_str())
    }

    /// Absolute paths of this node's files, mirroring `realfiles()`.
    pub fn realfiles(&self) -> Vec<String> {
        self.node()
            .files
            .iter()
            .map(|f| format!("{}/{}", self.node().root, f))
            .collect()
    }

    pub fn basename(&self) -> &'a str {
        self.node()
            .root
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.node().root)
    }

    /// This node's path relative to the tree root, mirroring `relpath()`.
    pub fn relative_to_root(&self) -> String {
        let mut parts = vec![self.basename()];
        let mut current = self.node().parent;
        while let Some(idx) = current {
            let parent_node = &self.tree.nodes[idx];
            if parent_node.parent.is_some() {
                parts.push(
                    parent_node
                        .root
                        .rsplit(['/', '\\'])
                        .next()
                        .unwrap_or(&parent_node.root),
                );
            }
            current = parent_node.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    pub fn child(&self, name: &str) -> Option<NodeRef<'a>> {
        self.node().dirs.get(name).and_then(|&idx| {
            if idx == usize::MAX {
                None
            } else {
                Some(NodeRef { tree: self.tree, index: idx })
            }
        })
    }
}

fn build_node<'a>(
    backend: &'a mut dyn Backend,
    path: &'a str,
    parent: Option<usize>,
    level: u32,
    nodes: &'a mut Vec<Node>,
    sizes: &'a mut HashMap<String, u64>,
) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>> {
    Box::pin(async move {
        let (root, dirnames, filenames) = backend.walk0(path).await?;

        for file in &filenames {
            let file_path = format!("{root}/{file}");
            let size = backend.getsize(&file_path).await.unwrap_or(0).max(0) as u64;
            sizes.insert(file_path, size);
        }

        let self_index = nodes.len();
        nodes.push(Node {
            root: root.clone(),
            parent,
            files: filenames,
            dirs: HashMap::new(),
            level,
        });

        for dirname in dirnames {
            let child_path = format!("{root}/{dirname}");
            let child_index = build_node(backend, &child_path, Some(self_index), level + 1, nodes, sizes).await?;
            nodes[self_index].dirs.insert(dirname, child_index);
        }

        Ok(self_index)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::FakeBackend;

    #[tokio::test]
    async fn snapshot_enumerates_every_file_and_dir_once() {
        let mut backend = FakeBackend::with_tree(
            "/root",
            vec![
                ("/root", vec!["a"], vec!["f1.txt"]),
                ("/root/a", vec![], vec!["f2.txt", "f3.txt"]),
            ],
        );
        let tree = Tree::snapshot(&mut backend, "/root").await.unwrap();
        assert_eq!(tree.len(), 1 + 1 + 2); // 1 dir + 1 file + 2 files
        assert_eq!(tree.nodes().len(), 2);
    }

    #[tokio::test]
    async fn relative_to_root_reflects_nesting() {
        let mut backend = FakeBackend::with_tree(
            "/root",
            vec![
                ("/root", vec!["a"], vec![]),
                ("/root/a", vec!["b"], vec![]),
                ("/root/a/b", vec![], vec!["leaf.txt"]),
            ],
        );
        let tree = Tree::snapshot(&mut backend, "/root").await.unwrap();
        let a = tree.root().child("a").unwrap();
        let b = a.child("b").unwrap();
        assert_eq!(b.relative_to_root(), "a/b");
    }
}
