use crate::error::{Result, ScanError};
use tree_sitter::{Node, Parser};

/// Node kinds that are kept whole instead of being split into their tokens.
const ATOMIC_KINDS: &[&str] = &["string", "comment"];

/// Coarse classification of a leaf token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKind {
    Name,
    String,
    Number,
    Operator,
    Keyword,
    Comment,
    Other,
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: &'static str,
    named: bool,
    start: usize,
    end: usize,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Immutable arena built once from a tree-sitter parse.
///
/// Nodes reference each other by index, so parents and children never own
/// one another. The leaves are the childless nodes in source order, with
/// string literals and comments kept as single leaves.
#[derive(Debug, Clone)]
pub struct LeafTree {
    source: String,
    nodes: Vec<NodeData>,
    leaves: Vec<usize>,
}

/// Python tokenizer backed by tree-sitter
pub struct Scanner {
    parser: Parser,
}

impl Scanner {
    /// Create a scanner for Python source
    pub fn new() -> Result<Self> {
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| ScanError::tree_sitter(format!("Failed to set language: {e}")))?;
        Ok(Self { parser })
    }

    /// Tokenize `source`. Never fails on malformed input: tree-sitter keeps
    /// unparseable tokens inside ERROR nodes, and those still become leaves.
    pub fn scan(&mut self, source: &str) -> LeafTree {
        match self.parser.parse(source, None) {
            Some(tree) => LeafTree::build(source, tree.root_node()),
            None => {
                log::debug!("tree-sitter returned no tree, scanning as empty");
                LeafTree::empty(source)
            }
        }
    }
}

impl LeafTree {
    fn empty(source: &str) -> Self {
        Self {
            source: source.to_string(),
            nodes: Vec::new(),
            leaves: Vec::new(),
        }
    }

    fn build(source: &str, root: Node) -> Self {
        let mut tree = Self::empty(source);
        let mut stack: Vec<(Node, Option<usize>)> = vec![(root, None)];

        while let Some((node, parent)) = stack.pop() {
            // MISSING nodes are zero-width placeholders inserted by error recovery
            if node.is_missing() || (node.start_byte() == node.end_byte() && parent.is_some()) {
                continue;
            }

            let idx = tree.nodes.len();
            tree.nodes.push(NodeData {
                kind: node.kind(),
                named: node.is_named(),
                start: node.start_byte(),
                end: node.end_byte(),
                parent,
                children: Vec::new(),
            });
            if let Some(p) = parent {
                tree.nodes[p].children.push(idx);
            }

            let atomic = ATOMIC_KINDS.contains(&node.kind());
            if atomic || node.child_count() == 0 {
                if parent.is_some() {
                    tree.leaves.push(idx);
                }
                continue;
            }

            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            for child in children.into_iter().rev() {
                stack.push((child, Some(idx)));
            }
        }

        tree
    }

    /// Source text the tree was built from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn first_leaf(&self) -> Option<Leaf<'_>> {
        self.leaf(0)
    }

    /// Leaf at position `pos` in source order
    pub fn leaf(&self, pos: usize) -> Option<Leaf<'_>> {
        (pos < self.leaves.len()).then_some(Leaf { tree: self, pos })
    }

    pub fn leaves(&self) -> impl Iterator<Item = Leaf<'_>> {
        (0..self.leaves.len()).map(move |pos| Leaf { tree: self, pos })
    }

    /// Kind of the node at arena index `idx`
    pub fn node_kind(&self, idx: usize) -> Option<&'static str> {
        self.nodes.get(idx).map(|n| n.kind)
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.nodes.get(idx).and_then(|n| n.parent)
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        self.nodes
            .get(idx)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    fn text(&self, idx: usize) -> &str {
        let node = &self.nodes[idx];
        self.source.get(node.start..node.end).unwrap_or("")
    }
}

/// Cheap handle to one leaf of a [`LeafTree`]
#[derive(Clone, Copy)]
pub struct Leaf<'t> {
    tree: &'t LeafTree,
    pos: usize,
}

impl<'t> Leaf<'t> {
    fn data(&self) -> &'t NodeData {
        &self.tree.nodes[self.tree.leaves[self.pos]]
    }

    /// Position in the leaf sequence
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Arena index of the underlying node
    pub fn node(&self) -> usize {
        self.tree.leaves[self.pos]
    }

    /// Raw token text
    pub fn value(&self) -> &'t str {
        self.tree.text(self.node())
    }

    /// tree-sitter node kind, e.g. `identifier` or `import`
    pub fn raw_kind(&self) -> &'static str {
        self.data().kind
    }

    pub fn kind(&self) -> LeafKind {
        let data = self.data();
        match data.kind {
            "identifier" => LeafKind::Name,
            "string" => LeafKind::String,
            "integer" | "float" => LeafKind::Number,
            "comment" => LeafKind::Comment,
            _ if !data.named => {
                if self.value().chars().all(|c| c.is_ascii_alphabetic() || c == '_') {
                    LeafKind::Keyword
                } else {
                    LeafKind::Operator
                }
            }
            _ => LeafKind::Other,
        }
    }

    /// True for a keyword or operator token whose text is `value`
    pub fn is(&self, value: &str) -> bool {
        matches!(self.kind(), LeafKind::Keyword | LeafKind::Operator) && self.value() == value
    }

    pub fn is_name(&self) -> bool {
        self.kind() == LeafKind::Name
    }

    pub fn is_string(&self) -> bool {
        self.kind() == LeafKind::String
    }

    pub fn next(&self) -> Option<Leaf<'t>> {
        self.tree.leaf(self.pos + 1)
    }

    pub fn prev(&self) -> Option<Leaf<'t>> {
        self.step_back(1)
    }

    /// Leaf `n` positions before this one
    pub fn step_back(&self, n: usize) -> Option<Leaf<'t>> {
        let pos = self.pos.checked_sub(n)?;
        self.tree.leaf(pos)
    }

    /// Leaf `n` positions after this one
    pub fn step_forward(&self, n: usize) -> Option<Leaf<'t>> {
        self.tree.leaf(self.pos.checked_add(n)?)
    }

    /// Arena index of the parent node
    pub fn parent(&self) -> Option<usize> {
        self.data().parent
    }

    /// Byte range of the token in the source
    pub fn span(&self) -> (usize, usize) {
        let data = self.data();
        (data.start, data.end)
    }

    /// True when no line break separates this leaf from `other`
    pub fn on_same_line(&self, other: &Leaf<'_>) -> bool {
        let (a, b) = if self.pos <= other.pos {
            (self.span().1, other.span().0)
        } else {
            (other.span().1, self.span().0)
        };
        self.tree
            .source
            .get(a.min(b)..b.max(a))
            .is_some_and(|between| !between.contains('\n'))
    }
}

impl std::fmt::Debug for Leaf<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leaf")
            .field("kind", &self.kind())
            .field("value", &self.value())
            .finish()
    }
}
