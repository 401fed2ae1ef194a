//! ORB vocabulary tree used to prune descriptor comparisons.
//!
//! The vocabulary is a hierarchical k-means tree trained offline on ORB
//! descriptors (DBoW2 text format). This crate only reads it: each descriptor
//! is routed from the root to a leaf by following the closest child, and the
//! ancestor a few levels above the leaf becomes the descriptor's node. Two
//! descriptors that share a node are a-priori similar, so BoW search only
//! compares descriptors within shared nodes.
//!
//! # Key Types
//!
//! - [`FeatureVector`]: node id -> feature indices, plus the reverse lookup
//! - [`OrbVocabulary`]: the read-only tree with quantization

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::matcher::descriptor_distance;
use crate::tracking::frame::Descriptor;

/// Vocabulary node identifier.
pub type NodeId = u32;

/// Default number of levels above the leaves used to group features.
pub const DEFAULT_LEVELS_UP: usize = 4;

/// Features of one view grouped by vocabulary node.
///
/// Nodes are kept sorted so two vectors can be merge-joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    nodes: BTreeMap<NodeId, Vec<usize>>,
    node_of: Vec<Option<NodeId>>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build directly from a per-feature node assignment.
    pub fn from_assignments(assignments: &[NodeId]) -> Self {
        let mut fv = Self::new();
        for (idx, &node) in assignments.iter().enumerate() {
            fv.insert(node, idx);
        }
        fv
    }

    pub fn insert(&mut self, node: NodeId, feature_idx: usize) {
        self.nodes.entry(node).or_default().push(feature_idx);
        if self.node_of.len() <= feature_idx {
            self.node_of.resize(feature_idx + 1, None);
        }
        self.node_of[feature_idx] = Some(node);
    }

    /// Vocabulary node of a feature, if it was quantized.
    pub fn node_of(&self, feature_idx: usize) -> Option<NodeId> {
        self.node_of.get(feature_idx).copied().flatten()
    }

    pub fn get(&self, node: NodeId) -> Option<&[usize]> {
        self.nodes.get(&node).map(|v| v.as_slice())
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[usize])> {
        self.nodes.iter().map(|(&n, v)| (n, v.as_slice()))
    }

    /// Nodes present in both vectors, in ascending node order, with the
    /// feature indices of each side.
    pub fn shared_nodes<'a>(&'a self, other: &'a FeatureVector) -> Vec<(NodeId, &'a [usize], &'a [usize])> {
        let mut shared = Vec::new();
        let mut it1 = self.nodes.iter().peekable();
        let mut it2 = other.nodes.iter().peekable();

        while let (Some(&(n1, f1)), Some(&(n2, f2))) = (it1.peek(), it2.peek()) {
            match n1.cmp(n2) {
                std::cmp::Ordering::Equal => {
                    shared.push((*n1, f1.as_slice(), f2.as_slice()));
                    it1.next();
                    it2.next();
                }
                std::cmp::Ordering::Less => {
                    it1.next();
                }
                std::cmp::Ordering::Greater => {
                    it2.next();
                }
            }
        }
        shared
    }
}

/// A node in the vocabulary tree.
#[derive(Debug, Clone)]
pub struct VocabNode {
    pub id: NodeId,
    /// Parent node id (`NodeId::MAX` for the root).
    pub parent: NodeId,
    pub children: Vec<NodeId>,
    pub descriptor: Descriptor,
    /// IDF weight (non-zero for leaf nodes).
    pub weight: f64,
}

impl VocabNode {
    fn new(id: NodeId, parent: NodeId) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            descriptor: Descriptor::zeros(),
            weight: 0.0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Read-only ORB vocabulary tree (DBoW2 text format).
#[derive(Debug)]
pub struct OrbVocabulary {
    /// nodes[0] is the root.
    nodes: Vec<VocabNode>,
    num_words: usize,
    /// Branching factor.
    k: usize,
    /// Depth levels.
    l: usize,
}

impl OrbVocabulary {
    /// Load vocabulary from a DBoW2 text file.
    ///
    /// ```text
    /// k L scoring weighting
    /// parent_id is_leaf desc[0] desc[1] ... desc[31] weight
    /// ...
    /// ```
    pub fn load_from_text<P: AsRef<Path>>(path: P) -> Result<Self, VocabularyError> {
        let file = File::open(path.as_ref())
            .map_err(|e| VocabularyError::Io(format!("Failed to open vocabulary file: {}", e)))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parse a DBoW2 text vocabulary from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, VocabularyError> {
        let mut lines = reader.lines();

        let header = lines
            .next()
            .ok_or_else(|| VocabularyError::Parse("Empty vocabulary file".to_string()))?
            .map_err(|e| VocabularyError::Io(e.to_string()))?;

        let header_parts: Vec<&str> = header.split_whitespace().collect();
        if header_parts.len() < 2 {
            return Err(VocabularyError::Parse(
                "Invalid header format, expected: k L [scoring weighting]".to_string(),
            ));
        }

        let k: usize = header_parts[0]
            .parse()
            .map_err(|_| VocabularyError::Parse("Invalid k value".to_string()))?;
        let l: usize = header_parts[1]
            .parse()
            .map_err(|_| VocabularyError::Parse("Invalid L value".to_string()))?;

        let mut nodes = vec![VocabNode::new(0, NodeId::MAX)];
        let mut num_words = 0usize;

        for (line_num, line_result) in lines.enumerate() {
            let line = line_result.map_err(|e| VocabularyError::Io(e.to_string()))?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }
            // parent_id is_leaf desc[32] weight
            if parts.len() < 35 {
                return Err(VocabularyError::Parse(format!(
                    "Expected 35 fields at line {}, got {}",
                    line_num + 2,
                    parts.len()
                )));
            }

            let parent_id: NodeId = parts[0].parse().map_err(|_| {
                VocabularyError::Parse(format!("Invalid parent_id at line {}", line_num + 2))
            })?;
            let is_leaf = parts[1] == "1";

            let mut bytes = [0u8; 32];
            for (i, byte_str) in parts[2..34].iter().enumerate() {
                bytes[i] = byte_str.parse().map_err(|_| {
                    VocabularyError::Parse(format!("Invalid descriptor byte at line {}", line_num + 2))
                })?;
            }

            let weight: f64 = parts[34].parse().map_err(|_| {
                VocabularyError::Parse(format!("Invalid weight at line {}", line_num + 2))
            })?;

            if (parent_id as usize) >= nodes.len() {
                return Err(VocabularyError::Parse(format!(
                    "Parent {} at line {} is not defined yet",
                    parent_id,
                    line_num + 2
                )));
            }

            let node_id = nodes.len() as NodeId;
            let mut node = VocabNode::new(node_id, parent_id);
            node.descriptor = Descriptor(bytes);
            node.weight = weight;
            if is_leaf {
                num_words += 1;
            }

            nodes[parent_id as usize].children.push(node_id);
            nodes.push(node);
        }

        tracing::info!(
            "Loaded vocabulary: k={}, L={}, {} nodes, {} words",
            k,
            l,
            nodes.len(),
            num_words
        );

        Ok(Self {
            nodes,
            num_words,
            k,
            l,
        })
    }

    /// Vocabulary parameters (branching factor, depth).
    pub fn params(&self) -> (usize, usize) {
        (self.k, self.l)
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Route a descriptor from the root to its leaf node.
    pub fn leaf_of(&self, desc: &Descriptor) -> NodeId {
        let mut node_id = 0usize;

        while let Some((&first, rest)) = self.nodes[node_id].children.split_first() {
            let mut best_child = first;
            let mut best_dist = descriptor_distance(desc, &self.nodes[first as usize].descriptor);

            for &child in rest {
                let dist = descriptor_distance(desc, &self.nodes[child as usize].descriptor);
                if dist < best_dist {
                    best_dist = dist;
                    best_child = child;
                }
            }
            node_id = best_child as usize;
        }

        node_id as NodeId
    }

    /// Ancestor `levels_up` levels above `leaf_id` (stops at the root's children).
    fn ancestor(&self, leaf_id: NodeId, levels_up: usize) -> NodeId {
        let mut node_id = leaf_id;
        for _ in 0..levels_up {
            let parent = self.nodes[node_id as usize].parent;
            if parent == 0 || parent == NodeId::MAX {
                break;
            }
            node_id = parent;
        }
        node_id
    }

    /// Group descriptors by their node `levels_up` levels above the leaves.
    pub fn transform(&self, descriptors: &[Descriptor], levels_up: usize) -> FeatureVector {
        let mut fv = FeatureVector::new();
        for (idx, desc) in descriptors.iter().enumerate() {
            let leaf = self.leaf_of(desc);
            fv.insert(self.ancestor(leaf, levels_up), idx);
        }
        fv
    }
}

/// Errors that can occur when loading a vocabulary.
#[derive(Debug)]
pub enum VocabularyError {
    /// I/O error reading vocabulary file
    Io(String),
    /// Parse error in vocabulary format
    Parse(String),
}

impl std::fmt::Display for VocabularyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VocabularyError::Io(msg) => write!(f, "Vocabulary I/O error: {}", msg),
            VocabularyError::Parse(msg) => write!(f, "Vocabulary parse error: {}", msg),
        }
    }
}

impl std::error::Error for VocabularyError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_line(parent: u32, leaf: bool, byte: u8) -> String {
        let bytes: Vec<String> = (0..32).map(|_| byte.to_string()).collect();
        format!("{} {} {} {}", parent, if leaf { 1 } else { 0 }, bytes.join(" "), if leaf { 0.5 } else { 0.0 })
    }

    /// Two-level tree: nodes 1 (dark) and 2 (bright) under the root, two leaves each.
    fn tiny_vocabulary() -> OrbVocabulary {
        let text = [
            "2 2 0 0".to_string(),
            node_line(0, false, 0x00),
            node_line(0, false, 0xFF),
            node_line(1, true, 0x00),
            node_line(1, true, 0x0F),
            node_line(2, true, 0xFF),
            node_line(2, true, 0xF0),
        ]
        .join("\n");
        OrbVocabulary::from_reader(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_tiny_vocabulary() {
        let vocab = tiny_vocabulary();
        assert_eq!(vocab.params(), (2, 2));
        assert_eq!(vocab.num_nodes(), 7);
        assert_eq!(vocab.num_words(), 4);
        assert!(vocab.nodes[3].is_leaf());
        assert!(!vocab.nodes[1].is_leaf());
    }

    #[test]
    fn test_leaf_and_grouping() {
        let vocab = tiny_vocabulary();
        let dark = Descriptor([0x01; 32]);
        let bright = Descriptor([0xFE; 32]);
        assert_eq!(vocab.leaf_of(&dark), 3);
        assert_eq!(vocab.leaf_of(&bright), 5);

        let fv = vocab.transform(&[dark, bright, dark], 1);
        assert_eq!(fv.get(1), Some(&[0usize, 2][..]));
        assert_eq!(fv.get(2), Some(&[1usize][..]));
        assert_eq!(fv.node_of(1), Some(2));

        let leaves = vocab.transform(&[dark, bright], 0);
        assert_eq!(leaves.node_of(0), Some(3));
    }

    #[test]
    fn test_malformed_line_is_reported() {
        let text = "2 2 0 0\n0 1 5 5 5";
        assert!(matches!(
            OrbVocabulary::from_reader(text.as_bytes()),
            Err(VocabularyError::Parse(_))
        ));
    }

    #[test]
    fn test_shared_nodes_merge_join() {
        let a = FeatureVector::from_assignments(&[5, 1, 9, 1]);
        let b = FeatureVector::from_assignments(&[9, 2, 1]);
        let shared = a.shared_nodes(&b);
        assert_eq!(shared.len(), 2);
        assert_eq!(shared[0], (1, &[1usize, 3][..], &[2usize][..]));
        assert_eq!(shared[1], (9, &[2usize][..], &[0usize][..]));
    }

    #[test]
    #[ignore] // Takes several seconds to load the full vocabulary
    fn test_load_dbow2_vocabulary() {
        let vocab_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("data/ORBvoc.txt");
        if !vocab_path.exists() {
            eprintln!("Skipping test: {} not found", vocab_path.display());
            return;
        }
        let vocab = OrbVocabulary::load_from_text(&vocab_path).expect("Failed to load vocabulary");
        assert_eq!(vocab.params(), (10, 6));
        assert!(vocab.num_words() > 90_000);
    }
}
