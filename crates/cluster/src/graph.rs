//! 加权相似图与连通分量
//!
//! 图由一次聚类运行独占：节点是成员标签，边是通过阈值的成员对，权重为距离。
//! 连通分量用并查集计算。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// 稀疏距离表: label -> label -> distance
pub type DistanceMap = BTreeMap<String, BTreeMap<String, u32>>;

/// 边权下限；距离为 0 的边按该值写入，保证外部图工具把它当作有效边
pub const MIN_EDGE_WEIGHT: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

/// 无向加权图
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightedGraph {
    nodes: BTreeMap<String, usize>,
    edges: Vec<Edge>,
}

impl WeightedGraph {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::default();
        for n in nodes {
            graph.add_node(n.into());
        }
        graph
    }

    /// 每个无序对只取一条边
    pub fn from_distances<I, S>(nodes: I, distances: &DistanceMap) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::new(nodes);
        let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
        for (a, row) in distances {
            for (b, &d) in row {
                if a == b {
                    continue;
                }
                let pair = if a < b { (a.as_str(), b.as_str()) } else { (b.as_str(), a.as_str()) };
                if seen.insert(pair) {
                    graph.add_edge(pair.0, pair.1, d as f64);
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, label: String) {
        let next = self.nodes.len();
        self.nodes.entry(label).or_insert(next);
    }

    /// 权重 ≤ 0 时钳到 `MIN_EDGE_WEIGHT`
    pub fn add_edge(&mut self, a: &str, b: &str, weight: f64) {
        self.add_node(a.to_string());
        self.add_node(b.to_string());
        let weight = if weight <= 0.0 { MIN_EDGE_WEIGHT } else { weight };
        self.edges.push(Edge { source: a.to_string(), target: b.to_string(), weight });
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// 连通分量，按大小降序、再按首个标签升序；孤立节点自成一组
    pub fn connected_components(&self) -> Vec<BTreeSet<String>> {
        let mut uf = UnionFind::new(self.nodes.len());
        for edge in &self.edges {
            if let (Some(&a), Some(&b)) = (self.nodes.get(&edge.source), self.nodes.get(&edge.target)) {
                uf.union(a, b);
            }
        }

        let mut by_root: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        for (label, &idx) in &self.nodes {
            by_root.entry(uf.find(idx)).or_default().insert(label.clone());
        }

        let mut groups: Vec<BTreeSet<String>> = by_root.into_values().collect();
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));
        groups
    }

    /// node-link JSON（networkx `node_link_graph` 可直接读取）
    pub fn to_node_link_json(&self) -> serde_json::Result<Vec<u8>> {
        let doc = NodeLinkGraph {
            directed: false,
            multigraph: false,
            graph: serde_json::Map::new(),
            nodes: self.nodes.keys().map(|id| NodeLinkNode { id: id.clone() }).collect(),
            links: self.edges.clone(),
        };
        serde_json::to_vec(&doc)
    }

    pub fn from_node_link_json(bytes: &[u8]) -> serde_json::Result<Self> {
        let doc: NodeLinkGraph = serde_json::from_slice(bytes)?;
        let mut graph = Self::new(doc.nodes.into_iter().map(|n| n.id));
        for link in doc.links {
            graph.add_edge(&link.source, &link.target, link.weight);
        }
        Ok(graph)
    }
}

#[derive(Serialize, Deserialize)]
struct NodeLinkGraph {
    directed: bool,
    multigraph: bool,
    #[serde(default)]
    graph: serde_json::Map<String, serde_json::Value>,
    nodes: Vec<NodeLinkNode>,
    links: Vec<Edge>,
}

#[derive(Serialize, Deserialize)]
struct NodeLinkNode {
    id: String,
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}
