pub mod adjacency;
pub mod traversal;

pub use adjacency::{AdjacencyEntry, AdjacencyIndex, EdgeRef};
pub use traversal::{bfs, connected_ranked, TraversalSpec};
