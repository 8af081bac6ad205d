//! Cell-style search space: a fixed topology of four operations.
//!
//! A macro architecture pairs a link vector with one operator per position.
//! State 0 is the preprocessed input; operation `i` reads state `link[i]` and
//! writes state `i + 1`. States that no operation reads are summed into the
//! output, so `[0, 0, 0, 0]` is four parallel branches and `[0, 1, 2, 3]` is a
//! plain chain.
//!
//! ```rust
//! use graphnas_core::macro_arch::{best_link, MacroArchitecture, MacroOp};
//!
//! let link = best_link("cora").unwrap();
//! let ops = "gcn, gat, sage, skip".split(',').map(str::parse).collect::<Result<Vec<MacroOp>, _>>().unwrap();
//! let arch = MacroArchitecture::new(link.to_vec(), ops).unwrap();
//! assert_eq!(arch.leaves(), vec![3, 4]);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of operations in a cell.
pub const MACRO_OPS: usize = 4;

/// The nine link topologies of the cell search space.
pub const LINKS: [[usize; MACRO_OPS]; 9] = [
    [0, 0, 0, 0],
    [0, 0, 0, 1],
    [0, 0, 1, 1],
    [0, 0, 1, 2],
    [0, 0, 1, 3],
    [0, 1, 1, 1],
    [0, 1, 1, 2],
    [0, 1, 2, 2],
    [0, 1, 2, 3],
];

/// Best-known topology for a benchmark dataset, if one is recorded.
pub fn best_link(dataset: &str) -> Option<&'static [usize; MACRO_OPS]> {
    let index = match dataset.trim().to_ascii_lowercase().as_str() {
        "pubmed" => 2,
        "arxiv" => 8,
        "cora" => 7,
        "citeseer" => 6,
        _ => return None,
    };
    LINKS.get(index)
}

/// Candidate operation at one cell position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MacroOp {
    Gcn,
    Gat,
    Sage,
    /// GIN with a one-layer `Linear + ReLU` update.
    Gin,
    /// Chebyshev filter of order 2.
    Cheb,
    /// Single-stack, single-layer ARMA filter.
    Arma,
    /// k-GNN graph convolution.
    Graph,
    /// Fully-connected layer, ignores the edges.
    Fc,
    /// Learned projection standing in for an identity connection.
    Skip,
}

impl MacroOp {
    pub const ALL: [MacroOp; 9] = [
        Self::Gcn,
        Self::Gat,
        Self::Sage,
        Self::Gin,
        Self::Cheb,
        Self::Arma,
        Self::Graph,
        Self::Fc,
        Self::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gcn => "gcn",
            Self::Gat => "gat",
            Self::Sage => "sage",
            Self::Gin => "gin",
            Self::Cheb => "cheb",
            Self::Arma => "arma",
            Self::Graph => "graph",
            Self::Fc => "fc",
            Self::Skip => "skip",
        }
    }

    /// Whether the operation reads the edge set.
    pub fn uses_edges(&self) -> bool {
        !matches!(self, Self::Fc | Self::Skip)
    }
}

impl FromStr for MacroOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "gcn" => Ok(Self::Gcn),
            "gat" => Ok(Self::Gat),
            "sage" => Ok(Self::Sage),
            "gin" => Ok(Self::Gin),
            "cheb" => Ok(Self::Cheb),
            "arma" => Ok(Self::Arma),
            "graph" => Ok(Self::Graph),
            "fc" => Ok(Self::Fc),
            "skip" => Ok(Self::Skip),
            other => Err(Error::configuration("macro operation", other)),
        }
    }
}

impl fmt::Display for MacroOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MacroOp {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MacroOp> for String {
    fn from(value: MacroOp) -> String {
        value.as_str().to_string()
    }
}

/// A validated cell: where each operation reads from, and what it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMacro")]
pub struct MacroArchitecture {
    link: Vec<usize>,
    ops: Vec<MacroOp>,
}

#[derive(Deserialize)]
struct RawMacro {
    link: Vec<usize>,
    ops: Vec<MacroOp>,
}

impl MacroArchitecture {
    /// # Errors
    ///
    /// [`Error::Structural`] if the lengths differ, the cell is empty, or an
    /// operation reads a state that is not yet computed (`link[i] > i`).
    pub fn new(link: Vec<usize>, ops: Vec<MacroOp>) -> Result<Self> {
        if ops.is_empty() {
            return Err(Error::Structural("macro architecture has no operations".into()));
        }
        if link.len() != ops.len() {
            return Err(Error::Structural(format!(
                "{} links for {} operations",
                link.len(),
                ops.len()
            )));
        }
        if let Some((i, &src)) = link.iter().enumerate().find(|&(i, &src)| src > i) {
            return Err(Error::Structural(format!(
                "operation {i} reads state {src}, only states 0..={i} exist"
            )));
        }
        Ok(Self { link, ops })
    }

    /// Cell over one of the nine [`LINKS`] topologies.
    pub fn from_link_index(index: usize, ops: Vec<MacroOp>) -> Result<Self> {
        let link = LINKS
            .get(index)
            .ok_or_else(|| Error::configuration("link index", index.to_string()))?;
        Self::new(link.to_vec(), ops)
    }

    pub fn link(&self) -> &[usize] {
        &self.link
    }

    pub fn ops(&self) -> &[MacroOp] {
        &self.ops
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// States (1-based, matching operation outputs) that no operation reads.
    pub fn leaves(&self) -> Vec<usize> {
        (1..=self.ops.len()).filter(|s| !self.link.contains(s)).collect()
    }
}

impl TryFrom<RawMacro> for MacroArchitecture {
    type Error = Error;

    fn try_from(raw: RawMacro) -> Result<Self> {
        Self::new(raw.link, raw.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(s: &str) -> Vec<MacroOp> {
        s.split(',').map(|t| t.parse().unwrap()).collect()
    }

    #[test]
    fn test_every_link_is_causal() {
        for (i, link) in LINKS.iter().enumerate() {
            let arch = MacroArchitecture::from_link_index(i, ops("gcn,gat,fc,skip")).unwrap();
            assert_eq!(arch.link(), link);
            assert!(!arch.leaves().is_empty());
        }
    }

    #[test]
    fn test_best_link() {
        assert_eq!(best_link("pubmed"), Some(&[0, 0, 1, 1]));
        assert_eq!(best_link("arxiv"), Some(&[0, 1, 2, 3]));
        assert_eq!(best_link("Cora"), Some(&[0, 1, 2, 2]));
        assert_eq!(best_link("citeseer"), Some(&[0, 1, 1, 2]));
        assert_eq!(best_link("ppi"), None);
    }

    #[test]
    fn test_leaves() {
        let parallel = MacroArchitecture::from_link_index(0, ops("gcn,gcn,gcn,gcn")).unwrap();
        assert_eq!(parallel.leaves(), vec![1, 2, 3, 4]);
        let chain = MacroArchitecture::from_link_index(8, ops("gcn,gcn,gcn,gcn")).unwrap();
        assert_eq!(chain.leaves(), vec![4]);
    }

    #[test]
    fn test_invalid_cells_are_structural() {
        let err = MacroArchitecture::new(vec![0, 2], ops("gcn,gat")).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
        assert!(MacroArchitecture::new(vec![0], ops("gcn,gat")).is_err());
        assert!(MacroArchitecture::new(vec![], vec![]).is_err());
        assert!(matches!(
            MacroArchitecture::from_link_index(9, ops("gcn,gcn,gcn,gcn")),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_op_tags() {
        for op in MacroOp::ALL {
            assert_eq!(op.to_string().parse::<MacroOp>().unwrap(), op);
        }
        let err = "transformer".parse::<MacroOp>().unwrap_err();
        assert!(err.to_string().contains("transformer"));
        assert!(!MacroOp::Skip.uses_edges());
        assert!(MacroOp::Arma.uses_edges());
    }

    #[test]
    fn test_serde_revalidates() {
        let arch: MacroArchitecture =
            serde_json::from_str(r#"{"link":[0,0,1,1],"ops":["gcn","sage","gin","fc"]}"#).unwrap();
        assert_eq!(arch.ops()[2], MacroOp::Gin);
        assert!(serde_json::from_str::<MacroArchitecture>(r#"{"link":[1],"ops":["gcn"]}"#).is_err());
        let json = serde_json::to_string(&arch).unwrap();
        assert_eq!(json, r#"{"link":[0,0,1,1],"ops":["gcn","sage","gin","fc"]}"#);
    }
}
