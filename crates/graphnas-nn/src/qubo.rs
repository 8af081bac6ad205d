//! Max-Cut as a QUBO.
//!
//! For bits `b`, `b^T Q b = -cut(b)` with `Q_ii = -deg(i)` and `Q_ij = 1` per
//! undirected edge. Relaxing `b` to probabilities `p` gives the differentiable
//! loss `p^T Q p` used by the `CO_problem` head.

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};
use crate::graph::undirected_edges;

/// Dense `(n, n)` Max-Cut QUBO matrix.
///
/// Duplicate and reversed edges count once; self-loops are ignored.
pub fn maxcut_qubo(num_nodes: usize, edges: &[(usize, usize)], device: &Device) -> Result<Tensor> {
    let mut q = vec![0f32; num_nodes * num_nodes];
    for (u, v) in undirected_edges(edges) {
        if v >= num_nodes {
            return Err(Error::InvalidGraph(format!(
                "edge ({u}, {v}) out of range for {num_nodes} nodes"
            )));
        }
        q[u * num_nodes + v] = 1.0;
        q[v * num_nodes + u] = 1.0;
        q[u * num_nodes + u] -= 1.0;
        q[v * num_nodes + v] -= 1.0;
    }
    Ok(Tensor::from_vec(q, (num_nodes, num_nodes), device)?)
}

/// Threshold probabilities into bits.
pub fn project_bits(prob: &Tensor, threshold: f64) -> Result<Vec<u8>> {
    let p = prob.flatten_all()?.to_dtype(candle_core::DType::F64)?.to_vec1::<f64>()?;
    Ok(p.into_iter().map(|x| u8::from(x >= threshold)).collect())
}

/// Undirected edges whose endpoints fall on different sides.
pub fn cut_size(bits: &[u8], edges: &[(usize, usize)]) -> usize {
    undirected_edges(edges)
        .into_iter()
        .filter(|&(u, v)| match (bits.get(u), bits.get(v)) {
            (Some(a), Some(b)) => a != b,
            _ => false,
        })
        .count()
}

/// Distinct undirected edges, the denominator of the cut ratio.
pub fn unique_edge_count(edges: &[(usize, usize)]) -> usize {
    undirected_edges(edges).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quadratic_form(q: &Tensor, bits: &[u8]) -> f32 {
        let n = bits.len();
        let b: Vec<f32> = bits.iter().map(|&x| f32::from(x)).collect();
        let b = Tensor::from_vec(b, (n, 1), &Device::Cpu).unwrap();
        (&b * q.matmul(&b).unwrap())
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn test_square_with_diagonal() {
        // 4-cycle plus a duplicate, a reversed edge, and a self-loop
        let edges = vec![(0, 1), (1, 2), (2, 3), (3, 0), (1, 0), (0, 1), (2, 2)];
        let q = maxcut_qubo(4, &edges, &Device::Cpu).unwrap().to_vec2::<f32>().unwrap();

        assert_eq!(q[0], vec![-2.0, 1.0, 0.0, 1.0]);
        assert_eq!(q[2][2], -2.0);
        assert_eq!(unique_edge_count(&edges), 4);
        assert_eq!(cut_size(&[1, 0, 1, 0], &edges), 4);
        assert_eq!(cut_size(&[1, 1, 0, 0], &edges), 2);
    }

    #[test]
    fn test_project_bits() {
        let p = Tensor::new(&[[0.2f32], [0.5], [0.9]], &Device::Cpu).unwrap();
        assert_eq!(project_bits(&p, 0.5).unwrap(), vec![0, 1, 1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn quadratic_form_is_negative_cut(
            (n, edges, bits) in (2usize..10).prop_flat_map(|n| (
                Just(n),
                prop::collection::vec((0..n, 0..n), 0..20),
                prop::collection::vec(0u8..=1, n),
            ))
        ) {
            let q = maxcut_qubo(n, &edges, &Device::Cpu).unwrap();
            let value = quadratic_form(&q, &bits);
            prop_assert_eq!(value, -(cut_size(&bits, &edges) as f32));
        }
    }
}
