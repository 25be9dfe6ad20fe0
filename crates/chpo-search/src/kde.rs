//! Product-kernel density estimate over model coordinates.

use chpo_types::UnitKind;

const SQRT_2PI: f64 = 2.506_628_274_631_000_5;

/// Gaussian kernels on continuous dimensions, Aitchison-Aitken kernels on
/// categorical ones, one bandwidth per dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductKde {
    data: Vec<Vec<f64>>,
    bandwidths: Vec<f64>,
    kinds: Vec<UnitKind>,
}

impl ProductKde {
    /// Fit with normal-reference bandwidths, floored at `min_bandwidth`.
    pub fn fit(data: Vec<Vec<f64>>, kinds: &[UnitKind], min_bandwidth: f64) -> Self {
        let n = data.len().max(1) as f64;
        let dims = kinds.len();
        let scale = n.powf(-1.0 / (4.0 + dims as f64));

        let bandwidths = kinds
            .iter()
            .enumerate()
            .map(|(d, kind)| {
                let mean = data.iter().map(|p| p[d]).sum::<f64>() / n;
                let var = data.iter().map(|p| (p[d] - mean).powi(2)).sum::<f64>() / n;
                let bw = (1.06 * var.sqrt() * scale).max(min_bandwidth);
                match kind {
                    UnitKind::Continuous => bw,
                    UnitKind::Categorical { choices } => {
                        let cap = (*choices as f64 - 1.0) / *choices as f64;
                        bw.min(cap.max(min_bandwidth))
                    }
                }
            })
            .collect();

        Self {
            data,
            bandwidths,
            kinds: kinds.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[Vec<f64>] {
        &self.data
    }

    pub fn bandwidths(&self) -> &[f64] {
        &self.bandwidths
    }

    pub fn pdf(&self, x: &[f64]) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .data
            .iter()
            .map(|point| {
                self.kinds
                    .iter()
                    .enumerate()
                    .map(|(d, kind)| {
                        let bw = self.bandwidths[d];
                        match kind {
                            UnitKind::Continuous => {
                                let z = (x[d] - point[d]) / bw;
                                (-0.5 * z * z).exp() / (bw * SQRT_2PI)
                            }
                            UnitKind::Categorical { choices } => {
                                if (x[d] - point[d]).abs() < 0.5 {
                                    1.0 - bw
                                } else if *choices > 1 {
                                    bw / (*choices as f64 - 1.0)
                                } else {
                                    0.0
                                }
                            }
                        }
                    })
                    .product::<f64>()
            })
            .sum();
        total / self.data.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_is_floored() {
        let data = vec![vec![0.5], vec![0.5], vec![0.5]];
        let kde = ProductKde::fit(data, &[UnitKind::Continuous], 1e-3);
        assert_eq!(kde.bandwidths(), &[1e-3]);
    }

    #[test]
    fn density_peaks_at_data() {
        let data = vec![vec![0.2, 0.0], vec![0.25, 0.0], vec![0.3, 1.0]];
        let kinds = [UnitKind::Continuous, UnitKind::Categorical { choices: 2 }];
        let kde = ProductKde::fit(data, &kinds, 1e-3);
        assert!(kde.pdf(&[0.25, 0.0]) > kde.pdf(&[0.9, 0.0]));
        assert!(kde.pdf(&[0.22, 0.0]) > kde.pdf(&[0.22, 1.0]));
    }

    #[test]
    fn categorical_bandwidth_stays_a_probability() {
        let data = vec![vec![0.0], vec![1.0], vec![2.0], vec![0.0]];
        let kde = ProductKde::fit(data, &[UnitKind::Categorical { choices: 3 }], 1e-3);
        let bw = kde.bandwidths()[0];
        assert!(bw > 0.0 && bw <= 2.0 / 3.0);
    }

    #[test]
    fn empty_model_has_zero_density() {
        let kde = ProductKde::fit(Vec::new(), &[UnitKind::Continuous], 1e-3);
        assert!(kde.is_empty());
        assert_eq!(kde.pdf(&[0.5]), 0.0);
    }
}
