use ndarray::{Array1, Array2, Axis};

/// Standardizes model inputs with statistics of the training set.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub(super) mu: Array1<f32>,
    pub(super) std: Array1<f32>,
}

impl StandardScaler {
    /// The identity transform of `dim` columns.
    pub fn identity(dim: usize) -> Self {
        Self {
            mu: Array1::zeros(dim),
            std: Array1::ones(dim),
        }
    }

    /// Fits column means and standard deviations; near-constant columns get 1.
    pub fn fit(data: &Array2<f32>) -> Self {
        let dim = data.ncols();
        let mu = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(dim));
        let std = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < 1e-12 { 1.0 } else { s });
        Self { mu, std }
    }

    /// `(data - mu) / std`.
    pub fn transform(&self, data: &Array2<f32>) -> Array2<f32> {
        (data - &self.mu) / &self.std
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_transform() {
        let data = array![[1f32, 5.], [3., 5.]];
        let scaler = StandardScaler::fit(&data);
        assert_eq!(scaler.mu, array![2., 5.]);
        assert_eq!(scaler.std, array![1., 1.]);
        assert_eq!(scaler.transform(&data), array![[-1., 0.], [1., 0.]]);
    }
}
