use ndarray::Array1;

use crate::table::FeatureTable;

/// A fitted model whose predictions the scanner audits.
///
/// Classifiers return the probability of the favourable label for each row;
/// regressors return the expected outcome. Training happens elsewhere.
pub trait Estimator {
    type Error: std::error::Error + Send + Sync + 'static;

    fn expectations(&self, table: &FeatureTable) -> Result<Array1<f64>, Self::Error>;
}

/// Predicts the same value for every row. Useful as the "no information"
/// baseline the scan is run against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantEstimator {
    pub value: f64,
}

impl Estimator for ConstantEstimator {
    type Error = std::convert::Infallible;

    fn expectations(&self, table: &FeatureTable) -> Result<Array1<f64>, Self::Error> {
        Ok(Array1::from_elem(table.num_rows(), self.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::direction::ScanDirection;
    use crate::driver::BiasScanner;
    use crate::types::ScanError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("model is not fitted")]
    struct NotFitted;

    struct Unfitted;

    impl Estimator for Unfitted {
        type Error = NotFitted;

        fn expectations(&self, _: &FeatureTable) -> Result<Array1<f64>, Self::Error> {
            Err(NotFitted)
        }
    }

    fn table() -> FeatureTable {
        let group = ["x", "x", "x", "y", "y", "y"].map(String::from).to_vec();
        FeatureTable::from_columns([("group", group)]).unwrap()
    }

    #[test]
    fn constant_estimator_feeds_the_scan() {
        let table = table();
        let outcomes = ndarray::array![1.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        let scanner = BiasScanner::new(ScanConfig::default()).unwrap();
        let result = scanner
            .scan_estimator(
                &ConstantEstimator { value: 0.5 },
                &table,
                outcomes.view(),
                ScanDirection::Privileged,
            )
            .unwrap();
        assert_eq!(
            result.subgroup.values("group").map(|v| v.iter().cloned().collect::<Vec<_>>()),
            Some(vec!["x".to_string()])
        );
    }

    #[test]
    fn estimator_failures_are_wrapped() {
        let table = table();
        let outcomes = ndarray::Array1::zeros(6);
        let scanner = BiasScanner::new(ScanConfig::default()).unwrap();
        let err = scanner
            .scan_estimator(&Unfitted, &table, outcomes.view(), ScanDirection::Privileged)
            .unwrap_err();
        assert!(matches!(err, ScanError::Estimator(_)));
        assert!(err.to_string().contains("model is not fitted"));
    }
}
