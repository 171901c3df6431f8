//! Forecast accuracy metrics.

/// Mean absolute percentage error, as a fraction. `None` when any actual
/// is zero, where the ratio is undefined.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    if actual.iter().any(|a| *a == 0.0) {
        return None;
    }
    let sum: f64 = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| ((a - p) / a).abs())
        .sum();
    Some(sum / actual.len() as f64)
}

/// Root mean squared error.
pub fn rmse(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    let mse: f64 = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64;
    Some(mse.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mape_is_fractional() {
        let actual = [100.0, 200.0];
        let predicted = [110.0, 180.0];
        assert_relative_eq!(mape(&actual, &predicted).unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn mape_undefined_on_zero_actuals() {
        assert_eq!(mape(&[0.0, 1.0], &[1.0, 1.0]), None);
        assert_eq!(mape(&[], &[]), None);
    }

    #[test]
    fn rmse_matches_hand_computation() {
        let actual = [1.0, 2.0, 3.0];
        let predicted = [2.0, 2.0, 5.0];
        // errors 1, 0, 2 -> mse 5/3
        assert_relative_eq!(
            rmse(&actual, &predicted).unwrap(),
            (5.0f64 / 3.0).sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn length_mismatch_is_none() {
        assert_eq!(rmse(&[1.0], &[1.0, 2.0]), None);
    }
}
