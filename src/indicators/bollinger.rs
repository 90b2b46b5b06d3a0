use super::{sma, stddev};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Standard Bollinger bands over the trailing `period` values.
pub fn bollinger(values: &[f64], period: usize, std_dev_mult: f64) -> Option<BollingerBands> {
    let middle = sma(values, period)?;
    let sd = stddev(values, period)?;
    Some(BollingerBands {
        upper: middle + std_dev_mult * sd,
        middle,
        lower: middle - std_dev_mult * sd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_collapse_on_flat_series() {
        let values = [10.0; 30];
        let bands = bollinger(&values, 20, 2.0).unwrap();
        assert_eq!(bands.upper, 10.0);
        assert_eq!(bands.middle, 10.0);
        assert_eq!(bands.lower, 10.0);
    }

    #[test]
    fn bands_widen_with_dispersion() {
        let values: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 9.0 } else { 11.0 }).collect();
        let bands = bollinger(&values, 20, 2.0).unwrap();
        assert!(bands.upper > 11.0);
        assert!(bands.lower < 9.0);
    }
}
