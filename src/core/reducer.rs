use crate::types::RasterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Statistical reducer applied across per-pixel values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Median,
    Min,
    Max,
    Mean,
}

impl Reducer {
    /// Reduce `values` to one value, `None` for an empty slice
    ///
    /// The slice may be reordered. An even-length median is the mean of
    /// the two middle values.
    pub fn reduce(self, values: &mut [f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }

        let reduced = match self {
            Reducer::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Reducer::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reducer::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Reducer::Median => {
                values.sort_unstable_by(|a, b| a.total_cmp(b));
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            }
        };
        Some(reduced)
    }

    pub fn name(self) -> &'static str {
        match self {
            Reducer::Median => "median",
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Mean => "mean",
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Reducer {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "median" => Ok(Reducer::Median),
            "min" | "minimum" => Ok(Reducer::Min),
            "max" | "maximum" => Ok(Reducer::Max),
            "mean" | "average" => Ok(Reducer::Mean),
            other => Err(RasterError::InvalidParameter(format!(
                "unknown reducer '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_even_count_averages_middle() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(Reducer::Median.reduce(&mut values), Some(2.5));
    }

    #[test]
    fn test_median_odd_count() {
        let mut values = vec![0.7, -0.1, 0.3];
        assert_eq!(Reducer::Median.reduce(&mut values), Some(0.3));
    }

    #[test]
    fn test_min_max_mean() {
        let values = [2.0, -1.0, 5.0, 6.0];
        assert_eq!(Reducer::Min.reduce(&mut values.clone()), Some(-1.0));
        assert_eq!(Reducer::Max.reduce(&mut values.clone()), Some(6.0));
        assert_eq!(Reducer::Mean.reduce(&mut values.clone()), Some(3.0));
    }

    #[test]
    fn test_empty_has_no_value() {
        for reducer in [Reducer::Median, Reducer::Min, Reducer::Max, Reducer::Mean] {
            assert_eq!(reducer.reduce(&mut []), None);
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Median".parse::<Reducer>().unwrap(), Reducer::Median);
        assert_eq!(" max ".parse::<Reducer>().unwrap(), Reducer::Max);
        assert!("mode".parse::<Reducer>().is_err());
    }
}
