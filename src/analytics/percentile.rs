//! Percentile math over ascending-sorted samples, independent of storage.

/// Linear-interpolated percentile over an ascending-sorted slice.
///
/// Uses the (n - 1) rank convention: the result interpolates between the
/// two order statistics surrounding the fractional rank. A single sample
/// is returned as-is for every percentile; an empty slice has none.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }

    let weight = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * weight)
}

pub fn median(sorted: &[f64]) -> Option<f64> {
    percentile(sorted, 50.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_percentile() {
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn single_sample_is_every_percentile() {
        assert_eq!(percentile(&[42.5], 50.0), Some(42.5));
        assert_eq!(percentile(&[42.5], 99.0), Some(42.5));
    }

    #[test]
    fn odd_count_median_is_middle_element() {
        assert_eq!(median(&[5.0, 6.0, 7.0]), Some(6.0));
        assert_eq!(median(&[18.0, 20.0, 22.0]), Some(20.0));
    }

    #[test]
    fn even_count_median_interpolates() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
    }

    #[test]
    fn high_percentiles_interpolate() {
        let samples = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&samples, 0.0), Some(10.0));
        assert_eq!(percentile(&samples, 100.0), Some(50.0));
        // rank 3.6 -> between 40 and 50
        assert_eq!(percentile(&samples, 90.0), Some(46.0));
    }
}
