//! Fuzzy float comparison used by the snapshot merge policies.
//!
//! Both sides are shifted by +1.0 before the relative compare so that
//! 0.0 stays a significant, comparable value (0.0 mm is a real home
//! position, not "no data").

pub fn fuzzy_eq_f32(a: f32, b: f32) -> bool {
    let (a, b) = (a + 1.0, b + 1.0);
    (a - b).abs() <= 1e-5 * a.abs().min(b.abs())
}

pub fn fuzzy_eq_f64(a: f64, b: f64) -> bool {
    let (a, b) = (a + 1.0, b + 1.0);
    (a - b).abs() <= 1e-12 * a.abs().min(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_compares_equal_to_zero() {
        assert!(fuzzy_eq_f32(0.0, 0.0));
        assert!(fuzzy_eq_f64(0.0, 0.0));
    }

    #[test]
    fn distinct_values_differ() {
        assert!(!fuzzy_eq_f32(0.0, 0.1));
        assert!(!fuzzy_eq_f64(63000.0, 2500.0));
    }

    #[test]
    fn representation_noise_is_ignored() {
        assert!(fuzzy_eq_f32(10.0, 10.0 + 1e-6));
        assert!(fuzzy_eq_f64(10.0, 10.0 + 1e-13));
    }
}
