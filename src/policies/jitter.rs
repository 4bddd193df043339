//! # Jitter applied to connect retry delays.
//!
//! Several coordinators restarting at once would otherwise hammer a worker in lockstep.
//!
//! - [`JitterPolicy::None`]  exact delay
//! - [`JitterPolicy::Full`]  uniform in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2` plus uniform in `[0, delay/2]`

use std::time::Duration;

use rand::Rng;

/// Randomization of a retry delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the delay unchanged.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Half the delay plus uniform in `[0, delay/2]`.
    Equal,
}

impl JitterPolicy {
    /// Applies the policy to `delay` (millisecond resolution).
    pub fn apply(self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.random_range(0..=half))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let d = Duration::from_millis(250);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn test_bounds() {
        let d = Duration::from_millis(1000);
        for _ in 0..50 {
            assert!(JitterPolicy::Full.apply(d) <= d);
            let eq = JitterPolicy::Equal.apply(d);
            assert!(eq >= Duration::from_millis(500) && eq <= d);
        }
    }

    #[test]
    fn test_zero_stays_zero() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
