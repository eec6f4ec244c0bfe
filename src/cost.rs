//! Cost estimation for vision API usage.
//!
//! The estimate is deliberately simple: a flat price per analysed image plus
//! a flat price per token. Prices live in a [`Pricing`] value so a pricing
//! change is a config change, not a code change.

use serde::{Deserialize, Serialize};

/// Price of one image input (USD).
pub const COST_PER_IMAGE: f64 = 0.00765;

/// Price of one output token (USD).
pub const COST_PER_OUTPUT_TOKEN: f64 = 0.00003;

/// Unit prices used by [`Pricing::estimate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub per_image: f64,
    pub per_output_token: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            per_image: COST_PER_IMAGE,
            per_output_token: COST_PER_OUTPUT_TOKEN,
        }
    }
}

impl Pricing {
    /// `image_count * per_image + token_count * per_output_token`.
    pub fn estimate(&self, image_count: usize, token_count: u64) -> f64 {
        image_count as f64 * self.per_image + token_count as f64 * self.per_output_token
    }
}

/// [`Pricing::estimate`] at the default prices.
pub fn estimate(image_count: usize, token_count: u64) -> f64 {
    Pricing::default().estimate(image_count, token_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_images_four_thousand_tokens() {
        let cost = estimate(10, 4000);
        assert!((cost - 0.1965).abs() < 1e-9, "got {cost}");
    }

    #[test]
    fn zero_usage_is_free() {
        assert_eq!(estimate(0, 0), 0.0);
    }

    #[test]
    fn estimate_is_idempotent() {
        let first = estimate(7, 1234);
        for _ in 0..5 {
            assert_eq!(estimate(7, 1234), first);
        }
    }

    #[test]
    fn custom_pricing() {
        let p = Pricing {
            per_image: 0.01,
            per_output_token: 0.0,
        };
        assert!((p.estimate(3, 1_000_000) - 0.03).abs() < 1e-12);
    }
}
