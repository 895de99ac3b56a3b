use serde::Serialize;

// Empirical averages for a two-sentence description prompt.
pub const AVG_INPUT_TOKENS: u64 = 55;
pub const AVG_OUTPUT_TOKENS: u64 = 65;

pub const PRICE_INPUT_PER_MTOK: f64 = 0.80;
pub const PRICE_OUTPUT_PER_MTOK: f64 = 4.00;
pub const BATCH_DISCOUNT: f64 = 0.50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub records: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total: f64,
}

impl CostEstimate {
    pub fn for_records(records: usize) -> Self {
        let input_tokens = records as u64 * AVG_INPUT_TOKENS;
        let output_tokens = records as u64 * AVG_OUTPUT_TOKENS;
        let input_cost =
            input_tokens as f64 / 1_000_000.0 * PRICE_INPUT_PER_MTOK * (1.0 - BATCH_DISCOUNT);
        let output_cost =
            output_tokens as f64 / 1_000_000.0 * PRICE_OUTPUT_PER_MTOK * (1.0 - BATCH_DISCOUNT);
        Self {
            records,
            input_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total: input_cost + output_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_applies_to_both_sides() {
        let estimate = CostEstimate::for_records(100_000);
        assert_eq!(estimate.input_tokens, 5_500_000);
        assert!((estimate.input_cost - 2.2).abs() < 1e-9);
        assert!((estimate.output_cost - 13.0).abs() < 1e-9);
        assert!((estimate.total - 15.2).abs() < 1e-9);
    }

    #[test]
    fn zero_records_cost_nothing() {
        assert_eq!(CostEstimate::for_records(0).total, 0.0);
    }
}
