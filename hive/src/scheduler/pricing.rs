//! Per-model price table, USD per 1k tokens (prompt, completion).
//!
//! Cost is only ever computed from provider-reported token counts; unknown
//! models simply book no cost.

/// Returns `(input, output)` USD prices per 1k tokens for a model id.
pub fn usd_prices_per_1k(model: &str) -> Option<(f64, f64)> {
    let prices = match model {
        "gpt-4o" => (0.0025, 0.01),
        "gpt-4o-mini" => (0.00015, 0.0006),
        "gpt-4.1" => (0.002, 0.008),
        "gpt-4.1-mini" => (0.0004, 0.0016),
        "o3-mini" => (0.0011, 0.0044),
        _ => return None,
    };
    Some(prices)
}

/// Cost in USD for one run's token usage, when the model is priced.
pub fn run_cost_usd(model: &str, prompt_tokens: u32, completion_tokens: u32) -> Option<f64> {
    let (input, output) = usd_prices_per_1k(model)?;
    Some((prompt_tokens as f64 * input + completion_tokens as f64 * output) / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_costs() {
        let cost = run_cost_usd("gpt-4o-mini", 1000, 1000).unwrap();
        assert!((cost - 0.00075).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_books_no_cost() {
        assert_eq!(run_cost_usd("weird-model-x", 1000, 1000), None);
    }
}
