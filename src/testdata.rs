//! Synthetic credit records for tests and benchmarks

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const HEADER: &str =
    "account_id,bad_flag,amount,purchases,credit_limit,age,income,gender,state";

/// Deterministic credit CSV with `n` records.
///
/// Default risk rises with transaction amount and purchase count and falls with
/// credit limit and income, so every learner has real signal to find.
pub fn credit_csv(n: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let states = ["CA", "NY", "TX", "WA"];
    let mut out = format!("{HEADER}\n");

    for i in 0..n {
        let amount: f64 = rng.gen_range(10.0..2_000.0);
        let purchases: u32 = rng.gen_range(0..60);
        let credit_limit: f64 = rng.gen_range(500.0..20_000.0);
        let age: u32 = rng.gen_range(18..80);
        let income: f64 = rng.gen_range(15_000.0..150_000.0);
        let gender = if rng.gen_bool(0.5) { "F" } else { "M" };
        let state = states[rng.gen_range(0..states.len())];

        let z = -1.0 + 0.0015 * amount + 0.03 * f64::from(purchases)
            - 0.0002 * credit_limit
            - 0.00001 * income
            + if state == "TX" { 0.5 } else { 0.0 };
        let p = 1.0 / (1.0 + (-z).exp());
        let bad = u8::from(rng.gen_bool(p.clamp(0.0, 1.0)));

        out.push_str(&format!(
            "acct-{:05},{},{:.2},{},{:.2},{},{:.2},{},{}\n",
            i, bad, amount, purchases, credit_limit, age, income, gender, state
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_records() {
        let csv = credit_csv(50, 3);
        assert_eq!(csv, credit_csv(50, 3));
        assert_eq!(csv.lines().count(), 51);
        assert_eq!(csv.lines().next(), Some(HEADER));
        assert!(csv.lines().nth(1).unwrap().starts_with("acct-00000,"));
    }
}
