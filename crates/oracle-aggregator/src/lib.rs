//! oracle-aggregator
//!
//! In-process price source fan-out. Concrete HTTP/exchange collectors are
//! out of scope here; this crate only defines the trait boundary and the
//! fan-out/averaging policy that sits above it.

use std::time::Duration;

use async_trait::async_trait;
use oracle_core::OracleError;
use tracing::{debug, warn};

/// A single price feed. Implementations reach out to whatever backs them
/// (an exchange API, a local cache, a test double) and return a price or
/// fail independently of every other source.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// A short, stable name used in logs when this source fails.
    fn name(&self) -> &str;

    async fn price(&self, ticker: &str) -> Result<f64, OracleError>;
}

/// Query every source concurrently under one shared deadline and average
/// whatever succeeds. `NoPriceAvailable` only when every source failed or
/// missed the deadline.
pub async fn get_average_price(
    sources: &[Box<dyn PriceSource>],
    ticker: &str,
    deadline: Duration,
) -> Result<f64, OracleError> {
    let futures = sources.iter().map(|source| {
        let ticker = ticker.to_string();
        async move {
            match tokio::time::timeout(deadline, source.price(&ticker)).await {
                Ok(Ok(price)) => Some(price),
                Ok(Err(e)) => {
                    warn!(source = source.name(), error = %e, "price source failed");
                    None
                }
                Err(_) => {
                    warn!(source = source.name(), "price source missed the shared deadline");
                    None
                }
            }
        }
    });

    let results = futures::future::join_all(futures).await;
    let values: Vec<f64> = results.into_iter().flatten().collect();

    if values.is_empty() {
        return Err(OracleError::NoPriceAvailable);
    }

    let sum: f64 = values.iter().sum();
    let average = sum / values.len() as f64;
    debug!(ticker, sources = values.len(), average, "computed average price");
    Ok(average)
}

/// `floor(price * 10^18)`, decimal string, computed in arbitrary precision.
///
/// Observation data is carried in wei so the on-chain verifier never has to
/// reason about floating point. Scaling `price` by `1e18` as `f64`
/// arithmetic would round twice (once in the multiply, once in the `f64`'s
/// own representation) and can diverge from the exact value — e.g. `0.1`
/// multiplies to `100000000000000000` but the true value of the `f64`
/// nearest `0.1` scaled by `10^18` is `100000000000000005`. Instead, format
/// the `f64` out to far more digits than `10^18` needs (Rust's float
/// formatter produces the exact decimal expansion of the stored binary
/// value, not a re-rounded one) and shift the decimal point by truncating
/// rather than rounding, which is what `floor` means for a non-negative
/// value.
pub fn price_to_wei(price: f64) -> String {
    const FRACTIONAL_DIGITS: usize = 18;
    const EXACT_DIGITS: usize = 40;

    let negative = price.is_sign_negative() && price != 0.0;
    let price = price.abs();

    let exact = format!("{price:.EXACT_DIGITS$}");
    let (int_part, frac_part) = exact
        .split_once('.')
        .expect("a fixed-precision float format always contains a decimal point");

    let mut frac_digits: String = frac_part.chars().take(FRACTIONAL_DIGITS).collect();
    while frac_digits.len() < FRACTIONAL_DIGITS {
        frac_digits.push('0');
    }

    let combined = format!("{int_part}{frac_digits}");
    let trimmed = combined.trim_start_matches('0');
    let digits = if trimmed.is_empty() { "0" } else { trimmed };

    if negative && digits != "0" {
        format!("-{digits}")
    } else {
        digits.to_string()
    }
}
