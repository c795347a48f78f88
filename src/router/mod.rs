//! Mock DEX router: two competing quote backends, a max-output routing
//! decision, and a simulated swap execution. Deterministic in shape,
//! random in magnitude; the PRNG is injected so behavior is reproducible
//! under a fixed seed.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RouterConfig;
use crate::domain::{Dex, Quote, RouteResult, SwapReceipt};
use crate::error::{EngineError, Result};

/// Canonical wrapped-SOL mint. The `SOL` symbol is aliased to this address
/// before any quote is requested; client-facing payloads keep the symbol.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Reference mid price both backends quote around.
const BASE_PRICE: Decimal = dec!(100);

pub fn resolve_token_mint(symbol: &str) -> &str {
    if symbol == "SOL" {
        WRAPPED_SOL_MINT
    } else {
        symbol
    }
}

fn fee_of(dex: Dex) -> Decimal {
    match dex {
        Dex::Raydium => dec!(0.003),
        Dex::Meteora => dec!(0.002),
    }
}

fn estimated_gas_of(dex: Dex) -> Decimal {
    match dex {
        Dex::Raydium => dec!(0.00005),
        Dex::Meteora => dec!(0.00004),
    }
}

fn price_band_of(dex: Dex) -> (f64, f64) {
    match dex {
        Dex::Raydium => (0.98, 1.02),
        Dex::Meteora => (0.97, 1.02),
    }
}

/// Mock router over the two backends. All randomness flows through one
/// seedable PRNG; samples are drawn before any suspension so a fixed seed
/// yields a fixed decision sequence.
pub struct DexRouter {
    config: RouterConfig,
    rng: Mutex<StdRng>,
}

impl DexRouter {
    pub fn new(config: RouterConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_seed(config: RouterConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn sample_latency(&self, range_ms: (u64, u64)) -> Duration {
        let (lo, hi) = range_ms;
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        let ms = self.rng.lock().expect("router rng poisoned").gen_range(lo..=hi);
        Duration::from_millis(ms)
    }

    fn sample_f64(&self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        self.rng.lock().expect("router rng poisoned").gen_range(lo..hi)
    }

    fn sample_u32(&self) -> u32 {
        self.rng.lock().expect("router rng poisoned").gen()
    }

    /// Quote one backend. Suspends for the simulated network latency.
    async fn fetch_quote(
        &self,
        dex: Dex,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
    ) -> Result<Quote> {
        let mint_in = resolve_token_mint(token_in);
        let mint_out = resolve_token_mint(token_out);

        // Sample before suspending so the draw order is deterministic
        // under a seed regardless of latency interleaving.
        let (lo, hi) = price_band_of(dex);
        let factor = self.sample_f64(lo, hi);
        let latency = self.sample_latency(self.config.quote_latency_range_ms());

        tokio::time::sleep(latency).await;

        let factor = Decimal::from_f64(factor)
            .ok_or_else(|| EngineError::Routing(format!("invalid price factor {factor}")))?;
        let price = (BASE_PRICE * factor).round_dp(8);
        let fee = fee_of(dex);
        let amount_out = (amount_in * price * (Decimal::ONE - fee)).round_dp(8);

        debug!(
            dex = %dex,
            %mint_in,
            %mint_out,
            %price,
            %amount_out,
            "quote fetched"
        );

        Ok(Quote {
            dex,
            price,
            amount_out,
            fee,
            estimated_gas: estimated_gas_of(dex),
        })
    }

    /// Fetch both backends concurrently and select the larger `amount_out`.
    /// Ties break toward raydium.
    pub async fn best_route(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: Decimal,
    ) -> Result<RouteResult> {
        if token_in == "SOL" || token_out == "SOL" {
            info!(
                token_in,
                token_out,
                wrapped_mint = WRAPPED_SOL_MINT,
                "aliasing SOL to wrapped mint for quoting"
            );
        }

        let (raydium, meteora) = tokio::join!(
            self.fetch_quote(Dex::Raydium, token_in, token_out, amount_in),
            self.fetch_quote(Dex::Meteora, token_in, token_out, amount_in),
        );
        let raydium = raydium?;
        let meteora = meteora?;

        let (winner, loser) = if meteora.amount_out > raydium.amount_out {
            (meteora, raydium)
        } else {
            (raydium, meteora)
        };

        let delta = winner.amount_out - loser.amount_out;
        let reason = format!(
            "{} out={} beats {} out={} by {}",
            winner.dex, winner.amount_out, loser.dex, loser.amount_out, delta
        );

        info!(selected_dex = %winner.dex, %reason, "route selected");

        Ok(RouteResult {
            selected_dex: winner.dex,
            quote: winner,
            reason,
        })
    }

    /// Execute the swap on the selected backend. Fails with
    /// `NetworkCongestion` at the configured probability; otherwise applies
    /// a realized slippage sampled uniformly from `[0, slippage)`.
    pub async fn execute_swap(
        &self,
        dex: Dex,
        amount_in: Decimal,
        expected_out: Decimal,
        slippage: Decimal,
    ) -> Result<SwapReceipt> {
        let congested = {
            let roll = self.sample_f64(0.0, 1.0);
            roll < self.config.failure_rate
        };
        let slip = {
            let max_slip = slippage.to_f64().unwrap_or(0.0);
            self.sample_f64(0.0, max_slip)
        };
        let suffix = self.sample_u32();
        let latency = self.sample_latency(self.config.execution_latency_range_ms());

        tokio::time::sleep(latency).await;

        if congested {
            return Err(EngineError::NetworkCongestion(format!(
                "{dex} swap dropped"
            )));
        }

        let slip = Decimal::from_f64(slip)
            .ok_or_else(|| EngineError::Routing(format!("invalid slippage sample {slip}")))?;
        let amount_out = (expected_out * (Decimal::ONE - slip)).round_dp(8);
        let executed_price = if amount_in.is_zero() {
            Decimal::ZERO
        } else {
            (amount_out / amount_in).round_dp(8)
        };
        let tx_hash = format!("mock_tx_{}_{:08x}", Utc::now().timestamp_millis(), suffix);

        Ok(SwapReceipt {
            tx_hash,
            executed_price,
            amount_out,
        })
    }
}
