//! Strategy evaluator
//!
//! Consumes the price-event stream for one actively monitored token and
//! produces at most one signal per event. Entry combines oscillator,
//! momentum, trend, and volume checks into a weighted confidence; exit
//! watches stop-loss, the trailing high-water mark, take-profit, and
//! indicator reversals. All thresholds and P&L are SOL-denominated; USD is
//! display-only and never compared against.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::StrategyConfig;
use crate::market::PriceEvent;
use crate::trading::tracker::{PositionEvent, PositionEventKind};

use super::indicators::{macd, rsi, sma, trailing_average};
use super::params::{StrategyKind, StrategyThresholds};

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const TREND_FAST_SMA: usize = 20;
const TREND_SLOW_SMA: usize = 50;

const WEIGHT_OSCILLATOR: f64 = 0.3;
const WEIGHT_MOMENTUM: f64 = 0.3;
const WEIGHT_TREND: f64 = 0.2;
const WEIGHT_VOLUME: f64 = 0.2;
const SIGNAL_THRESHOLD: f64 = 0.5;

const CONFIDENCE_TRAILING_STOP: f64 = 0.75;
const CONFIDENCE_TAKE_PROFIT: f64 = 0.6;

/// Signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// Evaluator output for one price event
#[derive(Debug, Clone)]
pub struct Signal {
    pub mint: String,
    pub action: SignalAction,
    pub price_sol: f64,
    /// In [0, 1]; stop-loss forces 1.0
    pub confidence: f64,
    pub reason: String,
    pub suggested_sl_sol: Option<f64>,
    pub suggested_tp_sol: Option<f64>,
}

impl Signal {
    fn hold(mint: &str, price_sol: f64, reason: &str) -> Self {
        Self {
            mint: mint.to_string(),
            action: SignalAction::Hold,
            price_sol,
            confidence: 0.0,
            reason: reason.to_string(),
            suggested_sl_sol: None,
            suggested_tp_sol: None,
        }
    }
}

/// Per-token monitoring state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenState {
    #[default]
    Inactive,
    ActiveNoPosition,
    ActiveInPosition,
}

/// Evaluates entry/exit conditions for the selected active token
pub struct StrategyEvaluator {
    config: StrategyConfig,
    breaker: Arc<CircuitBreaker>,
    state: TokenState,
    active_mint: Option<String>,
    pool_address: Option<String>,
    venue_tag: Option<String>,
    strategy: StrategyKind,
    thresholds: StrategyThresholds,
    price_history: VecDeque<f64>,
    volume_history: VecDeque<f64>,
    /// Session high since entering the position, for the trailing stop
    high_water_mark: Option<f64>,
    entry_price_sol: Option<f64>,
}

impl StrategyEvaluator {
    pub fn new(config: StrategyConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let thresholds = StrategyThresholds::resolve(StrategyKind::Default, &config);
        Self {
            config,
            breaker,
            state: TokenState::Inactive,
            active_mint: None,
            pool_address: None,
            venue_tag: None,
            strategy: StrategyKind::Default,
            thresholds,
            price_history: VecDeque::new(),
            volume_history: VecDeque::new(),
            high_water_mark: None,
            entry_price_sol: None,
        }
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    pub fn active_mint(&self) -> Option<&str> {
        self.active_mint.as_deref()
    }

    pub fn pool_address(&self) -> Option<&str> {
        self.pool_address.as_deref()
    }

    pub fn venue_tag(&self) -> Option<&str> {
        self.venue_tag.as_deref()
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Replace the active monitoring context. Price events for any other
    /// mint are silently ignored from here on.
    pub fn set_active_mint(
        &mut self,
        mint: impl Into<String>,
        pool_address: impl Into<String>,
        venue_tag: impl Into<String>,
        strategy: StrategyKind,
    ) {
        let mint = mint.into();
        info!(mint = %mint, strategy = strategy.label(), "strategy evaluator activated");
        self.active_mint = Some(mint);
        self.pool_address = Some(pool_address.into());
        self.venue_tag = Some(venue_tag.into());
        self.strategy = strategy;
        self.thresholds = StrategyThresholds::resolve(strategy, &self.config);
        self.state = TokenState::ActiveNoPosition;
        self.price_history.clear();
        self.volume_history.clear();
        self.high_water_mark = None;
        self.entry_price_sol = None;
    }

    /// Stop monitoring entirely
    pub fn clear_active_mint(&mut self) {
        if let Some(mint) = &self.active_mint {
            info!(mint = %mint, "strategy evaluator deactivated");
        }
        self.active_mint = None;
        self.pool_address = None;
        self.venue_tag = None;
        self.state = TokenState::Inactive;
        self.price_history.clear();
        self.volume_history.clear();
        self.high_water_mark = None;
        self.entry_price_sol = None;
    }

    /// Record a 24h volume observation for surge detection
    pub fn record_volume(&mut self, mint: &str, volume_24h: f64) {
        if self.active_mint.as_deref() != Some(mint) {
            return;
        }
        self.volume_history.push_back(volume_24h);
        while self.volume_history.len() > self.config.max_price_history_len {
            self.volume_history.pop_front();
        }
    }

    /// Position lifecycle transitions driven by confirmed trades
    pub fn on_position_event(&mut self, event: &PositionEvent) {
        if self.active_mint.as_deref() != Some(event.token_mint.as_str()) {
            return;
        }
        match event.kind {
            PositionEventKind::BuyConfirmed => {
                let entry = event
                    .price_sol
                    .or_else(|| self.price_history.back().copied());
                self.entry_price_sol = entry;
                // Trailing stop tracks from entry
                self.high_water_mark = entry;
                self.state = TokenState::ActiveInPosition;
                info!(mint = %event.token_mint, entry_price_sol = ?entry, "position opened");
            }
            PositionEventKind::SellConfirmed => {
                self.entry_price_sol = None;
                self.high_water_mark = None;
                self.state = TokenState::ActiveNoPosition;
                info!(mint = %event.token_mint, "position closed");
            }
        }
    }

    /// Evaluate one price event. Non-blocking; bounded arithmetic on cached
    /// state. Insufficient history or bad input produces HOLD, never an
    /// error.
    pub fn on_price_event(&mut self, event: &PriceEvent) -> Signal {
        let mint = event.token_mint.clone();

        if self.state == TokenState::Inactive
            || self.active_mint.as_deref() != Some(mint.as_str())
        {
            return Signal::hold(&mint, event.price_sol, "inactive_mint");
        }

        let price = event.price_sol;
        if !price.is_finite() || price <= 0.0 {
            warn!(mint = %mint, price, "rejecting malformed price sample");
            self.breaker.increment_failures();
            return Signal::hold(&mint, price, "invalid_price");
        }

        self.price_history.push_back(price);
        while self.price_history.len() > self.config.max_price_history_len {
            self.price_history.pop_front();
        }

        match self.state {
            TokenState::ActiveInPosition => self.evaluate_exit(&mint, price),
            TokenState::ActiveNoPosition => self.evaluate_entry(&mint, price),
            TokenState::Inactive => Signal::hold(&mint, price, "inactive_mint"),
        }
    }

    fn evaluate_entry(&mut self, mint: &str, price: f64) -> Signal {
        let prices: Vec<f64> = self.price_history.iter().copied().collect();
        let thresholds = self.thresholds;

        let mut confidence = 0.0;
        let mut reasons: Vec<&str> = Vec::new();

        // Oscillator: oversold dip or healthy mid-range momentum
        if let Some(rsi_value) = rsi(&prices, RSI_PERIOD) {
            if rsi_value <= thresholds.rsi_oversold
                || (rsi_value > 40.0 && rsi_value < thresholds.rsi_overbought)
            {
                confidence += WEIGHT_OSCILLATOR;
                reasons.push("rsi");
            }
        }

        // Momentum: MACD above its signal line
        if let Some(m) = macd(&prices, MACD_FAST, MACD_SLOW, MACD_SIGNAL) {
            if m.histogram > 0.0 {
                confidence += WEIGHT_MOMENTUM;
                reasons.push("macd");
            }
        }

        // Trend: price above the fast SMA, fast above slow
        if let (Some(fast), Some(slow)) = (
            sma(&prices, TREND_FAST_SMA),
            sma(&prices, TREND_SLOW_SMA),
        ) {
            if price > fast && fast > slow {
                confidence += WEIGHT_TREND;
                reasons.push("trend");
            }
        }

        // Volume surge against the trailing average
        let volumes: Vec<f64> = self.volume_history.iter().copied().collect();
        if let (Some(latest), Some(average)) =
            (volumes.last(), trailing_average(&volumes))
        {
            if *latest > average * self.config.volume_surge_multiple && average > 0.0 {
                confidence += WEIGHT_VOLUME;
                reasons.push("volume_surge");
            }
        }

        if confidence >= SIGNAL_THRESHOLD {
            let signal = Signal {
                mint: mint.to_string(),
                action: SignalAction::Buy,
                price_sol: price,
                confidence: confidence.min(1.0),
                reason: reasons.join("+"),
                suggested_sl_sol: Some(price * (1.0 - thresholds.stop_loss_pct)),
                suggested_tp_sol: Some(price * (1.0 + thresholds.take_profit_pct)),
            };
            info!(
                mint = %mint,
                confidence = signal.confidence,
                reason = %signal.reason,
                "entry signal"
            );
            signal
        } else {
            debug!(mint = %mint, confidence, "entry conditions not met");
            Signal::hold(mint, price, "entry_conditions_not_met")
        }
    }

    fn evaluate_exit(&mut self, mint: &str, price: f64) -> Signal {
        let thresholds = self.thresholds;
        let Some(entry) = self.entry_price_sol else {
            // Position without a recorded entry; nothing to compare against
            return Signal::hold(mint, price, "missing_entry_price");
        };

        let sell = |reason: &str, confidence: f64| Signal {
            mint: mint.to_string(),
            action: SignalAction::Sell,
            price_sol: price,
            confidence,
            reason: reason.to_string(),
            suggested_sl_sol: None,
            suggested_tp_sol: None,
        };

        // Stop-loss overrides everything
        if price <= entry * (1.0 - thresholds.stop_loss_pct) {
            info!(mint = %mint, price, entry, "stop loss hit");
            return sell("stop_loss", 1.0);
        }

        // Trailing stop against the session high
        let hwm = match self.high_water_mark {
            Some(hwm) if hwm >= price => hwm,
            _ => {
                self.high_water_mark = Some(price);
                price
            }
        };
        if price <= hwm * (1.0 - thresholds.trailing_stop_pct) && hwm > entry {
            info!(mint = %mint, price, hwm, "trailing stop hit");
            return sell("trailing_stop_loss", CONFIDENCE_TRAILING_STOP);
        }

        if price >= entry * (1.0 + thresholds.take_profit_pct) {
            info!(mint = %mint, price, entry, "take profit hit");
            return sell("take_profit", CONFIDENCE_TAKE_PROFIT);
        }

        // Indicator reversal: overbought oscillator and momentum cross-under
        let prices: Vec<f64> = self.price_history.iter().copied().collect();
        let mut confidence = 0.0;
        if let Some(rsi_value) = rsi(&prices, RSI_PERIOD) {
            if rsi_value >= thresholds.rsi_overbought {
                confidence += WEIGHT_OSCILLATOR;
            }
        }
        if prices.len() > 1 {
            let current = macd(&prices, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
            let previous = macd(
                &prices[..prices.len() - 1],
                MACD_FAST,
                MACD_SLOW,
                MACD_SIGNAL,
            );
            if let (Some(current), Some(previous)) = (current, previous) {
                if previous.histogram >= 0.0 && current.histogram < 0.0 {
                    confidence += WEIGHT_MOMENTUM;
                }
            }
        }

        if confidence >= SIGNAL_THRESHOLD {
            info!(mint = %mint, confidence, "indicator exit");
            return sell("indicator_exit", confidence.min(1.0));
        }

        Signal::hold(mint, price, "holding_position")
    }
}
