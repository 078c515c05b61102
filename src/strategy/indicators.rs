//! Technical indicators over bounded price history
//!
//! Plain f64 math on slices; every function returns None when the history
//! is too short rather than erroring.

/// Simple moving average of the last `period` samples
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average series, seeded with the first sample
fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() || period == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut series = Vec::with_capacity(prices.len());
    let mut ema = prices[0];
    series.push(ema);
    for price in &prices[1..] {
        ema = alpha * price + (1.0 - alpha) * ema;
        series.push(ema);
    }
    series
}

/// Wilder's RSI. Returns 50 for a flat series, None below `period + 1`
/// samples.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for window in prices[..period + 1].windows(2) {
        let change = window[1] - window[0];
        if change >= 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    // Wilder smoothing over the remainder
    for window in prices[period..].windows(2) {
        let change = window[1] - window[0];
        let (gain, loss) = if change >= 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 && avg_gain == 0.0 {
        return Some(50.0);
    }
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// One MACD observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD with the usual fast/slow/signal EMA periods. Needs
/// `slow + signal_period` samples.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<Macd> {
    if prices.len() < slow + signal_period {
        return None;
    }

    let fast_ema = ema_series(prices, fast);
    let slow_ema = ema_series(prices, slow);
    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = ema_series(&macd_line, signal_period);
    let macd_value = *macd_line.last()?;
    let signal_value = *signal_series.last()?;
    Some(Macd {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
    })
}

/// Trailing average of all but the latest sample; used for surge detection
pub fn trailing_average(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let trailing = &values[..values.len() - 1];
    Some(trailing.iter().sum::<f64>() / trailing.len() as f64)
}
