//! Windowed kernels over columns with undefined markers.
//!
//! Positions before a full window are undefined. A window that contains an
//! undefined sample yields undefined; the recursive kernels (`ewm_mean`,
//! `rsi`) restart their warmup after a gap.

use crate::domain::series::defined;

type Column = Vec<Option<f64>>;

/// Apply `reduce` to every complete, gap-free window of length `window`.
fn rolling<F>(values: &[Option<f64>], window: usize, mut reduce: F) -> Column
where
    F: FnMut(&[f64]) -> f64,
{
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    let mut buf: Vec<f64> = Vec::with_capacity(window);
    let mut run = 0usize;
    for (i, value) in values.iter().enumerate() {
        match value {
            Some(_) => run += 1,
            None => run = 0,
        }
        if run >= window {
            buf.clear();
            buf.extend(values[i + 1 - window..=i].iter().flatten());
            out[i] = defined(reduce(&buf));
        }
    }
    out
}

/// SMA(n)[i] = sum(x[i-n+1..=i]) / n
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Column {
    rolling(values, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

pub fn rolling_sum(values: &[Option<f64>], window: usize) -> Column {
    rolling(values, window, |w| w.iter().sum::<f64>())
}

/// Population standard deviation.
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Column {
    rolling(values, window, |w| {
        let n = w.len() as f64;
        let mean = w.iter().sum::<f64>() / n;
        let variance = w
            .iter()
            .map(|x| {
                let diff = x - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        variance.sqrt()
    })
}

pub fn rolling_min(values: &[Option<f64>], window: usize) -> Column {
    rolling(values, window, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling_max(values: &[Option<f64>], window: usize) -> Column {
    rolling(values, window, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    })
}

/// WMA(n) = (1*x[i-n+1] + 2*x[i-n+2] + ... + n*x[i]) / (n*(n+1)/2)
pub fn wma(values: &[Option<f64>], window: usize) -> Column {
    let divisor = (window * (window + 1)) as f64 / 2.0;
    rolling(values, window, |w| {
        w.iter()
            .enumerate()
            .map(|(i, x)| (i + 1) as f64 * x)
            .sum::<f64>()
            / divisor
    })
}

/// k = 2/(n+1), seeded with the SMA of the first n samples, then
/// EMA[i] = x[i]*k + EMA[i-1]*(1-k).
pub fn ewm_mean(values: &[Option<f64>], window: usize) -> Column {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    let k = 2.0 / (window as f64 + 1.0);
    let mut seed_sum = 0.0;
    let mut seen = 0usize;
    let mut ema = 0.0;

    for (i, value) in values.iter().enumerate() {
        let Some(x) = *value else {
            seen = 0;
            seed_sum = 0.0;
            continue;
        };
        seen += 1;
        if seen < window {
            seed_sum += x;
        } else if seen == window {
            seed_sum += x;
            ema = seed_sum / window as f64;
            out[i] = defined(ema);
        } else {
            ema = x * k + ema * (1.0 - k);
            out[i] = defined(ema);
        }
    }
    out
}

/// Wilder RSI. The first average gain/loss is the mean of the first n
/// changes; afterwards avg = (prev_avg * (n-1) + current) / n.
/// RSI = 100 - 100 / (1 + avg_gain / avg_loss), and 100 when avg_loss == 0.
pub fn rsi(values: &[Option<f64>], window: usize) -> Column {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    let n = window as f64;
    let mut prev: Option<f64> = None;
    let mut changes = 0usize;
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for (i, value) in values.iter().enumerate() {
        let Some(x) = *value else {
            prev = None;
            changes = 0;
            gain_sum = 0.0;
            loss_sum = 0.0;
            continue;
        };
        let Some(p) = prev.replace(x) else {
            continue;
        };
        let change = x - p;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        changes += 1;

        if changes < window {
            gain_sum += gain;
            loss_sum += loss;
            continue;
        }
        if changes == window {
            avg_gain = (gain_sum + gain) / n;
            avg_loss = (loss_sum + loss) / n;
        } else {
            avg_gain = (avg_gain * (n - 1.0) + gain) / n;
            avg_loss = (avg_loss * (n - 1.0) + loss) / n;
        }
        let value = if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
        out[i] = defined(value);
    }
    out
}

/// out[i] = x[i - periods]
pub fn shift(values: &[Option<f64>], periods: usize) -> Column {
    (0..values.len())
        .map(|i| i.checked_sub(periods).and_then(|j| values[j]))
        .collect()
}

/// out[i] = x[i] - x[i - periods]
pub fn diff(values: &[Option<f64>], periods: usize) -> Column {
    (0..values.len())
        .map(|i| {
            let prev = i.checked_sub(periods).and_then(|j| values[j])?;
            defined(values[i]? - prev)
        })
        .collect()
}

/// ROC(n)[i] = (x[i] - x[i-n]) / x[i-n] * 100; undefined when x[i-n] == 0.
pub fn roc(values: &[Option<f64>], period: usize) -> Column {
    (0..values.len())
        .map(|i| {
            let prev = i.checked_sub(period).and_then(|j| values[j])?;
            if prev == 0.0 {
                return None;
            }
            defined((values[i]? - prev) / prev * 100.0)
        })
        .collect()
}
