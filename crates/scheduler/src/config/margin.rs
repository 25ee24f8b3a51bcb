use serde::Serialize;

use crate::error::SchedulerError;

/// One side of a root margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum MarginLength {
    Px(f64),
    Percent(f64),
}

impl MarginLength {
    /// Length in pixels against a root extent along the same axis.
    pub fn resolve(&self, extent: f64) -> f64 {
        match *self {
            MarginLength::Px(px) => px,
            MarginLength::Percent(pct) => extent * pct / 100.0,
        }
    }
}

/// Parsed CSS-style margin shorthand (`top right bottom left`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RootMargin {
    pub top: MarginLength,
    pub right: MarginLength,
    pub bottom: MarginLength,
    pub left: MarginLength,
}

impl RootMargin {
    /// Parse one to four space-separated lengths, each `<n>px` or `<n>%`.
    ///
    /// Missing sides follow CSS shorthand: `a` → all, `a b` → vertical/horizontal,
    /// `a b c` → top/horizontal/bottom.
    pub fn parse(input: &str) -> Result<Self, SchedulerError> {
        let parts: Vec<MarginLength> = input
            .split_whitespace()
            .map(parse_length)
            .collect::<Result<_, _>>()?;

        let (top, right, bottom, left) = match parts.as_slice() {
            [a] => (*a, *a, *a, *a),
            [v, h] => (*v, *h, *v, *h),
            [t, h, b] => (*t, *h, *b, *h),
            [t, r, b, l] => (*t, *r, *b, *l),
            _ => {
                return Err(SchedulerError::Config(format!(
                    "root_margin '{input}' must have 1 to 4 lengths"
                )))
            }
        };
        Ok(Self {
            top,
            right,
            bottom,
            left,
        })
    }
}

impl Default for RootMargin {
    fn default() -> Self {
        let zero = MarginLength::Px(0.0);
        Self {
            top: zero,
            right: zero,
            bottom: zero,
            left: zero,
        }
    }
}

fn parse_length(token: &str) -> Result<MarginLength, SchedulerError> {
    let bad = || SchedulerError::Config(format!("invalid root_margin length '{token}'"));
    if let Some(n) = token.strip_suffix("px") {
        n.parse().map(MarginLength::Px).map_err(|_| bad())
    } else if let Some(n) = token.strip_suffix('%') {
        n.parse().map(MarginLength::Percent).map_err(|_| bad())
    } else if token == "0" {
        Ok(MarginLength::Px(0.0))
    } else {
        Err(bad())
    }
}
