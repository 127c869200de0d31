//! Pure netting and credit-balance arithmetic.

/// Result of netting one tariff period against its credit pool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetResult {
    pub net_import_kwh: f64,
    pub pool_after_kwh: f64,
}

/// Nets import against export, drawing on `pool_kwh` before billing import.
/// Surplus export is added to the pool.
pub fn net_against_pool(import_kwh: f64, export_kwh: f64, pool_kwh: f64) -> NetResult {
    let pool = pool_kwh.max(0.0);
    let raw_net = import_kwh - export_kwh;
    if raw_net > 0.0 {
        NetResult {
            net_import_kwh: (raw_net - pool).max(0.0),
            pool_after_kwh: (pool - raw_net).max(0.0),
        }
    } else {
        NetResult {
            net_import_kwh: 0.0,
            pool_after_kwh: pool - raw_net,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceResult {
    pub final_bill: f64,
    pub credit_balance: f64,
}

/// Applies the running currency balance (<= 0) to a raw bill.
///
/// A positive bill consumes existing credit; a non-positive bill is added to
/// the credit. The final bill is never negative.
pub fn apply_credit_balance(raw_bill: f64, credit_balance: f64) -> BalanceResult {
    let balance = credit_balance.min(0.0);
    if raw_bill > 0.0 && balance < 0.0 {
        BalanceResult {
            final_bill: (raw_bill + balance).max(0.0),
            credit_balance: (balance + raw_bill).min(0.0),
        }
    } else {
        BalanceResult {
            final_bill: raw_bill.max(0.0),
            credit_balance: if raw_bill <= 0.0 { balance + raw_bill } else { balance },
        }
    }
}
