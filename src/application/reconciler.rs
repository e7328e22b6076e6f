use std::collections::VecDeque;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::ports::ExchangeAdapter;
use crate::domain::repositories::{BotRepository, TradeRepository};
use crate::domain::trading::types::{split_symbol, OrderSide};

#[derive(Debug, Clone, Copy)]
struct Lot {
    price_effective: Decimal,
    qty_remaining: Decimal,
}

/// FIFO queue of open buy lots, consumed by sells to compute realized P&L.
/// Fees paid in the quote asset add to cost basis on the buy side and are
/// subtracted on the sell side; fees in any other asset than base or quote
/// are treated as zero for P&L purposes.
#[derive(Debug, Default)]
struct FifoLedger {
    lots: VecDeque<Lot>,
}

impl FifoLedger {
    fn record_buy(&mut self, price: Decimal, qty: Decimal, fee_quote: Decimal) {
        if qty.is_zero() {
            return;
        }
        let price_effective = price + fee_quote / qty;
        self.lots.push_back(Lot {
            price_effective,
            qty_remaining: qty,
        });
    }

    fn record_sell(&mut self, price: Decimal, qty: Decimal, fee_quote: Decimal) -> Decimal {
        let mut remaining = qty;
        let mut realized = Decimal::ZERO;
        while remaining > Decimal::ZERO {
            let Some(lot) = self.lots.front_mut() else {
                break;
            };
            let consumed = remaining.min(lot.qty_remaining);
            realized += (price - lot.price_effective) * consumed;
            lot.qty_remaining -= consumed;
            remaining -= consumed;
            if lot.qty_remaining.is_zero() {
                self.lots.pop_front();
            }
        }
        realized - fee_quote
    }
}

/// Periodic cross-check between exchange trade history and the local trade
/// table. Runs outside the tick loop on its own interval.
pub struct Reconciler {
    bot_id: String,
    symbol: String,
    adapter: Arc<dyn ExchangeAdapter>,
    trades: Arc<dyn TradeRepository>,
    bots: Arc<dyn BotRepository>,
    ledger: Mutex<FifoLedger>,
}

impl Reconciler {
    pub fn new(
        bot_id: impl Into<String>,
        symbol: impl Into<String>,
        adapter: Arc<dyn ExchangeAdapter>,
        trades: Arc<dyn TradeRepository>,
        bots: Arc<dyn BotRepository>,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            symbol: symbol.into(),
            adapter,
            trades,
            bots,
            ledger: Mutex::new(FifoLedger::default()),
        }
    }

    pub async fn run_once(&self) -> anyhow::Result<()> {
        let remote_trades = self.adapter.fetch_my_trades(&self.symbol, None, Some(200)).await?;
        let (_, quote_asset) = split_symbol(&self.symbol).unwrap_or((self.symbol.as_str(), "USDT"));

        let mut ledger = self.ledger.lock().await;
        let mut total_delta = Decimal::ZERO;
        let mut inserted = 0u32;

        for trade in remote_trades {
            if self.trades.exists_by_exchange_trade_id(&trade.exchange_trade_id).await? {
                continue;
            }
            if let Some(order_exchange_id) = trade.order_exchange_id.as_deref() {
                if self
                    .trades
                    .exists_by_order_price_quantity(order_exchange_id, trade.price, trade.quantity)
                    .await?
                {
                    continue;
                }
            }

            let fee_quote = trade
                .fee
                .as_ref()
                .filter(|f| f.currency == quote_asset)
                .map(|f| f.cost)
                .unwrap_or(Decimal::ZERO);

            let realized = match trade.side {
                OrderSide::Buy => {
                    ledger.record_buy(trade.price, trade.quantity, fee_quote);
                    None
                }
                OrderSide::Sell => Some(ledger.record_sell(trade.price, trade.quantity, fee_quote)),
            };

            if let Some(delta) = realized {
                total_delta += delta;
            }

            self.trades.insert(&self.bot_id, &trade, None, realized).await?;
            inserted += 1;
        }

        if inserted > 0 {
            info!(bot_id = %self.bot_id, inserted, "reconciler inserted missing trades");
        }
        if !total_delta.is_zero() {
            self.bots.add_realized_pnl(&self.bot_id, total_delta).await?;
        }

        Ok(())
    }
}

pub async fn run_forever(reconciler: Arc<Reconciler>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = reconciler.run_once().await {
            warn!(bot_id = %reconciler.bot_id, "reconciliation pass failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fifo_ledger_consumes_lots_in_order() {
        let mut ledger = FifoLedger::default();
        ledger.record_buy(dec!(100), dec!(2), Decimal::ZERO);
        ledger.record_buy(dec!(110), dec!(2), Decimal::ZERO);

        let realized = ledger.record_sell(dec!(120), dec!(3), Decimal::ZERO);
        // 2 @ (120-100) + 1 @ (120-110) = 40 + 10 = 50
        assert_eq!(realized, dec!(50));
        assert_eq!(ledger.lots.len(), 1);
        assert_eq!(ledger.lots[0].qty_remaining, dec!(1));
    }

    #[test]
    fn quote_fees_reduce_realized_pnl() {
        let mut ledger = FifoLedger::default();
        ledger.record_buy(dec!(100), dec!(1), dec!(1));
        let realized = ledger.record_sell(dec!(110), dec!(1), dec!(1));
        // cost basis 101, sale proceeds 110, minus sell fee 1 => 8
        assert_eq!(realized, dec!(8));
    }
}
