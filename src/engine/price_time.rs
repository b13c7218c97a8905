// ============================================================================
// Price/Time Priority Matching Algorithm (FIFO)
// Most common in traditional exchanges (NASDAQ, NYSE, etc.)
// ============================================================================

use crate::domain::{Order, PriceLevelBook, Trade};
use crate::error::{EngineError, EngineResult};
use crate::interfaces::{MatchContext, MatchPass, MatchingAlgorithm, TouchedOrder};
use rust_decimal::Decimal;

/// Price/Time Priority (FIFO) matching algorithm
///
/// Orders at the same price level are matched in time priority order, and
/// every execution happens at the resting (maker) order's price.
///
/// # Example
/// ```text
/// Book:  50000 @ 1.0 BTC (Order A, seq=100)
///        50000 @ 2.0 BTC (Order B, seq=101)
///
/// Incoming: Buy 1.5 BTC @ 50100
/// Result: 1.0 with A @ 50000, then 0.5 with B @ 50000; B keeps seq 101
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct PriceTimePriority;

impl PriceTimePriority {
    pub fn new() -> Self {
        Self
    }
}

impl MatchingAlgorithm for PriceTimePriority {
    fn match_order(
        &self,
        incoming: &mut Order,
        book: &mut PriceLevelBook,
        ctx: &mut MatchContext,
    ) -> EngineResult<MatchPass> {
        let mut pass = MatchPass::default();
        let opposite = incoming.side.opposite();

        while incoming.remaining_quantity() > Decimal::ZERO {
            let (maker_id, maker_price) = match book.peek_best(opposite) {
                None => break,
                Some(best) => match best.price {
                    Some(price) => (best.id, price),
                    None => {
                        return Err(EngineError::invariant(
                            book.instrument(),
                            format!("resting order {} has no price", best.id),
                        ))
                    },
                },
            };

            if !book.crosses(incoming) {
                break;
            }

            let maker = book.get_mut(&maker_id).ok_or_else(|| {
                EngineError::invariant(
                    incoming.instrument.clone(),
                    format!("best order {} missing from book", maker_id),
                )
            })?;

            if maker.account_id == incoming.account_id {
                tracing::debug!(
                    account = %incoming.account_id,
                    maker = %maker_id,
                    taker = %incoming.id,
                    "self-match"
                );
            }

            let before = maker.status();
            let quantity = incoming.remaining_quantity().min(maker.remaining_quantity());

            maker.fill(quantity, maker_price, ctx.now)?;
            incoming.fill(quantity, maker_price, ctx.now)?;

            let maker_after = maker.clone();
            if maker_after.remaining_quantity().is_zero() {
                book.remove(&maker_id)?;
            }

            pass.trades.push(Trade::new(
                ctx.next_trade_sequence,
                incoming.instrument.clone(),
                maker_id,
                incoming.id,
                incoming.side,
                maker_price,
                quantity,
                ctx.now,
            ));
            ctx.next_trade_sequence += 1;

            pass.touched.push(TouchedOrder {
                before,
                order: maker_after,
            });
        }

        Ok(pass)
    }

    fn name(&self) -> &str {
        "PriceTime"
    }
}
