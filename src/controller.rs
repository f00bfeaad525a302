//! Engine controller
//!
//! One cooperative polling loop: pairs are evaluated strictly sequentially
//! within a tick, every exchange call is awaited to completion before the
//! next, so at most one order placement is ever outstanding per pair. Stop
//! requests are honored between ticks, never mid-tick. Observers subscribe
//! to the event channel; the core never introspects who is listening.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::advisor::TradeAdvisor;
use crate::config::{BotConfig, TradeMode};
use crate::engine::indicators::{IndicatorEngine, IndicatorError};
use crate::engine::risk::{CloseReason, ReduceReason, RiskManager};
use crate::engine::sentiment::{SentimentScorer, SentimentSnapshot};
use crate::engine::signal::{Signal, SignalEngine};
use crate::exchange::{ExchangeClient, GatewayError, OrderOutcome};
use crate::types::Direction;

/// Events emitted to presentation/notification observers
#[derive(Debug, Clone, Serialize)]
pub enum EngineEvent {
    /// A decision was made for a pair this tick
    SignalEvaluated { signal: Signal },
    /// An order was confirmed (or simulated in dry-run mode)
    OrderPlaced {
        pair: String,
        side: Direction,
        quantity: f64,
        price: f64,
        order_id: Option<String>,
        dry_run: bool,
    },
    /// An ambiguous order was reconciled as never executed
    OrderNotExecuted { pair: String },
    /// A position was closed or reduced by the risk manager
    PositionClosed {
        pair: String,
        reason: String,
        pnl: f64,
    },
    /// The daily loss limit halted new entries
    EntriesHalted { daily_pnl: f64 },
    /// The tick for a pair was skipped
    TickSkipped { pair: String, reason: String },
}

/// Cooperative stop switch for a running controller
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request a stop; honored between ticks, never mid-tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Owns the pipeline components and drives the polling loop
pub struct Controller {
    config: BotConfig,
    client: ExchangeClient,
    indicators: IndicatorEngine,
    sentiment: SentimentScorer,
    signals: SignalEngine,
    risk: RiskManager,
    advisor: Option<Box<dyn TradeAdvisor>>,
    event_tx: broadcast::Sender<EngineEvent>,
    running: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(config: BotConfig, client: ExchangeClient) -> Self {
        let indicators = IndicatorEngine::new(config.indicators.clone());
        let sentiment = SentimentScorer::new(config.sentiment.clone());
        let signals = SignalEngine::new(config.signal.clone());
        let risk = RiskManager::new(config.risk.clone(), config.risk_level);
        let (event_tx, _) = broadcast::channel(1024);

        Self {
            config,
            client,
            indicators,
            sentiment,
            signals,
            risk,
            advisor: None,
            event_tx,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Attach an optional advisory collaborator
    pub fn with_advisor(mut self, advisor: Box<dyn TradeAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Handle for requesting a cooperative stop
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    /// Run the polling loop until stopped or a fatal gateway error
    pub async fn run(&mut self) -> Result<()> {
        info!(
            pairs = ?self.config.pairs,
            interval = %self.config.interval,
            poll_secs = self.config.poll_secs,
            mode = %self.config.mode,
            "engine started"
        );

        while self.running.load(Ordering::Relaxed) {
            self.risk.roll_day(Utc::now().date_naive());

            for pair in self.config.pairs.clone() {
                if let Err(err) = self.tick_pair(&pair).await {
                    if err.is_fatal() {
                        return Err(err)
                            .context("fatal gateway failure, stopping session");
                    }
                    warn!(pair = %pair, error = %err, "tick failed, pair skipped");
                    self.emit(EngineEvent::TickSkipped {
                        pair: pair.clone(),
                        reason: err.to_string(),
                    });
                }
            }

            self.sleep_between_ticks().await;
        }

        info!("engine stopped");
        Ok(())
    }

    /// One evaluation of one pair: fetch, manage, decide, act
    async fn tick_pair(&mut self, pair: &str) -> Result<(), GatewayError> {
        let series = self
            .client
            .get_klines(pair, &self.config.interval, self.config.candle_limit)
            .await?;

        let Some(latest) = series.latest() else {
            self.emit(EngineEvent::TickSkipped {
                pair: pair.to_string(),
                reason: "empty candle series".to_string(),
            });
            return Ok(());
        };
        let price = latest.close;

        // Manage existing exposure before considering new exposure
        if self.risk.position(pair).is_some() {
            self.manage_position(pair, price).await?;
        }

        // Full indicator pipeline when history covers the warm-up, the 24h
        // aggregate variant until it does
        let (snapshot, sentiment) = match self.indicators.compute(&series) {
            Ok(snapshot) => {
                let sentiment = self.sentiment.score(&series, &snapshot);
                (snapshot, sentiment)
            }
            Err(IndicatorError::InsufficientData { needed, got }) => {
                debug!(
                    pair,
                    needed, got, "warm-up not covered, using ticker snapshot"
                );
                let ticker = self.client.get_ticker(pair).await?;
                let snapshot = IndicatorEngine::from_ticker(&ticker);
                let sentiment = self.sentiment.score_ticker(&ticker);
                (snapshot, sentiment)
            }
        };

        // Advisory input is best-effort: failures are logged, never fatal
        let hint = match &self.advisor {
            Some(advisor) => match advisor.advise(pair, &snapshot, &sentiment).await {
                Ok(hint) => hint,
                Err(err) => {
                    warn!(pair, error = %err, "advisor failed, continuing without hint");
                    None
                }
            },
            None => None,
        };

        let signal = self.signals.evaluate(pair, &snapshot, &sentiment, hint.as_ref());
        self.emit(EngineEvent::SignalEvaluated {
            signal: signal.clone(),
        });

        if !signal.should_trade {
            return Ok(());
        }

        if self.risk.entries_halted() {
            info!(pair, "entries halted for the day, signal not acted on");
            return Ok(());
        }

        self.execute_entry(pair, price, &signal, &sentiment).await
    }

    /// Trailing-stop upkeep and forced de-risking for an open position
    async fn manage_position(&mut self, pair: &str, price: f64) -> Result<(), GatewayError> {
        self.risk.apply_trailing_stop(pair, price);

        if let Some(reason) = self.risk.check_exit(pair, price) {
            return self.close_position(pair, price, reason).await;
        }

        if let Some(reason) = self.risk.check_reduce(pair, price) {
            return self.reduce_position(pair, price, reason).await;
        }

        Ok(())
    }

    /// Act on a trade signal: size, target, dispatch, and book only on
    /// confirmation
    async fn execute_entry(
        &mut self,
        pair: &str,
        price: f64,
        signal: &Signal,
        sentiment: &SentimentSnapshot,
    ) -> Result<(), GatewayError> {
        let Some(direction) = signal.direction else {
            return Ok(());
        };

        // Opposing signals do not flip an open position; exits belong to
        // the stop logic
        if let Some(position) = self.risk.position(pair) {
            if position.side != direction {
                debug!(pair, "signal opposes open position, ignored");
                return Ok(());
            }
        }

        let equity = self.client.get_balance().await? * self.config.allocation(pair);
        let quote_size = self.risk.position_size(equity, sentiment);
        if quote_size <= 0.0 {
            // Expected outcome of conservative sizing, not a defect
            info!(pair, equity, "sizing produced no position, trade skipped as no-op");
            return Ok(());
        }

        let quantity = quote_size * self.config.effective_leverage() as f64 / price;
        if !quantity.is_finite() || quantity <= 0.0 {
            info!(pair, price, "no tradable quantity at current price, no-op");
            return Ok(());
        }

        let adding = self.risk.position(pair).is_some();
        if adding && !self.risk.can_add(pair, price, equity) {
            debug!(pair, "position cannot be increased under add rules");
            return Ok(());
        }

        let targets = self.risk.dynamic_targets(direction, price, signal.confidence);
        let prior_size = self.risk.position(pair).map(|p| p.size).unwrap_or(0.0);

        if self.config.mode == TradeMode::DryRun {
            if adding {
                self.risk.confirm_add(pair, quantity, price);
            } else {
                self.risk.confirm_open(pair, direction, quantity, price, targets);
            }
            self.emit(EngineEvent::OrderPlaced {
                pair: pair.to_string(),
                side: direction,
                quantity,
                price,
                order_id: None,
                dry_run: true,
            });
            return Ok(());
        }

        match self
            .client
            .place_market_order(pair, direction, quantity, prior_size)
            .await?
        {
            OrderOutcome::Placed { order_id } => {
                if adding {
                    self.risk.confirm_add(pair, quantity, price);
                } else {
                    self.risk.confirm_open(pair, direction, quantity, price, targets);
                }
                self.emit(EngineEvent::OrderPlaced {
                    pair: pair.to_string(),
                    side: direction,
                    quantity,
                    price,
                    order_id,
                    dry_run: false,
                });
            }
            OrderOutcome::NotExecuted => {
                self.emit(EngineEvent::OrderNotExecuted {
                    pair: pair.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Close the full position via a confirmed market order
    async fn close_position(
        &mut self,
        pair: &str,
        price: f64,
        reason: CloseReason,
    ) -> Result<(), GatewayError> {
        let Some(position) = self.risk.position(pair) else {
            return Ok(());
        };
        let side = position.side.opposite();
        let size = position.size;

        info!(pair, %reason, size, price, "closing position");

        if self.config.mode == TradeMode::DryRun {
            self.settle_close(pair, price, reason.to_string());
            return Ok(());
        }

        match self.client.place_market_order(pair, side, size, size).await? {
            OrderOutcome::Placed { .. } => {
                self.settle_close(pair, price, reason.to_string());
            }
            OrderOutcome::NotExecuted => {
                // Position unchanged on the exchange; retried next tick
                warn!(pair, "close order did not execute, will retry next tick");
                self.emit(EngineEvent::OrderNotExecuted {
                    pair: pair.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Reduce half the position via a confirmed market order
    async fn reduce_position(
        &mut self,
        pair: &str,
        price: f64,
        reason: ReduceReason,
    ) -> Result<(), GatewayError> {
        let Some(position) = self.risk.position(pair) else {
            return Ok(());
        };
        let side = position.side.opposite();
        let size = position.size / 2.0;
        let prior_size = position.size;

        info!(pair, %reason, size, price, "reducing position");

        if self.config.mode == TradeMode::DryRun {
            self.settle_reduce(pair, size, price, reason.to_string());
            return Ok(());
        }

        match self
            .client
            .place_market_order(pair, side, size, prior_size)
            .await?
        {
            OrderOutcome::Placed { .. } => {
                self.settle_reduce(pair, size, price, reason.to_string());
            }
            OrderOutcome::NotExecuted => {
                warn!(pair, "reduce order did not execute, will retry next tick");
                self.emit(EngineEvent::OrderNotExecuted {
                    pair: pair.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Book a confirmed close and emit the observer events
    fn settle_close(&mut self, pair: &str, price: f64, reason: String) {
        let halted_before = self.risk.entries_halted();
        if let Some(pnl) = self.risk.confirm_close(pair, price) {
            self.emit_realized(pair, reason, pnl, halted_before);
        }
    }

    /// Book a confirmed partial close and emit the observer events
    fn settle_reduce(&mut self, pair: &str, size: f64, price: f64, reason: String) {
        let halted_before = self.risk.entries_halted();
        if let Some(pnl) = self.risk.confirm_reduce(pair, size, price) {
            self.emit_realized(pair, reason, pnl, halted_before);
        }
    }

    fn emit_realized(&mut self, pair: &str, reason: String, pnl: f64, halted_before: bool) {
        self.emit(EngineEvent::PositionClosed {
            pair: pair.to_string(),
            reason,
            pnl,
        });
        if self.risk.entries_halted() && !halted_before {
            self.emit(EngineEvent::EntriesHalted {
                daily_pnl: self.risk.daily_pnl(),
            });
        }
    }

    /// Sleep out the poll interval in one-second slices so a stop request
    /// is picked up promptly, still only between ticks
    async fn sleep_between_ticks(&self) {
        let mut remaining = self.config.poll_secs;
        while remaining > 0 && self.running.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(1)).await;
            remaining -= 1;
        }
    }

    fn emit(&self, event: EngineEvent) {
        // Send fails only when no observer is subscribed, which is fine
        let _ = self.event_tx.send(event);
    }
}
