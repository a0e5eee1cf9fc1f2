//! Satellite sub-policy: daily budget, pass prediction and low-power mode

use crate::error::{BackhaulError, BackhaulResult};
use crate::transport::MessagePriority;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wildlink_core::{current_timestamp_ms, SatelliteConfig};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Predicted transmission opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassWindow {
    /// A satellite is overhead now
    Immediate,
    /// A pass starts within the configured horizon
    NextPass,
    /// The next pass is further out
    Scheduled,
    /// Sent regardless of the window
    Emergency,
}

/// Per-day satellite counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteBudget {
    /// Days since the Unix epoch the counters belong to
    pub day: u64,
    pub messages_sent: u32,
    pub cost_accrued: f64,
    /// Emergency sends made while a cap was already reached
    pub over_cap_sends: u32,
    pub max_daily_messages: u32,
    pub max_daily_cost: f64,
    /// Start of the next predicted pass, when a pass anchor is configured
    pub next_pass_at: Option<u64>,
}

impl SatelliteBudget {
    pub fn remaining_messages(&self) -> u32 {
        self.max_daily_messages.saturating_sub(self.messages_sent)
    }
}

/// Authorisation granted for one satellite send
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SatelliteGrant {
    pub window: PassWindow,
    /// Emergency send beyond a daily cap
    pub over_budget: bool,
}

#[derive(Debug)]
pub struct SatellitePolicy {
    config: SatelliteConfig,
    budget: SatelliteBudget,
    battery_level: u8,
}

impl SatellitePolicy {
    pub fn new(config: SatelliteConfig) -> Self {
        let budget = SatelliteBudget {
            day: current_timestamp_ms() / DAY_MS,
            max_daily_messages: config.max_daily_messages,
            max_daily_cost: config.max_daily_cost,
            ..SatelliteBudget::default()
        };
        Self {
            config,
            budget,
            battery_level: 100,
        }
    }

    pub fn config(&self) -> &SatelliteConfig {
        &self.config
    }

    pub fn set_battery_level(&mut self, battery_level: u8) {
        let was_low = self.is_low_power();
        self.battery_level = battery_level.min(100);
        if self.is_low_power() != was_low {
            info!(battery_level, low_power = !was_low, "Satellite power mode changed");
        }
    }

    pub fn is_low_power(&self) -> bool {
        self.battery_level < self.config.low_power_battery_threshold
    }

    fn roll_day_at(&mut self, now_ms: u64) {
        let day = now_ms / DAY_MS;
        if day != self.budget.day {
            info!(
                messages = self.budget.messages_sent,
                cost = self.budget.cost_accrued,
                "Satellite daily budget reset"
            );
            self.budget.day = day;
            self.budget.messages_sent = 0;
            self.budget.cost_accrued = 0.0;
            self.budget.over_cap_sends = 0;
        }
    }

    fn cap_reached(&self) -> Option<String> {
        let cost = self.config.module.cost_per_message();
        if self.budget.messages_sent >= self.config.max_daily_messages {
            return Some(format!(
                "{} of {} daily messages used",
                self.budget.messages_sent, self.config.max_daily_messages
            ));
        }
        if self.budget.cost_accrued + cost > self.config.max_daily_cost + f64::EPSILON {
            return Some(format!(
                "cost {:.2} of {:.2} daily cap used",
                self.budget.cost_accrued, self.config.max_daily_cost
            ));
        }
        None
    }

    /// Start of the next pass at or after `now_ms`
    pub fn next_pass_at(&self, now_ms: u64) -> Option<u64> {
        let anchor = self.config.pass_anchor_ms?;
        let period = self.config.module.orbital_period_ms().max(1);
        if now_ms <= anchor {
            return Some(anchor);
        }
        let elapsed = (now_ms - anchor) % period;
        if elapsed == 0 {
            Some(now_ms)
        } else {
            Some(now_ms + (period - elapsed))
        }
    }

    /// Coarse window estimate from the module's orbital period.
    ///
    /// Without a pass anchor the modem is assumed to transmit opportunistically.
    pub fn predict_window_at(&self, priority: MessagePriority, now_ms: u64) -> PassWindow {
        if priority == MessagePriority::Emergency {
            return PassWindow::Emergency;
        }
        let Some(anchor) = self.config.pass_anchor_ms else {
            return PassWindow::Immediate;
        };
        let period = self.config.module.orbital_period_ms().max(1);
        if now_ms >= anchor && (now_ms - anchor) % period < self.config.pass_duration_ms {
            return PassWindow::Immediate;
        }
        match self.next_pass_at(now_ms) {
            Some(next) if next - now_ms <= self.config.next_pass_horizon_ms => PassWindow::NextPass,
            _ => PassWindow::Scheduled,
        }
    }

    /// Whether a message may go out over satellite now
    pub fn authorize(&mut self, priority: MessagePriority) -> BackhaulResult<SatelliteGrant> {
        self.authorize_at(priority, current_timestamp_ms())
    }

    pub fn authorize_at(&mut self, priority: MessagePriority, now_ms: u64) -> BackhaulResult<SatelliteGrant> {
        self.roll_day_at(now_ms);
        let window = self.predict_window_at(priority, now_ms);

        if let Some(reason) = self.cap_reached() {
            if priority != MessagePriority::Emergency {
                return Err(BackhaulError::BudgetExceeded(reason));
            }
            warn!(%reason, "Emergency satellite send over daily cap");
            return Ok(SatelliteGrant {
                window,
                over_budget: true,
            });
        }

        if self.is_low_power() && !priority.is_urgent() && window != PassWindow::Immediate {
            return Err(BackhaulError::TransportUnavailable);
        }
        Ok(SatelliteGrant {
            window,
            over_budget: false,
        })
    }

    /// Account a completed send
    pub fn record_send_at(&mut self, grant: &SatelliteGrant, now_ms: u64) {
        self.roll_day_at(now_ms);
        self.budget.messages_sent += 1;
        self.budget.cost_accrued += self.config.module.cost_per_message();
        if grant.over_budget {
            self.budget.over_cap_sends += 1;
        }
    }

    pub fn record_send(&mut self, grant: &SatelliteGrant) {
        self.record_send_at(grant, current_timestamp_ms());
    }

    pub fn budget_at(&self, now_ms: u64) -> SatelliteBudget {
        let mut budget = self.budget.clone();
        if budget.day != now_ms / DAY_MS {
            budget.messages_sent = 0;
            budget.cost_accrued = 0.0;
            budget.over_cap_sends = 0;
            budget.day = now_ms / DAY_MS;
        }
        budget.next_pass_at = self.next_pass_at(now_ms);
        budget
    }

    pub fn budget(&self) -> SatelliteBudget {
        self.budget_at(current_timestamp_ms())
    }
}
