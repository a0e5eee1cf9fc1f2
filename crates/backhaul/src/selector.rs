//! Transport selection
//!
//! Every call rescores the transports for one message. Desirability starts
//! from [`TransportKind::base_score`] and is adjusted for urgency, payload
//! size against the satellite module limit, metering and satellite low-power
//! mode. Available transports keep a positive floor score, so a selection
//! only comes back `None` when nothing is available.

use crate::transport::{MessagePriority, TransportKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use wildlink_core::{SatelliteModule, TransportConfig};

const EMERGENCY_SATELLITE_BOOST: f64 = 0.6;
const OVERSIZE_PENALTY: f64 = 0.5;
const COST_PENALTY: f64 = 0.2;
const LOW_POWER_PENALTY: f64 = 0.2;
const MIN_AVAILABLE_SCORE: f64 = 0.01;

/// A scored backhaul option for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportCandidate {
    pub kind: TransportKind,
    pub available: bool,
    pub score: f64,
}

#[derive(Debug)]
pub struct TransportSelector {
    enabled: HashMap<TransportKind, bool>,
    available: HashMap<TransportKind, bool>,
    cost_optimization: bool,
    satellite_module: SatelliteModule,
    satellite_low_power: bool,
}

impl TransportSelector {
    /// Transports start available when enabled; the health worker corrects this
    pub fn new(config: &TransportConfig, satellite_module: SatelliteModule) -> Self {
        let enabled = HashMap::from([
            (TransportKind::WiFi, config.wifi_enabled),
            (TransportKind::Mesh, config.mesh_enabled),
            (TransportKind::Cellular, config.cellular_enabled),
            (TransportKind::Satellite, config.satellite_enabled),
        ]);
        Self {
            available: enabled.clone(),
            enabled,
            cost_optimization: config.cost_optimization,
            satellite_module,
            satellite_low_power: false,
        }
    }

    pub fn set_available(&mut self, kind: TransportKind, available: bool) {
        if kind == TransportKind::None {
            return;
        }
        let enabled = self.enabled.get(&kind).copied().unwrap_or(false);
        let available = available && enabled;
        if self.available.insert(kind, available) != Some(available) {
            debug!(transport = %kind, available, "Transport availability changed");
        }
    }

    pub fn is_available(&self, kind: TransportKind) -> bool {
        self.available.get(&kind).copied().unwrap_or(false)
    }

    pub fn any_available(&self) -> bool {
        TransportKind::ALL.iter().any(|k| self.is_available(*k))
    }

    pub fn set_cost_optimization(&mut self, enabled: bool) {
        self.cost_optimization = enabled;
    }

    pub fn set_satellite_low_power(&mut self, low_power: bool) {
        self.satellite_low_power = low_power;
    }

    pub fn satellite_module(&self) -> SatelliteModule {
        self.satellite_module
    }

    fn score(&self, kind: TransportKind, size: usize, priority: MessagePriority) -> f64 {
        let mut score = kind.base_score();
        if kind == TransportKind::Satellite {
            if priority == MessagePriority::Emergency {
                score += EMERGENCY_SATELLITE_BOOST;
            }
            if size > self.satellite_module.max_message_len() {
                score -= OVERSIZE_PENALTY;
            }
            if self.satellite_low_power && !priority.is_urgent() {
                score -= LOW_POWER_PENALTY;
            }
        }
        if self.cost_optimization && kind.is_metered() && !priority.is_urgent() {
            score -= COST_PENALTY;
        }
        score
    }

    /// All transports scored for a message, best first; unavailable ones last
    pub fn candidates(&self, size: usize, priority: MessagePriority) -> Vec<TransportCandidate> {
        let mut candidates: Vec<TransportCandidate> = TransportKind::ALL
            .iter()
            .map(|kind| {
                let available = self.is_available(*kind);
                let score = if available {
                    self.score(*kind, size, priority).max(MIN_AVAILABLE_SCORE)
                } else {
                    0.0
                };
                TransportCandidate {
                    kind: *kind,
                    available,
                    score,
                }
            })
            .collect();
        // Stable sort keeps routine preference order on ties
        candidates.sort_by(|a, b| {
            b.available
                .cmp(&a.available)
                .then(b.score.total_cmp(&a.score))
        });
        candidates
    }

    /// Available transports in the order they should be tried
    pub fn ranked(&self, size: usize, priority: MessagePriority) -> Vec<TransportKind> {
        self.candidates(size, priority)
            .into_iter()
            .filter(|c| c.available)
            .map(|c| c.kind)
            .collect()
    }

    pub fn select_optimal_network(&self, size: usize, priority: MessagePriority) -> TransportKind {
        self.ranked(size, priority)
            .first()
            .copied()
            .unwrap_or(TransportKind::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn selector() -> TransportSelector {
        TransportSelector::new(&TransportConfig::default(), SatelliteModule::Iridium)
    }

    fn only(kinds: &[TransportKind]) -> TransportSelector {
        let mut s = selector();
        for kind in TransportKind::ALL {
            s.set_available(kind, kinds.contains(&kind));
        }
        s
    }

    #[test]
    fn test_routine_preference_order() {
        let s = selector();
        assert_eq!(s.select_optimal_network(100, MessagePriority::Normal), TransportKind::WiFi);
        assert_eq!(
            s.ranked(100, MessagePriority::Normal),
            vec![
                TransportKind::WiFi,
                TransportKind::Mesh,
                TransportKind::Cellular,
                TransportKind::Satellite
            ]
        );
    }

    #[test]
    fn test_emergency_lifts_satellite_over_cellular_and_mesh() {
        let s = only(&[TransportKind::Mesh, TransportKind::Cellular, TransportKind::Satellite]);
        assert_eq!(s.select_optimal_network(100, MessagePriority::Normal), TransportKind::Mesh);
        assert_eq!(
            s.select_optimal_network(100, MessagePriority::Emergency),
            TransportKind::Satellite
        );
    }

    #[test]
    fn test_oversize_payload_avoids_satellite() {
        let s = only(&[TransportKind::Cellular, TransportKind::Satellite]);
        // Iridium limit is 340 bytes
        assert_eq!(
            s.select_optimal_network(200, MessagePriority::Emergency),
            TransportKind::Satellite
        );
        assert_eq!(
            s.select_optimal_network(2_000, MessagePriority::Emergency),
            TransportKind::Cellular
        );
    }

    #[test]
    fn test_oversize_satellite_still_chosen_when_alone() {
        let s = only(&[TransportKind::Satellite]);
        assert_eq!(
            s.select_optimal_network(10_000, MessagePriority::Low),
            TransportKind::Satellite
        );
    }

    #[test]
    fn test_cost_optimization_penalises_metered_routine_traffic() {
        let mut s = only(&[TransportKind::Cellular, TransportKind::Satellite]);
        let routine = s.candidates(100, MessagePriority::Normal);
        let urgent = s.candidates(100, MessagePriority::High);
        assert!(routine[0].score < urgent[0].score);

        s.set_cost_optimization(false);
        assert_eq!(s.candidates(100, MessagePriority::Normal)[0].score, 0.6);
    }

    #[test]
    fn test_disabled_transport_never_available() {
        let config = TransportConfig {
            wifi_enabled: false,
            ..TransportConfig::default()
        };
        let mut s = TransportSelector::new(&config, SatelliteModule::Swarm);
        s.set_available(TransportKind::WiFi, true);
        assert!(!s.is_available(TransportKind::WiFi));
        assert_eq!(s.select_optimal_network(10, MessagePriority::Normal), TransportKind::Mesh);
    }

    #[test]
    fn test_none_only_when_all_down() {
        let s = only(&[]);
        assert!(!s.any_available());
        assert_eq!(s.select_optimal_network(10, MessagePriority::Emergency), TransportKind::None);
    }

    proptest! {
        #[test]
        fn prop_never_none_while_any_available(
            mask in 1u8..16,
            size in 0usize..5_000,
            priority in 0u8..4,
            low_power in any::<bool>(),
        ) {
            let kinds: Vec<TransportKind> = TransportKind::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, k)| *k)
                .collect();
            let mut s = only(&kinds);
            s.set_satellite_low_power(low_power);
            let priority = MessagePriority::from_u8(priority).unwrap();
            let chosen = s.select_optimal_network(size, priority);
            prop_assert_ne!(chosen, TransportKind::None);
            prop_assert!(kinds.contains(&chosen));
        }
    }
}
