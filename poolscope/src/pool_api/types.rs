//! Upstream pool API data model.
//!
//! The upstream envelope and field set vary between deployments, so every
//! field is defaulted: a missing field decodes to an empty value instead of
//! failing the whole response.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A pool as reported by `GET /api/pools`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub coin: Coin,
    /// Stratum listening ports, ascending.
    pub ports: BTreeMap<u16, PortConfig>,
    pub pool_stats: PoolStats,
    pub payment_processing: PaymentProcessing,
    pub total_paid: f64,
    pub total_blocks: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Coin {
    #[serde(alias = "type")]
    pub symbol: String,
    pub name: String,
    pub algorithm: String,
    pub family: String,
}

/// One stratum listening port.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct PortConfig {
    pub name: Option<String>,
    /// Fixed share difficulty, when the port does not use vardiff.
    pub difficulty: Option<f64>,
    pub var_diff: Option<VarDiffConfig>,
    pub tls: bool,
}

impl PortConfig {
    /// Fixed difficulty if set, otherwise the vardiff floor.
    pub fn effective_difficulty(&self) -> Option<f64> {
        self.difficulty
            .or_else(|| self.var_diff.as_ref().and_then(|v| v.min_diff))
    }
}

/// Variable-difficulty policy of a port.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct VarDiffConfig {
    pub min_diff: Option<f64>,
    pub max_diff: Option<f64>,
    /// Target seconds between shares.
    pub target_time: Option<f64>,
    /// Seconds between retargets.
    pub retarget_time: Option<f64>,
    pub variance_percent: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolStats {
    pub connected_miners: u64,
    /// Hashes per second.
    pub pool_hashrate: f64,
    pub shares_per_second: f64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentProcessing {
    pub enabled: bool,
    pub minimum_payment: f64,
    pub payout_scheme: String,
}

/// A block found by the pool.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Block {
    pub pool_id: String,
    pub block_height: u64,
    pub network_difficulty: f64,
    pub status: String,
    pub confirmation_progress: f64,
    pub effort: Option<f64>,
    pub reward: f64,
    pub hash: Option<String>,
    pub miner: Option<String>,
    pub created: Option<String>,
}

/// A payout sent by the pool.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct Payment {
    pub pool_id: String,
    pub coin: String,
    pub address: String,
    pub amount: f64,
    pub transaction_confirmation_data: Option<String>,
    pub created: Option<String>,
}

/// Statistics for one miner address.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MinerStats {
    pub pending_shares: f64,
    pub pending_balance: f64,
    pub total_paid: f64,
    pub today_paid: f64,
    pub last_payment: Option<String>,
    pub performance: Option<MinerPerformance>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MinerPerformance {
    pub created: Option<String>,
    pub workers: HashMap<String, WorkerStats>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerStats {
    pub hashrate: f64,
    pub shares_per_second: f64,
}

impl MinerStats {
    /// Sum of all worker hashrates.
    pub fn total_hashrate(&self) -> f64 {
        self.performance
            .as_ref()
            .map(|p| p.workers.values().map(|w| w.hashrate).sum())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn pool_decodes_string_port_keys() {
        let pool: Pool = serde_json::from_value(json!({
            "id": "btc1",
            "coin": { "type": "BTC", "algorithm": "sha256d" },
            "ports": {
                "3333": { "difficulty": 1024 },
                "3255": { "name": "Mid", "varDiff": { "minDiff": 512, "maxDiff": 8192 } }
            }
        }))
        .unwrap();

        assert_eq!(pool.coin.symbol, "BTC");
        assert_eq!(pool.ports.keys().copied().collect::<Vec<_>>(), vec![3255, 3333]);
        assert_eq!(pool.ports[&3255].effective_difficulty(), Some(512.0));
    }

    #[test]
    fn missing_fields_default() {
        let pool: Pool = serde_json::from_value(json!({ "id": "x" })).unwrap();
        assert!(pool.ports.is_empty());
        assert_eq!(pool.pool_stats.connected_miners, 0);
    }

    #[test]
    fn fixed_difficulty_wins_over_vardiff() {
        let port = PortConfig {
            difficulty: Some(64.0),
            var_diff: Some(VarDiffConfig {
                min_diff: Some(8.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(port.effective_difficulty(), Some(64.0));
    }

    #[test]
    fn miner_hashrate_sums_workers() {
        let stats: MinerStats = serde_json::from_value(json!({
            "performance": { "workers": {
                "rig1": { "hashrate": 100.0 },
                "rig2": { "hashrate": 50.5 }
            }}
        }))
        .unwrap();
        assert_eq!(stats.total_hashrate(), 150.5);
    }
}
