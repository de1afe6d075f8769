//! Canned starter questions
//!
//! Written against bare mart names in BigQuery-flavored SQL; `render` runs
//! them through the guardrails and the engine adapter like any other query.

use crate::error::SqlValidationError;
use crate::guardrails::{sanitize_sql, GuardrailConfig};
use crate::policy::adapt_validated_sql;
use whyline_core::{ModelCatalog, WarehouseTarget};

/// A labelled, guardrail-friendly query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrebuiltQuery {
    pub label: &'static str,
    pub sql: &'static str,
}

impl PrebuiltQuery {
    /// Sanitize and adapt for the config's engine
    pub fn render(
        &self,
        config: &GuardrailConfig,
        models: Option<&ModelCatalog>,
        target: &WarehouseTarget,
    ) -> Result<String, SqlValidationError> {
        let sanitized = sanitize_sql(self.sql, config)?;
        adapt_validated_sql(&sanitized, config, models, target)
    }
}

pub const PREBUILT: [PrebuiltQuery; 4] = [
    PrebuiltQuery {
        label: "Worst 10 routes (last 30 days)",
        sql: "SELECT route_id, AVG(pct_on_time) AS avg_pct_on_time\n\
              FROM mart_reliability_by_route_day\n\
              WHERE service_date_mst >= DATE_SUB(CURRENT_DATE, INTERVAL 30 DAY)\n\
              GROUP BY route_id\n\
              ORDER BY avg_pct_on_time ASC\n\
              LIMIT 10",
    },
    PrebuiltQuery {
        label: "Stops with highest crash exposure",
        sql: "SELECT stop_id, crash_250m_cnt\n\
              FROM mart_crash_proximity_by_stop\n\
              ORDER BY crash_250m_cnt DESC\n\
              LIMIT 20",
    },
    PrebuiltQuery {
        label: "Where snow hurts reliability most",
        sql: "SELECT route_id, delta_pct_on_time\n\
              FROM mart_weather_impacts\n\
              WHERE precip_bin IN ('mod', 'heavy')\n\
              ORDER BY delta_pct_on_time ASC\n\
              LIMIT 10",
    },
    PrebuiltQuery {
        label: "Equity gaps (high vulnerability, low reliability)",
        sql: "SELECT p.stop_id, v.vuln_score_0_100, r.reliability_score_0_100, p.priority_score\n\
              FROM mart_priority_hotspots p\n\
              JOIN mart_vulnerability_by_stop v USING(stop_id)\n\
              JOIN (\n  \
              SELECT stop_id, 100 * (1 - AVG(pct_on_time)) AS reliability_score_0_100\n  \
              FROM mart_reliability_by_stop_hour\n  \
              WHERE service_date_mst >= DATE_SUB(CURRENT_DATE, INTERVAL 35 DAY)\n  \
              GROUP BY stop_id\n\
              ) r USING(stop_id)\n\
              ORDER BY p.priority_score DESC\n\
              LIMIT 20",
    },
];

/// Prebuilt query by position
pub fn prebuilt(index: usize) -> Option<&'static PrebuiltQuery> {
    PREBUILT.get(index)
}
