pub mod bench;
pub mod check;

use tidepool_connection::PoolConfig;

/// Statement each workload cycle runs against a connection
pub(crate) fn probe_query(config: &PoolConfig) -> &str {
    if config.has_ping_query() {
        config.ping_query()
    } else {
        "SELECT 1"
    }
}
