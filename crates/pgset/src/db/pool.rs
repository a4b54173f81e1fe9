//! One deadpool per named connection.

use super::ConnectionConfig;
use crate::error::{OrmError, OrmResult};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

const DEFAULT_MAX_SIZE: usize = 16;

/// Build the pool for `config`.
///
/// Pools connect lazily; nothing is opened until the first statement asks
/// for a connection. Connections are recycled with a cheap liveness check.
pub fn create_pool(config: &ConnectionConfig) -> OrmResult<Pool> {
    let manager = Manager::from_config(
        config.to_pg_config(),
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    Pool::builder(manager)
        .max_size(config.max_size.unwrap_or(DEFAULT_MAX_SIZE))
        .build()
        .map_err(|e| OrmError::Pool(format!("{}@{}: {e}", config.database, config.host)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConnectionKind;

    #[test]
    fn pool_size_comes_from_config() {
        let sized = ConnectionConfig::new(ConnectionKind::Read, "app", "shop").max_size(3);
        assert_eq!(create_pool(&sized).unwrap().status().max_size, 3);

        let default = ConnectionConfig::new(ConnectionKind::Read, "app", "shop");
        assert_eq!(create_pool(&default).unwrap().status().max_size, DEFAULT_MAX_SIZE);
    }
}
