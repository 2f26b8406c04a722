//! Server status service.
//!
//! Wraps the game server's liveness/stat query behind a read-through cache
//! keyed by the server address. The TTL here is deliberately shorter than the
//! instance cache's: player counts and liveness change far more often than
//! instance lifecycle state.

use crate::cache::{Cached, Fetch, StatusCache};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// A point-in-time observation of the game server.
///
/// `is_online: false` is a valid, non-error outcome: an unreachable target is
/// simply offline, not a failed query.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub is_online: bool,
    pub game_name: String,
    pub player_count: u8,
    pub max_player_count: u8,
    pub map: String,
    pub observed_at: DateTime<Utc>,
}

impl ServerStatus {
    pub fn online(game_name: impl Into<String>, players: u8, max_players: u8, map: impl Into<String>) -> Self {
        Self {
            is_online: true,
            game_name: game_name.into(),
            player_count: players,
            max_player_count: max_players,
            map: map.into(),
            observed_at: Utc::now(),
        }
    }

    /// The observation made when nothing answered at the target address.
    pub fn offline() -> Self {
        Self {
            is_online: false,
            game_name: String::new(),
            player_count: 0,
            max_player_count: 0,
            map: String::new(),
            observed_at: Utc::now(),
        }
    }
}

/// Game server query boundary.
///
/// Implementations resolve an unreachable or silent target to
/// [`ServerStatus::offline`]; only genuine protocol faults (malformed or
/// unexpected responses) are errors.
#[async_trait]
pub trait ServerQuery: Send + Sync {
    async fn query(&self, address: &str) -> Result<ServerStatus>;
}

/// Capability consumed by the command dispatcher.
#[async_trait]
pub trait ServerStatusSource: Send + Sync {
    /// Read the server status through the cache.
    async fn cached_status(&self) -> Result<Cached<ServerStatus>>;
}

struct QueryFetcher {
    query: Arc<dyn ServerQuery>,
}

#[async_trait]
impl Fetch<ServerStatus> for QueryFetcher {
    async fn fetch(&self, key: &str) -> Result<ServerStatus> {
        self.query.query(key).await
    }
}

/// Server status service backed by one query client and one status cache
/// keyed by the server address.
pub struct ServerStatusService {
    cache: StatusCache<ServerStatus>,
    address: String,
}

impl ServerStatusService {
    pub fn new(
        query: Arc<dyn ServerQuery>,
        address: String,
        ttl: Duration,
        upstream_timeout: Duration,
    ) -> Self {
        let fetcher = Arc::new(QueryFetcher { query });
        Self {
            cache: StatusCache::new(fetcher, ttl, upstream_timeout),
            address,
        }
    }
}

#[async_trait]
impl ServerStatusSource for ServerStatusService {
    async fn cached_status(&self) -> Result<Cached<ServerStatus>> {
        self.cache.get(&self.address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedQuery {
        result: Mutex<Result<ServerStatus>>,
        calls: AtomicUsize,
    }

    impl ScriptedQuery {
        fn returning(result: Result<ServerStatus>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(result),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ServerQuery for ScriptedQuery {
        async fn query(&self, _address: &str) -> Result<ServerStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.lock().unwrap().clone()
        }
    }

    fn service(query: Arc<ScriptedQuery>) -> ServerStatusService {
        ServerStatusService::new(
            query,
            "game.example.com:34197".to_string(),
            Duration::from_secs(10),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_cached_status_reuses_fresh_value() {
        let query = ScriptedQuery::returning(Ok(ServerStatus::online("Factorio", 3, 10, "default")));
        let svc = service(query.clone());

        for _ in 0..4 {
            let cached = svc.cached_status().await.unwrap();
            assert!(cached.value.is_online);
            assert_eq!(cached.value.game_name, "Factorio");
        }
        assert_eq!(query.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offline_observation_is_cached_not_an_error() {
        let query = ScriptedQuery::returning(Ok(ServerStatus::offline()));
        let svc = service(query.clone());

        let cached = svc.cached_status().await.unwrap();
        assert!(!cached.value.is_online);
        assert!(!cached.is_stale());
    }

    #[tokio::test]
    async fn test_protocol_fault_surfaces_as_error() {
        let query = ScriptedQuery::returning(Err(Error::Query("truncated payload".to_string())));
        let svc = service(query);

        assert!(matches!(
            svc.cached_status().await,
            Err(Error::Query(_))
        ));
    }
}
