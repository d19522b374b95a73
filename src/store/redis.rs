use super::CounterStore;
use crate::error::ThrottlerResult;
use ::redis::aio::{ConnectionLike, ConnectionManager};
use ::redis::{Client, Cmd, ErrorKind, FromRedisValue, RedisError, RedisResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

/// Create the counter at 0 with its expiry if it is absent, then increment.
/// Running both in one script means the key cannot expire in between and be
/// recreated by `INCR` without a TTL.
const INCR_WITH_EXPIRY: &str = r#"
redis.call('SET', KEYS[1], 0, 'NX', 'EX', ARGV[1])
return redis.call('INCR', KEYS[1])
"#;

/// Decrement a counter only if it exists and is positive. `DECR` alone would
/// create a missing key at -1.
const DECR_IF_PRESENT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]))
if current and current > 0 then
    return redis.call('DECR', KEYS[1])
end
return 0
"#;

/// Counter store shared through Redis.
///
/// Every operation fails soft: transport errors and timeouts are logged and
/// turned into 0, a no-op, or an empty result.
#[derive(Clone)]
pub struct RedisStore<C = ConnectionManager> {
    conn: C,
    op_timeout: Duration,
}

impl RedisStore<ConnectionManager> {
    /// Connect to the Redis server at `redis_url`.
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> ThrottlerResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(timeout_ms = op_timeout.as_millis() as u64, "Connected to Redis counter store");

        Ok(Self::with_connection(conn, op_timeout))
    }
}

impl<C> RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    pub fn with_connection(conn: C, op_timeout: Duration) -> Self {
        Self { conn, op_timeout }
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> RedisResult<T> {
        let mut conn = self.conn.clone();
        match time::timeout(self.op_timeout, cmd.query_async(&mut conn)).await {
            Ok(result) => result,
            Err(_) => Err(RedisError::from((ErrorKind::IoError, "Redis operation timed out"))),
        }
    }

    async fn try_incr_and_get(&self, key: &str, ttl_s: u64) -> RedisResult<i64> {
        // The TTL is only applied when the key is created, never refreshed.
        let mut eval = ::redis::cmd("EVAL");
        eval.arg(INCR_WITH_EXPIRY).arg(1).arg(key).arg(ttl_s.max(1));
        self.query(&eval).await
    }
}

#[async_trait]
impl<C> CounterStore for RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn incr_and_get(&self, key: &str, ttl_s: u64) -> u64 {
        match self.try_incr_and_get(key, ttl_s).await {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                warn!(key = %key, error = %e, "Redis increment failed, treating as unlimited");
                0
            }
        }
    }

    async fn decr(&self, key: &str) {
        let mut eval = ::redis::cmd("EVAL");
        eval.arg(DECR_IF_PRESENT).arg(1).arg(key);

        if let Err(e) = self.query::<i64>(&eval).await {
            warn!(key = %key, error = %e, "Redis decrement failed");
        }
    }

    async fn get_multi(&self, keys: &[String]) -> HashMap<String, u64> {
        if keys.is_empty() {
            return HashMap::new();
        }

        let mut mget = ::redis::cmd("MGET");
        mget.arg(keys);

        match self.query::<Vec<Option<i64>>>(&mget).await {
            Ok(values) => keys
                .iter()
                .zip(values)
                .filter_map(|(key, value)| value.map(|count| (key.clone(), count.max(0) as u64)))
                .collect(),
            Err(e) => {
                warn!(keys = keys.len(), error = %e, "Redis multi-get failed");
                HashMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::redis::{Arg, Pipeline, RedisFuture, Value};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned replies and records the commands it was sent.
    #[derive(Clone, Default)]
    struct ScriptedConnection {
        replies: Arc<Mutex<VecDeque<RedisResult<Value>>>>,
        commands: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl ScriptedConnection {
        fn with_replies(replies: Vec<RedisResult<Value>>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into_iter().collect())),
                commands: Arc::default(),
            }
        }

        fn commands(&self) -> Vec<Vec<String>> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl ConnectionLike for ScriptedConnection {
        fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
            let args = cmd
                .args_iter()
                .filter_map(|arg| match arg {
                    Arg::Simple(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                    Arg::Cursor => None,
                })
                .collect();
            self.commands.lock().unwrap().push(args);

            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Ok(Value::Nil));
            Box::pin(async move { reply })
        }

        fn req_packed_commands<'a>(
            &'a mut self,
            _cmd: &'a Pipeline,
            _offset: usize,
            _count: usize,
        ) -> RedisFuture<'a, Vec<Value>> {
            Box::pin(async { Ok::<_, RedisError>(Vec::<Value>::new()) })
        }

        fn get_db(&self) -> i64 {
            0
        }
    }

    fn connection_reset() -> RedisError {
        RedisError::from((ErrorKind::IoError, "connection reset"))
    }

    /// Fails every command as if the socket had dropped.
    #[derive(Clone)]
    struct FailingConnection;

    impl ConnectionLike for FailingConnection {
        fn req_packed_command<'a>(&'a mut self, _cmd: &'a Cmd) -> RedisFuture<'a, Value> {
            Box::pin(async { Err::<Value, _>(connection_reset()) })
        }

        fn req_packed_commands<'a>(
            &'a mut self,
            _cmd: &'a Pipeline,
            _offset: usize,
            _count: usize,
        ) -> RedisFuture<'a, Vec<Value>> {
            Box::pin(async { Err::<Vec<Value>, _>(connection_reset()) })
        }

        fn get_db(&self) -> i64 {
            0
        }
    }

    /// Never answers.
    #[derive(Clone)]
    struct HangingConnection;

    impl ConnectionLike for HangingConnection {
        fn req_packed_command<'a>(&'a mut self, _cmd: &'a Cmd) -> RedisFuture<'a, Value> {
            Box::pin(std::future::pending::<RedisResult<Value>>())
        }

        fn req_packed_commands<'a>(
            &'a mut self,
            _cmd: &'a Pipeline,
            _offset: usize,
            _count: usize,
        ) -> RedisFuture<'a, Vec<Value>> {
            Box::pin(std::future::pending::<RedisResult<Vec<Value>>>())
        }

        fn get_db(&self) -> i64 {
            0
        }
    }

    fn store<C>(conn: C) -> RedisStore<C>
    where
        C: ConnectionLike + Clone + Send + Sync + 'static,
    {
        RedisStore::with_connection(conn, Duration::from_millis(50))
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_incr_and_get_sets_expiry_and_increments_atomically() {
        let conn = ScriptedConnection::with_replies(vec![Ok(Value::Int(42))]);
        let store = store(conn.clone());

        assert_eq!(store.incr_and_get("caller-100", 3600).await, 42);

        // a single script round trip, so the key cannot expire between the
        // SET NX EX and the INCR
        let commands = conn.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].len(), 5);
        assert_eq!(commands[0][0], "EVAL");
        assert!(commands[0][1].contains("'SET', KEYS[1], 0, 'NX', 'EX', ARGV[1]"));
        assert!(commands[0][1].contains("'INCR', KEYS[1]"));
        assert_eq!(commands[0][2..], ["1", "caller-100", "3600"]);
    }

    #[tokio::test]
    async fn test_incr_and_get_zero_ttl_is_raised_to_one_second() {
        let conn = ScriptedConnection::with_replies(vec![Ok(Value::Int(7))]);
        assert_eq!(store(conn.clone()).incr_and_get("caller-100", 0).await, 7);
        assert_eq!(conn.commands()[0][4], "1");
    }

    #[tokio::test]
    async fn test_decr_runs_conditional_script() {
        let conn = ScriptedConnection::with_replies(vec![Ok(Value::Int(3))]);
        store(conn.clone()).decr("caller-100").await;

        let commands = conn.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0][0], "EVAL");
        assert_eq!(commands[0][2], "1");
        assert_eq!(commands[0][3], "caller-100");
    }

    #[tokio::test]
    async fn test_get_multi_all_present() {
        let conn = ScriptedConnection::with_replies(vec![Ok(Value::Bulk(vec![
            Value::Data(b"1".to_vec()),
            Value::Data(b"4".to_vec()),
            Value::Data(b"3".to_vec()),
        ]))]);

        let counts = store(conn.clone())
            .get_multi(&keys(&["key-1", "key-2", "key-3"]))
            .await;

        let expected: HashMap<String, u64> = [
            ("key-1".to_string(), 1),
            ("key-2".to_string(), 4),
            ("key-3".to_string(), 3),
        ]
        .into_iter()
        .collect();
        assert_eq!(counts, expected);
        assert_eq!(conn.commands(), vec![vec!["MGET", "key-1", "key-2", "key-3"]]);
    }

    #[tokio::test]
    async fn test_get_multi_omits_missing_keys() {
        let conn = ScriptedConnection::with_replies(vec![Ok(Value::Bulk(vec![
            Value::Data(b"1".to_vec()),
            Value::Nil,
            Value::Nil,
        ]))]);

        let counts = store(conn).get_multi(&keys(&["key-1", "key-2", "key-3"])).await;

        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get("key-1"), Some(&1));
    }

    #[tokio::test]
    async fn test_get_multi_empty_key_set_skips_round_trip() {
        let conn = ScriptedConnection::default();
        assert!(store(conn.clone()).get_multi(&[]).await.is_empty());
        assert!(conn.commands().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_fails_soft() {
        let store = store(FailingConnection);

        assert_eq!(store.incr_and_get("key", 60).await, 0);
        store.decr("key").await;
        assert!(store.get_multi(&keys(&["key-1", "key-2"])).await.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fails_soft() {
        let store = store(HangingConnection);

        assert_eq!(store.incr_and_get("key", 60).await, 0);
        store.decr("key").await;
        assert!(store.get_multi(&keys(&["key-1"])).await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisStore::connect("not a url", Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
