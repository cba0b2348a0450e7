//! Keyed byte store used as the replicated object in integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use aura_replication::prelude::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const CLUSTER: &str = "store";

pub const STORE: &[MethodSpec] = &[
    MethodSpec::replicated("put", ReturnKind::Unit, Replicated::new().synchronous()),
    MethodSpec::replicated("put_async", ReturnKind::Unit, Replicated::new()),
    MethodSpec::replicated("contains", ReturnKind::Bool, Replicated::new().synchronous()),
    MethodSpec::replicated(
        "keys",
        ReturnKind::Collection,
        Replicated::new().synchronous().remote_only(),
    ),
    MethodSpec::replicated(
        "fetch",
        ReturnKind::Value,
        Replicated::new()
            .replicate_state(ReplicationMode::Pull)
            .timeout(Duration::from_millis(500)),
    ),
    MethodSpec::replicated(
        "publish",
        ReturnKind::Unit,
        Replicated::new().replicate_state(ReplicationMode::Push),
    ),
    MethodSpec::local("get", ReturnKind::Value),
    MethodSpec::local("explode", ReturnKind::Unit),
];

#[derive(Default)]
pub struct Store {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    pub applied: Mutex<Vec<(Option<StateId>, Vec<u8>)>>,
    pub dropped: Mutex<Vec<HashSet<AddressKey>>>,
    pub address: Mutex<Option<AddressKey>>,
    pub has_state_queries: AtomicUsize,
    /// Break every outgoing transfer after its first chunk.
    pub failing_transfers: AtomicBool,
}

impl Store {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Change the local copy without going through the proxy.
    pub fn insert_local(&self, key: &str, bytes: &[u8]) {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
    }

    pub fn remove_local(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn applied_for(&self, id: &str) -> Vec<Vec<u8>> {
        self.applied
            .lock()
            .iter()
            .filter(|(state_id, _)| state_id.as_ref().map(StateId::as_str) == Some(id))
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    pub fn has_state_queries(&self) -> usize {
        self.has_state_queries.load(Ordering::SeqCst)
    }
}

fn text_arg(method: &str, args: &[Value], index: usize) -> Result<String, ServiceError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::invalid_argument(method, format!("argument {index} must be text")))
}

#[async_trait]
impl ReplicatedService for Store {
    fn interface(&self) -> &'static [MethodSpec] {
        STORE
    }

    async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError> {
        match method {
            "put" | "put_async" | "publish" => {
                let key = text_arg(method, args, 0)?;
                let bytes = args
                    .get(1)
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| ServiceError::invalid_argument(method, "argument 1 must be bytes"))?;
                self.entries.lock().insert(key, bytes.to_vec());
                Ok(Value::Null)
            }
            "contains" => {
                let key = text_arg(method, args, 0)?;
                Ok(Value::Bool(self.entries.lock().contains_key(&key)))
            }
            "keys" => Ok(Value::List(
                self.entries.lock().keys().cloned().map(Value::Text).collect(),
            )),
            "fetch" | "get" => {
                let key = text_arg(method, args, 0)?;
                Ok(self.value(&key).map(Value::Bytes).unwrap_or_default())
            }
            "explode" => Err(ServiceError::failed("boom")),
            other => Err(ServiceError::unknown_method(other)),
        }
    }

    fn state(&self) -> Option<&dyn StateAware> {
        Some(self)
    }
}

#[async_trait]
impl StateAware for Store {
    fn set_address(&self, address: AddressKey) {
        *self.address.lock() = Some(address);
    }

    async fn has_state(&self, state_id: &StateId) -> bool {
        self.has_state_queries.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().contains_key(state_id.as_str())
    }

    async fn get_state(
        &self,
        state_id: Option<&StateId>,
        sink: &mut StateWriter,
    ) -> Result<(), ServiceError> {
        let bytes = match state_id {
            Some(id) => self.value(id.as_str()).unwrap_or_default(),
            None => serde_json::to_vec(&*self.entries.lock())
                .map_err(|e| ServiceError::failed(e.to_string()))?,
        };
        if self.failing_transfers.load(Ordering::SeqCst) {
            sink.write(&bytes[..bytes.len().min(4)]).await?;
            sink.flush().await?;
            return Err(ServiceError::failed("transfer interrupted"));
        }
        sink.write(&bytes).await?;
        Ok(())
    }

    async fn set_state(
        &self,
        state_id: Option<&StateId>,
        source: &mut StateReader,
    ) -> Result<(), ServiceError> {
        let bytes = source.read_to_end().await?;
        match state_id {
            Some(id) => {
                self.entries
                    .lock()
                    .insert(id.as_str().to_string(), bytes.clone());
            }
            None if bytes.is_empty() => {}
            None => {
                let all: HashMap<String, Vec<u8>> = serde_json::from_slice(&bytes)
                    .map_err(|e| ServiceError::failed(e.to_string()))?;
                self.entries.lock().extend(all);
            }
        }
        self.applied.lock().push((state_id.cloned(), bytes));
        Ok(())
    }

    fn dropped_members(&self, members: &HashSet<AddressKey>) {
        self.dropped.lock().push(members.clone());
    }
}

pub fn config() -> ReplicationConfig {
    ReplicationConfig::default()
        .with_chunk_size(4)
        .with_io_timeout(Duration::from_secs(2))
        .with_default_call_timeout(Duration::from_secs(2))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start one store replica in [`CLUSTER`].
pub async fn start(
    replicator: &ObjectReplicator<MemoryGroup>,
) -> (ReplicatedProxy<Store>, Arc<Store>) {
    let store = Store::new();
    let proxy = replicator
        .replicate(CLUSTER, Arc::clone(&store), Duration::from_secs(2))
        .await
        .expect("replica should start");
    (proxy, store)
}

/// Poll `condition` for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub fn bytes(b: &[u8]) -> Value {
    Value::Bytes(b.to_vec())
}
