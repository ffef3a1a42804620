use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::properties::Properties;
use crate::store::{
    Document, DocumentStore, OperationFuture, OperationStatus, PersistTo, ReplicateTo, StoreError,
};

pub const NODES_PROPERTY: &str = "memory.nodes";
pub const PASSWORD_PROPERTY: &str = "memory.password";
pub const ACK_DELAY_PROPERTY: &str = "memory.ackDelayMicros";

const DEFAULT_NODES: usize = 4;
const SUPPORTED_SCHEMES: [&str; 3] = ["http", "https", "mem"];

/// In-process document store simulating a small cluster.
///
/// Mutations are applied when issued; the returned future completes once
/// every demanded node has "acknowledged", which takes `ack_delay` per node.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    bucket: String,
    endpoints: Vec<Url>,
    nodes: usize,
    ack_delay: Duration,
    docs: Mutex<HashMap<String, Document>>,
    shut_down: AtomicBool,
}

enum Mutation {
    Add(Document),
    Replace(Document),
    Delete,
}

impl MemoryStore {
    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.inner.endpoints
    }

    pub fn nodes(&self) -> usize {
        self.inner.nodes
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.docs().len()
    }

    fn docs(&self) -> MutexGuard<'_, HashMap<String, Document>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.inner
            .docs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            Err(StoreError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn check_durability(&self, persist: PersistTo, replicate: ReplicateTo) -> Result<(), StoreError> {
        if persist.nodes() > self.inner.nodes {
            return Err(StoreError::Durability(format!(
                "persist to {} nodes requested, cluster has {}",
                persist.nodes(),
                self.inner.nodes
            )));
        }
        if replicate.replicas() + 1 > self.inner.nodes {
            return Err(StoreError::Durability(format!(
                "replicate to {} replicas requested, cluster has {} nodes",
                replicate.replicas(),
                self.inner.nodes
            )));
        }
        Ok(())
    }

    fn mutate(
        &self,
        key: &str,
        mutation: Mutation,
        persist: PersistTo,
        replicate: ReplicateTo,
    ) -> Result<OperationFuture, StoreError> {
        self.ensure_open()?;
        self.check_durability(persist, replicate)?;

        let status = {
            let mut docs = self.docs();
            match mutation {
                Mutation::Add(doc) => {
                    if docs.contains_key(key) {
                        OperationStatus::failure("Data exists for key")
                    } else {
                        docs.insert(key.to_string(), doc);
                        OperationStatus::success()
                    }
                }
                Mutation::Replace(doc) => match docs.get_mut(key) {
                    Some(existing) => {
                        *existing = doc;
                        OperationStatus::success()
                    }
                    None => OperationStatus::failure("Not found"),
                },
                Mutation::Delete => match docs.remove(key) {
                    Some(_) => OperationStatus::success(),
                    None => OperationStatus::failure("Not found"),
                },
            }
        };

        let acks = persist.nodes().max(replicate.replicas());
        if !status.success || acks == 0 || self.inner.ack_delay.is_zero() {
            return Ok(OperationFuture::ready(status));
        }

        let delay = self.inner.ack_delay * acks as u32;
        let (tx, fut) = OperationFuture::channel();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(status);
        });
        Ok(fut)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn connect(
        endpoints: Vec<Url>,
        bucket: &str,
        password: &str,
        props: &Properties,
    ) -> Result<Self, StoreError> {
        if endpoints.is_empty() {
            return Err(StoreError::Config("no endpoints given".to_string()));
        }
        if let Some(url) = endpoints
            .iter()
            .find(|url| !SUPPORTED_SCHEMES.contains(&url.scheme()))
        {
            return Err(StoreError::Config(format!(
                "unsupported endpoint scheme '{}' in {}",
                url.scheme(),
                url
            )));
        }
        if bucket.is_empty() {
            return Err(StoreError::Config("bucket name is empty".to_string()));
        }
        if let Some(expected) = props.get(PASSWORD_PROPERTY) {
            if expected != password {
                return Err(StoreError::Auth(bucket.to_string()));
            }
        }

        let nodes: usize = props
            .get_parse_or(NODES_PROPERTY, DEFAULT_NODES)
            .map_err(|e| StoreError::Config(e.to_string()))?;
        if nodes == 0 {
            return Err(StoreError::Config(format!(
                "{} must be at least 1",
                NODES_PROPERTY
            )));
        }
        let ack_delay_micros: u64 = props
            .get_parse_or(ACK_DELAY_PROPERTY, 0)
            .map_err(|e| StoreError::Config(e.to_string()))?;

        debug!(bucket, nodes, ack_delay_micros, endpoints = endpoints.len(), "opened in-memory cluster");

        Ok(Self {
            inner: Arc::new(Inner {
                bucket: bucket.to_string(),
                endpoints,
                nodes,
                ack_delay: Duration::from_micros(ack_delay_micros),
                docs: Mutex::new(HashMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_open()?;
        Ok(self.docs().get(key).cloned())
    }

    fn add(
        &self,
        key: &str,
        doc: Document,
        persist: PersistTo,
        replicate: ReplicateTo,
    ) -> Result<OperationFuture, StoreError> {
        self.mutate(key, Mutation::Add(doc), persist, replicate)
    }

    fn replace(
        &self,
        key: &str,
        doc: Document,
        persist: PersistTo,
        replicate: ReplicateTo,
    ) -> Result<OperationFuture, StoreError> {
        self.mutate(key, Mutation::Replace(doc), persist, replicate)
    }

    fn delete(
        &self,
        key: &str,
        persist: PersistTo,
        replicate: ReplicateTo,
    ) -> Result<OperationFuture, StoreError> {
        self.mutate(key, Mutation::Delete, persist, replicate)
    }

    async fn shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::AcqRel) {
            debug!(bucket = %self.inner.bucket, "in-memory cluster shut down");
        }
    }
}
