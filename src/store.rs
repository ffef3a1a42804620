//! Native document-store client contract.
//!
//! Mutations are fire-and-acknowledge: `add`, `replace` and `delete` hand
//! back an [`OperationFuture`] immediately and the durability outcome
//! arrives on it later. Reads return the stored document directly.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::oneshot;
use url::Url;

use crate::properties::Properties;

/// Document body as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    Json(String),
    Map(HashMap<String, String>),
}

/// Number of nodes that must persist a mutation before it is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PersistTo {
    Zero,
    One,
    Two,
    Three,
    Four,
}

impl PersistTo {
    pub fn nodes(self) -> usize {
        match self {
            PersistTo::Zero => 0,
            PersistTo::One => 1,
            PersistTo::Two => 2,
            PersistTo::Three => 3,
            PersistTo::Four => 4,
        }
    }
}

impl TryFrom<u8> for PersistTo {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PersistTo::Zero),
            1 => Ok(PersistTo::One),
            2 => Ok(PersistTo::Two),
            3 => Ok(PersistTo::Three),
            4 => Ok(PersistTo::Four),
            other => Err(other),
        }
    }
}

/// Number of replicas a mutation must reach before it is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReplicateTo {
    Zero,
    One,
    Two,
    Three,
}

impl ReplicateTo {
    pub fn replicas(self) -> usize {
        match self {
            ReplicateTo::Zero => 0,
            ReplicateTo::One => 1,
            ReplicateTo::Two => 2,
            ReplicateTo::Three => 3,
        }
    }
}

impl TryFrom<u8> for ReplicateTo {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReplicateTo::Zero),
            1 => Ok(ReplicateTo::One),
            2 => Ok(ReplicateTo::Two),
            3 => Ok(ReplicateTo::Three),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub success: bool,
    pub message: String,
}

impl OperationStatus {
    pub fn success() -> Self {
        Self {
            success: true,
            message: "OK".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(f, "success: {}", self.message)
        } else {
            write!(f, "failure: {}", self.message)
        }
    }
}

/// Pending acknowledgement of a mutation.
///
/// Dropping it unawaited is fine; the mutation is not cancelled.
#[derive(Debug)]
pub struct OperationFuture {
    rx: oneshot::Receiver<OperationStatus>,
}

impl OperationFuture {
    /// Create a future together with the sender that completes it.
    pub fn channel() -> (oneshot::Sender<OperationStatus>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A future that is already complete.
    pub fn ready(status: OperationStatus) -> Self {
        let (tx, fut) = Self::channel();
        let _ = tx.send(status);
        fut
    }

    /// Wait for the acknowledgement.
    pub async fn status(self) -> OperationStatus {
        self.rx
            .await
            .unwrap_or_else(|_| OperationStatus::failure("operation abandoned before completion"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid client configuration: {0}")]
    Config(String),
    #[error("authentication failed for bucket '{0}'")]
    Auth(String),
    #[error("durability requirement cannot be met: {0}")]
    Durability(String),
    #[error("client has been shut down")]
    ShutDown,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Open a handle against the given endpoints and bucket. `props` carries
    /// backend specific tunables.
    fn connect(
        endpoints: Vec<Url>,
        bucket: &str,
        password: &str,
        props: &Properties,
    ) -> Result<Self, StoreError>
    where
        Self: Sized;

    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError>;

    /// Store `doc` under `key` only if the key does not exist yet.
    fn add(
        &self,
        key: &str,
        doc: Document,
        persist: PersistTo,
        replicate: ReplicateTo,
    ) -> Result<OperationFuture, StoreError>;

    /// Overwrite `key` only if it already exists.
    fn replace(
        &self,
        key: &str,
        doc: Document,
        persist: PersistTo,
        replicate: ReplicateTo,
    ) -> Result<OperationFuture, StoreError>;

    fn delete(
        &self,
        key: &str,
        persist: PersistTo,
        replicate: ReplicateTo,
    ) -> Result<OperationFuture, StoreError>;

    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_map_durability_levels() {
        assert_eq!(PersistTo::try_from(4u8), Ok(PersistTo::Four));
        assert_eq!(PersistTo::try_from(5u8), Err(5));
        assert_eq!(ReplicateTo::try_from(3u8), Ok(ReplicateTo::Three));
        assert_eq!(ReplicateTo::try_from(4u8), Err(4));
        assert_eq!(PersistTo::Two.nodes(), 2);
        assert_eq!(ReplicateTo::One.replicas(), 1);
    }

    #[tokio::test]
    async fn should_resolve_ready_future() {
        let fut = OperationFuture::ready(OperationStatus::success());
        assert!(fut.status().await.success);
    }

    #[tokio::test]
    async fn should_fail_future_when_sender_dropped() {
        // given
        let (tx, fut) = OperationFuture::channel();

        // when
        drop(tx);

        // then
        let status = fut.status().await;
        assert!(!status.success);
    }
}
