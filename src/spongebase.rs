use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use url::Url;

use crate::client::{Client, Record, Status};
use crate::codec::Encoding;
use crate::properties::Properties;
use crate::store::{DocumentStore, OperationFuture, PersistTo, ReplicateTo, StoreError};

pub const URL_PROPERTY: &str = "spongebase.url";
pub const BUCKET_PROPERTY: &str = "spongebase.bucket";
pub const PASSWORD_PROPERTY: &str = "spongebase.password";
pub const CHECKF_PROPERTY: &str = "spongebase.checkFutures";
pub const PERSIST_PROPERTY: &str = "spongebase.persistTo";
pub const REPLICATE_PROPERTY: &str = "spongebase.replicateTo";
pub const JSON_PROPERTY: &str = "spongebase.json";
pub const SCAN_PROPERTY: &str = "scanproportion";

const URL_DEFAULT: &str = "http://127.0.0.1:8091/pools";
const BUCKET_DEFAULT: &str = "volume1.kv";
const SCAN_PROPERTY_DEFAULT: &str = "0.0";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{property} must be between 0 and {max}")]
    DurabilityOutOfRange { property: &'static str, max: u8 },
    #[error("invalid value '{value}' for {property}")]
    InvalidProperty {
        property: &'static str,
        value: String,
    },
    #[error("scan operation not supported")]
    ScanUnsupported,
    #[error("could not create Spongebase client: {0}")]
    Connect(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Adapter settings parsed from the property bag.
#[derive(Debug, Clone, PartialEq)]
pub struct SpongebaseConfig {
    pub endpoints: Vec<Url>,
    pub bucket: String,
    pub password: String,
    pub check_futures: bool,
    pub encoding: Encoding,
    pub persist_to: PersistTo,
    pub replicate_to: ReplicateTo,
}

impl SpongebaseConfig {
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let endpoints = parse_endpoints(props.get_or(URL_PROPERTY, URL_DEFAULT))?;
        let bucket = props.get_or(BUCKET_PROPERTY, BUCKET_DEFAULT).to_string();
        let password = props.get_or(PASSWORD_PROPERTY, "").to_string();

        // Anything but the literal "true" turns these off.
        let check_futures = props.get_or(CHECKF_PROPERTY, "true") == "true";
        let encoding = if props.get_or(JSON_PROPERTY, "true") == "true" {
            Encoding::Json
        } else {
            Encoding::NativeMap
        };

        let persist_to = parse_persist_to(props.get_or(PERSIST_PROPERTY, "0"))?;
        let replicate_to = parse_replicate_to(props.get_or(REPLICATE_PROPERTY, "0"))?;

        let raw_scan = props.get_or(SCAN_PROPERTY, SCAN_PROPERTY_DEFAULT);
        let scan_proportion: f64 = raw_scan
            .trim()
            .parse()
            .map_err(|_| Error::InvalidProperty {
                property: SCAN_PROPERTY,
                value: raw_scan.to_string(),
            })?;
        if scan_proportion > 0.0 {
            return Err(Error::ScanUnsupported);
        }

        Ok(Self {
            endpoints,
            bucket,
            password,
            check_futures,
            encoding,
            persist_to,
            replicate_to,
        })
    }
}

fn parse_endpoints(raw: &str) -> Result<Vec<Url>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Url::parse(s).map_err(|_| Error::InvalidProperty {
                property: URL_PROPERTY,
                value: s.to_string(),
            })
        })
        .collect()
}

fn parse_level(property: &'static str, raw: &str) -> Result<u8> {
    raw.trim().parse().map_err(|_| Error::InvalidProperty {
        property,
        value: raw.to_string(),
    })
}

fn parse_persist_to(raw: &str) -> Result<PersistTo> {
    let value = parse_level(PERSIST_PROPERTY, raw)?;
    PersistTo::try_from(value).map_err(|_| Error::DurabilityOutOfRange {
        property: PERSIST_PROPERTY,
        max: 4,
    })
}

fn parse_replicate_to(raw: &str) -> Result<ReplicateTo> {
    let value = parse_level(REPLICATE_PROPERTY, raw)?;
    ReplicateTo::try_from(value).map_err(|_| Error::DurabilityOutOfRange {
        property: REPLICATE_PROPERTY,
        max: 3,
    })
}

/// Prefix the key with its table to keep record sets apart.
fn format_key(table: &str, key: &str) -> String {
    format!("{}:{}", table, key)
}

/// Workload client backed by a Spongebase bucket.
pub struct SpongebaseClient<S> {
    store: Arc<S>,
    config: SpongebaseConfig,
}

impl<S> Clone for SpongebaseClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: DocumentStore> SpongebaseClient<S> {
    pub fn new(props: &Properties) -> Result<Self> {
        let config = SpongebaseConfig::from_properties(props)?;
        debug!(
            bucket = %config.bucket,
            endpoints = config.endpoints.len(),
            check_futures = config.check_futures,
            encoding = ?config.encoding,
            persist_to = ?config.persist_to,
            replicate_to = ?config.replicate_to,
            "initializing Spongebase client"
        );
        let store = S::connect(
            config.endpoints.clone(),
            &config.bucket,
            &config.password,
            props,
        )?;
        Ok(Self {
            store: Arc::new(store),
            config,
        })
    }

    pub fn config(&self) -> &SpongebaseConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn check_future_status(&self, future: OperationFuture) -> Status {
        if !self.config.check_futures {
            return Status::Ok;
        }
        let status = future.status().await;
        if status.success {
            Status::Ok
        } else {
            debug!(%status, "operation not acknowledged");
            Status::Error
        }
    }

    async fn finish(
        &self,
        action: &str,
        key: &str,
        issued: std::result::Result<OperationFuture, StoreError>,
    ) -> Status {
        match issued {
            Ok(future) => self.check_future_status(future).await,
            Err(e) => {
                error!(key, error = %e, "Could not {} value", action);
                Status::Error
            }
        }
    }
}

#[async_trait]
impl<S: DocumentStore> Client for SpongebaseClient<S> {
    async fn read(
        &self,
        table: &str,
        key: &str,
        fields: Option<&HashSet<String>>,
        result: &mut Record,
    ) -> Status {
        let formatted_key = format_key(table, key);

        let loaded = match self.store.get(&formatted_key).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return Status::Error,
            Err(e) => {
                error!(key = %formatted_key, error = %e, "Could not read value");
                return Status::Error;
            }
        };

        match self.config.encoding.decode(&loaded, fields, result) {
            Ok(()) => Status::Ok,
            Err(e) => {
                error!(key = %formatted_key, error = %e, "Could not read value");
                Status::Error
            }
        }
    }

    async fn scan(
        &self,
        _table: &str,
        _start_key: &str,
        _record_count: usize,
        _fields: Option<&HashSet<String>>,
        _result: &mut Vec<Record>,
    ) -> Status {
        Status::Error
    }

    async fn update(&self, table: &str, key: &str, values: &Record) -> Status {
        let formatted_key = format_key(table, key);
        let doc = self.config.encoding.encode(values);
        let issued = self.store.replace(
            &formatted_key,
            doc,
            self.config.persist_to,
            self.config.replicate_to,
        );
        self.finish("update", &formatted_key, issued).await
    }

    async fn insert(&self, table: &str, key: &str, values: &Record) -> Status {
        let formatted_key = format_key(table, key);
        let doc = self.config.encoding.encode(values);
        let issued = self.store.add(
            &formatted_key,
            doc,
            self.config.persist_to,
            self.config.replicate_to,
        );
        self.finish("insert", &formatted_key, issued).await
    }

    async fn delete(&self, table: &str, key: &str) -> Status {
        let formatted_key = format_key(table, key);
        let issued = self.store.delete(
            &formatted_key,
            self.config.persist_to,
            self.config.replicate_to,
        );
        self.finish("delete", &formatted_key, issued).await
    }

    async fn cleanup(&self) {
        self.store.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, ACK_DELAY_PROPERTY, NODES_PROPERTY};
    use crate::store::Document;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs.iter().copied().collect()
    }

    fn open(pairs: &[(&str, &str)]) -> SpongebaseClient<MemoryStore> {
        SpongebaseClient::new(&props(pairs)).unwrap()
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn should_apply_defaults() {
        // when
        let config = SpongebaseConfig::from_properties(&Properties::new()).unwrap();

        // then
        assert_eq!(
            config.endpoints,
            vec![Url::parse("http://127.0.0.1:8091/pools").unwrap()]
        );
        assert_eq!(config.bucket, "volume1.kv");
        assert_eq!(config.password, "");
        assert!(config.check_futures);
        assert_eq!(config.encoding, Encoding::Json);
        assert_eq!(config.persist_to, PersistTo::Zero);
        assert_eq!(config.replicate_to, ReplicateTo::Zero);
    }

    #[test]
    fn should_only_enable_flags_on_literal_true() {
        let config = SpongebaseConfig::from_properties(&props(&[
            (CHECKF_PROPERTY, "TRUE"),
            (JSON_PROPERTY, "yes"),
        ]))
        .unwrap();

        assert!(!config.check_futures);
        assert_eq!(config.encoding, Encoding::NativeMap);
    }

    #[test]
    fn should_parse_durability_levels() {
        let config = SpongebaseConfig::from_properties(&props(&[
            (PERSIST_PROPERTY, "4"),
            (REPLICATE_PROPERTY, "3"),
        ]))
        .unwrap();

        assert_eq!(config.persist_to, PersistTo::Four);
        assert_eq!(config.replicate_to, ReplicateTo::Three);
    }

    #[test]
    fn should_reject_out_of_range_durability() {
        let err = SpongebaseConfig::from_properties(&props(&[(PERSIST_PROPERTY, "5")])).unwrap_err();
        assert_eq!(err.to_string(), "spongebase.persistTo must be between 0 and 4");

        let err =
            SpongebaseConfig::from_properties(&props(&[(REPLICATE_PROPERTY, "4")])).unwrap_err();
        assert_eq!(err.to_string(), "spongebase.replicateTo must be between 0 and 3");

        let err =
            SpongebaseConfig::from_properties(&props(&[(REPLICATE_PROPERTY, "-1")])).unwrap_err();
        assert!(matches!(err, Error::InvalidProperty { .. }));
    }

    #[test]
    fn should_reject_scan_workloads() {
        let err = SpongebaseConfig::from_properties(&props(&[(SCAN_PROPERTY, "0.05")])).unwrap_err();
        assert!(matches!(err, Error::ScanUnsupported));

        assert!(SpongebaseConfig::from_properties(&props(&[(SCAN_PROPERTY, "0")])).is_ok());
        assert!(matches!(
            SpongebaseConfig::from_properties(&props(&[(SCAN_PROPERTY, "lots")])),
            Err(Error::InvalidProperty { .. })
        ));
    }

    #[test]
    fn should_split_endpoint_list() {
        let config = SpongebaseConfig::from_properties(&props(&[(
            URL_PROPERTY,
            "http://a:8091/pools, http://b:8091/pools",
        )]))
        .unwrap();
        assert_eq!(config.endpoints.len(), 2);

        assert!(matches!(
            SpongebaseConfig::from_properties(&props(&[(URL_PROPERTY, "not a url")])),
            Err(Error::InvalidProperty { .. })
        ));
    }

    #[test]
    fn should_fail_init_when_client_cannot_connect() {
        let result = SpongebaseClient::<MemoryStore>::new(&props(&[(URL_PROPERTY, "ftp://h/")]));
        assert!(matches!(result, Err(Error::Connect(StoreError::Config(_)))));
    }

    #[test]
    fn should_namespace_keys_by_table() {
        assert_eq!(format_key("usertable", "user1"), "usertable:user1");
    }

    #[tokio::test]
    async fn should_insert_read_update_delete() {
        // given
        let client = open(&[]);
        let values = record(&[("field0", "a"), ("field1", "b")]);

        // when / then
        assert_eq!(client.insert("t", "k", &values).await, Status::Ok);
        assert!(client.store().get("t:k").await.unwrap().is_some());

        let mut result = Record::new();
        assert_eq!(client.read("t", "k", None, &mut result).await, Status::Ok);
        assert_eq!(result, values);

        let updated = record(&[("field0", "c")]);
        assert_eq!(client.update("t", "k", &updated).await, Status::Ok);
        let mut result = Record::new();
        assert_eq!(client.read("t", "k", None, &mut result).await, Status::Ok);
        assert_eq!(result, updated);

        assert_eq!(client.delete("t", "k").await, Status::Ok);
        let mut result = Record::new();
        assert_eq!(client.read("t", "k", None, &mut result).await, Status::Error);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn should_keep_tables_apart() {
        let client = open(&[]);
        let values = record(&[("field0", "a")]);

        assert_eq!(client.insert("t1", "k", &values).await, Status::Ok);
        assert_eq!(client.insert("t2", "k", &values).await, Status::Ok);
        assert_eq!(client.delete("t1", "k").await, Status::Ok);

        let mut result = Record::new();
        assert_eq!(client.read("t2", "k", None, &mut result).await, Status::Ok);
    }

    #[tokio::test]
    async fn should_report_failed_futures_when_checking() {
        let client = open(&[]);
        let values = record(&[("field0", "a")]);

        assert_eq!(client.update("t", "missing", &values).await, Status::Error);
        assert_eq!(client.delete("t", "missing").await, Status::Error);
        assert_eq!(client.insert("t", "k", &values).await, Status::Ok);
        assert_eq!(client.insert("t", "k", &values).await, Status::Error);
    }

    #[tokio::test]
    async fn should_ignore_future_outcome_when_not_checking() {
        let client = open(&[(CHECKF_PROPERTY, "false")]);
        let values = record(&[("field0", "a")]);

        assert_eq!(client.update("t", "missing", &values).await, Status::Ok);
        assert_eq!(client.delete("t", "missing").await, Status::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn should_wait_for_durable_acknowledgement() {
        let client = open(&[
            (PERSIST_PROPERTY, "2"),
            (REPLICATE_PROPERTY, "1"),
            (ACK_DELAY_PROPERTY, "1000"),
        ]);
        let values = record(&[("field0", "a")]);
        let start = tokio::time::Instant::now();

        assert_eq!(client.insert("t", "k", &values).await, Status::Ok);

        // two demanded nodes at 1ms each
        assert!(start.elapsed() >= std::time::Duration::from_millis(2));
    }

    #[tokio::test]
    async fn should_fail_when_cluster_cannot_meet_durability() {
        // even with future checking off, a rejected request is an error
        let client = open(&[
            (NODES_PROPERTY, "1"),
            (REPLICATE_PROPERTY, "1"),
            (CHECKF_PROPERTY, "false"),
        ]);
        let values = record(&[("field0", "a")]);

        assert_eq!(client.insert("t", "k", &values).await, Status::Error);
        assert_eq!(client.store().len(), 0);
    }

    #[tokio::test]
    async fn should_round_trip_native_maps() {
        let client = open(&[(JSON_PROPERTY, "false")]);
        let values = record(&[("field0", "a"), ("field1", "b")]);

        assert_eq!(client.insert("t", "k", &values).await, Status::Ok);
        assert_eq!(
            client.store().get("t:k").await.unwrap(),
            Some(Document::Map(values.clone()))
        );

        let fields: HashSet<String> = ["field1".to_string()].into_iter().collect();
        let mut result = Record::new();
        assert_eq!(client.read("t", "k", Some(&fields), &mut result).await, Status::Ok);
        assert_eq!(result, record(&[("field1", "b")]));
    }

    #[tokio::test]
    async fn should_fail_read_of_undecodable_document() {
        let client = open(&[]);
        client
            .store()
            .add(
                "t:k",
                Document::Json("not json".to_string()),
                PersistTo::Zero,
                ReplicateTo::Zero,
            )
            .unwrap();

        let mut result = Record::new();
        assert_eq!(client.read("t", "k", None, &mut result).await, Status::Error);
    }

    #[tokio::test]
    async fn should_never_scan() {
        let client = open(&[]);
        let mut result = Vec::new();
        assert_eq!(
            client.scan("t", "k", 10, None, &mut result).await,
            Status::Error
        );
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn should_fail_operations_after_cleanup() {
        let client = open(&[]);
        client.cleanup().await;

        let values = record(&[("field0", "a")]);
        assert_eq!(client.insert("t", "k", &values).await, Status::Error);
        let mut result = Record::new();
        assert_eq!(client.read("t", "k", None, &mut result).await, Status::Error);
    }
}
