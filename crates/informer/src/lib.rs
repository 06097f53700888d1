//! Platform subscription adapter.
//!
//! Implements [`controller::CarrierSource`] over the orchestration platform's
//! list/watch API. The deployment tooling labels every carrier resource it
//! owns, so the subscription is filtered to exactly those resources; the
//! watch is re-established automatically after transport interruptions, and a
//! fresh list after an interruption is reconciled against the last known
//! state so deletions that happened while disconnected are not lost.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All platform SDK types stay inside this crate; the
//! controller sees only [`controller::Carrier`] notifications.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher::{self, watcher, Event};
use kube::{Client, Config};
use tracing::warn;

use controller::{Carrier, CarrierNotification, CarrierSource, WatchTarget};

/// Label selector of config-map carriers.
const CONFIG_MAP_SELECTOR: &str = "OWNER=TILLER";

/// Label selector of secret carriers.
const SECRET_SELECTOR: &str = "owner=helm";

/// Data key holding the release payload inside a carrier resource.
const RELEASE_DATA_KEY: &str = "release";

/// Builds a platform client from an explicit kubeconfig or the ambient
/// environment (in-cluster configuration or the default kubeconfig).
pub async fn client_for(kubeconfig_path: Option<&str>) -> anyhow::Result<Client> {
    let config = match kubeconfig_path {
        Some(path) => {
            let kubeconfig =
                Kubeconfig::read_from(path).context("read kubeconfig file")?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("load kubeconfig")?
        }
        None => Config::infer()
            .await
            .context("infer platform configuration")?,
    };
    Client::try_from(config).context("build platform client")
}

/// A [`CarrierSource`] backed by the platform watch API.
pub struct KubeCarrierSource {
    events: BoxStream<'static, Result<Event<Carrier>, watcher::Error>>,
    known: HashMap<String, Carrier>,
    init_seen: Option<HashSet<String>>,
    synced: bool,
    pending: VecDeque<CarrierNotification>,
}

impl KubeCarrierSource {
    /// Returns a source watching the configured carrier kind cluster-wide.
    pub fn new(client: Client, target: WatchTarget) -> Self {
        let events: BoxStream<'static, Result<Event<Carrier>, watcher::Error>> = match target {
            WatchTarget::ConfigMaps => {
                let api: Api<ConfigMap> = Api::all(client);
                let config = watcher::Config::default().labels(CONFIG_MAP_SELECTOR);
                watcher(api, config)
                    .map(|result| result.map(|event| project(event, carrier_from_config_map)))
                    .boxed()
            }
            WatchTarget::Secrets => {
                let api: Api<Secret> = Api::all(client);
                let config = watcher::Config::default().labels(SECRET_SELECTOR);
                watcher(api, config)
                    .map(|result| result.map(|event| project(event, carrier_from_secret)))
                    .boxed()
            }
        };
        Self::from_stream(events)
    }

    fn from_stream(
        events: BoxStream<'static, Result<Event<Carrier>, watcher::Error>>,
    ) -> Self {
        Self {
            events,
            known: HashMap::new(),
            init_seen: None,
            synced: false,
            pending: VecDeque::new(),
        }
    }

    fn ingest(&mut self, event: Event<Carrier>) {
        match event {
            Event::Init => {
                self.init_seen = Some(HashSet::new());
            }
            Event::InitApply(carrier) => {
                let key = carrier.queue_key();
                if let Some(seen) = self.init_seen.as_mut() {
                    seen.insert(key.clone());
                }
                self.known.insert(key, carrier.clone());
                self.pending.push_back(CarrierNotification::Applied(carrier));
            }
            Event::InitDone => {
                // A carrier the fresh list did not mention was deleted while
                // the subscription was down; surface it with its last known
                // state so unregistration still happens.
                if let Some(seen) = self.init_seen.take() {
                    let vanished: Vec<String> = self
                        .known
                        .keys()
                        .filter(|key| !seen.contains(*key))
                        .cloned()
                        .collect();
                    for key in vanished {
                        if let Some(carrier) = self.known.remove(&key) {
                            self.pending.push_back(CarrierNotification::Deleted(carrier));
                        }
                    }
                }
                if !self.synced {
                    self.synced = true;
                    self.pending.push_back(CarrierNotification::Synced);
                }
            }
            Event::Apply(carrier) => {
                self.known.insert(carrier.queue_key(), carrier.clone());
                self.pending.push_back(CarrierNotification::Applied(carrier));
            }
            Event::Delete(carrier) => {
                self.known.remove(&carrier.queue_key());
                self.pending.push_back(CarrierNotification::Deleted(carrier));
            }
        }
    }
}

#[async_trait]
impl CarrierSource for KubeCarrierSource {
    async fn recv(&mut self) -> anyhow::Result<Option<CarrierNotification>> {
        loop {
            if let Some(notification) = self.pending.pop_front() {
                return Ok(Some(notification));
            }
            let Some(result) = self.events.next().await else {
                return Ok(None);
            };
            match result {
                Ok(event) => self.ingest(event),
                Err(err) => {
                    // The watcher re-establishes the subscription on its own;
                    // a failed attempt only delays the next notification.
                    warn!(error = %err, "platform watch interrupted, retrying");
                }
            }
        }
    }
}

fn project<K>(event: Event<K>, to_carrier: fn(K) -> Carrier) -> Event<Carrier> {
    match event {
        Event::Init => Event::Init,
        Event::InitApply(object) => Event::InitApply(to_carrier(object)),
        Event::InitDone => Event::InitDone,
        Event::Apply(object) => Event::Apply(to_carrier(object)),
        Event::Delete(object) => Event::Delete(to_carrier(object)),
    }
}

fn carrier_from_config_map(config_map: ConfigMap) -> Carrier {
    Carrier {
        namespace: config_map.metadata.namespace.clone().unwrap_or_default(),
        name: config_map.metadata.name.clone().unwrap_or_default(),
        created_at: creation_time(&config_map.metadata),
        release_data: config_map
            .data
            .as_ref()
            .and_then(|data| data.get(RELEASE_DATA_KEY).cloned())
            .unwrap_or_default(),
    }
}

fn carrier_from_secret(secret: Secret) -> Carrier {
    Carrier {
        namespace: secret.metadata.namespace.clone().unwrap_or_default(),
        name: secret.metadata.name.clone().unwrap_or_default(),
        created_at: creation_time(&secret.metadata),
        release_data: secret
            .data
            .as_ref()
            .and_then(|data| data.get(RELEASE_DATA_KEY))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
            .unwrap_or_default(),
    }
}

fn creation_time(metadata: &ObjectMeta) -> DateTime<Utc> {
    metadata
        .creation_timestamp
        .as_ref()
        .map(|time| time.0)
        .unwrap_or(DateTime::UNIX_EPOCH)
}
