use std::fmt::{Debug, Display};
use std::future::Future;

use futures::StreamExt;
use k8s_openapi::serde::de::DeserializeOwned;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Resource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::metrics::{ControllerMetrics, MetricLabel};

/// A watch notification collapsed into what handlers act on.
#[derive(Clone, Debug)]
pub enum Change<K> {
    Applied(K),
    Deleted(K),
    /// Every object seen by a (re)list, delivered once the list completes.
    Resynced(Vec<K>),
}

/// Watches `api` and hands each [`Change`] to `handler` in its own task until
/// `cancel` fires. Handler failures are logged and counted, never fatal.
pub async fn dispatch_changes<K, F, Fut, E>(
    api: Api<K>,
    config: watcher::Config,
    metrics: ControllerMetrics,
    handler: F,
    cancel: CancellationToken,
) where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    F: Fn(Change<K>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: MetricLabel + Display + Send + 'static,
{
    let kind = K::kind(&()).into_owned();
    let mut stream = watcher(api, config).default_backoff().boxed();
    let mut listed = Vec::new();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => event,
        };
        let change = match event {
            None => break,
            Some(Err(e)) => {
                warn!(%e, %kind, "watch error");
                continue;
            }
            Some(Ok(watcher::Event::Init)) => {
                listed.clear();
                continue;
            }
            Some(Ok(watcher::Event::InitApply(obj))) => {
                listed.push(obj);
                continue;
            }
            Some(Ok(watcher::Event::InitDone)) => Change::Resynced(std::mem::take(&mut listed)),
            Some(Ok(watcher::Event::Apply(obj))) => Change::Applied(obj),
            Some(Ok(watcher::Event::Delete(obj))) => Change::Deleted(obj),
        };

        let work = handler(change);
        let metrics = metrics.clone();
        let kind = kind.clone();
        tokio::spawn(async move {
            let _measure = metrics.count_and_measure::<K>();
            if let Err(e) = work.await {
                metrics.count_failure::<K, E>(&e);
                error!(%e, %kind, "failed to handle change");
            }
        });
    }
    debug!(%kind, "stopped watching");
}
