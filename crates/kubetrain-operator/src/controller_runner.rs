//! Controller runner - builds the futures that make up the endpoint controller
//!
//! Returns boxed futures the caller composes, keeping construction separate
//! from the process lifecycle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{controller, reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client};
use tokio_stream::wrappers::UnboundedReceiverStream;

use kubetrain_common::crd::TrainingJob;
use kubetrain_common::MANAGED_LABEL_SELECTOR;
use kubetrain_endpoints::informer::endpoint_events;
use kubetrain_endpoints::{
    error_policy, reconcile, ChannelJobQueue, ControllerExpectations, EndpointContext,
    NotificationRouter,
};

use crate::config::ControllerArgs;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn api_for<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Build the TrainingJob endpoint controller futures
///
/// - the TrainingJob controller, fed by its own watch and by router requeues
/// - the endpoint watch, routing notifications to owning jobs
/// - a periodic sweep of dead expectation records
pub fn build_endpoint_controllers(client: Client, args: &ControllerArgs) -> Vec<ControllerFuture> {
    let namespace = args.namespace.as_deref();
    let expectations = Arc::new(
        ControllerExpectations::new().with_timeout(args.expectations_timeout()),
    );

    // Endpoint cache, filled by the router's watch stream
    let services: Api<Service> = api_for(client.clone(), namespace);
    let (endpoint_store, endpoint_writer) = reflector::store::<Service>();
    let endpoint_stream = reflector(
        endpoint_writer,
        watcher(
            services,
            WatcherConfig::default()
                .labels(MANAGED_LABEL_SELECTOR)
                .timeout(WATCH_TIMEOUT_SECS),
        ),
    )
    .default_backoff();

    let (queue, requeues) = ChannelJobQueue::channel();

    let jobs: Api<TrainingJob> = api_for(client.clone(), namespace);
    let job_controller = Controller::new(jobs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(controller::Config::default().concurrency(args.concurrency))
        .reconcile_on(UnboundedReceiverStream::new(requeues))
        .shutdown_on_signal();

    let router = NotificationRouter::new(
        Arc::clone(&expectations),
        Arc::new(job_controller.store()),
        Arc::new(queue),
    );

    let ctx = Arc::new(EndpointContext::new(
        client,
        Arc::clone(&expectations),
        endpoint_store.clone(),
        args.resync(),
    ));

    tracing::info!(
        namespace = namespace.unwrap_or("<all>"),
        concurrency = args.concurrency,
        "- TrainingJob endpoint controller"
    );

    let controller_fut: ControllerFuture = Box::pin(async move {
        // Acting on an empty endpoint cache would recreate every endpoint
        if endpoint_store.wait_until_ready().await.is_err() {
            tracing::error!("endpoint cache writer dropped before initial sync");
            return;
        }
        tracing::info!("endpoint cache synced, starting reconciliation");
        job_controller
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("TrainingJob"))
            .await;
    });

    let router_fut: ControllerFuture =
        Box::pin(async move { router.run(endpoint_events(endpoint_stream)).await });

    let sweep_period = args.expectations_timeout();
    let sweep_fut: ControllerFuture = Box::pin(async move {
        let mut interval = tokio::time::interval(sweep_period);
        loop {
            interval.tick().await;
            let removed = expectations.prune();
            if removed > 0 {
                tracing::debug!(removed, remaining = expectations.len(), "pruned expectations");
            }
        }
    });

    vec![controller_fut, router_fut, sweep_fut]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
