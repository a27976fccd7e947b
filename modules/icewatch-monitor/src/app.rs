//! Wiring: store, pipeline, scheduler, notifier, and the shutdown path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use icewatch_common::{Config, IceWatchError};
use icewatch_ingest::{
    CommunityAdapter, MicroblogAdapter, NewsAdapter, PhotoAdapter, Scheduler, SmsMapAdapter,
};
use icewatch_notify::{AlertSink, LogSink, Notifier, WebhookSink};
use icewatch_pipeline::{
    Correlator, CorrelatorConfig, EntityRecognizer, FilterStage, Gazetteer, HeuristicRecognizer,
    LocationExtractor, Pipeline,
};
use icewatch_store::Store;

/// Rows older than this are purged once a day.
const RETENTION_DAYS: i64 = 7;
const PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// How the run ended, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Completed,
    Signal,
}

pub async fn run(config: Config) -> Result<ExitReason, IceWatchError> {
    let store = Store::connect(&config.db_path).await?;

    let gazetteer = Arc::new(Gazetteer::bundled()?);
    let filter = FilterStage::new(
        &config,
        gazetteer.clone(),
        &[icewatch_ingest::adapters::news::SOURCE_NAME],
    );

    // The recognizer is an external capability; losing it degrades the
    // extractor to gazetteer-only rather than stopping the pipeline.
    let recognizer: Option<Box<dyn EntityRecognizer>> = match HeuristicRecognizer::new() {
        Ok(r) => Some(Box::new(r)),
        Err(e) => {
            warn!(error = %e, "Entity recognizer unavailable at startup");
            None
        }
    };
    let extractor = LocationExtractor::new(gazetteer.clone(), recognizer);

    let correlator = Correlator::new(CorrelatorConfig::from_config(&config), store.clone());

    let sink: Box<dyn AlertSink> = if config.dry_run {
        Box::new(LogSink)
    } else {
        Box::new(WebhookSink::new(config.webhook_url.clone()))
    };
    let notifier = Notifier::new(sink, store.clone(), config.dry_run);

    let mut pipeline = Pipeline::new(filter, extractor, correlator, notifier, store.clone());
    let restored = pipeline.warm_start().await?;
    if restored > 0 {
        info!(clusters = restored, "Warm start complete");
    }

    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut scheduler = Scheduler::new(tx, shutdown_rx.clone());
    register_adapters(&mut scheduler, &config);
    if scheduler.adapter_count() == 0 {
        return Err(IceWatchError::Config(
            "no source adapters enabled".to_string(),
        ));
    }

    let scheduler_handle = tokio::spawn(scheduler.run());
    let mut pipeline_handle = tokio::spawn(pipeline.run(rx, shutdown_rx.clone()));
    let purge_handle = tokio::spawn(purge_loop(store.clone(), shutdown_rx));

    info!("All tasks started");

    let reason;
    tokio::select! {
        _ = wait_for_signal() => {
            info!("Shutdown signal received");
            reason = ExitReason::Signal;
        }
        result = &mut pipeline_handle => {
            // The pipeline only returns early on a fatal error (store or
            // invariant) or a closed queue.
            match result {
                Ok(Ok(())) => {
                    reason = ExitReason::Completed;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Pipeline failed");
                    let _ = shutdown_tx.send(true);
                    let _ = scheduler_handle.await;
                    store.close().await;
                    return Err(e);
                }
                Err(e) => {
                    let _ = shutdown_tx.send(true);
                    let _ = scheduler_handle.await;
                    store.close().await;
                    return Err(IceWatchError::InvariantViolation(format!(
                        "pipeline task panicked: {e}"
                    )));
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    if !pipeline_handle.is_finished() {
        match pipeline_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Pipeline failed during drain");
                store.close().await;
                return Err(e);
            }
            Err(e) => warn!(error = %e, "Pipeline task did not stop cleanly"),
        }
    }
    purge_handle.abort();
    store.close().await;

    info!("Shutdown complete");
    Ok(reason)
}

fn register_adapters(scheduler: &mut Scheduler, config: &Config) {
    let adapters = &config.adapters;

    if adapters.community.enabled {
        scheduler.register(Box::new(CommunityAdapter::new(
            adapters.community_feed_url.clone(),
            adapters.community.interval_secs,
            config.max_distance_km,
        )));
    }
    if adapters.microblog.enabled && !adapters.microblog_queries.is_empty() {
        scheduler.register(Box::new(MicroblogAdapter::new(
            adapters.microblog_search_url.clone(),
            adapters.microblog_queries.clone(),
            adapters.microblog.interval_secs,
        )));
    }
    if adapters.photo.enabled && !adapters.photo_accounts.is_empty() {
        scheduler.register(Box::new(PhotoAdapter::new(
            adapters.photo_base_url.clone(),
            adapters.photo_accounts.clone(),
            adapters.photo.interval_secs,
        )));
    }
    if adapters.smsmap.enabled {
        scheduler.register(Box::new(SmsMapAdapter::new(
            adapters.smsmap_url.clone(),
            adapters.smsmap.interval_secs,
        )));
    }
    if adapters.news.enabled && !adapters.rss_feeds.is_empty() {
        scheduler.register(Box::new(NewsAdapter::new(
            adapters.rss_feeds.clone(),
            adapters.news.interval_secs,
        )));
    }
}

async fn purge_loop(store: Store, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(PURGE_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
        let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);
        match store.purge_older_than(cutoff).await {
            Ok(removed) if removed > 0 => info!(removed, "Purged old report rows"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Purge failed"),
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
