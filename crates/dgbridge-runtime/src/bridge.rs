//! [`Bridge`] – one export registry, one import registry and one transform
//! listener driven by a single tick.
//!
//! The registries are named after a suffix so several bridges can coexist:
//! `rosExport<suffix>`, `rosImport<suffix>` and `rosTfListener<suffix>`.
//! Every bridge also exposes `rosTime<suffix>.time`, the wall-clock time in
//! seconds since the Unix epoch, sampled once per tick.
//! Each lives behind an `Arc<Mutex<_>>` shared with the command table; the
//! host runs commands and ticks on one loop, so the locks are never
//! contended.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dgbridge_middleware::{
    BindingRegistry, BridgeContext, ExportOptions, ImportRegistry, ImportReport, Subscription,
    TriggerReport,
};
use dgbridge_perception::{
    FallbackPolicy, FallbackResolver, LookupTime, TfBuffer, TransformListener, TransformLookup,
};
use chrono::Utc;
use dgbridge_types::{
    BridgeError, InputSignal, InternalType, Signal, SignalRef, SignalTable, Tick, WireMessage,
    WireType,
};
use tracing::{debug, info, warn};

use crate::command::{self, CommandTable, SharedExport, SharedImport, SharedListener};

/// What happened during one [`Bridge::tick`].
#[derive(Debug)]
pub struct TickReport {
    pub time: Tick,
    pub import: ImportReport,
    /// Transforms taken from the transform feed.
    pub tf_ingested: usize,
    pub export: TriggerReport,
}

impl TickReport {
    pub fn failure_count(&self) -> usize {
        self.import.failures.len() + self.export.failures.len()
    }
}

fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Bridge {
    suffix: String,
    context: BridgeContext,
    export: SharedExport,
    import: SharedImport,
    listener: SharedListener,
    tf_buffer: Arc<RwLock<TfBuffer>>,
    tf_feed: Option<Subscription>,
}

impl Bridge {
    /// A bridge with no bindable signals and default export options.
    pub fn new(context: BridgeContext, suffix: &str) -> Self {
        Self::with_signals(context, suffix, SignalTable::new(), ExportOptions::default())
    }

    /// A bridge whose export registry can bind the signals of `signals`.
    pub fn with_signals(
        context: BridgeContext,
        suffix: &str,
        signals: SignalTable,
        options: ExportOptions,
    ) -> Self {
        let export = BindingRegistry::new(
            format!("rosExport{suffix}"),
            context.clone(),
            signals,
            options,
        );
        let import = ImportRegistry::new(format!("rosImport{suffix}"), context.clone());
        let export = Arc::new(Mutex::new(export));
        command::expose(&export, Arc::new(wall_clock(format!("rosTime{suffix}.time"))));
        let tf_buffer = Arc::new(RwLock::new(TfBuffer::new()));
        let listener = TransformListener::new(format!("rosTfListener{suffix}"), tf_buffer.clone());
        info!(suffix, publish_rate_ms = options.publish_rate.as_millis() as u64, "bridge created");
        Self {
            suffix: suffix.to_string(),
            context,
            export,
            import: Arc::new(Mutex::new(import)),
            listener: Arc::new(Mutex::new(listener)),
            tf_buffer,
            tf_feed: None,
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn export_name(&self) -> String {
        format!("rosExport{}", self.suffix)
    }

    pub fn import_name(&self) -> String {
        format!("rosImport{}", self.suffix)
    }

    pub fn listener_name(&self) -> String {
        format!("rosTfListener{}", self.suffix)
    }

    /// Name of the exposed wall-clock signal.
    pub fn time_signal_name(&self) -> String {
        format!("rosTime{}.time", self.suffix)
    }

    pub fn export(&self) -> &SharedExport {
        &self.export
    }

    pub fn import(&self) -> &SharedImport {
        &self.import
    }

    pub fn listener(&self) -> &SharedListener {
        &self.listener
    }

    /// Frame graph fed by [`Self::feed_transforms`].
    pub fn tf_buffer(&self) -> &Arc<RwLock<TfBuffer>> {
        &self.tf_buffer
    }

    /// Make `signal` bindable by name through the export registry.
    pub fn expose(&self, signal: SignalRef) {
        command::expose(&self.export, signal);
    }

    /// Import `topic` as signal `name` and make it bindable for export.
    pub fn import_topic(
        &self,
        name: &str,
        topic: &str,
        internal: InternalType,
    ) -> Result<Arc<InputSignal>, BridgeError> {
        let signal = lock(&self.import).add(name, topic, internal)?;
        self.expose(signal.clone());
        Ok(signal)
    }

    /// Track the transform from `source` into `target` under `name` and make
    /// the resolved transform bindable for export.
    pub fn track_transform(
        &self,
        name: &str,
        target: &str,
        source: &str,
        policy: FallbackPolicy,
    ) -> Result<Arc<FallbackResolver>, BridgeError> {
        let resolver = lock(&self.listener).add(name, target, source, policy)?;
        self.expose(resolver.clone());
        Ok(resolver)
    }

    /// Feed the transform buffer from stamped transforms published on
    /// `topic`.
    pub fn feed_transforms(&mut self, topic: &str) -> Result<(), BridgeError> {
        let subscription = self
            .context
            .transport
            .subscribe(topic, WireType::TransformStamped)?;
        info!(suffix = %self.suffix, topic, "transform feed subscribed");
        self.tf_feed = Some(subscription);
        Ok(())
    }

    /// One scheduler step: imports first, then the transform feed, then
    /// exports, so values received this tick can be published this tick.
    pub fn tick(&mut self, time: Tick) -> TickReport {
        let import = lock(&self.import).trigger(time);
        let tf_ingested = self.drain_tf_feed();
        let export = lock(&self.export).trigger(time);

        let report = TickReport {
            time,
            import,
            tf_ingested,
            export,
        };
        if report.failure_count() > 0 {
            warn!(time, failures = report.failure_count(), "tick completed with failures");
        } else {
            debug!(
                time,
                imported = report.import.updated.len(),
                published = report.export.published.len(),
                "tick completed"
            );
        }
        report
    }

    fn drain_tf_feed(&mut self) -> usize {
        let Some(feed) = self.tf_feed.as_mut() else {
            return 0;
        };
        let Some(envelope) = feed.take_latest() else {
            return 0;
        };
        let WireMessage::TransformStamped(msg) = &envelope.msg else {
            return 0;
        };
        let ingested = self
            .tf_buffer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .ingest(msg);
        usize::from(ingested)
    }

    /// Commands for this bridge's registries.
    pub fn commands(&self) -> CommandTable {
        let mut table = CommandTable::new();
        table.register_export(&self.export_name(), &self.export);
        table.register_import(&self.import_name(), &self.import, &self.export);
        table.register_listener(&self.listener_name(), &self.listener, &self.export);
        table
    }

    /// Check that `target` and `source` are currently connected in the
    /// transform buffer.
    pub fn can_transform(&self, target: &str, source: &str) -> bool {
        self.tf_buffer
            .lookup(target, source, LookupTime::Latest)
            .is_ok()
    }
}

fn wall_clock(name: String) -> Signal<f64> {
    Signal::new(name, |_| {
        let now = Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) * 1e-9
    })
}
